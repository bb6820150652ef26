pub mod dataset;
pub mod evaluation;
pub mod features;
pub mod gbdt;
pub mod inference;
pub mod preprocessing;
pub mod training;

pub use dataset::{assemble_dataset, AssemblyReport, Dataset, SkipReason, SkippedImage};
pub use evaluation::{ClassMetrics, EvaluationReport};
pub use features::{extract_features, pixel_features, sanitize_features};
pub use gbdt::GradientBoostedTrees;
pub use inference::PixelClassifier;
pub use preprocessing::{ArtifactKind, LabelEncoder, StandardScaler};
pub use training::{run_training_pipeline, stratified_split, train_model, PipelineSummary, TrainingOutcome};
