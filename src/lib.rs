//! 植物群落写真の「光 / 影」画素分類器の学習パイプライン

pub mod annotation;
pub mod error;
pub mod ml;
pub mod model;
pub mod types;

pub use error::{BundleError, PipelineError, TrainingStage};
pub use types::{FeatureVector, PixelClass, Rgb};
