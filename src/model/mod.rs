pub mod config;
pub mod model_bundle;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, AssemblySettings, ClassifierSettings, PathSettings, TrainingSettings};
pub use model_bundle::ModelBundle;
pub use model_metadata::{BundleManifest, BUNDLE_FORMAT_VERSION};
pub use model_storage::{bundle_path, load_bundle, load_manifest, print_manifest_info, save_bundle};
