pub mod annotation_file;
pub mod rasterizer;

pub use annotation_file::{class_for_label, AnnotationFile, Shape, LIGHT_LABELS, SHADOW_LABELS};
pub use rasterizer::{rasterize, ClassMask};
