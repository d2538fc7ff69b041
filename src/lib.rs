pub mod artifacts;
pub mod classify;
pub mod config;
pub mod labels;

// Re-export vision types for convenience
pub use artifacts::ArtifactStore;
pub use classify::{classify, classify_image, ClassificationResult};
pub use faceclass_vision::{decode, Error, ImageSource, Pipeline, Result};
pub use labels::LabelDictionary;
