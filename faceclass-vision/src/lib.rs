pub mod cascade;
#[cfg(feature = "opencv")]
pub mod cv_detector;
pub mod decode;
pub mod error;
pub mod face;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod wavelet;

// Re-export commonly used types
pub use cascade::{DetectParams, HaarCascade};
#[cfg(feature = "opencv")]
pub use cv_detector::OpenCvFaceEyeDetector;
pub use decode::ImageSource;
pub use error::{Error, Result};
pub use face::{CroppedFace, FaceEyeDetector, HaarFaceEyeDetector, Rect};
pub use features::{FeatureVector, FEATURE_LEN};
pub use model::{ClassModel, OnnxClassifier, Prediction};
pub use pipeline::{FaceFeatures, Pipeline};
pub use wavelet::{HaarWavelet, WaveletTransform};
