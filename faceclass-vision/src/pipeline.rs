use std::path::Path;

use image::RgbImage;

use crate::cascade::DetectParams;
use crate::decode::{self, ImageSource};
use crate::error::Result;
use crate::face::{self, CroppedFace, FaceEyeDetector, HaarFaceEyeDetector};
use crate::features::{self, FeatureVector};
use crate::wavelet::{HaarWavelet, WaveletTransform};

/// A qualifying face and its classifier input
#[derive(Debug, Clone)]
pub struct FaceFeatures {
    pub face: CroppedFace,
    pub features: FeatureVector,
}

/// Full pipeline: decode → detect faces with two eyes → crop → features
pub struct Pipeline {
    pub detector: Box<dyn FaceEyeDetector + Send + Sync>,
    pub wavelet: Box<dyn WaveletTransform + Send + Sync>,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn FaceEyeDetector + Send + Sync>,
        wavelet: Box<dyn WaveletTransform + Send + Sync>,
    ) -> Self {
        Self { detector, wavelet }
    }

    /// Haar cascades from disk plus the default Haar wavelet
    pub fn from_cascades(
        face_cascade: &Path,
        eye_cascade: &Path,
        face_params: DetectParams,
        eye_params: DetectParams,
        wavelet_level: u32,
    ) -> Result<Self> {
        let detector =
            HaarFaceEyeDetector::from_files(face_cascade, eye_cascade, face_params, eye_params)?;
        Ok(Self::new(
            Box::new(detector),
            Box::new(HaarWavelet {
                level: wavelet_level,
            }),
        ))
    }

    /// Feature vectors for every qualifying face, in detection order
    pub fn process_image(&self, img: &RgbImage) -> Result<Vec<FaceFeatures>> {
        let faces = face::crop_faces_with_two_eyes(self.detector.as_ref(), img)?;
        log::debug!("{} face(s) with two eyes", faces.len());

        faces
            .into_iter()
            .map(|face| {
                let features = features::assemble(&face.image, self.wavelet.as_ref())?;
                Ok(FaceFeatures { face, features })
            })
            .collect()
    }

    /// Decode and process in one step
    pub fn process_source(&self, source: &ImageSource) -> Result<Vec<FaceFeatures>> {
        let img = decode::decode_image(source)?;
        log::debug!("decoded {}x{} image", img.width(), img.height());
        self.process_image(&img)
    }
}
