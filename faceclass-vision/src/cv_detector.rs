//! Face and eye detection through OpenCV's own `CascadeClassifier`.
//!
//! Enabled with the `opencv` feature. It reads the same cascade files and
//! takes the same [`DetectParams`] as [`HaarFaceEyeDetector`], which makes it
//! a reference for the built-in evaluator.
//!
//! [`HaarFaceEyeDetector`]: crate::face::HaarFaceEyeDetector

use std::path::Path;
use std::sync::Mutex;

use image::GrayImage;
use opencv::core::{self, Mat, Scalar, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;

use crate::cascade::DetectParams;
use crate::error::{Error, Result};
use crate::face::{FaceEyeDetector, Rect};

pub struct OpenCvFaceEyeDetector {
    // detect_multi_scale takes &mut self
    face: Mutex<CascadeClassifier>,
    eye: Mutex<CascadeClassifier>,
    pub face_params: DetectParams,
    pub eye_params: DetectParams,
}

impl OpenCvFaceEyeDetector {
    pub fn from_files(
        face_cascade: &Path,
        eye_cascade: &Path,
        face_params: DetectParams,
        eye_params: DetectParams,
    ) -> Result<Self> {
        Ok(Self {
            face: Mutex::new(load_classifier(face_cascade)?),
            eye: Mutex::new(load_classifier(eye_cascade)?),
            face_params,
            eye_params,
        })
    }
}

fn load_classifier(path: &Path) -> Result<CascadeClassifier> {
    let classifier = CascadeClassifier::new(&path.to_string_lossy())
        .map_err(|e| Error::resource(path, e))?;
    if classifier.empty().map_err(|e| Error::resource(path, e))? {
        return Err(Error::resource(path, "cascade classifier is empty"));
    }
    log::debug!("opencv cascade loaded from {}", path.display());
    Ok(classifier)
}

/// Copy a grayscale buffer into a single-channel `Mat`
fn to_mat(gray: &GrayImage) -> Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        gray.height() as i32,
        gray.width() as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )
    .map_err(Error::classification)?;
    mat.data_bytes_mut()
        .map_err(Error::classification)?
        .copy_from_slice(gray.as_raw());
    Ok(mat)
}

fn detect(
    classifier: &Mutex<CascadeClassifier>,
    gray: &GrayImage,
    params: &DetectParams,
) -> Result<Vec<Rect>> {
    if gray.width() == 0 || gray.height() == 0 {
        return Ok(Vec::new());
    }
    let mat = to_mat(gray)?;
    let (min_w, min_h) = params.min_size.unwrap_or((0, 0));

    let mut found = Vector::<core::Rect>::new();
    let mut classifier = classifier
        .lock()
        .map_err(|_| Error::classification("opencv cascade lock poisoned"))?;
    classifier
        .detect_multi_scale(
            &mat,
            &mut found,
            params.scale_factor as f64,
            params.min_neighbors as i32,
            0,
            Size::new(min_w as i32, min_h as i32),
            Size::new(0, 0),
        )
        .map_err(Error::classification)?;

    Ok(found
        .iter()
        .map(|r| Rect::new(r.x, r.y, r.width, r.height))
        .collect())
}

impl FaceEyeDetector for OpenCvFaceEyeDetector {
    fn detect_faces(&self, gray: &GrayImage) -> Result<Vec<Rect>> {
        detect(&self.face, gray, &self.face_params)
    }

    fn detect_eyes(&self, face_gray: &GrayImage) -> Result<Vec<Rect>> {
        detect(&self.eye, face_gray, &self.eye_params)
    }
}
