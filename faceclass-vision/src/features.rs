use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array2;

use crate::error::{Error, Result};
use crate::wavelet::WaveletTransform;

/// Both branches are resized to this square before flattening
pub const FEATURE_SIDE: u32 = 32;
pub const RAW_LEN: usize = (FEATURE_SIDE * FEATURE_SIDE * 3) as usize;
pub const WAVELET_LEN: usize = (FEATURE_SIDE * FEATURE_SIDE) as usize;
pub const FEATURE_LEN: usize = RAW_LEN + WAVELET_LEN;

/// Same filter for the raw and wavelet branches
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Single-row classifier input of shape `(1, FEATURE_LEN)`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub data: Array2<f32>,
}

impl FeatureVector {
    pub fn from_vec(values: Vec<f32>) -> Result<Self> {
        if values.len() != FEATURE_LEN {
            return Err(Error::classification(format!(
                "feature vector must have {} values, got {}",
                FEATURE_LEN,
                values.len()
            )));
        }
        Ok(Self {
            data: Array2::from_shape_vec((1, FEATURE_LEN), values)?,
        })
    }

    pub fn zeros() -> Self {
        Self {
            data: Array2::zeros((1, FEATURE_LEN)),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn raw_part(&self) -> &[f32] {
        &self.as_slice()[..RAW_LEN]
    }

    pub fn wavelet_part(&self) -> &[f32] {
        &self.as_slice()[RAW_LEN..]
    }

    pub fn as_slice(&self) -> &[f32] {
        // Built from a Vec in standard layout
        self.data.as_slice().unwrap_or(&[])
    }
}

/// Build the classifier input for one face crop.
///
/// Raw pixels are flattened row-major with channels in B, G, R order,
/// followed by the wavelet image of the full-resolution crop. No scaling is
/// applied, values stay in [0, 255].
pub fn assemble(crop: &RgbImage, wavelet: &dyn WaveletTransform) -> Result<FeatureVector> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(Error::classification("cannot build features from an empty crop"));
    }

    let mut values = Vec::with_capacity(FEATURE_LEN);

    let raw = image::imageops::resize(crop, FEATURE_SIDE, FEATURE_SIDE, RESIZE_FILTER);
    for pixel in raw.pixels() {
        let [r, g, b] = pixel.0;
        values.extend([b as f32, g as f32, r as f32]);
    }

    let transformed = wavelet.transform(crop)?;
    if transformed.dimensions() != crop.dimensions() {
        return Err(Error::classification(format!(
            "wavelet changed the crop size from {:?} to {:?}",
            crop.dimensions(),
            transformed.dimensions()
        )));
    }
    let scaled = image::imageops::resize(&transformed, FEATURE_SIDE, FEATURE_SIDE, RESIZE_FILTER);
    values.extend(scaled.as_raw().iter().map(|&v| v as f32));

    FeatureVector::from_vec(values)
}
