use std::path::{Path, PathBuf};

use faceclass_vision::{
    ClassModel, Error, FaceFeatures, FeatureVector, ImageSource, Pipeline, Result,
};
use serde::Serialize;

use crate::artifacts::{width_mismatch, ArtifactStore};
use crate::labels::LabelDictionary;

/// Classification of one face
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class: String,
    /// Percentages rounded to 2 decimals, in class index order
    pub class_probability: Vec<f32>,
    pub class_dictionary: LabelDictionary,
}

/// Classify every qualifying face in the image given by exactly one of
/// `base64` or `path`.
pub fn classify(
    store: &ArtifactStore,
    pipeline: &Pipeline,
    base64: Option<String>,
    path: Option<PathBuf>,
) -> Result<Vec<ClassificationResult>> {
    let source = ImageSource::from_options(base64, path)?;
    classify_image(store, pipeline, &source)
}

pub fn classify_image(
    store: &ArtifactStore,
    pipeline: &Pipeline,
    source: &ImageSource,
) -> Result<Vec<ClassificationResult>> {
    // Fail before decoding when artifacts are missing
    let labels = store.labels()?;
    let model = store.model()?;

    let faces = pipeline.process_source(source)?;
    log::info!("classifying {} face(s)", faces.len());
    classify_faces(model.as_ref(), &labels, &faces)
}

pub fn classify_faces(
    model: &dyn ClassModel,
    labels: &LabelDictionary,
    faces: &[FaceFeatures],
) -> Result<Vec<ClassificationResult>> {
    faces
        .iter()
        .map(|face| classify_features(model, labels, &face.features))
        .collect()
}

/// Run the model once and map its output onto the dictionary
pub fn classify_features(
    model: &dyn ClassModel,
    labels: &LabelDictionary,
    features: &FeatureVector,
) -> Result<ClassificationResult> {
    let prediction = model.predict(features)?;

    if prediction.probabilities.len() != labels.len() {
        return Err(Error::classification(width_mismatch(
            prediction.probabilities.len(),
            labels,
        )));
    }
    let class = labels.expect_name(prediction.class_index)?.to_string();
    log::debug!("predicted {} (index {})", class, prediction.class_index);

    Ok(ClassificationResult {
        class,
        class_probability: to_percentages(&prediction.probabilities),
        class_dictionary: labels.clone(),
    })
}

/// Probabilities in [0, 1] → percentages rounded to 2 decimals
pub fn to_percentages(probabilities: &[f32]) -> Vec<f32> {
    probabilities
        .iter()
        .map(|&p| ((p as f64 * 100.0 * 100.0).round() / 100.0) as f32)
        .collect()
}

/// Read a text file holding a pre-encoded base64 test image
pub fn get_b64_test_image(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::resource(path, e))
}
