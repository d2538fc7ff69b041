use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use faceclass_vision::{ClassModel, Error, FeatureVector, OnnxClassifier, Result};
use log::{debug, info};
use once_cell::sync::OnceCell;

use crate::config::ArtifactPaths;
use crate::labels::LabelDictionary;

pub type ModelLoader = Box<dyn Fn(&Path) -> Result<Arc<dyn ClassModel>> + Send + Sync>;

/// Label dictionary and model shared by every classification call.
///
/// The model is loaded at most once; the dictionary is re-read on every
/// [`load`](ArtifactStore::load).
pub struct ArtifactStore {
    paths: ArtifactPaths,
    loader: ModelLoader,
    labels: RwLock<Option<Arc<LabelDictionary>>>,
    model: OnceCell<Arc<dyn ClassModel>>,
}

impl ArtifactStore {
    /// Store backed by an ONNX model file
    pub fn new(paths: ArtifactPaths) -> Self {
        Self::with_loader(
            paths,
            Box::new(|path: &Path| -> Result<Arc<dyn ClassModel>> {
                Ok(Arc::new(OnnxClassifier::from_file(path)?))
            }),
        )
    }

    pub fn with_loader(paths: ArtifactPaths, loader: ModelLoader) -> Self {
        Self {
            paths,
            loader,
            labels: RwLock::new(None),
            model: OnceCell::new(),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Read the dictionary, load the model if needed and check they agree.
    ///
    /// On failure the store is left without a dictionary, so classification
    /// fails until a later load succeeds.
    pub fn load(&self) -> Result<()> {
        info!("Loading saved artifacts...");
        let result = self.try_load();
        if result.is_err() {
            *self.labels.write().unwrap_or_else(PoisonError::into_inner) = None;
        }
        result?;
        info!("Loading saved artifacts done");
        Ok(())
    }

    fn try_load(&self) -> Result<()> {
        let labels = LabelDictionary::load(&self.paths.class_dictionary)?;

        let model = self
            .model
            .get_or_try_init(|| {
                info!("Loading model {}", self.paths.model.display());
                (self.loader)(&self.paths.model)
            })?
            .clone();

        check_pair(model.as_ref(), &labels).map_err(|e| match e {
            Error::ClassificationError(reason) => Error::resource(&self.paths.model, reason),
            other => other,
        })?;
        debug!("artifacts agree on {} classes", labels.len());

        *self.labels.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(labels));
        Ok(())
    }

    /// Current dictionary snapshot
    pub fn labels(&self) -> Result<Arc<LabelDictionary>> {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                Error::resource(&self.paths.class_dictionary, "label dictionary not loaded")
            })
    }

    pub fn model(&self) -> Result<Arc<dyn ClassModel>> {
        self.model
            .get()
            .cloned()
            .ok_or_else(|| Error::resource(&self.paths.model, "model not loaded"))
    }
}

pub(crate) fn width_mismatch(width: usize, labels: &LabelDictionary) -> String {
    format!(
        "model emits {} classes, dictionary has {}",
        width,
        labels.len()
    )
}

/// Run the model once so a mismatched pair fails at load time
fn check_pair(model: &dyn ClassModel, labels: &LabelDictionary) -> Result<()> {
    let sample = model.predict(&FeatureVector::zeros())?;
    let width = sample.probabilities.len();

    if width != labels.len() {
        return Err(Error::classification(width_mismatch(width, labels)));
    }
    labels.expect_name(sample.class_index)?;
    Ok(())
}
