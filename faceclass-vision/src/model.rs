use std::path::Path;
use std::sync::Mutex;

use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session, SessionOutputs,
    },
    value::{DynValue, Value},
};

use crate::error::{Error, Result};
use crate::features::FeatureVector;

/// Output of one model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// One probability in [0, 1] per class, in class index order
    pub probabilities: Vec<f32>,
}

/// Trained classifier over feature vectors
pub trait ClassModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction>;
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()
        .map_err(Error::classification)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(Error::classification)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available().map_err(Error::classification)? {
            ep.register(&mut builder).map_err(Error::classification)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available().map_err(Error::classification)? {
            ep.register(&mut builder).map_err(Error::classification)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Classifier exported to ONNX (e.g. scikit-learn through skl2onnx with
/// `zipmap` disabled).
///
/// Expects two outputs: the predicted label as an int64 tensor `[1]` and the
/// class probabilities as a float tensor `[1, classes]`.
pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::resource(path, "model file does not exist"));
        }
        let session = session_builder()
            .map_err(|e| Error::resource(path, e))?
            .commit_from_file(path)
            .map_err(|e| Error::resource(path, e))?;
        log::info!("loaded classifier model from {}", path.display());
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl ClassModel for OnnxClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let input = Value::from_array(features.data.clone()).map_err(Error::classification)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::classification("model session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(Error::classification)?;

        let probabilities = select_output(&outputs, PROBABILITY_OUTPUT, 1)
            .ok_or_else(|| Error::classification("model produced no probability output"))?;
        let label = select_output(&outputs, LABEL_OUTPUT, 0);
        interpret(label, probabilities)
    }
}

/// Output names used by skl2onnx classifiers
pub const LABEL_OUTPUT: &str = "label";
pub const PROBABILITY_OUTPUT: &str = "probabilities";

/// Output by name, or by position when the graph uses other names
fn select_output<'a>(
    outputs: &'a SessionOutputs<'_>,
    name: &str,
    position: usize,
) -> Option<&'a DynValue> {
    if let Some(value) = outputs.get(name) {
        return Some(value);
    }
    (position < outputs.len()).then(|| &outputs[position])
}

/// Turn the label and probability tensors into a [`Prediction`].
///
/// A missing or non-int64 label falls back to the argmax of the
/// probabilities.
fn interpret(label: Option<&DynValue>, probs: &DynValue) -> Result<Prediction> {
    let (_shape, data) = probs
        .try_extract_tensor::<f32>()
        .map_err(Error::classification)?;
    let probabilities = data.to_vec();
    if probabilities.is_empty() {
        return Err(Error::classification("empty probability output"));
    }

    let class_index = match label.map(|l| l.try_extract_tensor::<i64>()) {
        Some(Ok((_shape, data))) => {
            let raw = *data
                .first()
                .ok_or_else(|| Error::classification("empty label output"))?;
            usize::try_from(raw)
                .map_err(|_| Error::classification(format!("negative label {}", raw)))?
        }
        Some(Err(e)) => {
            log::debug!("label output is not int64 ({}), using argmax", e);
            argmax(&probabilities)
        }
        None => argmax(&probabilities),
    };

    Ok(Prediction {
        class_index,
        probabilities,
    })
}

pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best, best_v)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ort::value::Tensor;

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        // First maximum wins
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    fn probs(values: &[f32]) -> DynValue {
        Tensor::from_array(([1usize, values.len()], values.to_vec()))
            .unwrap()
            .into_dyn()
    }

    fn label(value: i64) -> DynValue {
        Tensor::from_array(([1usize], vec![value])).unwrap().into_dyn()
    }

    #[test]
    fn test_interpret_int64_label() {
        let p = interpret(Some(&label(2)), &probs(&[0.1, 0.2, 0.7])).unwrap();
        assert_eq!(p.class_index, 2);
        assert_eq!(p.probabilities, vec![0.1, 0.2, 0.7]);
    }

    #[test]
    fn test_interpret_falls_back_to_argmax() {
        // No label output at all
        let p = interpret(None, &probs(&[0.6, 0.4])).unwrap();
        assert_eq!(p.class_index, 0);

        // Label output with the wrong element type
        let float_label = probs(&[1.0]);
        let p = interpret(Some(&float_label), &probs(&[0.3, 0.7])).unwrap();
        assert_eq!(p.class_index, 1);
    }

    #[test]
    fn test_interpret_rejects_bad_outputs() {
        assert!(matches!(
            interpret(Some(&label(-1)), &probs(&[0.5, 0.5])),
            Err(Error::ClassificationError(_))
        ));
        // Probabilities must be float
        assert!(matches!(
            interpret(None, &label(1)),
            Err(Error::ClassificationError(_))
        ));
    }

    #[test]
    fn test_missing_model_file() {
        let err = OnnxClassifier::from_file(Path::new("/nonexistent/saved_model.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }
}
