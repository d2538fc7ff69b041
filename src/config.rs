use anyhow::{Context, Result};
use faceclass_vision::{DetectParams, Pipeline};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACECLASS_CONFIG_PATH").unwrap_or("./faceclass.toml"))
});

/// Locations of the pre-built label dictionary and model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub class_dictionary: PathBuf,
    pub model: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            class_dictionary: PathBuf::from("./server/artifacts/class_dictionary.json"),
            model: PathBuf::from("./server/artifacts/saved_model.onnx"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadePaths {
    pub face: PathBuf,
    pub eye: PathBuf,
}

impl Default for CascadePaths {
    fn default() -> Self {
        Self {
            face: PathBuf::from("./haarcascades/haarcascade_frontalface_default.xml"),
            eye: PathBuf::from("./haarcascades/haarcascade_eye.xml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub scale_factor: f32,
    pub min_neighbors: u32,
    /// Smallest square object size in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u32>,
}

impl DetectorConfig {
    pub fn params(&self) -> DetectParams {
        DetectParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_size.map(|s| (s, s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wavelet_level: u32,
    /// Text file holding a base64 image for smoke tests
    pub test_image: PathBuf,
    pub artifacts: ArtifactPaths,
    pub cascades: CascadePaths,
    pub face_detection: DetectorConfig,
    pub eye_detection: DetectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wavelet_level: 5,
            test_image: PathBuf::from("b64.txt"),
            artifacts: ArtifactPaths::default(),
            cascades: CascadePaths::default(),
            face_detection: DetectorConfig {
                scale_factor: 1.3,
                min_neighbors: 5,
                min_size: None,
            },
            eye_detection: DetectorConfig {
                scale_factor: 1.1,
                min_neighbors: 3,
                min_size: None,
            },
        }
    }
}

impl Config {
    /// Face/eye detection plus feature extraction as configured
    pub fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_cascades(
            &self.cascades.face,
            &self.cascades.eye,
            self.face_detection.params(),
            self.eye_detection.params(),
            self.wavelet_level,
        )
        .context("loading cascade classifiers")
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;

    for (name, det) in [("face", &cfg.face_detection), ("eye", &cfg.eye_detection)] {
        if !(det.scale_factor > 1.0) {
            anyhow::bail!(
                "{} scale_factor must be greater than 1 (got {}) in {}",
                name,
                det.scale_factor,
                path.display()
            );
        }
    }
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/faceclass.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.face_detection.scale_factor, 1.3);
        assert_eq!(cfg.face_detection.min_neighbors, 5);
        assert_eq!(cfg.wavelet_level, 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/faceclass.toml");

        let mut cfg = Config::default();
        cfg.wavelet_level = 3;
        cfg.eye_detection.min_size = Some(12);
        save_config(&cfg, Some(&path)).unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faceclass.toml");
        std::fs::write(&path, "wavelet_level = 2\n[artifacts]\nmodel = \"m.onnx\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.wavelet_level, 2);
        assert_eq!(cfg.artifacts.model, PathBuf::from("m.onnx"));
        assert_eq!(
            cfg.artifacts.class_dictionary,
            ArtifactPaths::default().class_dictionary
        );
        assert_eq!(cfg.face_detection, Config::default().face_detection);
    }

    #[test]
    fn test_rejects_bad_scale_factor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faceclass.toml");
        std::fs::write(
            &path,
            "[face_detection]\nscale_factor = 1.0\nmin_neighbors = 5\n",
        )
        .unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_detector_params() {
        let det = DetectorConfig {
            scale_factor: 1.2,
            min_neighbors: 4,
            min_size: Some(30),
        };
        let params = det.params();
        assert_eq!(params.min_size, Some((30, 30)));
        assert_eq!(params.min_neighbors, 4);
    }
}
