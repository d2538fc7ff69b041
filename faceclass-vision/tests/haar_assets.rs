use anyhow::Result;
use faceclass_vision::{DetectParams, HaarCascade, Pipeline, FEATURE_LEN};
use std::path::{Path, PathBuf};

const FACE_CASCADE: &str = "haarcascade_frontalface_default.xml";
const EYE_CASCADE: &str = "haarcascade_eye.xml";

const CASCADE_DIRS: [&str; 4] = [
    "../haarcascades",
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
];

const TEST_IMAGES: [&str; 2] = ["../test_images/face1.jpg", "../test_images/face2.jpg"];

/// First directory holding `name`, repo copy before system installs
fn find_cascade(name: &str) -> Option<PathBuf> {
    CASCADE_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|p| p.exists())
}

fn stock_cascades() -> Option<(PathBuf, PathBuf)> {
    Some((find_cascade(FACE_CASCADE)?, find_cascade(EYE_CASCADE)?))
}

/// Stock OpenCV cascades parse with their training window sizes
#[test]
fn test_stock_cascades_parse() -> Result<()> {
    env_logger::try_init().ok();

    for (name, window) in [(FACE_CASCADE, (24, 24)), (EYE_CASCADE, (20, 20))] {
        let Some(path) = find_cascade(name) else {
            eprintln!("Skipping: {} not found", name);
            continue;
        };
        let cascade = HaarCascade::from_file(&path)?;
        assert_eq!(cascade.window_size(), window);
        assert!(cascade.stage_count() > 0);
        println!("✓ {} -> {} stages", path.display(), cascade.stage_count());
    }
    Ok(())
}

/// Every face found in the sample images yields a full feature vector
#[test]
fn test_stock_cascades_on_sample_images() -> Result<()> {
    env_logger::try_init().ok();

    let Some((face, eye)) = stock_cascades() else {
        eprintln!("Skipping test: cascades not found");
        return Ok(());
    };

    let pipeline = Pipeline::from_cascades(
        &face,
        &eye,
        DetectParams::new(1.3, 5),
        DetectParams::new(1.1, 3),
        5,
    )?;

    for img_path in &TEST_IMAGES {
        let path = Path::new(img_path);
        if !path.exists() {
            eprintln!("Skipping {}: file not found", img_path);
            continue;
        }

        let img = image::open(path)?.to_rgb8();
        let faces = pipeline.process_image(&img)?;
        println!("✓ {} -> {} face(s) with two eyes", img_path, faces.len());

        for f in &faces {
            assert!(f.face.eyes >= 2);
            assert!(f.face.bbox.right() <= img.width() as i32);
            assert!(f.face.bbox.bottom() <= img.height() as i32);
            assert_eq!(f.features.len(), FEATURE_LEN);
        }
    }
    Ok(())
}

/// The built-in evaluator checked against OpenCV's `CascadeClassifier`
#[cfg(feature = "opencv")]
mod against_opencv {
    use super::*;
    use faceclass_vision::{FaceEyeDetector, HaarFaceEyeDetector, OpenCvFaceEyeDetector, Rect};
    use image::{GrayImage, Luma};

    /// Single-stump cascade firing when the lower half of a `size` window is
    /// brighter than the upper half, in the layout OpenCV's loader expects
    fn edge_cascade(size: u32) -> String {
        format!(
            r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>{s}</height>
  <width>{s}</width>
  <stageParams><maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams><maxCatCount>0</maxCatCount><featSize>1</featSize></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 0.1</internalNodes>
          <leafValues>-1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 {s} {s} -1.</_>
        <_>0 {h} {s} {h} 2.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#,
            s = size,
            h = size / 2
        )
    }

    fn block_image() -> GrayImage {
        GrayImage::from_fn(120, 120, |x, y| {
            if (20..100).contains(&x) && (40..80).contains(&y) {
                Luma([200])
            } else {
                Luma([0])
            }
        })
    }

    fn iou(a: &Rect, b: &Rect) -> f32 {
        let Some(i) = a.intersect(b) else {
            return 0.0;
        };
        let inter = (i.width * i.height) as f32;
        let union = (a.width * a.height + b.width * b.height) as f32 - inter;
        inter / union
    }

    /// Share of `expected` boxes with a close match in `found`
    fn recall(expected: &[Rect], found: &[Rect]) -> f32 {
        if expected.is_empty() {
            return 1.0;
        }
        let matched = expected
            .iter()
            .filter(|e| found.iter().any(|f| iou(e, f) > 0.5))
            .count();
        matched as f32 / expected.len() as f32
    }

    fn detectors(
        face: &Path,
        eye: &Path,
        face_params: DetectParams,
        eye_params: DetectParams,
    ) -> Result<(HaarFaceEyeDetector, OpenCvFaceEyeDetector)> {
        Ok((
            HaarFaceEyeDetector::from_files(face, eye, face_params.clone(), eye_params.clone())?,
            OpenCvFaceEyeDetector::from_files(face, eye, face_params, eye_params)?,
        ))
    }

    #[test]
    fn test_raw_hits_match_opencv() -> Result<()> {
        env_logger::try_init().ok();
        let dir = tempfile::tempdir()?;
        let face = dir.path().join("face.xml");
        let eye = dir.path().join("eye.xml");
        std::fs::write(&face, edge_cascade(20))?;
        std::fs::write(&eye, edge_cascade(6))?;

        // One pyramid level and no grouping, so both return every window hit
        let params = DetectParams::new(20.0, 0);
        let (ours, reference) = detectors(&face, &eye, params.clone(), params)?;

        let img = block_image();
        let expected = reference.detect_faces(&img)?;
        let found = ours.detect_faces(&img)?;
        println!("✓ opencv {} hits, built-in {}", expected.len(), found.len());

        assert!(!expected.is_empty());
        assert!(recall(&expected, &found) >= 0.9);
        assert!(recall(&found, &expected) >= 0.9);
        Ok(())
    }

    #[test]
    fn test_stock_cascades_match_opencv() -> Result<()> {
        env_logger::try_init().ok();

        let Some((face, eye)) = stock_cascades() else {
            eprintln!("Skipping test: cascades not found");
            return Ok(());
        };
        let (ours, reference) = detectors(
            &face,
            &eye,
            DetectParams::new(1.3, 5),
            DetectParams::new(1.1, 3),
        )?;

        for img_path in &TEST_IMAGES {
            let path = Path::new(img_path);
            if !path.exists() {
                eprintln!("Skipping {}: file not found", img_path);
                continue;
            }
            let rgb = image::open(path)?.to_rgb8();
            let gray = faceclass_vision::decode::to_gray(&rgb);

            let expected = reference.detect_faces(&gray)?;
            let found = ours.detect_faces(&gray)?;
            println!(
                "✓ {} -> opencv {} face(s), built-in {}",
                img_path,
                expected.len(),
                found.len()
            );
            assert!(recall(&expected, &found) >= 0.8);
        }
        Ok(())
    }
}
