use std::path::Path;

use image::{GrayImage, RgbImage};

use crate::cascade::{DetectParams, HaarCascade};
use crate::error::Result;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Overlapping region, `None` when the boxes do not overlap
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// Clip to a `width` x `height` image
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        self.intersect(&Rect::new(0, 0, width as i32, height as i32))
    }
}

/// A face that passed the two-eye check
#[derive(Debug, Clone)]
pub struct CroppedFace {
    /// Face box in source image coordinates
    pub bbox: Rect,
    pub eyes: usize,
    pub image: RgbImage,
}

/// Face and eye localisation capability.
///
/// Eye boxes are relative to the image passed in, which for crop selection is
/// the grayscale face region.
pub trait FaceEyeDetector {
    fn detect_faces(&self, gray: &GrayImage) -> Result<Vec<Rect>>;
    fn detect_eyes(&self, face_gray: &GrayImage) -> Result<Vec<Rect>>;
}

/// Viola-Jones detector backed by two OpenCV cascade files
#[derive(Debug, Clone)]
pub struct HaarFaceEyeDetector {
    pub face: HaarCascade,
    pub eye: HaarCascade,
    pub face_params: DetectParams,
    pub eye_params: DetectParams,
}

impl HaarFaceEyeDetector {
    pub fn from_files(
        face_cascade: &Path,
        eye_cascade: &Path,
        face_params: DetectParams,
        eye_params: DetectParams,
    ) -> Result<Self> {
        Ok(Self {
            face: HaarCascade::from_file(face_cascade)?,
            eye: HaarCascade::from_file(eye_cascade)?,
            face_params,
            eye_params,
        })
    }
}

impl FaceEyeDetector for HaarFaceEyeDetector {
    fn detect_faces(&self, gray: &GrayImage) -> Result<Vec<Rect>> {
        self.face.detect_multi_scale(gray, &self.face_params)
    }

    fn detect_eyes(&self, face_gray: &GrayImage) -> Result<Vec<Rect>> {
        self.eye.detect_multi_scale(face_gray, &self.eye_params)
    }
}

/// Detect faces and keep those where at least two eyes are found
pub fn crop_faces_with_two_eyes(
    detector: &dyn FaceEyeDetector,
    img: &RgbImage,
) -> Result<Vec<CroppedFace>> {
    let gray = crate::decode::to_gray(img);
    let faces = detector.detect_faces(&gray)?;
    log::debug!("{} face candidate(s)", faces.len());

    let mut cropped = Vec::new();
    for face in faces {
        let Some(bbox) = face.clamp_to(img.width(), img.height()) else {
            log::debug!("face {:?} lies outside the image, skipping", face);
            continue;
        };
        let (x, y, w, h) = (
            bbox.x as u32,
            bbox.y as u32,
            bbox.width as u32,
            bbox.height as u32,
        );

        let roi_gray = image::imageops::crop_imm(&gray, x, y, w, h).to_image();
        let eyes = detector.detect_eyes(&roi_gray)?.len();
        if eyes < 2 {
            log::debug!("face {:?} rejected: {} eye(s)", bbox, eyes);
            continue;
        }

        let roi_color = image::imageops::crop_imm(img, x, y, w, h).to_image();
        cropped.push(CroppedFace {
            bbox,
            eyes,
            image: roi_color,
        });
    }

    Ok(cropped)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    /// Returns fixed faces; the eye count is keyed on the crop width.
    pub(crate) struct FixedDetector {
        pub faces: Vec<Rect>,
        pub eyes_by_width: Vec<(u32, usize)>,
    }

    impl FaceEyeDetector for FixedDetector {
        fn detect_faces(&self, _gray: &GrayImage) -> Result<Vec<Rect>> {
            Ok(self.faces.clone())
        }

        fn detect_eyes(&self, face_gray: &GrayImage) -> Result<Vec<Rect>> {
            let n = self
                .eyes_by_width
                .iter()
                .find(|(w, _)| *w == face_gray.width())
                .map(|(_, n)| *n)
                .unwrap_or(0);
            Ok(vec![Rect::new(0, 0, 2, 2); n])
        }
    }

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 77]))
    }

    #[test]
    fn test_intersect() {
        let a = Rect::new(10, 10, 20, 20);
        let b = Rect::new(15, 15, 20, 20);
        assert_eq!(a.intersect(&b), Some(Rect::new(15, 15, 15, 15)));

        // No overlap
        let c = Rect::new(100, 100, 10, 10);
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_clamp_to() {
        let r = Rect::new(-5, 90, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(Rect::new(0, 90, 15, 10)));
        assert_eq!(Rect::new(200, 0, 5, 5).clamp_to(100, 100), None);
    }

    #[test]
    fn test_keeps_only_faces_with_two_eyes() {
        let detector = FixedDetector {
            faces: vec![
                Rect::new(0, 0, 30, 30),
                Rect::new(40, 10, 20, 25),
                Rect::new(10, 50, 25, 25),
            ],
            eyes_by_width: vec![(30, 2), (20, 1), (25, 3)],
        };
        let img = gradient(100, 100);

        let faces = crop_faces_with_two_eyes(&detector, &img).unwrap();
        assert_eq!(faces.len(), 2);

        assert_eq!(faces[0].bbox, Rect::new(0, 0, 30, 30));
        assert_eq!(faces[0].eyes, 2);
        assert_eq!(faces[0].image.dimensions(), (30, 30));

        assert_eq!(faces[1].bbox, Rect::new(10, 50, 25, 25));
        assert_eq!(faces[1].eyes, 3);
        // Crop comes from the color image at the right offset
        assert_eq!(*faces[1].image.get_pixel(0, 0), Rgb([10, 50, 77]));
    }

    #[test]
    fn test_no_faces_is_not_an_error() {
        let detector = FixedDetector {
            faces: vec![],
            eyes_by_width: vec![],
        };
        let faces = crop_faces_with_two_eyes(&detector, &gradient(20, 20)).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_face_partly_outside_is_clipped() {
        let detector = FixedDetector {
            faces: vec![Rect::new(90, 90, 20, 20)],
            eyes_by_width: vec![(10, 2)],
        };
        let faces = crop_faces_with_two_eyes(&detector, &gradient(100, 100)).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].image.dimensions(), (10, 10));
    }
}
