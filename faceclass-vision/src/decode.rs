use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, Luma, RgbImage};

use crate::error::{Error, Result};

/// Accepts payloads with or without trailing `=` padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Where an input image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    /// Raw base64 or a `data:image/...;base64,` URI
    Base64(String),
}

impl ImageSource {
    /// Build a source from the two optional call arguments.
    ///
    /// Exactly one of them must be present and non-empty.
    pub fn from_options(base64: Option<String>, path: Option<PathBuf>) -> Result<Self> {
        let base64 = base64.filter(|s| !s.trim().is_empty());
        let path = path.filter(|p| !p.as_os_str().is_empty());

        match (base64, path) {
            (Some(data), None) => Ok(ImageSource::Base64(data)),
            (None, Some(path)) => Ok(ImageSource::Path(path)),
            (Some(_), Some(_)) => Err(Error::InputError(
                "both a base64 payload and a file path were given".into(),
            )),
            (None, None) => Err(Error::InputError(
                "neither a base64 payload nor a file path was given".into(),
            )),
        }
    }
}

/// Decode an image source into a 3-channel color image
pub fn decode_image(source: &ImageSource) -> Result<RgbImage> {
    let img = match source {
        ImageSource::Path(path) => decode_file(path)?,
        ImageSource::Base64(data) => decode_base64(data)?,
    };
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::InputError("decoded image has no pixel data".into()));
    }
    Ok(img)
}

fn decode_file(path: &Path) -> Result<RgbImage> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::DecodeError(format!("reading {}: {}", path.display(), e)))?;
    log::debug!("read {} bytes from {}", bytes.len(), path.display());
    decode_bytes(&bytes)
}

/// Strip an optional data-URI prefix and decode the base64 body
pub fn decode_base64(data: &str) -> Result<RgbImage> {
    let bytes = base64_payload(data)?;
    decode_bytes(&bytes)
}

/// Everything up to and including the first comma is treated as a data-URI header.
pub fn base64_payload(data: &str) -> Result<Vec<u8>> {
    let body = match data.find(',') {
        Some(idx) => &data[idx + 1..],
        None => data,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::InputError("empty base64 payload".into()));
    }
    LENIENT
        .decode(compact.as_bytes())
        .map_err(|e| Error::DecodeError(format!("invalid base64: {}", e)))
}

/// Decode with format sniffing and apply the EXIF orientation, so phone
/// photos come out upright.
fn decode_bytes(bytes: &[u8]) -> Result<RgbImage> {
    let unsupported =
        |e: image::ImageError| Error::DecodeError(format!("unsupported image data: {}", e));

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::DecodeError(format!("reading image header: {}", e)))?
        .into_decoder()
        .map_err(unsupported)?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        log::debug!("ignoring unreadable orientation: {}", e);
        Orientation::NoTransforms
    });

    let mut img = DynamicImage::from_decoder(decoder).map_err(unsupported)?;
    if orientation != Orientation::NoTransforms {
        log::debug!("applying exif orientation {:?}", orientation);
        img.apply_orientation(orientation);
    }
    Ok(to_color(img))
}

fn to_color(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Grayscale with the BT.601 weights OpenCV's `BGR2GRAY` uses, in the same
/// 14-bit fixed point so results match it bit for bit.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let y = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << 13)) >> 14;
        Luma([y as u8])
    })
}

/// Encode an image losslessly as PNG and return it base64 encoded
pub fn encode_base64_png(img: &RgbImage) -> Result<String> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| Error::DecodeError(format!("encoding png: {}", e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf))
}

pub fn data_uri(mime: &str, b64: &str) -> String {
    format!("data:{};base64,{}", mime, b64)
}
