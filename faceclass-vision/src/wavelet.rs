//! Multi-level 2-D Haar wavelet used as an edge channel
//!
//! The crop is converted to grayscale, scaled to [0, 1] and decomposed
//! `level` times. The coarsest approximation band is zeroed before the
//! inverse transform, which leaves only the detail (edge) energy. The result
//! is scaled by 255 and wrapped into a byte, and has the same size as the
//! input.
//!
//! Odd lengths are extended by repeating the last sample, so every level
//! produces `ceil(n / 2)` coefficients and reconstruction drops the padding.

use std::f32::consts::FRAC_1_SQRT_2;

use image::{GrayImage, RgbImage};
use ndarray::Array2;

use crate::decode;
use crate::error::{Error, Result};

/// Image → same-sized single channel transform
pub trait WaveletTransform {
    fn transform(&self, img: &RgbImage) -> Result<GrayImage>;
}

/// Haar ("db1") decomposition with the approximation band removed
#[derive(Debug, Clone, Copy)]
pub struct HaarWavelet {
    pub level: u32,
}

impl Default for HaarWavelet {
    fn default() -> Self {
        Self { level: 5 }
    }
}

impl WaveletTransform for HaarWavelet {
    fn transform(&self, img: &RgbImage) -> Result<GrayImage> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::classification("wavelet input is empty"));
        }

        let gray = decode::to_gray(img);
        let plane = Array2::from_shape_vec(
            (h as usize, w as usize),
            gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        )?;

        let mut pyramid = decompose(plane, self.level);
        pyramid.approx.fill(0.0);
        let restored = reconstruct(pyramid);

        // Truncate, then wrap modulo 256 like a numpy uint8 cast
        let pixels: Vec<u8> = restored
            .iter()
            .map(|&v| (v * 255.0) as i64 as u8)
            .collect();
        GrayImage::from_raw(w, h, pixels)
            .ok_or_else(|| Error::classification("wavelet output has the wrong size"))
    }
}

/// Detail bands of one decomposition level
struct Level {
    /// Size of the input to this level (rows, cols)
    dim: (usize, usize),
    lh: Array2<f32>,
    hl: Array2<f32>,
    hh: Array2<f32>,
}

struct Pyramid {
    approx: Array2<f32>,
    /// Finest level first
    levels: Vec<Level>,
}

fn decompose(plane: Array2<f32>, level: u32) -> Pyramid {
    let mut approx = plane;
    let mut levels = Vec::new();

    for _ in 0..level {
        let (rows, cols) = approx.dim();
        if rows < 2 || cols < 2 {
            break;
        }
        let (lo, hi) = analyze_rows(&approx);
        let (ll, lh) = analyze_cols(&lo);
        let (hl, hh) = analyze_cols(&hi);
        levels.push(Level {
            dim: (rows, cols),
            lh,
            hl,
            hh,
        });
        approx = ll;
    }

    Pyramid { approx, levels }
}

fn reconstruct(pyramid: Pyramid) -> Array2<f32> {
    let mut approx = pyramid.approx;
    for level in pyramid.levels.into_iter().rev() {
        let (rows, cols) = level.dim;
        let lo = synthesize_cols(&approx, &level.lh, rows);
        let hi = synthesize_cols(&level.hl, &level.hh, rows);
        approx = synthesize_rows(&lo, &hi, cols);
    }
    approx
}

fn analyze_rows(x: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (rows, cols) = x.dim();
    let half = (cols + 1) / 2;
    let mut lo = Array2::zeros((rows, half));
    let mut hi = Array2::zeros((rows, half));

    for r in 0..rows {
        for k in 0..half {
            let a = x[[r, 2 * k]];
            let b = if 2 * k + 1 < cols { x[[r, 2 * k + 1]] } else { a };
            lo[[r, k]] = (a + b) * FRAC_1_SQRT_2;
            hi[[r, k]] = (a - b) * FRAC_1_SQRT_2;
        }
    }
    (lo, hi)
}

fn synthesize_rows(lo: &Array2<f32>, hi: &Array2<f32>, cols: usize) -> Array2<f32> {
    let (rows, half) = lo.dim();
    let mut x = Array2::zeros((rows, cols));

    for r in 0..rows {
        for k in 0..half {
            let (l, h) = (lo[[r, k]], hi[[r, k]]);
            x[[r, 2 * k]] = (l + h) * FRAC_1_SQRT_2;
            if 2 * k + 1 < cols {
                x[[r, 2 * k + 1]] = (l - h) * FRAC_1_SQRT_2;
            }
        }
    }
    x
}

fn analyze_cols(x: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (lo, hi) = analyze_rows(&x.t().to_owned());
    (lo.reversed_axes(), hi.reversed_axes())
}

fn synthesize_cols(lo: &Array2<f32>, hi: &Array2<f32>, rows: usize) -> Array2<f32> {
    synthesize_rows(&lo.t().to_owned(), &hi.t().to_owned(), rows).reversed_axes()
}
