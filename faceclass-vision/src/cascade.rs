//! Haar cascade evaluation on OpenCV cascade XML files
//!
//! Supports the `opencv-cascade-classifier` layout (`BOOST` stages, `HAAR`
//! features) that ships as `haarcascade_frontalface_default.xml` and
//! `haarcascade_eye.xml`.
//!
//! Detection follows the usual Viola-Jones pipeline:
//! - build an image pyramid, shrinking by `scale_factor` per level
//! - slide the fixed training window over every level
//! - normalise each window by its standard deviation
//! - run the boosted stages, rejecting as soon as one stage fails
//! - cluster the surviving windows and keep clusters with enough neighbours

use std::path::Path;

use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array2;

use crate::error::{Error, Result};
use crate::face::Rect;

/// Stage sums are compared with a small tolerance, like OpenCV does.
const THRESHOLD_EPS: f32 = 1e-5;

/// Similarity tolerance used when grouping raw hits
pub const GROUP_EPS: f32 = 0.2;

#[derive(Debug, Clone)]
pub struct DetectParams {
    /// Pyramid step, must be > 1
    pub scale_factor: f32,
    /// Raw hits a cluster needs (strictly more than this) to be reported
    pub min_neighbors: u32,
    /// Smallest object size in pixels (width, height)
    pub min_size: Option<(u32, u32)>,
}

impl DetectParams {
    pub fn new(scale_factor: f32, min_neighbors: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size: None,
        }
    }
}

#[derive(Debug, Clone)]
struct HaarRect {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<HaarRect>,
}

#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

/// Weak classifier: a small decision tree over Haar features
#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    trees: Vec<Tree>,
}

#[derive(Debug, Clone)]
pub struct HaarCascade {
    width: u32,
    height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path).map_err(|e| Error::resource(path, e))?;
        let cascade = parse_cascade(&xml).map_err(|reason| Error::resource(path, reason))?;
        log::debug!(
            "loaded cascade {}: {}x{} window, {} stages, {} features",
            path.display(),
            cascade.width,
            cascade.height,
            cascade.stages.len(),
            cascade.features.len()
        );
        Ok(cascade)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        parse_cascade(xml).map_err(|reason| Error::resource("<memory>", reason))
    }

    /// Training window size (width, height)
    pub fn window_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Multi-scale detection, returning boxes in `img` coordinates
    pub fn detect_multi_scale(&self, img: &GrayImage, params: &DetectParams) -> Result<Vec<Rect>> {
        if !(params.scale_factor > 1.0) {
            return Err(Error::InputError(format!(
                "scale factor must be greater than 1, got {}",
                params.scale_factor
            )));
        }

        let (img_w, img_h) = img.dimensions();
        let (min_w, min_h) = params.min_size.unwrap_or((0, 0));
        let mut hits = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let win_w = (self.width as f64 * factor).round() as u32;
            let win_h = (self.height as f64 * factor).round() as u32;
            if win_w > img_w || win_h > img_h {
                break;
            }

            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < self.width || scaled_h < self.height {
                break;
            }

            if win_w >= min_w && win_h >= min_h {
                let level = if scaled_w == img_w && scaled_h == img_h {
                    None
                } else {
                    Some(image::imageops::resize(
                        img,
                        scaled_w,
                        scaled_h,
                        FilterType::Triangle,
                    ))
                };
                let integral = Integral::new(level.as_ref().unwrap_or(img));
                let step = if factor > 2.0 { 1 } else { 2 };
                self.scan_level(&integral, factor, step, win_w, win_h, &mut hits);
            }

            factor *= params.scale_factor as f64;
        }

        log::trace!("cascade produced {} raw hits", hits.len());
        Ok(group_rectangles(&hits, params.min_neighbors, GROUP_EPS))
    }

    fn scan_level(
        &self,
        integral: &Integral,
        factor: f64,
        step: usize,
        win_w: u32,
        win_h: u32,
        hits: &mut Vec<Rect>,
    ) {
        let (w, h) = (self.width as usize, self.height as usize);
        let max_x = integral.width() - w;
        let max_y = integral.height() - h;

        for y in (0..=max_y).step_by(step) {
            for x in (0..=max_x).step_by(step) {
                if self.evaluate_window(integral, x, y) {
                    hits.push(Rect::new(
                        (x as f64 * factor).round() as i32,
                        (y as f64 * factor).round() as i32,
                        win_w as i32,
                        win_h as i32,
                    ));
                }
            }
        }
    }

    fn evaluate_window(&self, integral: &Integral, x: usize, y: usize) -> bool {
        let (w, h) = (self.width as usize, self.height as usize);

        // Variance normalisation over the window shrunk by one pixel per side
        let area = ((w - 2) * (h - 2)) as f64;
        let sum = integral.sum(x + 1, y + 1, w - 2, h - 2);
        let sq = integral.sq_sum(x + 1, y + 1, w - 2, h - 2);
        let nf = area * sq - sum * sum;
        let nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;
            for tree in &stage.trees {
                let mut idx = 0i32;
                loop {
                    let node = &tree.nodes[idx as usize];
                    let value = (self.features[node.feature].eval(integral, x, y) / nf) as f32;
                    idx = if value < node.threshold {
                        node.left
                    } else {
                        node.right
                    };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += tree.leaves[(-idx) as usize];
            }
            if stage_sum < stage.threshold - THRESHOLD_EPS {
                return false;
            }
        }
        true
    }
}

impl HaarFeature {
    fn eval(&self, integral: &Integral, ox: usize, oy: usize) -> f64 {
        self.rects
            .iter()
            .map(|r| integral.sum(ox + r.x, oy + r.y, r.w, r.h) * r.weight as f64)
            .sum()
    }
}

/// Summed-area tables for pixel values and squared pixel values
struct Integral {
    sum: Array2<f64>,
    sq: Array2<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let mut sum = Array2::<f64>::zeros((h + 1, w + 1));
        let mut sq = Array2::<f64>::zeros((h + 1, w + 1));
        let raw = img.as_raw();

        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = raw[y * w + x] as f64;
                row += v;
                row_sq += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                sq[[y + 1, x + 1]] = sq[[y, x + 1]] + row_sq;
            }
        }

        Self { sum, sq }
    }

    fn width(&self) -> usize {
        self.sum.ncols() - 1
    }

    fn height(&self) -> usize {
        self.sum.nrows() - 1
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        rect_sum(&self.sum, x, y, w, h)
    }

    fn sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        rect_sum(&self.sq, x, y, w, h)
    }
}

fn rect_sum(table: &Array2<f64>, x: usize, y: usize, w: usize, h: usize) -> f64 {
    table[[y + h, x + w]] - table[[y, x + w]] - table[[y + h, x]] + table[[y, x]]
}

fn similar(a: &Rect, b: &Rect, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    (a.x - b.x).abs() as f32 <= delta
        && (a.y - b.y).abs() as f32 <= delta
        && (a.right() - b.right()).abs() as f32 <= delta
        && (a.bottom() - b.bottom()).abs() as f32 <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar rectangles and average each cluster.
///
/// Clusters with `group_threshold` or fewer members are dropped, as are
/// clusters lying inside a stronger neighbouring cluster. A threshold of 0
/// returns the input unchanged.
pub fn group_rectangles(rects: &[Rect], group_threshold: u32, eps: f32) -> Vec<Rect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Cluster ids in order of first appearance
    let mut cluster_of_root = vec![usize::MAX; n];
    let mut totals: Vec<([f64; 4], u32)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if cluster_of_root[root] == usize::MAX {
            cluster_of_root[root] = totals.len();
            totals.push(([0.0; 4], 0));
        }
        let (acc, count) = &mut totals[cluster_of_root[root]];
        acc[0] += r.x as f64;
        acc[1] += r.y as f64;
        acc[2] += r.width as f64;
        acc[3] += r.height as f64;
        *count += 1;
    }

    let averaged: Vec<(Rect, u32)> = totals
        .iter()
        .map(|(acc, count)| {
            let s = 1.0 / *count as f64;
            (
                Rect::new(
                    (acc[0] * s).round() as i32,
                    (acc[1] * s).round() as i32,
                    (acc[2] * s).round() as i32,
                    (acc[3] * s).round() as i32,
                ),
                *count,
            )
        })
        .collect();

    let mut out = Vec::new();
    for (i, (r1, n1)) in averaged.iter().enumerate() {
        if *n1 <= group_threshold {
            continue;
        }
        let swallowed = averaged.iter().enumerate().any(|(j, (r2, n2))| {
            if i == j || *n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f32 * eps).round() as i32;
            let dy = (r2.height as f32 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.right() <= r2.right() + dx
                && r1.bottom() <= r2.bottom() + dy
                && (*n2 > (*n1).max(3) || *n1 < 3)
        });
        if !swallowed {
            out.push(*r1);
        }
    }
    out
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> std::result::Result<roxmltree::Node<'a, 'input>, String> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| format!("missing <{}> in <{}>", name, node.tag_name().name()))
}

fn items<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn text<'a>(node: roxmltree::Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}

fn numbers<T: std::str::FromStr>(node: roxmltree::Node) -> std::result::Result<Vec<T>, String> {
    text(node)
        .split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| format!("bad number {:?} in <{}>", tok, node.tag_name().name()))
        })
        .collect()
}

fn scalar<T: std::str::FromStr>(node: roxmltree::Node, name: &str) -> std::result::Result<T, String> {
    let n = child(node, name)?;
    text(n)
        .parse::<T>()
        .map_err(|_| format!("bad value {:?} in <{}>", text(n), name))
}

fn parse_cascade(xml: &str) -> std::result::Result<HaarCascade, String> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| format!("invalid xml: {}", e))?;
    let root = doc
        .descendants()
        .find(|n| n.has_tag_name("cascade"))
        .ok_or("no <cascade> element (old-style cascades are not supported)")?;

    let stage_type = text(child(root, "stageType")?);
    let feature_type = text(child(root, "featureType")?);
    if stage_type != "BOOST" || feature_type != "HAAR" {
        return Err(format!(
            "unsupported cascade type {}/{}",
            stage_type, feature_type
        ));
    }

    let width: u32 = scalar(root, "width")?;
    let height: u32 = scalar(root, "height")?;
    if width < 3 || height < 3 {
        return Err(format!("window {}x{} too small", width, height));
    }

    let mut features = Vec::new();
    for feat in items(child(root, "features")?) {
        if let Ok(tilted) = child(feat, "tilted") {
            if text(tilted) != "0" {
                return Err("tilted haar features are not supported".into());
            }
        }
        let mut rects = Vec::new();
        for r in items(child(feat, "rects")?) {
            let vals: Vec<f32> = numbers(r)?;
            if vals.len() != 5 {
                return Err(format!("feature rect needs 5 values, got {}", vals.len()));
            }
            let (x, y, w, h) = (vals[0], vals[1], vals[2], vals[3]);
            if x < 0.0 || y < 0.0 || x + w > width as f32 || y + h > height as f32 {
                return Err(format!("feature rect {:?} outside window", &vals[..4]));
            }
            rects.push(HaarRect {
                x: x as usize,
                y: y as usize,
                w: w as usize,
                h: h as usize,
                weight: vals[4],
            });
        }
        features.push(HaarFeature { rects });
    }

    let mut stages = Vec::new();
    for stage in items(child(root, "stages")?) {
        let threshold: f32 = scalar(stage, "stageThreshold")?;
        let mut trees = Vec::new();
        for weak in items(child(stage, "weakClassifiers")?) {
            let raw: Vec<f64> = numbers(child(weak, "internalNodes")?)?;
            let leaves: Vec<f32> = numbers(child(weak, "leafValues")?)?;
            if raw.is_empty() || raw.len() % 4 != 0 {
                return Err(format!("internalNodes has {} values", raw.len()));
            }

            let nodes: Vec<Node> = raw
                .chunks_exact(4)
                .map(|c| Node {
                    left: c[0] as i32,
                    right: c[1] as i32,
                    feature: c[2] as usize,
                    threshold: c[3] as f32,
                })
                .collect();

            for node in &nodes {
                if node.feature >= features.len() {
                    return Err(format!("feature index {} out of range", node.feature));
                }
                for next in [node.left, node.right] {
                    let ok = if next > 0 {
                        (next as usize) < nodes.len()
                    } else {
                        ((-next) as usize) < leaves.len()
                    };
                    if !ok {
                        return Err(format!("tree reference {} out of range", next));
                    }
                }
            }
            trees.push(Tree { nodes, leaves });
        }
        stages.push(Stage { threshold, trees });
    }

    if stages.is_empty() {
        return Err("cascade has no stages".into());
    }

    Ok(HaarCascade {
        width,
        height,
        stages,
        features,
    })
}
