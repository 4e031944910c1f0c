//! Viola–Jones Haar cascade classifier.
//!
//! Reads OpenCV's `opencv-cascade-classifier` XML format (BOOST stages over
//! HAAR features) and runs a sliding-window detection over an image pyramid,
//! followed by OpenCV-compatible rectangle grouping.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

/// Relative tolerance used when clustering overlapping hits.
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0} (set ROLLCALL_CASCADE_PATH to haarcascade_frontalface_default.xml)")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("missing element <{0}>")]
    MissingElement(&'static str),
    #[error("invalid number {value:?} in <{element}>")]
    InvalidNumber { element: &'static str, value: String },
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Parameters of one multi-scale detection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    /// Pyramid step between consecutive scales; must be > 1.
    pub scale_factor: f64,
    /// Hits a cluster needs beyond this count to be reported.
    pub min_neighbors: usize,
    /// Smallest reported window (width, height) in source pixels.
    pub min_size: (u32, u32),
}

impl CascadeParams {
    pub fn new(scale_factor: f64, min_neighbors: usize, min_size: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size: (min_size, min_size),
        }
    }
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

impl HaarFeature {
    fn value(&self, integral: &IntegralImage, ox: u32, oy: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * integral.sum(ox + r.x, oy + r.y, r.width, r.height) as f64)
            .sum()
    }
}

#[derive(Debug, Clone)]
struct TreeNode {
    /// Child index when positive, negated leaf index otherwise.
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A boosted Haar cascade loaded from OpenCV XML.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml_str(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window,
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse a cascade from OpenCV XML text.
    pub fn from_xml_str(xml: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc
            .root_element()
            .children()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or(CascadeError::MissingElement("cascade"))?;

        let stage_type = text(child(root, "stageType")?);
        if stage_type != "BOOST" {
            return Err(CascadeError::Unsupported(format!("stage type {stage_type}")));
        }
        let feature_type = text(child(root, "featureType")?);
        if feature_type != "HAAR" {
            return Err(CascadeError::Unsupported(format!("feature type {feature_type}")));
        }

        let width: u32 = parse_one(child(root, "width")?, "width")?;
        let height: u32 = parse_one(child(root, "height")?, "height")?;
        if width < 3 || height < 3 {
            return Err(CascadeError::Malformed(format!("window {width}x{height} is too small")));
        }

        let stages = items(child(root, "stages")?)
            .map(parse_stage)
            .collect::<Result<Vec<_>, _>>()?;
        let features = items(child(root, "features")?)
            .map(parse_feature)
            .collect::<Result<Vec<_>, _>>()?;

        let cascade = Self {
            window: (width, height),
            stages,
            features,
        };
        cascade.validate()?;
        Ok(cascade)
    }

    /// Base detection window (width, height).
    pub fn window(&self) -> (u32, u32) {
        self.window
    }

    /// Run a full multi-scale detection and group the raw hits.
    pub fn detect_multi_scale(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<FaceRegion> {
        let hits = self.detect_ungrouped(gray, params);
        let grouped = group_rectangles(&hits, params.min_neighbors, GROUP_EPS);
        tracing::trace!(
            scale_factor = params.scale_factor,
            raw = hits.len(),
            grouped = grouped.len(),
            "cascade pass"
        );
        grouped
    }

    /// Raw window hits in source coordinates, before grouping.
    fn detect_ungrouped(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<FaceRegion> {
        let (img_w, img_h) = gray.dimensions();
        let (base_w, base_h) = self.window;
        let mut hits = Vec::new();

        for factor in self.pyramid_factors(img_w, img_h, params) {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            let scaled: Cow<'_, GrayImage> = if scaled_w == img_w && scaled_h == img_h {
                Cow::Borrowed(gray)
            } else {
                Cow::Owned(imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle))
            };

            let integral = IntegralImage::new(&scaled);
            let step = if factor > 2.0 { 1 } else { 2 };
            let win_w = (base_w as f64 * factor).round() as i32;
            let win_h = (base_h as f64 * factor).round() as i32;

            for y in (0..=scaled_h - base_h).step_by(step) {
                for x in (0..=scaled_w - base_w).step_by(step) {
                    if self.evaluate_window(&integral, x, y) {
                        hits.push(FaceRegion::new(
                            (x as f64 * factor).round() as i32,
                            (y as f64 * factor).round() as i32,
                            win_w,
                            win_h,
                        ));
                    }
                }
            }
        }

        hits
    }

    /// Pyramid factors `1, s, s², …` whose window fits the image and meets `min_size`.
    fn pyramid_factors(&self, img_w: u32, img_h: u32, params: &CascadeParams) -> Vec<f64> {
        let mut factors = Vec::new();
        if params.scale_factor <= 1.0 {
            tracing::warn!(scale_factor = params.scale_factor, "scale factor must exceed 1.0");
            return factors;
        }

        let (base_w, base_h) = self.window;
        let mut factor = 1.0f64;
        loop {
            let win_w = (base_w as f64 * factor).round() as u32;
            let win_h = (base_h as f64 * factor).round() as u32;
            if win_w > img_w || win_h > img_h {
                break;
            }
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < base_w || scaled_h < base_h {
                break;
            }
            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                factors.push(factor);
            }
            factor *= params.scale_factor;
        }
        factors
    }

    /// Evaluate every stage at one window position of the scaled image.
    fn evaluate_window(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let (base_w, base_h) = self.window;

        // Variance normalization over the inner window, as OpenCV does.
        let area = ((base_w - 2) * (base_h - 2)) as f64;
        let sum = integral.sum(x + 1, y + 1, base_w - 2, base_h - 2) as f64;
        let sq_sum = integral.sq_sum(x + 1, y + 1, base_w - 2, base_h - 2) as f64;
        let nf = area * sq_sum - sum * sum;
        let nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut total = 0.0f64;
            for classifier in &stage.classifiers {
                let mut idx = 0i32;
                loop {
                    let node = &classifier.nodes[idx as usize];
                    let value = self.features[node.feature].value(integral, x, y) / nf;
                    idx = if value < node.threshold { node.left } else { node.right };
                    if idx <= 0 {
                        break;
                    }
                }
                total += classifier.leaves[(-idx) as usize];
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }

    /// Check that every index in the trees and every rectangle stays in range.
    fn validate(&self) -> Result<(), CascadeError> {
        if self.stages.is_empty() {
            return Err(CascadeError::Malformed("cascade has no stages".into()));
        }
        for (s, stage) in self.stages.iter().enumerate() {
            for classifier in &stage.classifiers {
                if classifier.nodes.is_empty() {
                    return Err(CascadeError::Malformed(format!("stage {s}: empty weak classifier")));
                }
                for node in &classifier.nodes {
                    if node.feature >= self.features.len() {
                        return Err(CascadeError::Malformed(format!(
                            "stage {s}: feature index {} out of range",
                            node.feature
                        )));
                    }
                    for link in [node.left, node.right] {
                        let in_range = if link > 0 {
                            (link as usize) < classifier.nodes.len()
                        } else {
                            ((-link) as usize) < classifier.leaves.len()
                        };
                        if !in_range {
                            return Err(CascadeError::Malformed(format!(
                                "stage {s}: tree link {link} out of range"
                            )));
                        }
                    }
                }
            }
        }

        let (w, h) = self.window;
        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.iter().any(|r| r.x + r.width > w || r.y + r.height > h) {
                return Err(CascadeError::Malformed(format!(
                    "feature {i}: rectangle exceeds the {w}x{h} window"
                )));
            }
        }
        Ok(())
    }
}

fn parse_stage(node: roxmltree::Node<'_, '_>) -> Result<Stage, CascadeError> {
    let threshold: f64 = parse_one(child(node, "stageThreshold")?, "stageThreshold")?;
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(parse_weak_classifier)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak_classifier(node: roxmltree::Node<'_, '_>) -> Result<WeakClassifier, CascadeError> {
    let raw = text(child(node, "internalNodes")?);
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 4 != 0 {
        return Err(CascadeError::Malformed(format!(
            "internalNodes holds {} values, expected groups of 4",
            tokens.len()
        )));
    }

    let nodes = tokens
        .chunks(4)
        .map(|chunk| {
            let feature: i64 = parse_token(chunk[2], "internalNodes")?;
            Ok(TreeNode {
                left: parse_token(chunk[0], "internalNodes")?,
                right: parse_token(chunk[1], "internalNodes")?,
                feature: usize::try_from(feature).map_err(|_| CascadeError::InvalidNumber {
                    element: "internalNodes",
                    value: chunk[2].to_string(),
                })?,
                threshold: parse_token(chunk[3], "internalNodes")?,
            })
        })
        .collect::<Result<Vec<_>, CascadeError>>()?;

    let leaves = parse_list(child(node, "leafValues")?, "leafValues")?;
    Ok(WeakClassifier { nodes, leaves })
}

fn parse_feature(node: roxmltree::Node<'_, '_>) -> Result<HaarFeature, CascadeError> {
    if let Some(tilted) = node.children().find(|n| n.has_tag_name("tilted")) {
        if text(tilted) != "0" {
            return Err(CascadeError::Unsupported("tilted Haar features".into()));
        }
    }

    let rects = items(child(node, "rects")?)
        .map(|rect| {
            let raw = text(rect);
            let tokens: Vec<&str> = raw.split_whitespace().collect();
            if tokens.len() != 5 {
                return Err(CascadeError::Malformed(format!("rect {raw:?} needs 5 values")));
            }
            Ok(WeightedRect {
                x: parse_token(tokens[0], "rects")?,
                y: parse_token(tokens[1], "rects")?,
                width: parse_token(tokens[2], "rects")?,
                height: parse_token(tokens[3], "rects")?,
                weight: parse_token(tokens[4], "rects")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(CascadeError::Malformed("feature without rectangles".into()));
    }
    Ok(HaarFeature { rects })
}

fn child<'a, 'i>(
    node: roxmltree::Node<'a, 'i>,
    name: &'static str,
) -> Result<roxmltree::Node<'a, 'i>, CascadeError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or(CascadeError::MissingElement(name))
}

/// Element children (the `<_>` list items), skipping comments and whitespace.
fn items<'a, 'i>(node: roxmltree::Node<'a, 'i>) -> impl Iterator<Item = roxmltree::Node<'a, 'i>> {
    node.children().filter(|n| n.is_element())
}

fn text<'a>(node: roxmltree::Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("").trim()
}

fn parse_token<T: std::str::FromStr>(token: &str, element: &'static str) -> Result<T, CascadeError> {
    token.parse().map_err(|_| CascadeError::InvalidNumber {
        element,
        value: token.to_string(),
    })
}

fn parse_one<T: std::str::FromStr>(
    node: roxmltree::Node<'_, '_>,
    element: &'static str,
) -> Result<T, CascadeError> {
    parse_token(text(node), element)
}

fn parse_list(node: roxmltree::Node<'_, '_>, element: &'static str) -> Result<Vec<f64>, CascadeError> {
    text(node)
        .split_whitespace()
        .map(|t| parse_token(t, element))
        .collect()
}

/// Summed-area tables of pixel values and squared pixel values.
struct IntegralImage {
    stride: usize,
    sum: Vec<i64>,
    sq_sum: Vec<i64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0i64; stride * (h + 1)];
        let mut sq_sum = vec![0i64; stride * (h + 1)];
        let raw = gray.as_raw();

        for y in 0..h {
            let mut row = 0i64;
            let mut row_sq = 0i64;
            for x in 0..w {
                let v = raw[y * w + x] as i64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }

    fn rect(table: &[i64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> i64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y1 * stride + x0]
            - table[y0 * stride + x1]
    }
}

/// OpenCV's rectangle similarity: every edge within `eps` of the smaller size.
fn similar_rects(a: &FaceRegion, b: &FaceRegion, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    (a.x - b.x).abs() as f64 <= delta
        && (a.y - b.y).abs() as f64 <= delta
        && (a.x + a.width - b.x - b.width).abs() as f64 <= delta
        && (a.y + a.height - b.y - b.height).abs() as f64 <= delta
}

/// Cluster similar rectangles transitively, average each cluster, drop weak
/// clusters (`count <= group_threshold`) and clusters nested in stronger ones.
pub fn group_rectangles(rects: &[FaceRegion], group_threshold: usize, eps: f64) -> Vec<FaceRegion> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    // Union-find over pairwise similarity.
    let mut parent: Vec<usize> = (0..rects.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar_rects(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Label clusters in order of first appearance and accumulate their sums.
    let mut labels: Vec<Option<usize>> = vec![None; rects.len()];
    let mut sums: Vec<([i64; 4], usize)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let label = match labels[root] {
            Some(label) => label,
            None => {
                labels[root] = Some(sums.len());
                sums.push(([0; 4], 0));
                sums.len() - 1
            }
        };
        let (acc, count) = &mut sums[label];
        acc[0] += r.x as i64;
        acc[1] += r.y as i64;
        acc[2] += r.width as i64;
        acc[3] += r.height as i64;
        *count += 1;
    }

    let clusters: Vec<(FaceRegion, usize)> = sums
        .iter()
        .map(|(acc, count)| {
            let s = 1.0 / *count as f64;
            let avg = |v: i64| (v as f64 * s).round() as i32;
            (FaceRegion::new(avg(acc[0]), avg(acc[1]), avg(acc[2]), avg(acc[3])), *count)
        })
        .collect();

    let mut out = Vec::new();
    for (i, (r1, n1)) in clusters.iter().enumerate() {
        if *n1 <= group_threshold {
            continue;
        }
        let nested = clusters.iter().enumerate().any(|(j, (r2, n2))| {
            if j == i || *n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (*n2 > (*n1).max(3) || *n1 < 3)
        });
        if !nested {
            out.push(*r1);
        }
    }
    out
}
