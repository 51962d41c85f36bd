//! On-device face detection and embedding.
//!
//! UltraFace locates faces; ArcFace turns each crop into a 512-dim
//! L2-normalized embedding. Model files are fetched once into the local data
//! directory and the ONNX sessions are held process-wide behind mutexes.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::db::BoundingBox;

/// A detected face ready for enrollment.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

static DETECTION_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();
static EMBEDDING_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

const ULTRAFACE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";
const ARCFACE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

const NMS_THRESHOLD: f32 = 0.3;

fn models_dir() -> Result<PathBuf> {
    let data_dir =
        dirs::data_local_dir().ok_or_else(|| anyhow!("Could not find local data directory"))?;
    let dir = data_dir.join("startline").join("models");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn ensure_model(filename: &str, url: &str) -> Result<PathBuf> {
    let model_path = models_dir()?.join(filename);
    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model {}: {}", filename, e))?;
        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }
    Ok(model_path)
}

fn load_session(model_path: &Path) -> Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(model_path)?)
}

/// Download (if needed) and load both models. Safe to call repeatedly.
pub fn init_models() -> Result<()> {
    if DETECTION_MODEL.get().is_none() {
        let path = ensure_model("ultraface-320.onnx", ULTRAFACE_URL)?;
        let _ = DETECTION_MODEL.set(Mutex::new(load_session(&path)?));
    }
    if EMBEDDING_MODEL.get().is_none() {
        let path = ensure_model("arcface-resnet100.onnx", ARCFACE_URL)?;
        let _ = EMBEDDING_MODEL.set(Mutex::new(load_session(&path)?));
    }
    Ok(())
}

/// Detect every face in the image above `min_confidence` and embed each one.
///
/// Faces whose embedding fails are skipped rather than enrolled without one:
/// a face that cannot be searched is useless to the pipeline.
pub fn detect_and_embed(image_path: &Path, min_confidence: f32) -> Result<Vec<DetectedFace>> {
    init_models()?;

    let img = image::open(image_path)
        .map_err(|e| anyhow!("Failed to load image {}: {}", image_path.display(), e))?;
    let (img_width, img_height) = img.dimensions();

    let face_boxes = {
        let mut detection = DETECTION_MODEL
            .get()
            .ok_or_else(|| anyhow!("Detection model not initialized"))?
            .lock()
            .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
        run_ultraface(&mut detection, &img, min_confidence)?
    };

    if face_boxes.is_empty() {
        return Ok(Vec::new());
    }

    let mut embedder = EMBEDDING_MODEL
        .get()
        .ok_or_else(|| anyhow!("Embedding model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;

    let mut faces = Vec::new();
    for (bbox, confidence) in face_boxes {
        if bbox.width <= 0 || bbox.height <= 0 {
            continue;
        }
        let crop = crop_face(&img, &bbox, img_width, img_height);
        match run_arcface(&mut embedder, &crop) {
            Ok(embedding) => faces.push(DetectedFace {
                bbox,
                embedding,
                confidence,
            }),
            Err(e) => {
                tracing::warn!(
                    photo = %image_path.display(),
                    "Embedding failed for face at ({}, {}): {}",
                    bbox.x,
                    bbox.y,
                    e
                );
            }
        }
    }

    Ok(faces)
}

fn run_ultraface(
    session: &mut Session,
    img: &DynamicImage,
    min_confidence: f32,
) -> Result<Vec<(BoundingBox, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(
        INPUT_WIDTH,
        INPUT_HEIGHT,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1] as the model expects
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_HEIGHT as usize {
        for x in 0..INPUT_WIDTH as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_WIDTH as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, num_anchors, 2] (background, face)
    // boxes:  [1, num_anchors, 4] (x1, y1, x2, y2 normalized)
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence < min_confidence {
            continue;
        }

        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

        face_boxes.push((
            BoundingBox {
                x: x1.max(0),
                y: y1.max(0),
                width: (x2 - x1).max(1),
                height: (y2 - y1).max(1),
            },
            confidence,
        ));
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression over overlapping detections, highest confidence wins.
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i].clone());
        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let area_a = (a.width * a.height) as f32;
    let area_b = (b.width * b.height) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop the face region with 20% padding so ArcFace sees some context.
fn crop_face(img: &DynamicImage, bbox: &BoundingBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = (bbox.x - padding_x).max(0) as u32;
    let y = (bbox.y - padding_y).max(0) as u32;
    let w = ((bbox.width + padding_x * 2) as u32).min(img_width.saturating_sub(x));
    let h = ((bbox.height + padding_y * 2) as u32).min(img_height.saturating_sub(y));

    img.crop_imm(x, y, w.max(1), h.max(1))
}

fn run_arcface(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            // ArcFace normalization: (pixel - 127.5) / 127.5
            input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // ArcFace ONNX model uses "data" as its input name
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding output"))?;
    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    // L2-normalize so cosine similarity reduces to a dot product
    let embedding: Vec<f32> = embedding_data.to_vec();
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        Ok(embedding.iter().map(|x| x / norm).collect())
    } else {
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((compute_iou(&a, &b) - 1.0).abs() < 0.001);

        let c = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert!(compute_iou(&a, &c).abs() < 0.001);
    }

    #[test]
    fn test_nms_suppresses_overlap_keeps_best() {
        let strong = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let overlapping = BoundingBox { x: 1, y: 1, width: 10, height: 10 };
        let elsewhere = BoundingBox { x: 50, y: 50, width: 10, height: 10 };

        let kept = nms(
            vec![(overlapping, 0.8), (strong.clone(), 0.95), (elsewhere, 0.9)],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0.x, strong.x);
        assert!((kept[0].1 - 0.95).abs() < 1e-6);
    }
}
