//! ArcFace face encoder via ONNX Runtime.
//!
//! Crops the detected region (squared, with a small margin), resizes it to
//! 112x112 and extracts an L2-normalized 512-dimensional embedding.

use gatehouse_core::{Embedding, FaceRegion};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its longer side.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region is outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    pub fn encode(&mut self, image: &RgbImage, region: &FaceRegion) -> Result<Embedding, EncoderError> {
        let crop = crop_face(image, region).ok_or(EncoderError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square crop around `region`, clipped to the image and resized to the model input.
fn crop_face(image: &RgbImage, region: &FaceRegion) -> Option<RgbImage> {
    let side = region.width.max(region.height) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = region.x + region.width / 2.0;
    let cy = region.y + region.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0).floor() as u32;
    let y0 = (cy - side / 2.0).max(0.0).floor() as u32;
    let x1 = ((cx + side / 2.0).ceil().max(0.0) as u32).min(image.width());
    let y1 = ((cy + side / 2.0).ceil().max(0.0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let view = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(image::imageops::resize(&view, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_crop_face_is_model_sized() {
        let img = RgbImage::new(320, 240);
        let crop = crop_face(&img, &region(100.0, 50.0, 40.0, 60.0)).unwrap();
        assert_eq!((crop.width(), crop.height()), (INPUT_SIZE, INPUT_SIZE));
    }

    #[test]
    fn test_crop_face_clipped_at_border() {
        let img = RgbImage::new(100, 100);
        assert!(crop_face(&img, &region(-20.0, -20.0, 40.0, 40.0)).is_some());
    }

    #[test]
    fn test_crop_face_outside_image() {
        let img = RgbImage::new(100, 100);
        assert!(crop_face(&img, &region(500.0, 500.0, 40.0, 40.0)).is_none());
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Rgb([255, 0, 128]));
        let t = preprocess(&face);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
