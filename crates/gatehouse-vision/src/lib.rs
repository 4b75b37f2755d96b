//! gatehouse-vision — ONNX-backed recognition adapter.
//!
//! SCRFD finds faces, ArcFace turns each one into an embedding. Together they
//! implement [`gatehouse_core::FaceAnalyzer`].

pub mod detector;
pub mod encoder;

pub use detector::{DetectorError, FaceDetector};
pub use encoder::{EncoderError, FaceEncoder};

use gatehouse_core::{AnalyzerError, Detection, FaceAnalyzer};
use image::RgbImage;
use std::path::Path;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const ENCODER_MODEL_FILE: &str = "w600k_r50.onnx";

impl From<DetectorError> for AnalyzerError {
    fn from(e: DetectorError) -> Self {
        AnalyzerError::Failed(format!("detector: {e}"))
    }
}

impl From<EncoderError> for AnalyzerError {
    fn from(e: EncoderError) -> Self {
        AnalyzerError::Failed(format!("encoder: {e}"))
    }
}

/// Detector + encoder pair.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let encoder_path = model_dir.join(ENCODER_MODEL_FILE);
        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let encoder = FaceEncoder::load(&encoder_path.to_string_lossy())?;
        Ok(Self { detector, encoder })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
        let regions = self.detector.detect(image)?;
        tracing::debug!(faces = regions.len(), "faces detected");

        let mut detections = Vec::with_capacity(regions.len());
        for region in regions {
            match self.encoder.encode(image, &region) {
                Ok(embedding) => detections.push(Detection { region, embedding }),
                Err(EncoderError::EmptyCrop) => {
                    tracing::debug!(?region, "skipping face outside the frame");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(detections)
    }
}
