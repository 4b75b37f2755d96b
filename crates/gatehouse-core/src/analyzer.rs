//! Recognition adapter seam: image in, faces with embeddings out.

use crate::types::{Embedding, FaceRegion};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("face analysis failed: {0}")]
    Failed(String),
}

/// A face found in an image, together with its embedding.
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: FaceRegion,
    pub embedding: Embedding,
}

/// Black-box face detection + embedding capability.
///
/// Implementations return zero or more detections in no particular order.
pub trait FaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError>;
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
        (**self).analyze(image)
    }
}
