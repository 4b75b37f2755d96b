//! Video output: the most recent emitted frame, encoded on demand.

use gatehouse_hw::frame::{self, FrameError};
use image::RgbImage;
use std::sync::Mutex;

const SNAPSHOT_QUALITY: u8 = 80;

/// Receives every frame the pipeline emits, annotated or not.
pub trait FrameSink {
    fn emit(&mut self, image: &RgbImage);
}

/// Holds the latest frame for `Snapshot()` callers.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Option<RgbImage>>,
}

impl LatestFrame {
    pub fn store(&self, image: &RgbImage) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(image.clone());
    }

    /// JPEG of the latest frame, or `None` before the first frame arrives.
    pub fn snapshot_jpeg(&self) -> Result<Option<Vec<u8>>, FrameError> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .map(|img| frame::encode_jpeg(img, SNAPSHOT_QUALITY))
            .transpose()
    }
}

impl FrameSink for std::sync::Arc<LatestFrame> {
    fn emit(&mut self, image: &RgbImage) {
        self.store(image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_before_and_after_first_frame() {
        let latest = Arc::new(LatestFrame::default());
        assert!(latest.snapshot_jpeg().unwrap().is_none());

        let mut sink = Arc::clone(&latest);
        sink.emit(&RgbImage::new(16, 16));
        let jpeg = latest.snapshot_jpeg().unwrap().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
