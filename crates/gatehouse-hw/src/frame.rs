//! Colour frame type and image processing: YUYV conversion, downscale,
//! face-box annotation and JPEG encoding.

use ab_glyph::{FontRef, PxScale};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

/// Height of the filled label bar drawn along the bottom edge of a face box.
const LABEL_BAR_HEIGHT: u32 = 35;
/// Outline thickness in pixels.
const BOX_THICKNESS: u32 = 2;
const LABEL_TEXT_HEIGHT: f32 = 22.0;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
/// Left inset of the label text inside the bar.
const LABEL_PADDING: i32 = 6;

static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Colour of an annotated face box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxStyle {
    /// Green: accepted match.
    Recognized,
    /// Red: no catalog entry close enough.
    Unknown,
}

impl BoxStyle {
    pub fn color(&self) -> Rgb<u8> {
        match self {
            BoxStyle::Recognized => Rgb([0, 255, 0]),
            BoxStyle::Unknown => Rgb([255, 0, 0]),
        }
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Resize by `scale` (e.g. 0.25), never below 1x1. A scale of 1.0 returns a copy.
pub fn downscale(image: &RgbImage, scale: f32) -> RgbImage {
    if (scale - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }
    let w = ((image.width() as f32 * scale).round() as u32).max(1);
    let h = ((image.height() as f32 * scale).round() as u32).max(1);
    image::imageops::resize(image, w, h, FilterType::Triangle)
}

/// Draw a face box with `label` written in a filled bar along its bottom edge.
///
/// Coordinates are clipped to the image; a box entirely outside is ignored.
pub fn draw_face_box(
    image: &mut RgbImage,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    style: BoxStyle,
    label: &str,
) {
    let (img_w, img_h) = (image.width() as i32, image.height() as i32);
    let x1 = (x.round() as i32).clamp(0, img_w);
    let y1 = (y.round() as i32).clamp(0, img_h);
    let x2 = ((x + width).round() as i32).clamp(0, img_w);
    let y2 = ((y + height).round() as i32).clamp(0, img_h);
    if x2 <= x1 || y2 <= y1 {
        return;
    }

    let color = style.color();
    let w = (x2 - x1) as u32;
    let h = (y2 - y1) as u32;

    for inset in 0..BOX_THICKNESS {
        let inset_i = inset as i32;
        if w <= 2 * inset || h <= 2 * inset {
            break;
        }
        let rect = Rect::at(x1 + inset_i, y1 + inset_i).of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(image, rect, color);
    }

    let bar_h = LABEL_BAR_HEIGHT.min(h);
    let bar_top = y2 - bar_h as i32;
    let bar = Rect::at(x1, bar_top).of_size(w, bar_h);
    draw_filled_rect_mut(image, bar, color);

    if label.is_empty() {
        return;
    }
    match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => {
            let scale = PxScale::from(LABEL_TEXT_HEIGHT.min(bar_h as f32));
            let text_y = bar_top + ((bar_h as f32 - scale.y) / 2.0).max(0.0) as i32;
            draw_text_mut(image, LABEL_TEXT_COLOR, x1 + LABEL_PADDING, text_y, scale, &font, label);
        }
        Err(e) => tracing::warn!(error = %e, "label font unusable; drawing bar without text"),
    }
}

/// Encode a frame as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_maps_to_grey() {
        // 2x1 image, neutral chroma.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([100, 100, 100]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let yuyv = vec![76, 85, 76, 255];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let px = rgb.get_pixel(0, 0);
        assert!(px[0] > 200, "red channel too low: {px:?}");
        assert!(px[1] < 30 && px[2] < 30, "expected red, got {px:?}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_downscale_quarter() {
        let img = RgbImage::new(640, 480);
        let small = downscale(&img, 0.25);
        assert_eq!((small.width(), small.height()), (160, 120));
    }

    #[test]
    fn test_downscale_never_empty() {
        let img = RgbImage::new(2, 2);
        let small = downscale(&img, 0.01);
        assert_eq!((small.width(), small.height()), (1, 1));
    }

    #[test]
    fn test_draw_face_box_colours_outline_and_bar() {
        let mut img = RgbImage::new(100, 100);
        draw_face_box(&mut img, 10.0, 10.0, 50.0, 60.0, BoxStyle::Recognized, "");

        let green = Rgb([0, 255, 0]);
        assert_eq!(img.get_pixel(10, 10), &green); // outline corner
        assert_eq!(img.get_pixel(11, 30), &green); // second outline pass
        assert_eq!(img.get_pixel(30, 60), &green); // inside label bar
        assert_eq!(img.get_pixel(30, 20), &Rgb([0, 0, 0])); // interior untouched
        assert_eq!(img.get_pixel(80, 80), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_face_box_unknown_is_red() {
        let mut img = RgbImage::new(50, 50);
        draw_face_box(&mut img, 5.0, 5.0, 20.0, 20.0, BoxStyle::Unknown, "Unknown");
        assert_eq!(img.get_pixel(5, 5), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_draw_face_box_outside_is_ignored() {
        let mut img = RgbImage::new(20, 20);
        draw_face_box(&mut img, 40.0, 40.0, 10.0, 10.0, BoxStyle::Unknown, "Unknown");
        assert!(img.pixels().all(|p| p == &Rgb([0, 0, 0])));
    }

    fn white_pixels_in_rows(img: &RgbImage, rows: std::ops::Range<u32>) -> usize {
        rows.flat_map(|y| (0..img.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| {
                let p = img.get_pixel(x, y);
                p[0] > 200 && p[1] > 200 && p[2] > 200
            })
            .count()
    }

    #[test]
    fn test_label_text_is_written_into_bar() {
        let mut img = RgbImage::new(200, 120);
        draw_face_box(&mut img, 10.0, 10.0, 150.0, 100.0, BoxStyle::Recognized, "Asha");
        // Bar spans rows 75..110.
        assert!(white_pixels_in_rows(&img, 75..110) > 20);
        assert_eq!(white_pixels_in_rows(&img, 0..75), 0);
    }

    #[test]
    fn test_unknown_label_on_red_bar() {
        let mut img = RgbImage::new(200, 120);
        draw_face_box(&mut img, 10.0, 10.0, 150.0, 100.0, BoxStyle::Unknown, "Unknown");
        assert!(white_pixels_in_rows(&img, 75..110) > 20);
        assert_eq!(img.get_pixel(12, 108), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_empty_label_leaves_bar_plain() {
        let mut img = RgbImage::new(200, 120);
        draw_face_box(&mut img, 10.0, 10.0, 150.0, 100.0, BoxStyle::Recognized, "");
        assert_eq!(white_pixels_in_rows(&img, 75..110), 0);
    }

    #[test]
    fn test_bundled_font_parses() {
        assert!(FontRef::try_from_slice(LABEL_FONT).is_ok());
    }

    #[test]
    fn test_encode_jpeg_magic() {
        let img = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let jpeg = encode_jpeg(&img, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
