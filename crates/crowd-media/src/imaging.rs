//! Still image decoding and frame normalization.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::RgbImage;

use crate::error::{MediaError, MediaResult};

/// Decode encoded image bytes (JPEG, PNG, ...) into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> MediaResult<RgbImage> {
    if bytes.is_empty() {
        return Err(MediaError::invalid_image("empty image data"));
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| MediaError::invalid_image(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Strip a `data:<mime>;base64,` prefix, if present.
pub fn strip_data_uri(data: &str) -> &str {
    match data.rsplit_once(',') {
        Some((_, payload)) => payload,
        None => data,
    }
}

/// Decode a base64 image string, with or without a data URI prefix.
pub fn decode_base64_image(data: &str) -> MediaResult<RgbImage> {
    let payload = strip_data_uri(data.trim());
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| MediaError::invalid_image(format!("invalid base64: {}", e)))?;
    decode_image(&bytes)
}

/// Downscale `frame` so its longest side is at most `target`, keeping the
/// aspect ratio. Smaller frames are returned unchanged.
pub fn normalize_frame(frame: RgbImage, target: u32) -> RgbImage {
    let (width, height) = frame.dimensions();
    let longest = width.max(height);
    if target == 0 || longest <= target {
        return frame;
    }

    let scale = target as f64 / longest as f64;
    let new_w = ((width as f64 * scale) as u32).max(1);
    let new_h = ((height as f64 * scale) as u32).max(1);
    image::imageops::resize(&frame, new_w, new_h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }

    #[test]
    fn test_decode_base64_with_prefix() {
        let encoded = STANDARD.encode(png_bytes(8, 4));
        let img = decode_base64_image(&format!("data:image/png;base64,{}", encoded)).unwrap();
        assert_eq!(img.dimensions(), (8, 4));
        assert_eq!(img.get_pixel(0, 0).0, [10, 200, 30]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image(b"not an image"),
            Err(MediaError::InvalidImage(_))
        ));
        assert!(matches!(decode_image(b""), Err(MediaError::InvalidImage(_))));
        assert!(matches!(
            decode_base64_image("%%%"),
            Err(MediaError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_normalize_downscales_longest_side() {
        let frame = RgbImage::new(1280, 720);
        let out = normalize_frame(frame, 640);
        assert_eq!(out.dimensions(), (640, 360));

        let tall = RgbImage::new(300, 1200);
        assert_eq!(normalize_frame(tall, 600).dimensions(), (150, 600));
    }

    #[test]
    fn test_normalize_keeps_small_frames() {
        let frame = RgbImage::new(320, 240);
        assert_eq!(normalize_frame(frame, 640).dimensions(), (320, 240));
    }

    #[test]
    fn test_normalize_never_zero_dimension() {
        let frame = RgbImage::new(5000, 2);
        let out = normalize_frame(frame, 100);
        assert_eq!(out.dimensions(), (100, 1));
    }
}
