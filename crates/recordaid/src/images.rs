//! Decoding of base64 image payloads sent by clients.
//!
//! Browsers send `data:image/jpeg;base64,...` URIs; other clients send the
//! bare base64 text. Everything is normalised to JPEG bytes before it goes
//! to the embedding server.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image payload is empty")]
    Empty,
    #[error("image is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Drop a `data:<mime>;base64,` prefix if present.
pub fn strip_data_uri(payload: &str) -> &str {
    let trimmed = payload.trim();
    if trimmed.starts_with("data:") {
        match trimmed.split_once(',') {
            Some((_, data)) => data,
            None => "",
        }
    } else {
        trimmed
    }
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>, ImageError> {
    let data: String = strip_data_uri(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if data.is_empty() {
        return Err(ImageError::Empty);
    }
    Ok(STANDARD.decode(data)?)
}

/// Decode any supported format and re-encode as baseline RGB JPEG.
pub fn to_jpeg(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// Full pipeline: data URI or base64 text in, JPEG bytes out.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, ImageError> {
    let raw = decode_base64(payload)?;
    to_jpeg(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_base64() -> String {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 120, 40]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        STANDARD.encode(buf.into_inner())
    }

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("  QUJD  "), "QUJD");
        assert_eq!(strip_data_uri("data:image/png;base64"), "");
    }

    #[test]
    fn test_png_data_uri_becomes_jpeg() {
        let payload = format!("data:image/png;base64,{}", png_base64());
        let jpeg = decode_payload(&payload).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_rejects_bad_base64() {
        assert!(matches!(decode_payload("%%%not base64%%%"), Err(ImageError::Base64(_))));
    }

    #[test]
    fn test_rejects_non_image_bytes() {
        let payload = STANDARD.encode(b"hello, not an image");
        assert!(matches!(decode_payload(&payload), Err(ImageError::Decode(_))));
    }

    #[test]
    fn test_rejects_empty_payload() {
        assert!(matches!(decode_payload("data:image/jpeg;base64,"), Err(ImageError::Empty)));
    }
}
