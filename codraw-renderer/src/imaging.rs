//! Image decoding, encoding and data URI utilities.
//!
//! Generated images arrive as base64 strings or data URIs; they are decoded to
//! RGBA, cleaned of their white background, and re-encoded as PNG data URIs
//! for storage on the canvas.

use base64::Engine;
use image::ImageEncoder;

use crate::error::{RenderError, RenderResult};

/// Default channel threshold above which a pixel counts as background.
pub const DEFAULT_BACKGROUND_THRESHOLD: u8 = 240;

/// Decoded RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA pixel data (4 bytes per pixel).
    pub data: Vec<u8>,
    /// Original format of the image.
    pub format: ImageFormat,
}

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG with alpha support.
    Png,
    /// JPEG (no alpha).
    Jpeg,
    /// Unknown/other format.
    Unknown,
}

impl ImageFormat {
    /// Detect format from magic bytes.
    #[must_use]
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            Self::Png
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Self::Jpeg
        } else {
            Self::Unknown
        }
    }

    /// MIME type for data URIs.
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Unknown => "application/octet-stream",
        }
    }
}

/// Decode an image from raw bytes.
///
/// # Errors
///
/// Returns an error if the image cannot be decoded.
pub fn decode_image(data: &[u8]) -> RenderResult<DecodedImage> {
    let format = ImageFormat::from_magic_bytes(data);
    let img = image::load_from_memory(data).map_err(|e| RenderError::Decode(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedImage {
        width,
        height,
        data: rgba.into_raw(),
        format,
    })
}

/// Split a data URI into its MIME type and decoded payload.
///
/// Only base64 payloads are accepted.
///
/// # Errors
///
/// Returns an error if the URI is malformed or not base64.
pub fn parse_data_uri(uri: &str) -> RenderResult<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| RenderError::Decode("Not a data URI".to_string()))?;
    let (metadata, payload) = rest
        .split_once(',')
        .ok_or_else(|| RenderError::Decode("Invalid data URI: missing comma".to_string()))?;
    let mime = metadata
        .strip_suffix(";base64")
        .ok_or_else(|| RenderError::Decode("Only base64 data URIs are supported".to_string()))?;
    let bytes = decode_base64(payload)?;
    Ok((mime.to_string(), bytes))
}

/// Decode a base64 string, tolerating whitespace.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64.
pub fn decode_base64(payload: &str) -> RenderResult<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| RenderError::Decode(format!("Failed to decode base64: {e}")))
}

/// Decode an image given either as a data URI or as bare base64.
///
/// # Errors
///
/// Returns an error if the payload or the image cannot be decoded.
pub fn decode_image_source(source: &str) -> RenderResult<DecodedImage> {
    let bytes = if source.starts_with("data:") {
        parse_data_uri(source)?.1
    } else {
        decode_base64(source)?
    };
    decode_image(&bytes)
}

/// Build a base64 data URI.
#[must_use]
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

/// Encode an RGBA image as PNG.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_png(image: &DecodedImage) -> RenderResult<Vec<u8>> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            &image.data,
            image.width,
            image.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| RenderError::Encode(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}

/// Make near-white pixels transparent.
///
/// A pixel whose red, green and blue channels are all at or above `threshold`
/// gets alpha 0. Returns the number of pixels cleared.
pub fn strip_background(image: &mut DecodedImage, threshold: u8) -> usize {
    let mut cleared = 0;
    for pixel in image.data.chunks_exact_mut(4) {
        if pixel[..3].iter().all(|&c| c >= threshold) && pixel[3] != 0 {
            pixel[3] = 0;
            cleared += 1;
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 red PNG.
    const RED_PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8DwHwAFBQIAX8jx0gAAAABJRU5ErkJggg==";

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> DecodedImage {
        DecodedImage {
            width,
            height,
            data: rgba.repeat((width * height) as usize),
            format: ImageFormat::Png,
        }
    }

    #[test]
    fn test_format_detection_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            ImageFormat::Png
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]),
            ImageFormat::Jpeg
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(b"RIFF\0\0\0\0WEBPVP8 "),
            ImageFormat::Unknown
        );
        assert_eq!(ImageFormat::Jpeg.mime(), "image/jpeg");
        assert_eq!(ImageFormat::Unknown.mime(), "application/octet-stream");
    }

    #[test]
    fn test_decode_data_uri_and_bare_base64() {
        let uri = format!("data:image/png;base64,{RED_PIXEL_PNG}");
        let from_uri = decode_image_source(&uri).expect("data uri");
        let from_bare = decode_image_source(RED_PIXEL_PNG).expect("bare base64");
        assert_eq!(from_uri, from_bare);
        assert_eq!((from_uri.width, from_uri.height), (1, 1));
        assert_eq!(from_uri.format, ImageFormat::Png);
    }

    #[test]
    fn test_invalid_data_uris() {
        assert!(parse_data_uri("not a data uri").is_err());
        assert!(parse_data_uri("data:image/png").is_err());
        assert!(parse_data_uri("data:text/plain,hello").is_err());
        assert!(decode_image_source("data:image/png;base64,AAAA").is_err());
    }

    #[test]
    fn test_strip_background_uses_threshold() {
        let mut img = solid(2, 1, [255, 255, 255, 255]);
        img.data[4..8].copy_from_slice(&[239, 250, 250, 255]);
        assert_eq!(strip_background(&mut img, 240), 1);
        assert_eq!(img.data[3], 0);
        assert_eq!(img.data[7], 255);
    }

    #[test]
    fn test_png_roundtrip_keeps_transparency() {
        let mut img = solid(3, 2, [250, 250, 250, 255]);
        strip_background(&mut img, DEFAULT_BACKGROUND_THRESHOLD);
        let png = encode_png(&img).expect("encode");
        let decoded = decode_image(&png).expect("decode");
        assert!(decoded.data.chunks_exact(4).all(|p| p[3] == 0));

        let uri = to_data_uri("image/png", &png);
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
