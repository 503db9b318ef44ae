//! Decoding of a completed result into text or an image payload.

use std::fmt;

use serde::Serialize;

use super::error::RequestError;

/// Text encodings accepted by
/// [`HttpRequest::result_as_string_with`](super::HttpRequest::result_as_string_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8; invalid sequences become U+FFFD.
    #[default]
    Utf8,
    /// UTF-16, little endian.
    Utf16Le,
    /// UTF-16, big endian.
    Utf16Be,
    /// ISO-8859-1.
    Latin1,
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

impl TextEncoding {
    /// Decodes `bytes`, dropping a leading byte-order mark.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArgument`] when a UTF-16 payload has an
    /// odd length.
    pub fn decode(self, bytes: &[u8]) -> Result<String, RequestError> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, RequestError> {
    if bytes.len() % 2 != 0 {
        return Err(RequestError::invalid_argument(format!(
            "UTF-16 payload has odd length {}",
            bytes.len()
        )));
    }
    let mut units = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .peekable();
    // Only a leading byte-order mark is dropped; later U+FEFF is content.
    let _ = units.next_if_eq(&0xFEFF);
    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

/// Image container formats recognized from their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Portable Network Graphics.
    Png,
    /// JPEG / JFIF.
    Jpeg,
    /// GIF87a / GIF89a.
    Gif,
    /// RIFF WebP.
    Webp,
    /// Windows bitmap.
    Bmp,
}

impl ImageFormat {
    /// Identifies the format from a payload's magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else if bytes.starts_with(b"BM") && bytes.len() >= 14 {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    /// MIME type for the format.
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Encoded image bytes plus the detected container format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Detected format.
    pub format: ImageFormat,
    /// Raw encoded bytes.
    pub bytes: Vec<u8>,
}

impl ImageData {
    /// Wraps a payload after checking it looks like an image.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArgument`] for an empty or unrecognized
    /// payload.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, RequestError> {
        if bytes.is_empty() {
            return Err(RequestError::invalid_argument("result is empty"));
        }
        let format = ImageFormat::sniff(&bytes)
            .ok_or_else(|| RequestError::invalid_argument("result is not a recognized image"))?;
        Ok(Self { format, bytes })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_strips_bom() {
        let text = TextEncoding::Utf8.decode(b"\xEF\xBB\xBFhello").unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_utf8_invalid_bytes_are_replaced() {
        let text = TextEncoding::Utf8.decode(b"ok\xFF").unwrap();
        assert_eq!(text, "ok\u{FFFD}");
    }

    #[test]
    fn test_utf16_both_endians() {
        assert_eq!(TextEncoding::Utf16Le.decode(&[0x68, 0x00, 0x69, 0x00]).unwrap(), "hi");
        assert_eq!(TextEncoding::Utf16Be.decode(&[0x00, 0x68, 0x00, 0x69]).unwrap(), "hi");
    }

    #[test]
    fn test_utf16_le_bom_is_dropped() {
        let text = TextEncoding::Utf16Le.decode(&[0xFF, 0xFE, 0x41, 0x00]).unwrap();
        assert_eq!(text, "A");
    }

    #[test]
    fn test_utf16_keeps_feff_after_the_bom() {
        let le = TextEncoding::Utf16Le
            .decode(&[0xFF, 0xFE, 0xFF, 0xFE, 0x41, 0x00])
            .unwrap();
        assert_eq!(le, "\u{FEFF}A");
        let be = TextEncoding::Utf16Be
            .decode(&[0xFE, 0xFF, 0x00, 0x41, 0xFE, 0xFF])
            .unwrap();
        assert_eq!(be, "A\u{FEFF}");
    }

    #[test]
    fn test_utf16_odd_length_is_invalid_argument() {
        let result = TextEncoding::Utf16Le.decode(&[0x41]);
        assert!(matches!(result, Err(RequestError::InvalidArgument { .. })));
    }

    #[test]
    fn test_latin1_maps_high_bytes() {
        assert_eq!(TextEncoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]).unwrap(), "café");
    }

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(ImageFormat::sniff(b"\x89PNG\r\n\x1a\n...."), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"GIF89a......"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"BM\0\0\0\0\0\0\0\0\0\0\0\0"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(b"<html>"), None);
    }

    #[test]
    fn test_image_data_rejects_empty_and_unknown() {
        assert!(ImageData::from_bytes(Vec::new()).is_err());
        assert!(ImageData::from_bytes(b"plain text".to_vec()).is_err());
        let image = ImageData::from_bytes(b"GIF87a-body".to_vec()).unwrap();
        assert_eq!(image.format.mime_type(), "image/gif");
    }
}
