//! Image format tags and the dimensions reported after processing.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Image encodings the store understands.
///
/// Every variant is accepted as input. Only a subset can be produced as
/// output, see [`ImageFormat::is_output`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Bmp,
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Gif,
    Tiff,
    #[serde(rename = "webp")]
    WebP,
}

impl ImageFormat {
    /// Parse a format tag (`jpg` and `jpeg` are the same format).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "bmp" => Some(Self::Bmp),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Canonical lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bmp => "bmp",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        }
    }

    /// Whether images can be re-encoded into this format.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Bmp | Self::Jpeg | Self::Png | Self::Gif)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Bmp => "image/bmp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Tiff => "image/tiff",
            Self::WebP => "image/webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| format!("unknown image format `{}`", s))
    }
}

/// Format and dimensions of an image after inspection or processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpg_and_jpeg_are_the_same_format() {
        assert_eq!(ImageFormat::from_tag("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_tag(" JPEG "), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::Jpeg.to_string(), "jpeg");
        assert_eq!(ImageFormat::from_tag("svg"), None);
    }

    #[test]
    fn output_formats_are_a_subset_of_inputs() {
        assert!(ImageFormat::Png.is_output());
        assert!(ImageFormat::Gif.is_output());
        assert!(!ImageFormat::Tiff.is_output());
        assert!(!ImageFormat::WebP.is_output());
    }

    #[test]
    fn serializes_as_lowercase_tag() {
        let json = serde_json::to_string(&ImageFormat::WebP).unwrap();
        assert_eq!(json, "\"webp\"");
        let parsed: ImageFormat = serde_json::from_str("\"jpg\"").unwrap();
        assert_eq!(parsed, ImageFormat::Jpeg);
    }
}
