//! Image inspection and transcoding.
//!
//! Pure functions over byte buffers: nothing here touches the filesystem.
//! Decoding and encoding are CPU bound, async callers should run
//! [`process`] on a blocking thread.

use crate::{
    models::image::{ImageFormat, ImageInfo},
    services::error::{FileError, FileResult},
};
use bytes::Bytes;
use image::{DynamicImage, ImageReader, imageops::FilterType};
use std::io::Cursor;

/// Result of [`process`]: the bytes to serve or store and what they are.
#[derive(Clone, Debug)]
pub struct Processed {
    pub data: Bytes,
    pub info: ImageInfo,
}

fn from_codec(format: image::ImageFormat) -> Option<ImageFormat> {
    match format {
        image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::Tiff => Some(ImageFormat::Tiff),
        image::ImageFormat::WebP => Some(ImageFormat::WebP),
        _ => None,
    }
}

fn to_codec(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Bmp => image::ImageFormat::Bmp,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Gif => image::ImageFormat::Gif,
        ImageFormat::Tiff => image::ImageFormat::Tiff,
        ImageFormat::WebP => image::ImageFormat::WebP,
    }
}

/// Detect format and dimensions by reading only the image header.
pub fn inspect(data: &[u8]) -> FileResult<ImageInfo> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| FileError::InvalidImage(err.to_string()))?;

    let codec = reader
        .format()
        .ok_or_else(|| FileError::InvalidImage("unrecognised image header".into()))?;
    let format = from_codec(codec)
        .ok_or_else(|| FileError::UnsupportedFormat(format!("{:?}", codec).to_lowercase()))?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| FileError::InvalidImage(err.to_string()))?;
    if width == 0 || height == 0 {
        return Err(FileError::InvalidImage(format!(
            "invalid dimensions {}x{}",
            width, height
        )));
    }

    Ok(ImageInfo {
        format,
        width,
        height,
    })
}

/// Fit an image into `target_width` x `target_height` and encode it as
/// `target_format`.
///
/// Aspect ratio is preserved and images are never enlarged. When the input
/// is already in the target format and fits the box, the original bytes are
/// returned untouched.
pub fn process(
    data: Bytes,
    target_format: &str,
    target_width: u32,
    target_height: u32,
) -> FileResult<Processed> {
    let target = ImageFormat::from_tag(target_format)
        .filter(ImageFormat::is_output)
        .ok_or_else(|| FileError::UnsupportedFormat(target_format.to_string()))?;

    if target_width == 0 || target_height == 0 {
        return Err(FileError::InvalidImage(format!(
            "invalid target dimensions {}x{}",
            target_width, target_height
        )));
    }

    let source = inspect(&data)?;
    let scale = f64::min(
        f64::from(target_width) / f64::from(source.width),
        f64::from(target_height) / f64::from(source.height),
    );

    if source.format == target && scale >= 1.0 {
        return Ok(Processed { data, info: source });
    }

    let mut img = image::load_from_memory_with_format(&data, to_codec(source.format))
        .map_err(FileError::Decode)?;

    if scale < 1.0 {
        let width = scaled(source.width, scale);
        let height = scaled(source.height, scale);
        img = img.resize_exact(width, height, FilterType::Lanczos3);
    }

    let encoded = encode(img, target)?;
    Ok(Processed {
        data: Bytes::from(encoded.0),
        info: ImageInfo {
            format: target,
            width: encoded.1,
            height: encoded.2,
        },
    })
}

fn scaled(dimension: u32, scale: f64) -> u32 {
    ((f64::from(dimension) * scale).round() as u32).max(1)
}

fn encode(img: DynamicImage, format: ImageFormat) -> FileResult<(Vec<u8>, u32, u32)> {
    // The JPEG encoder has no alpha channel; the others take 8-bit RGB(A).
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ if img.color().has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    };

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, to_codec(format))
        .map_err(FileError::Encode)?;
    Ok((buf.into_inner(), img.width(), img.height()))
}

/// Cheap magic-byte sniff used to validate uploads flagged as images.
pub fn looks_like_image(data: &[u8]) -> bool {
    image::guess_format(data)
        .ok()
        .and_then(from_codec)
        .is_some()
}

/// MIME type for a response body, based on its magic bytes.
pub fn content_type_of(data: &[u8]) -> &'static str {
    image::guess_format(data)
        .ok()
        .and_then(from_codec)
        .map(|format| format.mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    pub(crate) fn encoded_image(width: u32, height: u32, format: image::ImageFormat) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 30])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        Bytes::from(buf.into_inner())
    }

    #[test]
    fn inspect_reads_format_and_dimensions() {
        let png = encoded_image(40, 20, image::ImageFormat::Png);
        let info = inspect(&png).unwrap();
        assert_eq!(info.format, ImageFormat::Png);
        assert_eq!((info.width, info.height), (40, 20));
    }

    #[test]
    fn inspect_rejects_garbage() {
        let err = inspect(b"definitely not an image").unwrap_err();
        assert!(matches!(err, FileError::InvalidImage(_)));
    }

    #[test]
    fn unsupported_output_fails_before_decoding() {
        let err = process(Bytes::from_static(b"junk"), "webp", 100, 100).unwrap_err();
        assert!(matches!(err, FileError::UnsupportedFormat(f) if f == "webp"));
        let err = process(Bytes::from_static(b"junk"), "svg", 100, 100).unwrap_err();
        assert!(matches!(err, FileError::UnsupportedFormat(_)));
    }

    #[test]
    fn same_format_that_fits_is_returned_verbatim() {
        let png = encoded_image(30, 30, image::ImageFormat::Png);
        let out = process(png.clone(), "png", 100, 100).unwrap();
        assert_eq!(out.data, png);
        assert_eq!(out.info.format, ImageFormat::Png);
        assert_eq!((out.info.width, out.info.height), (30, 30));
    }

    #[test]
    fn never_upscales_when_transcoding() {
        let png = encoded_image(30, 20, image::ImageFormat::Png);
        let out = process(png, "jpg", 300, 300).unwrap();
        assert_eq!(out.info.format, ImageFormat::Jpeg);
        assert_eq!((out.info.width, out.info.height), (30, 20));

        let check = inspect(&out.data).unwrap();
        assert_eq!(check.format, ImageFormat::Jpeg);
        assert_eq!((check.width, check.height), (30, 20));
    }

    #[test]
    fn downscales_preserving_aspect_ratio() {
        let png = encoded_image(200, 100, image::ImageFormat::Png);
        let out = process(png, "png", 50, 50).unwrap();
        assert_eq!((out.info.width, out.info.height), (50, 25));
        let check = inspect(&out.data).unwrap();
        assert_eq!((check.width, check.height), (50, 25));
    }

    #[test]
    fn transparent_images_encode_to_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 100])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();

        let out = process(Bytes::from(buf.into_inner()), "jpeg", 8, 8).unwrap();
        assert_eq!(inspect(&out.data).unwrap().format, ImageFormat::Jpeg);
    }

    #[test]
    fn zero_target_box_is_rejected() {
        let png = encoded_image(10, 10, image::ImageFormat::Png);
        assert!(matches!(
            process(png, "png", 0, 10),
            Err(FileError::InvalidImage(_))
        ));
    }

    #[test]
    fn sniffing_recognises_images_only() {
        let gif = encoded_image(4, 4, image::ImageFormat::Gif);
        assert!(looks_like_image(&gif));
        assert_eq!(content_type_of(&gif), "image/gif");
        assert!(!looks_like_image(b"plain text"));
        assert_eq!(content_type_of(b"plain text"), "application/octet-stream");
    }
}
