//! Upload handling for recipe photos: format sniffing and downsizing.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::{Error, Result};
use crate::models::ImageAttachment;

/// Largest width or height a stored image may have.
pub const MAX_DIMENSION: u32 = 200;

/// File extensions accepted by the upload forms.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Decode an upload, shrink it to fit inside 200×200 keeping the aspect ratio,
/// and re-encode it in its original format. Images that already fit are
/// stored byte-for-byte.
pub fn prepare_image(bytes: &[u8], filename: &str) -> Result<ImageAttachment> {
    let format = image::guess_format(bytes)
        .map_err(|_| Error::UnsupportedImage(display_name(filename)))?;
    let mime = mime_type(format).ok_or_else(|| Error::UnsupportedImage(display_name(filename)))?;

    let img = image::load_from_memory_with_format(bytes, format)?;
    let bytes = if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        let resized = img.thumbnail(MAX_DIMENSION, MAX_DIMENSION);
        tracing::debug!(
            from = %format_args!("{}x{}", img.width(), img.height()),
            to = %format_args!("{}x{}", resized.width(), resized.height()),
            "resized recipe image"
        );
        encode(&resized, format)?
    } else {
        bytes.to_vec()
    };

    Ok(ImageAttachment {
        bytes,
        mime: mime.to_string(),
        filename: default_filename(filename, format),
    })
}

/// Re-check an attachment before it is stored: oversized images are shrunk,
/// undecodable ones rejected.
pub(crate) fn fit_attachment(image: &ImageAttachment) -> Result<ImageAttachment> {
    prepare_image(&image.bytes, &image.filename)
}

/// True when the file name carries one of [`ACCEPTED_EXTENSIONS`].
#[must_use]
pub fn has_accepted_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut out, format)?,
        _ => img.write_to(&mut out, format)?,
    }
    Ok(out.into_inner())
}

fn mime_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

fn display_name(filename: &str) -> String {
    if filename.trim().is_empty() {
        "upload".to_string()
    } else {
        filename.trim().to_string()
    }
}

fn default_filename(filename: &str, format: ImageFormat) -> String {
    let name = filename.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    let ext = format.extensions_str().first().copied().unwrap_or("img");
    format!("image.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_large_image_is_shrunk_keeping_ratio() {
        let attachment = prepare_image(&png_bytes(800, 400), "dish.png").unwrap();
        assert_eq!(attachment.mime, "image/png");
        assert_eq!(attachment.filename, "dish.png");

        let stored = image::load_from_memory(&attachment.bytes).unwrap();
        assert_eq!((stored.width(), stored.height()), (200, 100));
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let original = png_bytes(120, 80);
        let attachment = prepare_image(&original, "small.png").unwrap();
        assert_eq!(attachment.bytes, original);
    }

    #[test]
    fn test_jpeg_resize() {
        let img = image::RgbImage::from_fn(300, 600, |_, _| image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();

        let attachment = prepare_image(&out.into_inner(), "").unwrap();
        assert_eq!(attachment.mime, "image/jpeg");
        assert_eq!(attachment.filename, "image.jpg");
        let stored = image::load_from_memory(&attachment.bytes).unwrap();
        assert_eq!((stored.width(), stored.height()), (100, 200));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = prepare_image(b"definitely not an image", "notes.txt").unwrap_err();
        assert!(matches!(err, Error::UnsupportedImage(name) if name == "notes.txt"));
    }

    #[test]
    fn test_accepted_extensions() {
        assert!(has_accepted_extension("photo.JPG"));
        assert!(has_accepted_extension("a.b.webp"));
        assert!(!has_accepted_extension("photo.gif"));
        assert!(!has_accepted_extension("png"));
    }
}
