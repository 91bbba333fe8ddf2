//! Image encoding: page image file → base64 `data:` URL.
//!
//! OpenAI-compatible vision APIs accept images as data URLs embedded in the
//! JSON request body. The MIME type is taken from the bytes themselves, so a
//! mislabelled or truncated file fails here as a page error instead of being
//! shipped to the service.

use crate::error::PageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use std::path::Path;
use tracing::debug;

/// Read the image at `path` and encode it as a `data:` URL.
pub async fn encode_page_file(page: usize, path: &Path) -> Result<String, PageError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PageError::ImageUnreadable {
            page,
            detail: format!("{}: {}", path.display(), e),
        })?;
    encode_page_bytes(page, &bytes)
}

/// Encode raw image bytes as a `data:` URL.
pub fn encode_page_bytes(page: usize, bytes: &[u8]) -> Result<String, PageError> {
    if bytes.is_empty() {
        return Err(PageError::ImageUnreadable {
            page,
            detail: "image file is empty".into(),
        });
    }

    let mime = match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(other) => {
            return Err(PageError::ImageUnreadable {
                page,
                detail: format!("unsupported image format {other:?}"),
            })
        }
        Err(e) => {
            return Err(PageError::ImageUnreadable {
                page,
                detail: e.to_string(),
            })
        }
    };

    let b64 = STANDARD.encode(bytes);
    debug!("Encoded page {} → {} bytes base64 ({})", page, b64.len(), mime);
    Ok(format!("data:{mime};base64,{b64}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode should succeed");
        buf
    }

    #[test]
    fn encode_small_image() {
        let bytes = png_bytes();
        let url = encode_page_bytes(1, &bytes).expect("encode should succeed");
        let payload = url
            .strip_prefix("data:image/png;base64,")
            .expect("png data url prefix");
        assert_eq!(STANDARD.decode(payload).expect("valid base64"), bytes);
    }

    #[test]
    fn garbage_is_a_page_error() {
        let err = encode_page_bytes(4, b"definitely not an image").unwrap_err();
        assert!(matches!(err, PageError::ImageUnreadable { page: 4, .. }));
        assert!(encode_page_bytes(4, b"").is_err());
    }

    #[tokio::test]
    async fn missing_file_is_a_page_error() {
        let err = encode_page_file(2, Path::new("/no/such/page_002.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::ImageUnreadable { page: 2, .. }));
    }
}
