use image::ImageFormat;

use crate::engine::InferenceError;

/// Accepted input encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

/// Identify an image from its magic bytes. Only PNG and JPEG are accepted.
pub fn sniff_image(bytes: &[u8]) -> Result<ImageKind, InferenceError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok(ImageKind::Png),
        Ok(ImageFormat::Jpeg) => Ok(ImageKind::Jpeg),
        Ok(other) => Err(InferenceError::InvalidImage(format!(
            "Unsupported image format {other:?}; expected JPEG or PNG"
        ))),
        Err(_) => Err(InferenceError::InvalidImage(
            "Unrecognized image data; expected JPEG or PNG".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn recognizes_magic_bytes() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let jpeg = b"\xff\xd8\xff\xe0\0\x10JFIF\0";
        assert_eq!(sniff_image(png).unwrap(), ImageKind::Png);
        assert_eq!(sniff_image(jpeg).unwrap(), ImageKind::Jpeg);
    }

    #[test]
    fn rejects_other_data() {
        assert_matches!(
            sniff_image(b"GIF89a......"),
            Err(InferenceError::InvalidImage(_))
        );
        assert_matches!(
            sniff_image(b"hello world"),
            Err(InferenceError::InvalidImage(_))
        );
    }
}
