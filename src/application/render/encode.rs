//! Image transcoding for encodings the engine cannot capture directly.

use std::io::Cursor;

use image::ImageFormat;
use thiserror::Error;

use crate::domain::format::ImageEncoding;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to decode captured image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode {target} image: {source}")]
    Encode {
        target: &'static str,
        #[source]
        source: image::ImageError,
    },
    #[error("transcode task aborted: {0}")]
    Join(String),
}

/// The encoding the engine is asked for when the caller wants `target`.
pub fn capture_encoding(target: ImageEncoding) -> ImageEncoding {
    match target {
        ImageEncoding::Gif => ImageEncoding::Png,
        other => other,
    }
}

/// Convert a captured PNG into `target` when the two differ.
pub async fn transcode(captured: Vec<u8>, target: ImageEncoding) -> Result<Vec<u8>, TranscodeError> {
    if capture_encoding(target) == target {
        return Ok(captured);
    }

    tokio::task::spawn_blocking(move || transcode_blocking(&captured, target))
        .await
        .map_err(|err| TranscodeError::Join(err.to_string()))?
}

fn transcode_blocking(captured: &[u8], target: ImageEncoding) -> Result<Vec<u8>, TranscodeError> {
    let decoded = image::load_from_memory(captured).map_err(TranscodeError::Decode)?;
    let (format, name) = match target {
        ImageEncoding::Gif => (ImageFormat::Gif, "gif"),
        ImageEncoding::Jpeg => (ImageFormat::Jpeg, "jpeg"),
        ImageEncoding::Png => (ImageFormat::Png, "png"),
    };

    let mut out = Cursor::new(Vec::new());
    // GIF and JPEG carry no alpha channel.
    let decoded = match target {
        ImageEncoding::Png => decoded,
        _ => image::DynamicImage::ImageRgb8(decoded.to_rgb8()),
    };
    decoded
        .write_to(&mut out, format)
        .map_err(|source| TranscodeError::Encode {
            target: name,
            source,
        })?;
    Ok(out.into_inner())
}
