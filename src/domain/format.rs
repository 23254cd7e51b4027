//! Output formats accepted by the render endpoint.

use std::{fmt, str::FromStr};

use serde::Serialize;

use super::error::DomainError;

/// The fixed set of formats the service can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Gif,
    Jpeg,
    Jpg,
    Pdf,
    Png,
}

/// Encodings the rendering engine is asked to produce for image output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    Jpeg,
    Gif,
}

impl RenderFormat {
    pub const ALL: [RenderFormat; 5] = [
        RenderFormat::Gif,
        RenderFormat::Jpeg,
        RenderFormat::Jpg,
        RenderFormat::Pdf,
        RenderFormat::Png,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RenderFormat::Gif => "gif",
            RenderFormat::Jpeg => "jpeg",
            RenderFormat::Jpg => "jpg",
            RenderFormat::Pdf => "pdf",
            RenderFormat::Png => "png",
        }
    }

    /// Document formats are printed to a temporary file and streamed back.
    pub fn is_document(self) -> bool {
        matches!(self, RenderFormat::Pdf)
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    /// Image encoding for non-document formats.
    pub fn image_encoding(self) -> Option<ImageEncoding> {
        match self {
            RenderFormat::Gif => Some(ImageEncoding::Gif),
            RenderFormat::Jpeg | RenderFormat::Jpg => Some(ImageEncoding::Jpeg),
            RenderFormat::Png => Some(ImageEncoding::Png),
            RenderFormat::Pdf => None,
        }
    }
}

impl fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RenderFormat::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| DomainError::unsupported_format(value))
    }
}

/// A format matched against the supported set, keeping the caller's spelling.
///
/// The original spelling is echoed back as the response content type, so a
/// request for `format=PNG` is answered with `Content-Type: PNG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFormat {
    format: RenderFormat,
    requested: String,
}

impl ResolvedFormat {
    pub fn resolve(requested: &str) -> Result<Self, DomainError> {
        let format = requested.parse::<RenderFormat>()?;
        Ok(Self {
            format,
            requested: requested.to_string(),
        })
    }

    pub fn format(&self) -> RenderFormat {
        self.format
    }

    pub fn requested(&self) -> &str {
        &self.requested
    }
}
