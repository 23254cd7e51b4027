//! Render request resolution from raw query parameters.

use serde::Deserialize;

use super::{
    error::DomainError,
    format::{RenderFormat, ResolvedFormat},
    geometry::{Geometry, PageGeometry, Viewport},
};

/// Raw query parameters as received on the wire.
///
/// Every field is kept as a string so malformed numbers fall back to
/// defaults instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub url: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub format: Option<String>,
}

/// Configured fallbacks applied when a parameter is absent or invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDefaults {
    pub viewport: Viewport,
    pub format: RenderFormat,
}

/// A validated request ready to be driven through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub url: String,
    pub viewport: Viewport,
    pub format: ResolvedFormat,
}

impl RenderRequest {
    /// Resolve raw parameters: viewport first, then `url`, then `format`.
    pub fn resolve(params: &RenderParams, defaults: &RenderDefaults) -> Result<Self, DomainError> {
        let viewport = Viewport::resolve(
            params.width.as_deref(),
            params.height.as_deref(),
            defaults.viewport,
        );

        let url = params
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| DomainError::missing("url"))?
            .to_string();

        // `format=` with nothing after it counts as absent, like `width=`.
        let requested = params
            .format
            .as_deref()
            .filter(|format| !format.trim().is_empty());
        let format = match requested {
            Some(requested) => ResolvedFormat::resolve(requested)?,
            None => ResolvedFormat::resolve(defaults.format.as_str())?,
        };

        Ok(Self {
            url,
            viewport,
            format,
        })
    }

    pub fn content_type(&self) -> &str {
        self.format.requested()
    }

    /// Page geometry for documents, full-viewport clip for images.
    pub fn geometry(&self) -> Geometry {
        match self.format.format().image_encoding() {
            Some(encoding) => Geometry::Clip {
                clip: self.viewport.full_clip(),
                encoding,
            },
            None => Geometry::Page(PageGeometry::a4_portrait()),
        }
    }
}
