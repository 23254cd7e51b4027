use std::{fmt, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{
    application::{
        artifact::{ArtifactError, ArtifactStream},
        engine::EngineError,
        pool::PoolError,
    },
    domain::error::DomainError,
};

use super::encode::TranscodeError;

/// Suspending stages of the pipeline, each bounded by the stage deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Viewport,
    Navigation,
    Render,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Viewport => "viewport",
            Stage::Navigation => "navigation",
            Stage::Render => "render",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification used when translating failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    PoolUnavailable,
    Timeout,
    Unhandled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PoolUnavailable => "pool_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unhandled => "unhandled",
        }
    }
}

/// Failures surfaced by the rendering pipeline.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error("navigation to `{url}` failed")]
    Navigation {
        url: String,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("{stage} stage exceeded its {}ms deadline", timeout.as_millis())]
    Timeout { stage: Stage, timeout: Duration },
    #[error("{stage} stage failed")]
    Stage {
        stage: Stage,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::Invalid(_) => ErrorKind::BadRequest,
            RenderError::Navigation { .. } => ErrorKind::NotFound,
            RenderError::Pool(PoolError::Draining) => ErrorKind::PoolUnavailable,
            RenderError::Timeout { .. } => ErrorKind::Timeout,
            RenderError::Pool(PoolError::Engine(_))
            | RenderError::Stage { .. }
            | RenderError::Artifact(_)
            | RenderError::Transcode(_) => ErrorKind::Unhandled,
        }
    }
}

/// Payload of a successful render.
pub enum RenderBody {
    /// Encoded image bytes held in memory.
    Image(Bytes),
    /// Streamed document backed by a temporary file.
    Document(ArtifactStream),
}

impl fmt::Debug for RenderBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderBody::Image(bytes) => f.debug_tuple("Image").field(&bytes.len()).finish(),
            RenderBody::Document(stream) => f.debug_tuple("Document").field(stream).finish(),
        }
    }
}

#[derive(Debug)]
pub struct RenderResult {
    /// The requested format string, echoed verbatim.
    pub content_type: String,
    pub body: RenderBody,
}

impl RenderResult {
    pub fn content_length(&self) -> u64 {
        match &self.body {
            RenderBody::Image(bytes) => bytes.len() as u64,
            RenderBody::Document(stream) => stream.len(),
        }
    }
}
