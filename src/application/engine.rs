//! Engine traits describing the headless rendering backend.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    format::ImageEncoding,
    geometry::{ClipRect, PageGeometry, Viewport},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch rendering engine: {0}")]
    Launch(String),
    #[error("failed to open page: {0}")]
    OpenPage(String),
    #[error("failed to close page: {0}")]
    ClosePage(String),
    #[error("failed to apply viewport: {0}")]
    Viewport(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("screenshot capture failed: {0}")]
    Capture(String),
    #[error("pdf printing failed: {0}")]
    Print(String),
    #[error("engine task aborted: {0}")]
    Join(String),
}

impl EngineError {
    pub fn launch(err: impl std::fmt::Display) -> Self {
        Self::Launch(err.to_string())
    }

    pub fn join(err: impl std::fmt::Display) -> Self {
        Self::Join(err.to_string())
    }
}

/// Starts rendering-engine processes on behalf of the instance pool.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Engine>, EngineError>;
}

/// One running rendering-engine process.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Open a fresh, isolated page. Pages never share navigation history,
    /// cookies or viewport settings with earlier pages.
    async fn open_page(&self) -> Result<Box<dyn EnginePage>, EngineError>;

    /// Terminate the process. Consumes the engine so it runs at most once.
    async fn shutdown(self: Box<Self>);
}

/// A single rendering context bound to one request.
#[async_trait]
pub trait EnginePage: Send + Sync {
    async fn set_viewport(&self, viewport: Viewport) -> Result<(), EngineError>;

    async fn navigate(&self, url: &str) -> Result<(), EngineError>;

    /// Capture the clipped region as encoded image bytes. Engines are only
    /// asked for PNG or JPEG; other encodings are transcoded by the caller.
    async fn capture(&self, encoding: ImageEncoding, clip: ClipRect)
    -> Result<Vec<u8>, EngineError>;

    async fn print_pdf(&self, geometry: PageGeometry) -> Result<Vec<u8>, EngineError>;

    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
