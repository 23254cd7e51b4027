//! Scoped temporary files backing streamed document responses.

use std::{
    io,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use tempfile::{TempDir, TempPath};
use thiserror::Error;
use tokio::{fs, io::AsyncReadExt, io::AsyncWriteExt};
use tracing::{debug, warn};

const ARTIFACT_DIR_PREFIX: &str = "shutterbug-";
const ARTIFACT_FILE_PREFIX: &str = "render-";
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to prepare artifact directory: {0}")]
    Init(#[source] io::Error),
    #[error("failed to allocate temporary artifact: {0}")]
    Allocate(#[source] io::Error),
    #[error("failed to write artifact: {0}")]
    Write(#[source] io::Error),
    #[error("failed to open artifact for streaming: {0}")]
    Open(#[source] io::Error),
}

/// Allocates uniquely named temporary files inside a private directory.
#[derive(Debug)]
pub struct ArtifactManager {
    dir: TempDir,
}

impl ArtifactManager {
    /// Create the private directory under `root`, or under the system temp
    /// directory when no root is configured.
    pub fn new(root: Option<&Path>) -> Result<Self, ArtifactError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(ARTIFACT_DIR_PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(ArtifactError::Init)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(ArtifactError::Init)?;

        Ok(Self { dir })
    }

    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// Allocate an empty file named `render-XXXXXX.<extension>`.
    pub fn allocate(&self, extension: &str) -> Result<Artifact, ArtifactError> {
        let suffix = format!(".{extension}");
        let file = tempfile::Builder::new()
            .prefix(ARTIFACT_FILE_PREFIX)
            .suffix(&suffix)
            .tempfile_in(self.dir.path())
            .map_err(ArtifactError::Allocate)?;

        let guard = CleanupGuard::new(file.into_temp_path());
        debug!(
            target = "shutterbug::artifact",
            path = %guard.path().display(),
            "Allocated artifact"
        );
        Ok(Artifact { guard })
    }

    /// Remove the private directory and anything still inside it.
    pub fn purge(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            warn!(
                target = "shutterbug::artifact",
                path = %path.display(),
                error = %err,
                "Failed to remove artifact directory"
            );
        }
    }
}

/// A temporary file that is deleted when dropped.
#[derive(Debug)]
pub struct Artifact {
    guard: CleanupGuard,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        self.guard.path()
    }

    pub async fn write_all(&self, bytes: &[u8]) -> Result<(), ArtifactError> {
        let mut file = fs::File::create(self.path())
            .await
            .map_err(ArtifactError::Write)?;
        file.write_all(bytes).await.map_err(ArtifactError::Write)?;
        file.flush().await.map_err(ArtifactError::Write)?;
        Ok(())
    }

    /// Open the file for reading. Ownership of the deletion obligation moves
    /// into the returned stream.
    pub async fn into_stream(self) -> Result<ArtifactStream, ArtifactError> {
        let file = fs::File::open(self.path())
            .await
            .map_err(ArtifactError::Open)?;
        let len = file.metadata().await.map_err(ArtifactError::Open)?.len();
        let guard = self.guard;

        let inner = try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
            loop {
                let read = file.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..read]);
            }
            drop(file);
            drop(guard);
        };

        Ok(ArtifactStream {
            inner: Box::pin(inner),
            len,
        })
    }
}

/// Chunked reader over an artifact.
///
/// The backing file is removed as soon as the last chunk has been read, or
/// when the stream is dropped early (client disconnect, write error).
pub struct ArtifactStream {
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    len: u64,
}

impl ArtifactStream {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Deletes the wrapped path exactly once. Failures are logged only.
#[derive(Debug)]
struct CleanupGuard {
    path: Option<TempPath>,
    display: PathBuf,
}

impl CleanupGuard {
    fn new(path: TempPath) -> Self {
        let display = path.to_path_buf();
        Self {
            path: Some(path),
            display,
        }
    }

    fn path(&self) -> &Path {
        &self.display
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match path.close() {
            Ok(()) => debug!(
                target = "shutterbug::artifact",
                path = %self.display.display(),
                "Removed artifact"
            ),
            Err(err) => warn!(
                target = "shutterbug::artifact",
                path = %self.display.display(),
                error = %err,
                "Failed to remove artifact"
            ),
        }
    }
}
