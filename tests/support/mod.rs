//! In-process stand-in for the browser backend.
//!
//! Navigation to any `.invalid` host fails, navigation to a URL containing
//! `stall` never completes, and captures produce real images of the
//! clipped size so responses can be decoded and measured.

#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use shutterbug::{
    application::{
        artifact::ArtifactManager,
        engine::{Engine, EngineError, EngineLauncher, EnginePage},
        pool::{InstancePool, PoolConfig},
        render::{RenderPipelineConfig, RenderService},
    },
    domain::{
        format::{ImageEncoding, RenderFormat},
        geometry::{ClipRect, PageGeometry, Viewport},
        request::RenderDefaults,
    },
};
use tempfile::TempDir;

pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n%%EOF\n";

pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1024,
    height: 768,
};

#[derive(Debug, Default)]
pub struct Counters {
    pub launched: AtomicUsize,
    pub shutdown: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub fail_launch: AtomicBool,
    pub launch_delay_ms: AtomicU64,
    pub open_page_delay_ms: AtomicU64,
    pub viewports: Mutex<Vec<Viewport>>,
    pub printed: Mutex<Vec<PageGeometry>>,
}

impl Counters {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) -> usize {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.pages_closed.load(Ordering::SeqCst)
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        self.launch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_open_page_delay(&self, delay: Duration) {
        self.open_page_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

async fn pause(delay_ms: &AtomicU64) {
    let millis = delay_ms.load(Ordering::SeqCst);
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Engine>, EngineError> {
        pause(&self.counters.launch_delay_ms).await;
        if self.counters.fail_launch.load(Ordering::SeqCst) {
            return Err(EngineError::Launch("browser binary not found".to_string()));
        }
        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeEngine {
    counters: Arc<Counters>,
}

#[async_trait]
impl Engine for FakeEngine {
    async fn open_page(&self) -> Result<Box<dyn EnginePage>, EngineError> {
        pause(&self.counters.open_page_delay_ms).await;
        self.counters.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn shutdown(self: Box<Self>) {
        self.counters.shutdown.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakePage {
    counters: Arc<Counters>,
}

#[async_trait]
impl EnginePage for FakePage {
    async fn set_viewport(&self, viewport: Viewport) -> Result<(), EngineError> {
        self.counters
            .viewports
            .lock()
            .expect("viewports lock")
            .push(viewport);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), EngineError> {
        if url.contains("stall") {
            std::future::pending::<()>().await;
        }
        let host = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split(['/', '?', ':']).next())
            .unwrap_or("");
        if host.ends_with(".invalid") {
            return Err(EngineError::Navigation(
                "net::ERR_NAME_NOT_RESOLVED".to_string(),
            ));
        }
        Ok(())
    }

    async fn capture(
        &self,
        encoding: ImageEncoding,
        clip: ClipRect,
    ) -> Result<Vec<u8>, EngineError> {
        let format = match encoding {
            ImageEncoding::Png => ImageFormat::Png,
            ImageEncoding::Jpeg => ImageFormat::Jpeg,
            ImageEncoding::Gif => {
                return Err(EngineError::Capture("gif capture unsupported".to_string()));
            }
        };
        let image = RgbImage::from_pixel(clip.width, clip.height, Rgb([240, 240, 240]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, format)
            .map_err(|err| EngineError::Capture(err.to_string()))?;
        Ok(out.into_inner())
    }

    async fn print_pdf(&self, geometry: PageGeometry) -> Result<Vec<u8>, EngineError> {
        self.counters
            .printed
            .lock()
            .expect("printed lock")
            .push(geometry);
        Ok(FAKE_PDF.to_vec())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.counters.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min,
        max,
        idle_timeout: Duration::from_secs(300),
    }
}

pub fn fake_pool(config: PoolConfig) -> (InstancePool, Arc<Counters>) {
    let launcher = FakeLauncher::new();
    let counters = Arc::clone(&launcher.counters);
    (InstancePool::new(Arc::new(launcher), config), counters)
}

/// A fake pool whose engines take `launch_delay` to start.
pub fn slow_pool(config: PoolConfig, launch_delay: Duration) -> (InstancePool, Arc<Counters>) {
    let (pool, counters) = fake_pool(config);
    counters.set_launch_delay(launch_delay);
    (pool, counters)
}

/// Poll until `done` holds, failing after one second.
pub async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within one second");
}

/// A render service over a fake pool, with artifacts in a throwaway root.
pub struct Harness {
    pub renderer: Arc<RenderService>,
    pub pool: InstancePool,
    pub counters: Arc<Counters>,
    pub artifacts: Arc<ArtifactManager>,
    _root: TempDir,
}

impl Harness {
    pub fn new(stage_timeout: Duration) -> Self {
        let (pool, counters) = fake_pool(pool_config(0, 2));
        let root = TempDir::new().expect("temp root");
        let artifacts =
            Arc::new(ArtifactManager::new(Some(root.path())).expect("artifact manager"));
        let renderer = Arc::new(RenderService::new(
            pool.clone(),
            Arc::clone(&artifacts),
            RenderPipelineConfig {
                defaults: RenderDefaults {
                    viewport: DEFAULT_VIEWPORT,
                    format: RenderFormat::Png,
                },
                stage_timeout,
            },
        ));

        Self {
            renderer,
            pool,
            counters,
            artifacts,
            _root: root,
        }
    }

    pub fn artifact_count(&self) -> usize {
        std::fs::read_dir(self.artifacts.directory())
            .expect("read artifact dir")
            .count()
    }

    /// Wait for background lease releases to settle.
    pub async fn settle(&self) {
        for _ in 0..100 {
            if self.pool.status().leased == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("leases were not released: {:?}", self.pool.status());
    }
}
