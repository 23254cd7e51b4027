//! Headless Chromium backend built on `headless_chrome`.
//!
//! The crate's API is blocking, so every call hops onto the blocking pool.
//! Each page lives in its own browser context, which is disposed when the
//! page closes; cookies, storage and history never leak between requests.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use headless_chrome::{
    Browser, LaunchOptions, Tab,
    protocol::cdp::{
        Emulation,
        Page::{self, CaptureScreenshotFormatOption},
        Target,
    },
    types::PrintToPdfOptions,
};
use tracing::{debug, warn};

use crate::{
    application::engine::{Engine, EngineError, EngineLauncher, EnginePage},
    config::EngineSettings,
    domain::{
        format::ImageEncoding,
        geometry::{ClipRect, PageGeometry, Viewport},
    },
};

/// The browser's own watchdog closes the connection after this much silence.
/// Idle instances are retired by pool maintenance long before it fires.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const JPEG_QUALITY: u32 = 90;

pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    sandbox: bool,
    launch_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            chrome_path: settings.chrome_path.clone(),
            sandbox: settings.sandbox,
            launch_timeout: settings.launch_timeout,
        }
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn Engine>, EngineError> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.sandbox)
            .path(self.chrome_path.clone())
            .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
            .build()
            .map_err(EngineError::launch)?;

        let launch = tokio::task::spawn_blocking(move || Browser::new(options));
        let browser = tokio::time::timeout(self.launch_timeout, launch)
            .await
            .map_err(|_| {
                EngineError::Launch(format!(
                    "browser did not start within {}s",
                    self.launch_timeout.as_secs()
                ))
            })?
            .map_err(EngineError::join)?
            .map_err(EngineError::launch)?;

        Ok(Box::new(ChromeEngine { browser }))
    }
}

pub struct ChromeEngine {
    browser: Browser,
}

#[async_trait]
impl Engine for ChromeEngine {
    async fn open_page(&self) -> Result<Box<dyn EnginePage>, EngineError> {
        let browser = self.browser.clone();
        let page = tokio::task::spawn_blocking(move || {
            let context = browser
                .new_context()
                .map_err(|err| EngineError::OpenPage(err.to_string()))?;
            let context_id = context.get_id().to_string();
            let tab = context
                .new_tab()
                .map_err(|err| EngineError::OpenPage(err.to_string()))?;
            Ok::<_, EngineError>((context_id, tab))
        })
        .await
        .map_err(EngineError::join)??;

        let (context_id, tab) = page;
        debug!(
            target = "shutterbug::chrome",
            context_id = %context_id,
            "Opened page in fresh browser context"
        );
        Ok(Box::new(ChromePage { context_id, tab }))
    }

    async fn shutdown(self: Box<Self>) {
        // Dropping the last handle kills the child process and reaps it.
        let browser = self.browser;
        if let Err(err) = tokio::task::spawn_blocking(move || drop(browser)).await {
            warn!(
                target = "shutterbug::chrome",
                error = %err,
                "Browser shutdown task aborted"
            );
        }
    }
}

pub struct ChromePage {
    context_id: String,
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, EngineError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || call(&tab))
            .await
            .map_err(EngineError::join)?
    }
}

#[async_trait]
impl EnginePage for ChromePage {
    async fn set_viewport(&self, viewport: Viewport) -> Result<(), EngineError> {
        self.blocking(move |tab| {
            tab.call_method(device_metrics(viewport))
                .map(|_| ())
                .map_err(|err| EngineError::Viewport(err.to_string()))
        })
        .await
    }

    async fn navigate(&self, url: &str) -> Result<(), EngineError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|err| EngineError::Navigation(err.to_string()))
        })
        .await
    }

    async fn capture(
        &self,
        encoding: ImageEncoding,
        clip: ClipRect,
    ) -> Result<Vec<u8>, EngineError> {
        let (format, quality) = match encoding {
            ImageEncoding::Png => (CaptureScreenshotFormatOption::Png, None),
            ImageEncoding::Jpeg => (CaptureScreenshotFormatOption::Jpeg, Some(JPEG_QUALITY)),
            ImageEncoding::Gif => {
                return Err(EngineError::Capture(
                    "gif is not a native capture format".to_string(),
                ));
            }
        };

        self.blocking(move |tab| {
            let viewport = Page::Viewport {
                x: f64::from(clip.x),
                y: f64::from(clip.y),
                width: f64::from(clip.width),
                height: f64::from(clip.height),
                scale: 1.0,
            };
            tab.capture_screenshot(format, quality, Some(viewport), true)
                .map_err(|err| EngineError::Capture(err.to_string()))
        })
        .await
    }

    async fn print_pdf(&self, geometry: PageGeometry) -> Result<Vec<u8>, EngineError> {
        self.blocking(move |tab| {
            let options = PrintToPdfOptions {
                landscape: Some(geometry.landscape),
                print_background: Some(geometry.print_background),
                paper_width: Some(geometry.paper_width),
                paper_height: Some(geometry.paper_height),
                margin_top: Some(geometry.margin),
                margin_bottom: Some(geometry.margin),
                margin_left: Some(geometry.margin),
                margin_right: Some(geometry.margin),
                ..Default::default()
            };
            tab.print_to_pdf(Some(options))
                .map_err(|err| EngineError::Print(err.to_string()))
        })
        .await
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        let ChromePage { context_id, tab } = *self;

        // Disposing the context closes every target in it, this tab included.
        tokio::task::spawn_blocking(move || {
            let disposed = tab.call_method(Target::DisposeBrowserContext {
                browser_context_id: context_id,
            });
            match disposed {
                Ok(_) => Ok(()),
                Err(err) => {
                    let _ = tab.close(false);
                    Err(EngineError::ClosePage(err.to_string()))
                }
            }
        })
        .await
        .map_err(EngineError::join)?
    }
}

/// Pin the layout viewport to exactly `viewport` CSS pixels at 1x scale.
fn device_metrics(viewport: Viewport) -> Emulation::SetDeviceMetricsOverride {
    Emulation::SetDeviceMetricsOverride {
        width: viewport.width,
        height: viewport.height,
        device_scale_factor: 1.0,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    }
}
