use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::{
    application::{
        artifact::ArtifactManager,
        engine::{EngineError, EnginePage},
        pool::{InstancePool, Lease},
    },
    domain::{
        format::ImageEncoding,
        geometry::{ClipRect, Geometry, PageGeometry},
        request::{RenderDefaults, RenderParams, RenderRequest},
    },
};

use super::{
    encode::{capture_encoding, transcode},
    types::{ErrorKind, RenderBody, RenderError, RenderResult, Stage},
};

const METRIC_RENDER_TOTAL: &str = "shutterbug_render_total";
const METRIC_RENDER_MS: &str = "shutterbug_render_ms";

/// Tunables for [`RenderService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPipelineConfig {
    pub defaults: RenderDefaults,
    pub stage_timeout: Duration,
}

/// Drives one request through resolution, lease acquisition and the engine
/// stages, then hands the caller a body ready to stream.
pub struct RenderService {
    pool: InstancePool,
    artifacts: Arc<ArtifactManager>,
    config: RenderPipelineConfig,
}

impl RenderService {
    pub fn new(
        pool: InstancePool,
        artifacts: Arc<ArtifactManager>,
        config: RenderPipelineConfig,
    ) -> Self {
        Self {
            pool,
            artifacts,
            config,
        }
    }

    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    pub async fn render(&self, params: &RenderParams) -> Result<RenderResult, RenderError> {
        let started_at = Instant::now();
        let outcome = self.run(params).await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

        let format = params
            .format
            .as_deref()
            .filter(|format| !format.trim().is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| self.config.defaults.format.as_str().to_string());
        let outcome_label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        counter!(
            METRIC_RENDER_TOTAL,
            "format" => metric_format(&format),
            "outcome" => outcome_label
        )
        .increment(1);

        match &outcome {
            Ok(result) => {
                histogram!(METRIC_RENDER_MS, "format" => metric_format(&format)).record(elapsed_ms);
                info!(
                    target = "shutterbug::render",
                    op = "render",
                    result = "ok",
                    format = %format,
                    bytes = result.content_length(),
                    elapsed_ms = elapsed_ms as u64,
                    "Render complete"
                );
            }
            Err(err) if err.kind() == ErrorKind::Unhandled => {
                warn!(
                    target = "shutterbug::render",
                    op = "render",
                    result = "error",
                    kind = err.kind().as_str(),
                    elapsed_ms = elapsed_ms as u64,
                    error = %err,
                    "Render failed"
                );
            }
            Err(err) => {
                debug!(
                    target = "shutterbug::render",
                    op = "render",
                    result = "rejected",
                    kind = err.kind().as_str(),
                    elapsed_ms = elapsed_ms as u64,
                    error = %err,
                    "Render rejected"
                );
            }
        }

        outcome
    }

    async fn run(&self, params: &RenderParams) -> Result<RenderResult, RenderError> {
        let request = RenderRequest::resolve(params, &self.config.defaults)?;

        let mut lease = self.pool.acquire().await?;
        let outcome = self.drive(&lease, &request).await;
        if matches!(outcome, Err(RenderError::Timeout { .. })) {
            lease.poison();
        }
        lease.release().await;

        let body = outcome?;
        Ok(RenderResult {
            content_type: request.content_type().to_string(),
            body,
        })
    }

    async fn drive(&self, lease: &Lease, request: &RenderRequest) -> Result<RenderBody, RenderError> {
        let page = lease.page();

        self.stage(Stage::Viewport, page.set_viewport(request.viewport))
            .await?
            .map_err(|source| RenderError::Stage {
                stage: Stage::Viewport,
                source,
            })?;

        let navigated_at = Instant::now();
        let navigation = self.stage(Stage::Navigation, page.navigate(&request.url)).await?;
        let navigation_ms = navigated_at.elapsed().as_millis() as u64;
        match navigation {
            Ok(()) => info!(
                target = "shutterbug::render",
                op = "render::navigate",
                instance_id = lease.instance_id(),
                url = %request.url,
                elapsed_ms = navigation_ms,
                "Navigation complete"
            ),
            Err(source) => {
                info!(
                    target = "shutterbug::render",
                    op = "render::navigate",
                    instance_id = lease.instance_id(),
                    url = %request.url,
                    elapsed_ms = navigation_ms,
                    error = %source,
                    "Navigation failed"
                );
                return Err(RenderError::Navigation {
                    url: request.url.clone(),
                    source,
                });
            }
        }

        match request.geometry() {
            Geometry::Page(geometry) => self.emit_document(page, geometry, request).await,
            Geometry::Clip { clip, encoding } => self.emit_image(page, clip, encoding).await,
        }
    }

    async fn emit_document(
        &self,
        page: &dyn EnginePage,
        geometry: PageGeometry,
        request: &RenderRequest,
    ) -> Result<RenderBody, RenderError> {
        let pdf = self
            .stage(Stage::Render, page.print_pdf(geometry))
            .await?
            .map_err(render_failure)?;

        let artifact = self
            .artifacts
            .allocate(request.format.format().extension())?;
        artifact.write_all(&pdf).await?;
        let stream = artifact.into_stream().await?;
        Ok(RenderBody::Document(stream))
    }

    async fn emit_image(
        &self,
        page: &dyn EnginePage,
        clip: ClipRect,
        encoding: ImageEncoding,
    ) -> Result<RenderBody, RenderError> {
        let captured = self
            .stage(Stage::Render, page.capture(capture_encoding(encoding), clip))
            .await?
            .map_err(render_failure)?;
        let encoded = transcode(captured, encoding).await?;
        Ok(RenderBody::Image(Bytes::from(encoded)))
    }

    /// Bound `fut` by the stage deadline. The inner result is left for the
    /// caller so each stage can classify engine failures itself.
    async fn stage<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<Result<T, EngineError>, RenderError> {
        let timeout = self.config.stage_timeout;
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            warn!(
                target = "shutterbug::render",
                stage = stage.as_str(),
                timeout_ms = timeout.as_millis() as u64,
                "Stage deadline exceeded"
            );
            RenderError::Timeout { stage, timeout }
        })
    }
}

fn render_failure(source: EngineError) -> RenderError {
    RenderError::Stage {
        stage: Stage::Render,
        source,
    }
}

/// Bounded label set for metrics; anything unrecognised is grouped.
fn metric_format(format: &str) -> &'static str {
    match format {
        "gif" => "gif",
        "jpeg" => "jpeg",
        "jpg" => "jpg",
        "pdf" => "pdf",
        "png" => "png",
        _ => "other",
    }
}
