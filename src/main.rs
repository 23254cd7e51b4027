use std::{process, sync::Arc};

use shutterbug::{
    application::{
        artifact::ArtifactManager,
        error::AppError,
        pool::{InstancePool, PoolConfig},
        render::{RenderPipelineConfig, RenderService},
        shutdown::{ShutdownCoordinator, wait_for_termination},
    },
    config,
    infra::{
        chrome::ChromeLauncher,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(error) => {
            report_application_error(&error);
            process::exit(1);
        }
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<i32, AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<i32, AppError> {
    let artifacts = ArtifactManager::new(settings.artifacts.directory.as_deref())?;
    info!(
        target = "shutterbug::serve",
        directory = %artifacts.directory().display(),
        "Artifact directory ready"
    );
    let artifacts = Arc::new(artifacts);

    let launcher = Arc::new(ChromeLauncher::new(&settings.engine));
    let pool = InstancePool::new(launcher, PoolConfig::from(&settings.pool));
    pool.warmup().await?;

    let renderer = Arc::new(RenderService::new(
        pool.clone(),
        Arc::clone(&artifacts),
        RenderPipelineConfig::from(&settings.render),
    ));
    let coordinator = ShutdownCoordinator::new(pool.clone());
    let maintenance = spawn_pool_maintenance(pool.clone(), &settings.pool);

    let router = http::build_router(HttpState { renderer });
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "shutterbug::serve",
        addr = %settings.server.addr,
        pool_min = settings.pool.min,
        pool_max = settings.pool.max,
        "Listening"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(coordinator.triggered());
    let mut server = tokio::spawn(async move { server.await });

    let exit_code = tokio::select! {
        result = &mut server => {
            // The listener stopped without a signal.
            stop_maintenance(maintenance).await;
            pool.drain().await;
            release_artifacts(artifacts);
            return match result {
                Ok(Ok(())) => Ok(0),
                Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
                Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
            };
        }
        _ = wait_for_termination() => {
            stop_maintenance(maintenance).await;
            coordinator.shutdown().await
        }
    };

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(
            target = "shutterbug::serve",
            error = %err,
            "Server exited with an error during shutdown"
        ),
        Ok(Err(err)) => warn!(
            target = "shutterbug::serve",
            error = %err,
            "Server task failed during shutdown"
        ),
        Err(_) => {
            warn!(
                target = "shutterbug::serve",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Open connections did not finish in time"
            );
            server.abort();
            let _ = server.await;
        }
    }

    release_artifacts(artifacts);
    info!(target = "shutterbug::serve", exit_code, "Shutdown complete");
    Ok(exit_code)
}

fn spawn_pool_maintenance(pool: InstancePool, settings: &config::PoolSettings) -> JoinHandle<()> {
    let period = settings.maintenance_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            pool.maintain().await;
        }
    })
}

/// Maintenance must be gone before the pool drains, or a replenish pass
/// could launch an instance that nothing owns.
async fn stop_maintenance(maintenance: JoinHandle<()>) {
    maintenance.abort();
    if let Err(err) = maintenance.await
        && !err.is_cancelled()
    {
        warn!(
            target = "shutterbug::serve",
            error = %err,
            "Pool maintenance task failed"
        );
    }
}

fn release_artifacts(artifacts: Arc<ArtifactManager>) {
    match Arc::try_unwrap(artifacts) {
        Ok(artifacts) => artifacts.purge(),
        Err(artifacts) => warn!(
            target = "shutterbug::serve",
            directory = %artifacts.directory().display(),
            "Artifact directory still referenced; leaving it in place"
        ),
    }
}
