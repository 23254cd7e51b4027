//! Signal-driven shutdown.

use std::time::Instant;

use tokio::sync::watch;
use tracing::{info, warn};

use super::pool::InstancePool;

/// Exit status reported after a signal-initiated shutdown.
pub const SIGNAL_EXIT_CODE: i32 = 143;

/// Resolve once SIGINT (ctrl-c) or, on unix, SIGTERM arrives.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(
                target = "shutterbug::shutdown",
                error = %err,
                "Failed to listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(
                    target = "shutterbug::shutdown",
                    error = %err,
                    "Failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target = "shutterbug::shutdown", signal = "SIGINT", "Signal received"),
        _ = terminate => info!(target = "shutterbug::shutdown", signal = "SIGTERM", "Signal received"),
    }
}

/// Fans a single shutdown decision out to the listener and the pool.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    pool: InstancePool,
    notify: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new(pool: InstancePool) -> Self {
        let (notify, _) = watch::channel(false);
        Self { pool, notify }
    }

    pub fn is_triggered(&self) -> bool {
        *self.notify.borrow()
    }

    /// Tell subscribers to stop accepting new work. Idempotent.
    pub fn trigger(&self) {
        self.notify.send_replace(true);
    }

    /// Resolves once [`ShutdownCoordinator::trigger`] has been called; suitable
    /// for `axum::serve(..).with_graceful_shutdown(..)`.
    pub fn triggered(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.notify.subscribe();
        async move {
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }

    /// Stop accepting, wait for in-flight leases, shut every instance down,
    /// and return the exit status the process should report.
    pub async fn shutdown(&self) -> i32 {
        let started_at = Instant::now();
        info!(
            target = "shutterbug::shutdown",
            op = "shutdown",
            "Shutting down: refusing new requests and draining the instance pool"
        );
        self.trigger();
        self.pool.drain().await;
        info!(
            target = "shutterbug::shutdown",
            op = "shutdown",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            exit_code = SIGNAL_EXIT_CODE,
            "Instance pool drained"
        );
        SIGNAL_EXIT_CODE
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::application::{
        engine::{Engine, EngineError, EngineLauncher},
        pool::PoolConfig,
    };

    struct NoEngine;

    #[async_trait]
    impl EngineLauncher for NoEngine {
        async fn launch(&self) -> Result<Box<dyn Engine>, EngineError> {
            Err(EngineError::Launch("no browser in unit tests".to_string()))
        }
    }

    fn coordinator() -> ShutdownCoordinator {
        let pool = InstancePool::new(
            Arc::new(NoEngine),
            PoolConfig {
                min: 0,
                max: 1,
                idle_timeout: Duration::from_secs(60),
            },
        );
        ShutdownCoordinator::new(pool)
    }

    #[tokio::test]
    async fn triggered_resolves_for_existing_and_late_subscribers() {
        let coordinator = coordinator();
        let early = tokio::spawn(coordinator.triggered());
        assert!(!coordinator.is_triggered());

        coordinator.trigger();
        tokio::time::timeout(Duration::from_secs(1), early)
            .await
            .expect("early subscriber notified")
            .expect("subscriber task");
        tokio::time::timeout(Duration::from_secs(1), coordinator.triggered())
            .await
            .expect("late subscriber resolves immediately");
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn shutdown_drains_and_reports_signal_status() {
        let coordinator = coordinator();
        let code = coordinator.shutdown().await;

        assert_eq!(code, SIGNAL_EXIT_CODE);
        assert!(coordinator.is_triggered());
        assert!(coordinator.pool.is_draining());
    }
}
