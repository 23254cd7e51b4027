//! Bounded pool of rendering-engine instances.
//!
//! Capacity is a fair semaphore with `max` permits: every [`Lease`] owns one
//! permit, so the number of leased instances can never exceed `max`, and
//! callers that find every permit taken are woken in arrival order. Idle
//! instances sit in a mutex-guarded stack that is only locked for a push or
//! pop, never across an await point.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use metrics::gauge;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, info, warn};

use super::engine::{Engine, EngineError, EngineLauncher, EnginePage};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("instance pool is draining and no longer grants leases")]
    Draining,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Population bounds and idle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub idle_timeout: Duration,
}

/// Point-in-time view of the pool, exposed on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub leased: usize,
    pub population: usize,
    pub min: usize,
    pub max: usize,
    pub draining: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Leased,
    Destroying,
}

impl SlotState {
    fn as_str(self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Leased => "leased",
            SlotState::Destroying => "destroying",
        }
    }
}

/// One rendering-engine process owned by the pool.
struct InstanceSlot {
    id: u64,
    engine: Option<Box<dyn Engine>>,
    state: SlotState,
    idle_since: Instant,
    population: Arc<AtomicUsize>,
}

impl InstanceSlot {
    fn transition(&mut self, next: SlotState) {
        debug!(
            target = "shutterbug::pool",
            instance_id = self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Instance state changed"
        );
        if next == SlotState::Idle {
            self.idle_since = Instant::now();
        }
        self.state = next;
    }
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        self.population.fetch_sub(1, Ordering::SeqCst);
        let Some(engine) = self.engine.take() else {
            return;
        };

        // Reached when an acquire is cancelled mid-checkout or a lease is
        // abandoned; the process still has to go.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    target = "shutterbug::pool",
                    instance_id = self.id,
                    state = self.state.as_str(),
                    "Instance dropped outside the pool; shutting it down in background"
                );
                handle.spawn(engine.shutdown());
            }
            Err(_) => warn!(
                target = "shutterbug::pool",
                instance_id = self.id,
                state = self.state.as_str(),
                "Instance dropped without a runtime; engine released in place"
            ),
        }
    }
}

/// Shared handle to the instance pool.
#[derive(Clone)]
pub struct InstancePool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    launcher: Arc<dyn EngineLauncher>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<InstanceSlot>>,
    draining: AtomicBool,
    drained: watch::Sender<bool>,
    population: Arc<AtomicUsize>,
    leased: AtomicUsize,
    next_id: AtomicU64,
}

struct LeaseParts {
    slot: InstanceSlot,
    page: Box<dyn EnginePage>,
    permit: OwnedSemaphorePermit,
}

impl InstancePool {
    pub fn new(launcher: Arc<dyn EngineLauncher>, config: PoolConfig) -> Self {
        let max = config.max.max(1);
        let config = PoolConfig {
            min: config.min.min(max),
            max,
            ..config
        };
        let (drained, _) = watch::channel(false);

        Self {
            shared: Arc::new(PoolShared {
                launcher,
                config,
                permits: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(VecDeque::with_capacity(max)),
                draining: AtomicBool::new(false),
                drained,
                population: Arc::new(AtomicUsize::new(0)),
                leased: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    pub fn is_draining(&self) -> bool {
        self.shared.is_draining()
    }

    pub fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    /// Launch instances until the population reaches `min`.
    pub async fn warmup(&self) -> Result<(), PoolError> {
        let started_at = Instant::now();
        let Some(_reserved) = self.shared.reserve() else {
            return Ok(());
        };
        while self.shared.below_min() {
            let slot = self.shared.launch().await?;
            self.shared.settle(slot).await;
        }
        info!(
            target = "shutterbug::pool",
            op = "pool::warmup",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            population = self.shared.population.load(Ordering::SeqCst),
            "Instance pool warmed up"
        );
        Ok(())
    }

    /// Lease an instance with a fresh page.
    ///
    /// Suspends while all `max` instances are leased. Fails with
    /// [`PoolError::Draining`] once [`InstancePool::drain`] has begun, including
    /// for callers that were already queued.
    pub async fn acquire(&self) -> Result<Lease, PoolError> {
        let shared = &self.shared;
        if shared.is_draining() {
            return Err(PoolError::Draining);
        }

        let started_at = Instant::now();
        let permit = shared.acquire_permit().await?;
        if shared.is_draining() {
            return Err(PoolError::Draining);
        }

        let (mut slot, page) = shared.checkout().await?;
        slot.transition(SlotState::Leased);
        shared.leased.fetch_add(1, Ordering::SeqCst);
        shared.publish_gauges();

        debug!(
            target = "shutterbug::pool",
            op = "pool::acquire",
            instance_id = slot.id,
            waited_ms = started_at.elapsed().as_millis() as u64,
            "Lease granted"
        );

        Ok(Lease {
            shared: Arc::clone(shared),
            parts: Some(LeaseParts {
                slot,
                page,
                permit,
            }),
            poisoned: false,
        })
    }

    /// Stop granting leases, wait for every outstanding lease to return, then
    /// shut down all instances.
    pub async fn drain(&self) {
        let shared = &self.shared;
        if shared.draining.swap(true, Ordering::SeqCst) {
            let mut drained = shared.drained.subscribe();
            let _ = drained.wait_for(|done| *done).await;
            return;
        }

        let started_at = Instant::now();
        info!(
            target = "shutterbug::pool",
            op = "pool::drain",
            leased = shared.leased.load(Ordering::SeqCst),
            population = shared.population.load(Ordering::SeqCst),
            "Draining instance pool"
        );

        let max = u32::try_from(shared.config.max).unwrap_or(u32::MAX);
        if let Ok(permits) = shared.permits.acquire_many(max).await {
            permits.forget();
        }
        shared.permits.close();

        let slots: Vec<InstanceSlot> = shared.lock_idle().drain(..).collect();
        join_all(slots.into_iter().map(|slot| shared.destroy(slot))).await;
        shared.publish_gauges();
        shared.drained.send_replace(true);

        info!(
            target = "shutterbug::pool",
            op = "pool::drain",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Instance pool drained"
        );
    }

    /// Retire instances idle past `idle_timeout` (keeping `min`) and launch
    /// replacements while the population is below `min`.
    ///
    /// A capacity permit is held for the whole pass, so [`InstancePool::drain`]
    /// waits for an in-flight launch instead of missing its instance. When
    /// every permit is leased there is nothing idle to retire and the pass is
    /// skipped.
    pub async fn maintain(&self) {
        let shared = &self.shared;
        let Some(_reserved) = shared.reserve() else {
            return;
        };

        let expired: Vec<InstanceSlot> = {
            let mut idle = shared.lock_idle();
            let mut expired = Vec::new();
            while idle.len() > shared.config.min {
                match idle.front() {
                    Some(slot) if slot.idle_since.elapsed() >= shared.config.idle_timeout => {
                        if let Some(slot) = idle.pop_front() {
                            expired.push(slot);
                        }
                    }
                    _ => break,
                }
            }
            expired
        };

        if !expired.is_empty() {
            info!(
                target = "shutterbug::pool",
                op = "pool::maintain",
                retired = expired.len(),
                "Retiring idle instances"
            );
            join_all(expired.into_iter().map(|slot| shared.destroy(slot))).await;
        }

        while shared.below_min() {
            match shared.launch().await {
                Ok(slot) => shared.settle(slot).await,
                Err(err) => {
                    warn!(
                        target = "shutterbug::pool",
                        op = "pool::maintain",
                        error = %err,
                        "Failed to replenish instance pool"
                    );
                    break;
                }
            }
        }
        shared.publish_gauges();
    }
}

impl PoolShared {
    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<InstanceSlot>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> PoolStatus {
        let idle = self.lock_idle().len();
        PoolStatus {
            idle,
            leased: self.leased.load(Ordering::SeqCst),
            population: self.population.load(Ordering::SeqCst),
            min: self.config.min,
            max: self.config.max,
            draining: self.is_draining(),
        }
    }

    fn publish_gauges(&self) {
        let status = self.status();
        gauge!("shutterbug_pool_idle").set(status.idle as f64);
        gauge!("shutterbug_pool_leased").set(status.leased as f64);
        gauge!("shutterbug_pool_population").set(status.population as f64);
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Draining)
    }

    /// A permit for pool-initiated work, or `None` when all capacity is
    /// leased or the pool is draining.
    fn reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .filter(|_| !self.is_draining())
    }

    fn below_min(&self) -> bool {
        !self.is_draining() && self.population.load(Ordering::SeqCst) < self.config.min
    }

    fn take_idle(&self) -> Option<InstanceSlot> {
        self.lock_idle().pop_back()
    }

    /// Return `slot` to the idle set, or shut it down if draining has begun.
    /// The draining check and the push share the idle lock, so drain's sweep
    /// of the idle set either sees the slot or the slot sees the flag.
    async fn settle(&self, mut slot: InstanceSlot) {
        let rejected = {
            let mut idle = self.lock_idle();
            if self.is_draining() {
                Some(slot)
            } else {
                slot.transition(SlotState::Idle);
                idle.push_back(slot);
                None
            }
        };
        if let Some(slot) = rejected {
            self.destroy(slot).await;
        }
    }

    async fn checkout(&self) -> Result<(InstanceSlot, Box<dyn EnginePage>), PoolError> {
        if let Some(slot) = self.take_idle() {
            match open_page(&slot).await {
                Ok(page) => return Ok((slot, page)),
                Err(err) => {
                    warn!(
                        target = "shutterbug::pool",
                        op = "pool::checkout",
                        instance_id = slot.id,
                        error = %err,
                        "Idle instance could not open a page; replacing it"
                    );
                    self.destroy(slot).await;
                }
            }
        }

        let slot = self.launch().await?;
        match open_page(&slot).await {
            Ok(page) => Ok((slot, page)),
            Err(err) => {
                self.destroy(slot).await;
                Err(err.into())
            }
        }
    }

    async fn launch(&self) -> Result<InstanceSlot, PoolError> {
        let started_at = Instant::now();
        let engine = self.launcher.launch().await.map_err(|err| {
            warn!(
                target = "shutterbug::pool",
                op = "pool::launch",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Failed to launch rendering engine"
            );
            err
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let population = self.population.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            target = "shutterbug::pool",
            op = "pool::launch",
            result = "ok",
            instance_id = id,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            population,
            "Rendering engine launched"
        );

        Ok(InstanceSlot {
            id,
            engine: Some(engine),
            state: SlotState::Idle,
            idle_since: Instant::now(),
            population: Arc::clone(&self.population),
        })
    }

    async fn destroy(&self, mut slot: InstanceSlot) {
        slot.transition(SlotState::Destroying);
        if let Some(engine) = slot.engine.take() {
            let started_at = Instant::now();
            engine.shutdown().await;
            info!(
                target = "shutterbug::pool",
                op = "pool::destroy",
                instance_id = slot.id,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Rendering engine shut down"
            );
        }
    }

    async fn finish(self: Arc<Self>, parts: LeaseParts, poisoned: bool) {
        let LeaseParts { slot, page, permit } = parts;

        let healthy = if poisoned {
            // A wedged page may never answer a close request; shutting the
            // engine down disposes of it.
            drop(page);
            false
        } else {
            match page.close().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        target = "shutterbug::pool",
                        op = "pool::release",
                        instance_id = slot.id,
                        error = %err,
                        "Failed to close page; retiring instance"
                    );
                    false
                }
            }
        };

        self.leased.fetch_sub(1, Ordering::SeqCst);
        if healthy {
            self.settle(slot).await;
        } else {
            self.destroy(slot).await;
        }

        // Capacity is handed back only once the instance is settled, so a
        // waiter woken by this permit finds it idle instead of launching.
        drop(permit);
        self.publish_gauges();
    }

    fn abandon(&self, parts: LeaseParts) {
        self.leased.fetch_sub(1, Ordering::SeqCst);
        drop(parts);
    }
}

async fn open_page(slot: &InstanceSlot) -> Result<Box<dyn EnginePage>, EngineError> {
    match slot.engine.as_ref() {
        Some(engine) => engine.open_page().await,
        None => Err(EngineError::OpenPage(format!(
            "instance {} has already been shut down",
            slot.id
        ))),
    }
}

/// Exclusive use of one instance and a fresh page for one request.
///
/// Call [`Lease::release`] when done. A lease that is dropped instead (a
/// cancelled request, a panic unwinding through the handler) is released on
/// a background task.
pub struct Lease {
    shared: Arc<PoolShared>,
    parts: Option<LeaseParts>,
    poisoned: bool,
}

impl Lease {
    pub fn instance_id(&self) -> u64 {
        self.parts().slot.id
    }

    pub fn page(&self) -> &dyn EnginePage {
        self.parts().page.as_ref()
    }

    /// Mark the instance as untrustworthy; it is shut down on release
    /// instead of returning to the idle set.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub async fn release(mut self) {
        if let Some(parts) = self.parts.take() {
            Arc::clone(&self.shared).finish(parts, self.poisoned).await;
        }
    }

    fn parts(&self) -> &LeaseParts {
        self.parts.as_ref().expect("lease parts live until release")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(parts) = self.parts.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    target = "shutterbug::pool",
                    instance_id = parts.slot.id,
                    "Lease dropped; releasing in background"
                );
                handle.spawn(Arc::clone(&self.shared).finish(parts, self.poisoned));
            }
            Err(_) => self.shared.abandon(parts),
        }
    }
}
