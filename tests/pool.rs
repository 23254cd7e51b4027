mod support;

use std::{
    sync::{Arc, Mutex, atomic::Ordering},
    time::Duration,
};

use shutterbug::application::{
    pool::{PoolConfig, PoolError},
    shutdown::{SIGNAL_EXIT_CODE, ShutdownCoordinator},
};
use support::{eventually, fake_pool, pool_config, slow_pool};
use tokio::time::{sleep, timeout};

const SHORT: Duration = Duration::from_millis(50);

#[tokio::test]
async fn bounds_are_normalised() {
    let (pool, _) = fake_pool(PoolConfig {
        min: 5,
        max: 0,
        idle_timeout: Duration::from_secs(1),
    });
    let config = pool.config();
    assert_eq!(config.max, 1);
    assert_eq!(config.min, 1);
}

#[tokio::test]
async fn warmup_launches_minimum_population() {
    let (pool, counters) = fake_pool(pool_config(2, 4));
    pool.warmup().await.expect("warmup");

    let status = pool.status();
    assert_eq!(counters.launched(), 2);
    assert_eq!(status.idle, 2);
    assert_eq!(status.population, 2);
    assert_eq!(status.leased, 0);
}

#[tokio::test]
async fn released_instance_is_reused_with_a_fresh_page() {
    let (pool, counters) = fake_pool(pool_config(0, 2));

    let first = pool.acquire().await.expect("first lease");
    let first_id = first.instance_id();
    first.release().await;
    assert_eq!(counters.pages_closed(), 1);

    let second = pool.acquire().await.expect("second lease");
    assert_eq!(second.instance_id(), first_id);
    assert_eq!(counters.launched(), 1);
    assert_eq!(counters.pages_opened(), 2);
    second.release().await;
}

#[tokio::test]
async fn leased_count_never_exceeds_max() {
    let (pool, counters) = fake_pool(pool_config(0, 2));

    let a = pool.acquire().await.expect("a");
    let b = pool.acquire().await.expect("b");
    assert_eq!(pool.status().leased, 2);

    let blocked = timeout(SHORT, pool.acquire()).await;
    assert!(blocked.is_err(), "third acquire must wait while at max");
    assert_eq!(counters.launched(), 2);

    a.release().await;
    let c = timeout(Duration::from_secs(1), pool.acquire())
        .await
        .expect("woken after release")
        .expect("lease");
    assert_eq!(counters.launched(), 2, "waiter reuses the released instance");

    b.release().await;
    c.release().await;
    assert_eq!(pool.status().idle, 2);
}

#[tokio::test]
async fn waiters_are_served_in_arrival_order() {
    let (pool, _) = fake_pool(pool_config(0, 1));
    let held = pool.acquire().await.expect("held");
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for name in ["first", "second", "third"] {
        let pool = pool.clone();
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let lease = pool.acquire().await.expect("lease");
            order.lock().expect("order lock").push(name);
            lease.release().await;
        }));
        sleep(Duration::from_millis(20)).await;
    }

    held.release().await;
    for waiter in waiters {
        waiter.await.expect("waiter task");
    }

    assert_eq!(
        *order.lock().expect("order lock"),
        vec!["first", "second", "third"]
    );
}

#[tokio::test]
async fn poisoned_lease_destroys_its_instance() {
    let (pool, counters) = fake_pool(pool_config(0, 2));

    let mut lease = pool.acquire().await.expect("lease");
    let id = lease.instance_id();
    lease.poison();
    assert!(lease.is_poisoned());
    lease.release().await;

    assert_eq!(counters.shutdown(), 1);
    assert_eq!(counters.pages_closed(), 0);
    assert_eq!(pool.status().population, 0);

    let next = pool.acquire().await.expect("replacement");
    assert_ne!(next.instance_id(), id);
    next.release().await;
}

#[tokio::test]
async fn dropped_lease_is_released_in_background() {
    let (pool, counters) = fake_pool(pool_config(0, 1));

    let lease = pool.acquire().await.expect("lease");
    drop(lease);

    let again = timeout(Duration::from_secs(1), pool.acquire())
        .await
        .expect("capacity returned")
        .expect("lease");
    assert_eq!(counters.launched(), 1);
    assert_eq!(counters.pages_closed(), 1);
    again.release().await;
}

#[tokio::test]
async fn launch_failure_surfaces_without_leaking_capacity() {
    let (pool, counters) = fake_pool(pool_config(0, 1));
    counters.fail_launch.store(true, Ordering::SeqCst);

    for _ in 0..2 {
        let err = timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("acquire must not hang")
            .err()
            .expect("launch fails");
        assert!(matches!(err, PoolError::Engine(_)));
    }
    assert_eq!(pool.status().leased, 0);

    counters.fail_launch.store(false, Ordering::SeqCst);
    let lease = pool.acquire().await.expect("recovered");
    lease.release().await;
}

#[tokio::test]
async fn drain_waits_for_outstanding_leases() {
    let (pool, counters) = fake_pool(pool_config(1, 2));
    pool.warmup().await.expect("warmup");
    let lease = pool.acquire().await.expect("lease");

    let draining = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.drain().await })
    };
    sleep(SHORT).await;
    assert!(pool.is_draining());
    assert!(!draining.is_finished(), "drain must wait for the lease");

    let rejected = pool.acquire().await;
    assert!(matches!(rejected, Err(PoolError::Draining)));

    lease.release().await;
    timeout(Duration::from_secs(1), draining)
        .await
        .expect("drain completes")
        .expect("drain task");

    let status = pool.status();
    assert!(status.draining);
    assert_eq!(status.population, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(counters.shutdown(), counters.launched());
}

#[tokio::test]
async fn queued_waiters_are_rejected_once_draining() {
    let (pool, _) = fake_pool(pool_config(0, 1));
    let held = pool.acquire().await.expect("held");

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.instance_id()) })
    };
    sleep(SHORT).await;

    let draining = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.drain().await })
    };
    sleep(SHORT).await;
    held.release().await;

    let outcome = waiter.await.expect("waiter task");
    assert!(matches!(outcome, Err(PoolError::Draining)));
    draining.await.expect("drain task");
}

#[tokio::test]
async fn concurrent_drains_both_wait_for_completion() {
    let (pool, _) = fake_pool(pool_config(1, 1));
    pool.warmup().await.expect("warmup");

    tokio::join!(pool.drain(), pool.drain());
    assert_eq!(pool.status().population, 0);
}

#[tokio::test]
async fn maintain_retires_surplus_idle_and_replenishes_minimum() {
    let (pool, counters) = fake_pool(PoolConfig {
        min: 1,
        max: 3,
        idle_timeout: Duration::ZERO,
    });

    let leases = vec![
        pool.acquire().await.expect("a"),
        pool.acquire().await.expect("b"),
        pool.acquire().await.expect("c"),
    ];
    for lease in leases {
        lease.release().await;
    }
    assert_eq!(pool.status().idle, 3);

    pool.maintain().await;
    let status = pool.status();
    assert_eq!(status.idle, 1, "surplus idle instances retire down to min");
    assert_eq!(counters.shutdown(), 2);

    let mut lease = pool.acquire().await.expect("lease");
    lease.poison();
    lease.release().await;
    assert_eq!(pool.status().population, 0);

    pool.maintain().await;
    assert_eq!(pool.status().population, 1, "maintenance refills to min");
}

#[tokio::test]
async fn maintain_keeps_recently_used_instances() {
    let (pool, counters) = fake_pool(PoolConfig {
        min: 0,
        max: 2,
        idle_timeout: Duration::from_secs(300),
    });

    let lease = pool.acquire().await.expect("lease");
    lease.release().await;

    pool.maintain().await;
    assert_eq!(pool.status().idle, 1);
    assert_eq!(counters.shutdown(), 0);
}

#[tokio::test]
async fn drain_waits_for_an_in_flight_replenish() {
    let (pool, counters) = slow_pool(pool_config(1, 2), Duration::from_millis(200));

    let maintenance = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.maintain().await })
    };
    sleep(Duration::from_millis(20)).await;

    pool.drain().await;
    let status = pool.status();
    assert_eq!(status.population, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(counters.launched(), 1);
    assert_eq!(counters.shutdown(), counters.launched());

    maintenance.await.expect("maintenance task");
    assert_eq!(pool.status().population, 0);
}

#[tokio::test]
async fn warmup_racing_drain_leaves_nothing_running() {
    let (pool, counters) = slow_pool(pool_config(2, 2), Duration::from_millis(100));

    let warming = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.warmup().await })
    };
    sleep(Duration::from_millis(20)).await;

    pool.drain().await;
    assert_eq!(pool.status().population, 0);
    assert_eq!(counters.shutdown(), counters.launched());
    warming
        .await
        .expect("warmup task")
        .expect("warmup stops once draining");
}

#[tokio::test]
async fn maintenance_after_drain_launches_nothing() {
    let (pool, counters) = fake_pool(pool_config(1, 1));
    pool.drain().await;

    pool.maintain().await;
    pool.warmup().await.expect("warmup");
    assert_eq!(counters.launched(), 0);
    assert_eq!(pool.status().population, 0);
}

#[tokio::test]
async fn cancelled_checkout_shuts_the_instance_down() {
    let (pool, counters) = fake_pool(pool_config(0, 1));
    let lease = pool.acquire().await.expect("lease");
    lease.release().await;
    assert_eq!(pool.status().idle, 1);

    counters.set_open_page_delay(Duration::from_millis(500));
    let cancelled = timeout(SHORT, pool.acquire()).await;
    assert!(cancelled.is_err(), "acquire is still opening a page");

    eventually(|| counters.shutdown() == 1).await;
    let status = pool.status();
    assert_eq!(status.population, 0);
    assert_eq!(status.leased, 0);

    counters.set_open_page_delay(Duration::ZERO);
    let replacement = pool.acquire().await.expect("capacity was returned");
    assert_eq!(counters.launched(), 2);
    replacement.release().await;
}

#[tokio::test]
async fn coordinated_shutdown_tears_down_every_instance() {
    let (pool, counters) = fake_pool(pool_config(2, 3));
    pool.warmup().await.expect("warmup");
    let lease = pool.acquire().await.expect("lease");

    let coordinator = ShutdownCoordinator::new(pool.clone());
    let shutting_down = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.shutdown().await })
    };
    sleep(SHORT).await;
    assert!(coordinator.is_triggered());
    assert!(!shutting_down.is_finished(), "shutdown waits for the lease");

    lease.release().await;
    let code = timeout(Duration::from_secs(1), shutting_down)
        .await
        .expect("shutdown completes")
        .expect("shutdown task");
    assert_eq!(code, SIGNAL_EXIT_CODE);
    assert_eq!(pool.status().population, 0);
    assert_eq!(counters.shutdown(), counters.launched());
}
