//! Connection pool implementation.
//!
//! Checkout is bounded by a semaphore sized to `max_connections`. A slot is
//! held for as long as the caller holds the [`PooledConnection`], so the pool
//! never hands out more connections than it was configured for. Idle
//! connections are kept in a FIFO queue behind a short-lived lock that is
//! never held across an `.await`.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionManager, ConnectionMetadata};

/// A bounded pool of driver connections.
///
/// Cloning a `Pool` is cheap and yields a handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use sproc_pool::PoolBuilder;
///
/// let pool = PoolBuilder::new()
///     .name("billing")
///     .min_connections(2)
///     .max_connections(20)
///     .build(manager)?;
///
/// pool.warm_up().await?;
///
/// let conn = pool.get().await?;
/// // Use connection...
/// // Connection automatically returned to pool on drop
/// ```
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<M: ConnectionManager> {
    /// Pool name used in log records.
    name: String,

    config: PoolConfig,

    manager: M,

    /// Whether the pool is closed.
    closed: AtomicBool,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// One permit per checkout slot.
    slots: Arc<Semaphore>,

    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,

    /// Connections currently open (idle plus checked out).
    open: AtomicU32,

    in_use: AtomicU32,

    /// Callers currently blocked waiting for a slot.
    waiters: AtomicU32,

    metrics: Mutex<PoolMetricsInner>,
}

struct IdleConnection<C> {
    conn: C,
    metadata: ConnectionMetadata,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    checkins: u64,
    health_checks_performed: u64,
    health_checks_failed: u64,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Pop the oldest usable idle connection, closing expired ones on the way.
    fn pop_idle(&self) -> Option<IdleConnection<M::Connection>> {
        let mut expired = Vec::new();
        let found = {
            let mut idle = self.idle.lock();
            loop {
                match idle.pop_front() {
                    Some(entry) if entry.metadata.idle_for() >= self.config.idle_timeout => {
                        expired.push(entry);
                    }
                    other => break other,
                }
            }
        };

        for entry in expired {
            tracing::debug!(
                pool = %self.name,
                connection_id = entry.metadata.id,
                "closing idle connection past idle timeout"
            );
            self.close_connection(entry.conn);
        }

        found
    }

    fn close_connection(&self, conn: M::Connection) {
        drop(conn);
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.metrics.lock().connections_closed += 1;
    }

    fn return_idle(&self, conn: M::Connection, mut metadata: ConnectionMetadata) {
        metadata.last_used = Instant::now();
        tracing::trace!(
            pool = %self.name,
            connection_id = metadata.id,
            "returning connection to pool"
        );
        self.idle.lock().push_back(IdleConnection { conn, metadata });
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Create a new pool around `manager`.
    ///
    /// No connections are opened until the first checkout or an explicit
    /// [`warm_up`](Self::warm_up).
    pub fn new(name: impl Into<String>, manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let name = name.into();

        tracing::info!(
            pool = %name,
            min = config.min_connections,
            max = config.max_connections,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            name,
            slots: Arc::new(Semaphore::new(config.max_connections as usize)),
            config,
            manager,
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            idle: Mutex::new(VecDeque::new()),
            open: AtomicU32::new(0),
            in_use: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        Ok(Self { inner })
    }

    /// Open connections until `min_connections` are available.
    pub async fn warm_up(&self) -> Result<(), PoolError> {
        while self.inner.open.load(Ordering::Acquire) < self.inner.config.min_connections {
            let conn = self.open_connection().await?;
            let metadata = ConnectionMetadata::new(self.inner.next_connection_id());
            self.inner.return_idle(conn, metadata);
        }
        Ok(())
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection when one is available and otherwise opens a
    /// new one. When every slot is taken this waits up to
    /// `connection_timeout` and then fails with [`PoolError::Timeout`].
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!(pool = %self.inner.name, "acquiring connection from pool");

        let permit = match self.acquire_slot().await {
            Ok(permit) => permit,
            Err(e) => {
                self.inner.metrics.lock().checkouts_failed += 1;
                return Err(e);
            }
        };

        while let Some(entry) = self.inner.pop_idle() {
            let mut candidate =
                PooledConnection::new(entry.conn, entry.metadata, Arc::clone(&self.inner));

            if self.inner.config.test_on_checkout {
                let valid = self.inner.manager.is_valid(&mut *candidate).await;
                let mut metrics = self.inner.metrics.lock();
                metrics.health_checks_performed += 1;
                if !valid {
                    metrics.health_checks_failed += 1;
                    drop(metrics);
                    tracing::debug!(
                        pool = %self.inner.name,
                        connection_id = candidate.metadata.id,
                        "discarding idle connection that failed validation"
                    );
                    candidate.mark_broken();
                    continue;
                }
            }

            return Ok(self.hand_out(candidate, permit));
        }

        let conn = match self.open_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.inner.metrics.lock().checkouts_failed += 1;
                return Err(e);
            }
        };
        let metadata = ConnectionMetadata::new(self.inner.next_connection_id());
        let fresh = PooledConnection::new(conn, metadata, Arc::clone(&self.inner));
        Ok(self.hand_out(fresh, permit))
    }

    /// Try to get an idle connection without waiting.
    ///
    /// Returns `None` if no slot is free or no idle connection exists.
    pub fn try_get(&self) -> Result<Option<PooledConnection<M>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let permit = match Arc::clone(&self.inner.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
        };

        Ok(self.inner.pop_idle().map(|entry| {
            let conn = PooledConnection::new(entry.conn, entry.metadata, Arc::clone(&self.inner));
            self.hand_out(conn, permit)
        }))
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        let slots = Arc::clone(&self.inner.slots);
        match Arc::clone(&slots).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = WaiterGuard::enter(&self.inner.waiters);
        let wait = self.inner.config.connection_timeout;
        match tokio::time::timeout(wait, slots.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::PoolClosed),
            Err(_) => {
                tracing::debug!(
                    pool = %self.inner.name,
                    wait_ms = wait.as_millis() as u64,
                    "pool exhausted"
                );
                Err(PoolError::Timeout(wait))
            }
        }
    }

    async fn open_connection(&self) -> Result<M::Connection, PoolError> {
        let conn = self
            .inner
            .manager
            .connect()
            .await
            .map_err(|e| PoolError::Connection(Box::new(e)))?;
        self.inner.open.fetch_add(1, Ordering::AcqRel);
        self.inner.metrics.lock().connections_created += 1;
        Ok(conn)
    }

    fn hand_out(
        &self,
        mut conn: PooledConnection<M>,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<M> {
        conn.permit = Some(permit);
        conn.checked_out = true;
        conn.metadata.checkout_count += 1;
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
        self.inner.metrics.lock().checkouts_successful += 1;
        tracing::trace!(
            pool = %self.inner.name,
            connection_id = conn.metadata.id,
            "connection checked out"
        );
        conn
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            available: self.inner.idle.lock().len() as u32,
            in_use: self.inner.in_use.load(Ordering::Acquire),
            total: self.inner.open.load(Ordering::Acquire),
            max: self.inner.config.max_connections,
            waiters: self.inner.waiters.load(Ordering::Acquire),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            checkins: inner.checkins,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Idle connections are dropped immediately; checked-out connections are
    /// dropped when their holders release them. Blocked checkouts fail with
    /// [`PoolError::PoolClosed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.slots.close();
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for entry in drained {
            self.inner.close_connection(entry.conn);
        }
        tracing::info!(pool = %self.inner.name, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<M: ConnectionManager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}

struct WaiterGuard<'a>(&'a AtomicU32);

impl<'a> WaiterGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolBuilder::new()
///     .name("reporting")
///     .pool_config(pool_config)
///     .build(manager)?;
/// ```
pub struct PoolBuilder {
    name: String,
    pool_config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            name: "default".to_string(),
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.pool_config.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool_config.max_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.pool_config.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Enable or disable validation of idle connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.pool_config.test_on_checkout = enabled;
        self
    }

    /// Build the pool.
    pub fn build<M: ConnectionManager>(self, manager: M) -> Result<Pool<M>, PoolError> {
        Pool::new(self.name, manager, self.pool_config)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of open connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
    /// Callers waiting for a free slot.
    pub waiters: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, pool closed, connect errors).
    pub checkouts_failed: u64,
    /// Checked-out connections released back, whether reused or discarded.
    pub checkins: u64,
    /// Validity checks performed on idle connections.
    pub health_checks_performed: u64,
    /// Validity checks that failed.
    pub health_checks_failed: u64,
    /// Time since pool creation.
    pub uptime: std::time::Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }

    /// Connections currently checked out according to the counters.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.checkouts_successful.saturating_sub(self.checkins)
    }
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection goes back to the idle queue, or is closed if
/// it was marked broken or the pool has been closed. The checkout slot is
/// released in both cases.
pub struct PooledConnection<M: ConnectionManager> {
    /// `None` only while `Drop` runs.
    conn: Option<M::Connection>,
    metadata: ConnectionMetadata,
    pool: Arc<PoolInner<M>>,
    permit: Option<OwnedSemaphorePermit>,
    checked_out: bool,
    broken: bool,
}

impl<M: ConnectionManager> PooledConnection<M> {
    fn new(conn: M::Connection, metadata: ConnectionMetadata, pool: Arc<PoolInner<M>>) -> Self {
        Self {
            conn: Some(conn),
            metadata,
            pool,
            permit: None,
            checked_out: false,
            broken: false,
        }
    }

    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Close this connection on release instead of returning it to the idle queue.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Undo [`mark_broken`](Self::mark_broken) once the connection is known
    /// to be in a clean state again.
    pub fn mark_reusable(&mut self) {
        self.broken = false;
    }

    /// Whether the connection will be closed on release.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .field("id", &self.metadata.id)
            .field("broken", &self.broken)
            .finish()
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.checked_out {
            self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
            self.pool.metrics.lock().checkins += 1;
        }

        let closed = self.pool.closed.load(Ordering::Acquire);
        if self.broken || !self.checked_out || closed {
            tracing::trace!(
                pool = %self.pool.name,
                connection_id = self.metadata.id,
                broken = self.broken,
                "closing released connection"
            );
            self.pool.close_connection(conn);
        } else {
            self.pool.return_idle(conn, self.metadata.clone());
        }
        // The permit field drops after this, so the idle entry is visible
        // before the slot frees up.
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("refused")]
    struct Refused;

    #[derive(Default)]
    struct CountingManager {
        opened: AtomicU64,
        refuse: AtomicBool,
        invalid: AtomicBool,
    }

    #[async_trait]
    impl ConnectionManager for CountingManager {
        type Connection = u64;
        type Error = Refused;

        async fn connect(&self) -> Result<u64, Refused> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Refused);
            }
            Ok(self.opened.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn is_valid(&self, _conn: &mut u64) -> bool {
            !self.invalid.load(Ordering::SeqCst)
        }
    }

    fn pool(max: u32) -> Pool<CountingManager> {
        PoolBuilder::new()
            .name("test")
            .max_connections(max)
            .min_connections(0)
            .connection_timeout(Duration::from_millis(50))
            .build(CountingManager::default())
            .unwrap()
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiters: 0,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 10,
            total: 10,
            max: 10,
            waiters: 3,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiters: 0,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            checkins: 88,
            health_checks_performed: 100,
            health_checks_failed: 5,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.health_check_success_rate() - 0.95).abs() < f64::EPSILON);
        assert_eq!(metrics.outstanding(), 2);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = PoolBuilder::new()
            .max_connections(0)
            .build(CountingManager::default());
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let pool = pool(2);

        let first_id = {
            let conn = pool.get().await.unwrap();
            assert_eq!(pool.status().in_use, 1);
            *conn
        };
        assert_eq!(pool.status().available, 1);

        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, first_id);
        assert_eq!(pool.metrics().connections_created, 1);
        assert_eq!(conn.metadata().checkout_count, 2);
    }

    #[tokio::test]
    async fn test_broken_connection_is_closed_not_reused() {
        let pool = pool(2);

        {
            let mut conn = pool.get().await.unwrap();
            conn.mark_broken();
        }

        let status = pool.status();
        assert_eq!(status.available, 0);
        assert_eq!(status.total, 0);
        assert_eq!(status.in_use, 0);

        let metrics = pool.metrics();
        assert_eq!(metrics.connections_closed, 1);
        assert_eq!(metrics.checkouts_successful, metrics.checkins);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reusable_after_broken_returns_to_idle() {
        let pool = pool(2);

        {
            let mut conn = pool.get().await.unwrap();
            conn.mark_broken();
            conn.mark_reusable();
            assert!(!conn.is_broken());
        }

        let status = pool.status();
        assert_eq!(status.available, 1);
        assert_eq!(pool.metrics().connections_closed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out() {
        let pool = pool(1);
        let _held = tokio_test::assert_ok!(pool.get().await);

        let err = tokio_test::assert_err!(pool.get().await);
        assert!(matches!(err, PoolError::Timeout(_)));
        assert!(err.is_transient());
        assert_eq!(pool.metrics().checkouts_failed, 1);
        assert_eq!(pool.status().waiters, 0);
    }

    #[tokio::test]
    async fn test_pooled_connection_debug_shows_id_and_state() {
        let pool = pool(1);
        let mut conn = pool.get().await.unwrap();
        conn.mark_broken();

        let rendered = format!("{conn:?}");
        assert!(rendered.starts_with("PooledConnection"));
        assert!(rendered.contains(&format!("id: {}", conn.metadata().id)));
        assert!(rendered.contains("broken: true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_is_counted_and_served_on_release() {
        let pool = PoolBuilder::new()
            .max_connections(1)
            .connection_timeout(Duration::from_secs(5))
            .build(CountingManager::default())
            .unwrap();
        let held = pool.get().await.unwrap();

        let waiting = pool.clone();
        let handle = tokio::spawn(async move { waiting.get().await.map(|c| *c) });
        tokio::task::yield_now().await;
        assert_eq!(pool.status().waiters, 1);

        drop(held);
        let served = handle.await.unwrap().unwrap();
        assert_eq!(served, 1);
        assert_eq!(pool.status().waiters, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let pool = pool(1);
        pool.inner.manager.refuse.store(true, Ordering::SeqCst);

        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Connection(_)));
        assert_eq!(pool.metrics().checkouts_failed, 1);

        // The slot must be free again.
        pool.inner.manager.refuse.store(false, Ordering::SeqCst);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_idle_connection_is_replaced() {
        let pool = pool(1);
        drop(pool.get().await.unwrap());

        pool.inner.manager.invalid.store(true, Ordering::SeqCst);
        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 2);

        let metrics = pool.metrics();
        assert_eq!(metrics.health_checks_failed, 1);
        assert_eq!(metrics.connections_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_expires_connections() {
        let pool = PoolBuilder::new()
            .max_connections(1)
            .idle_timeout(Duration::from_secs(10))
            .build(CountingManager::default())
            .unwrap();
        drop(pool.get().await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;

        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 2);
        assert_eq!(pool.metrics().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_connections() {
        let pool = PoolBuilder::new()
            .min_connections(3)
            .max_connections(5)
            .build(CountingManager::default())
            .unwrap();
        pool.warm_up().await.unwrap();

        let status = pool.status();
        assert_eq!(status.available, 3);
        assert_eq!(status.total, 3);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        let pool = pool(2);
        let held = pool.get().await.unwrap();
        pool.close();

        assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
        assert!(matches!(pool.try_get(), Err(PoolError::PoolClosed)));

        drop(held);
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_try_get_only_returns_idle() {
        let pool = pool(1);
        assert!(pool.try_get().unwrap().is_none());

        drop(pool.get().await.unwrap());
        let conn = pool.try_get().unwrap();
        assert!(conn.is_some());
        assert!(pool.try_get().unwrap().is_none());
    }
}
