//! Connection pool for bridge clients.
//!
//! The pool is the only resource shared across concurrent tasks. Its entry
//! list and counters are only ever mutated inside a single critical section
//! per operation, so callers never observe a half-updated pool. Connections
//! are loaned whole: an entry is never borrowed by two callers at once.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::transport::{BridgeConnector, Connection, Connector};
use crate::error::AgentError;

/// Cap on the exponential backoff while waiting for a free connection.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Pool sizing and health-check tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// The health check refills the pool up to this floor.
    pub min_size: usize,
    /// Entries idle longer than this are evicted.
    pub max_idle_time: Duration,
    /// Health checks run at most once per this interval.
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            min_size: 2,
            max_idle_time: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Observability counters, updated on every pool operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub idle_connections: u64,
    pub borrowed_connections: u64,
    pub failed_connections: u64,
    pub retries: u64,
}

/// A loaned connection together with its bookkeeping timestamps.
#[derive(Debug)]
pub struct PooledConnection<C> {
    pub(crate) conn: C,
    created_at: Instant,
    last_used: Instant,
}

impl<C> PooledConnection<C> {
    fn new(conn: C) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

struct PoolInner<C> {
    entries: Vec<PooledConnection<C>>,
    stats: PoolStats,
    last_health_check: Instant,
}

/// Pool of bridge connections, generic over the connector so tests can
/// inject fakes.
pub struct ConnectionPool<F: Connector> {
    connector: F,
    config: PoolConfig,
    inner: Mutex<PoolInner<F::Conn>>,
}

/// The production pool over real bridge clients.
pub type BridgePool = ConnectionPool<BridgeConnector>;

impl<F: Connector> ConnectionPool<F> {
    /// Creates the pool and fills it up to `min_size`. Connections that fail
    /// to open at startup are counted but not fatal; the pool recovers on
    /// later health checks.
    pub async fn new(connector: F, config: PoolConfig) -> Self {
        let pool = Self {
            connector,
            config,
            inner: Mutex::new(PoolInner {
                entries: Vec::new(),
                stats: PoolStats::default(),
                last_health_check: Instant::now(),
            }),
        };
        {
            let mut inner = pool.inner.lock().await;
            pool.fill_to_min(&mut inner).await;
            info!(
                available = inner.entries.len(),
                pool_size = pool.config.pool_size,
                min_size = pool.config.min_size,
                "bridge pool initialized"
            );
        }
        pool
    }

    async fn create_connection(&self, stats: &mut PoolStats) -> Option<PooledConnection<F::Conn>> {
        match self.connector.connect().await {
            Ok(conn) => {
                stats.total_connections += 1;
                Some(PooledConnection::new(conn))
            }
            Err(e) => {
                warn!(error = %e, "failed to create bridge connection");
                stats.failed_connections += 1;
                None
            }
        }
    }

    async fn fill_to_min(&self, inner: &mut PoolInner<F::Conn>) {
        while inner.entries.len() < self.config.min_size {
            match self.create_connection(&mut inner.stats).await {
                Some(entry) => inner.entries.push(entry),
                None => break,
            }
        }
        refresh_gauges(inner);
    }

    /// Evicts idle and unhealthy entries, then refills to `min_size`. Runs at
    /// most once per `health_check_interval`; extra calls are no-ops.
    async fn maybe_health_check(&self) {
        let mut inner = self.inner.lock().await;
        if inner.last_health_check.elapsed() < self.config.health_check_interval {
            return;
        }
        inner.last_health_check = Instant::now();
        debug!("running bridge pool health check");

        let candidates = std::mem::take(&mut inner.entries);
        for mut entry in candidates {
            if entry.last_used.elapsed() > self.config.max_idle_time {
                info!("evicting idle bridge connection");
                entry.conn.close().await;
                continue;
            }
            match entry.conn.ping().await {
                Ok(()) => inner.entries.push(entry),
                Err(e) => {
                    info!(error = %e, "evicting unhealthy bridge connection");
                    entry.conn.close().await;
                    inner.stats.failed_connections += 1;
                }
            }
        }

        self.fill_to_min(&mut inner).await;
    }

    /// Borrows a connection, re-validating it with a ping. An empty pool is
    /// retried with exponential backoff; each retry also attempts to
    /// manufacture one fresh connection directly, bypassing the pool, to cut
    /// latency under load.
    pub async fn get_connection(
        &self,
        timeout: Option<Duration>,
        max_retries: u32,
    ) -> Result<PooledConnection<F::Conn>, AgentError> {
        let start = Instant::now();
        let mut retries = 0u32;

        loop {
            self.maybe_health_check().await;

            loop {
                let popped = {
                    let mut inner = self.inner.lock().await;
                    let entry = inner.entries.pop();
                    refresh_gauges(&mut inner);
                    entry
                };
                let Some(mut entry) = popped else { break };

                match entry.conn.ping().await {
                    Ok(()) => {
                        entry.last_used = Instant::now();
                        let mut inner = self.inner.lock().await;
                        inner.stats.borrowed_connections += 1;
                        refresh_gauges(&mut inner);
                        return Ok(entry);
                    }
                    Err(e) => {
                        warn!(error = %e, "borrowed connection unhealthy, trying next");
                        entry.conn.close().await;
                        let mut inner = self.inner.lock().await;
                        inner.stats.failed_connections += 1;
                    }
                }
            }

            if let Some(timeout) = timeout {
                if start.elapsed() > timeout {
                    return Err(AgentError::Timeout(format!(
                        "no bridge connection within {:.1}s",
                        timeout.as_secs_f64()
                    )));
                }
            }

            retries += 1;
            if retries > max_retries {
                return Err(AgentError::Connection(format!(
                    "bridge pool exhausted after {max_retries} retries"
                )));
            }

            let delay = Duration::from_secs_f64(
                (1.0 * 2f64.powi(retries as i32 - 1)).min(MAX_RETRY_DELAY.as_secs_f64()),
            );
            warn!(
                retries,
                max_retries,
                delay_secs = delay.as_secs_f64(),
                "bridge pool empty, backing off"
            );
            {
                let mut inner = self.inner.lock().await;
                inner.stats.retries += 1;
            }
            tokio::time::sleep(delay).await;

            let fresh = {
                let mut inner = self.inner.lock().await;
                let fresh = self.create_connection(&mut inner.stats).await;
                if fresh.is_some() {
                    inner.stats.borrowed_connections += 1;
                }
                refresh_gauges(&mut inner);
                fresh
            };
            if let Some(mut entry) = fresh {
                entry.last_used = Instant::now();
                return Ok(entry);
            }
        }
    }

    /// Returns a connection to the pool. Unhealthy handles are closed rather
    /// than returned; a full pool closes the surplus handle instead of
    /// growing without bound.
    pub async fn return_connection(&self, mut entry: PooledConnection<F::Conn>) {
        match entry.conn.ping().await {
            Ok(()) => {
                entry.last_used = Instant::now();
                let mut inner = self.inner.lock().await;
                if inner.entries.len() < self.config.pool_size {
                    inner.entries.push(entry);
                } else {
                    info!("bridge pool full, closing surplus connection");
                    drop(inner);
                    entry.conn.close().await;
                    inner = self.inner.lock().await;
                }
                refresh_gauges(&mut inner);
            }
            Err(e) => {
                info!(error = %e, "returned connection unhealthy, closing");
                entry.conn.close().await;
                let mut inner = self.inner.lock().await;
                inner.stats.failed_connections += 1;
                refresh_gauges(&mut inner);
            }
        }
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        info!(count = inner.entries.len(), "closing bridge pool");
        for mut entry in inner.entries.drain(..) {
            entry.conn.close().await;
        }
        refresh_gauges(&mut inner);
    }

    pub async fn stats(&self) -> PoolStats {
        self.inner.lock().await.stats.clone()
    }

    pub async fn available(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

fn refresh_gauges<C>(inner: &mut PoolInner<C>) {
    inner.stats.idle_connections = inner.entries.len() as u64;
    inner.stats.active_connections = inner
        .stats
        .total_connections
        .saturating_sub(inner.stats.idle_connections);
}

/// The command surface tools use to reach the engine. Implemented by the
/// pool (borrow a connection, send, return it) and by test fakes.
#[async_trait]
pub trait BridgeExecutor: Send + Sync {
    async fn command(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, AgentError>;
}

#[async_trait]
impl<F: Connector> BridgeExecutor for ConnectionPool<F> {
    async fn command(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, AgentError> {
        let mut entry = self.get_connection(timeout, 3).await?;
        let result = entry.conn.send_command(method, params, timeout).await;
        self.return_connection(entry).await;
        result
    }
}

/// Convenience constructor for the production pool.
pub async fn connect_pool(
    connector: BridgeConnector,
    config: PoolConfig,
) -> Arc<BridgePool> {
    Arc::new(ConnectionPool::new(connector, config).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Debug)]
    struct FakeConn {
        healthy: Arc<AtomicBool>,
        closed: bool,
    }

    #[async_trait]
    impl Connection for FakeConn {
        async fn send_command(
            &mut self,
            _method: &str,
            _params: Value,
            _timeout: Option<Duration>,
        ) -> Result<Value, AgentError> {
            Ok(serde_json::json!({"ok": true}))
        }

        async fn ping(&mut self) -> Result<(), AgentError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AgentError::Connection("fake ping failure".to_string()))
            }
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    struct FakeConnector {
        healthy: Arc<AtomicBool>,
        created: AtomicU64,
        fail_connect: AtomicBool,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                healthy: Arc::new(AtomicBool::new(true)),
                created: AtomicU64::new(0),
                fail_connect: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Conn = FakeConn;

        async fn connect(&self) -> Result<FakeConn, AgentError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(AgentError::Connection("engine down".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                healthy: self.healthy.clone(),
                closed: false,
            })
        }
    }

    fn test_config() -> PoolConfig {
        PoolConfig {
            pool_size: 3,
            min_size: 2,
            max_idle_time: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn initializes_to_min_size() {
        let pool = ConnectionPool::new(FakeConnector::new(), test_config()).await;
        assert_eq!(pool.available().await, 2);
        assert_eq!(pool.stats().await.total_connections, 2);
    }

    #[tokio::test]
    async fn borrow_then_return_leaves_size_unchanged() {
        let pool = ConnectionPool::new(FakeConnector::new(), test_config()).await;
        let before = pool.available().await;

        let entry = pool.get_connection(Some(Duration::from_secs(1)), 3).await.unwrap();
        assert_eq!(pool.available().await, before - 1);

        pool.return_connection(entry).await;
        assert_eq!(pool.available().await, before);
    }

    #[tokio::test]
    async fn pool_never_exceeds_pool_size() {
        let pool = ConnectionPool::new(FakeConnector::new(), test_config()).await;

        // Borrow nothing; return three extra fresh connections directly.
        for _ in 0..5 {
            let conn = pool.connector.connect().await.unwrap();
            pool.return_connection(PooledConnection::new(conn)).await;
        }
        assert!(pool.available().await <= 3);
    }

    #[tokio::test]
    async fn unhealthy_return_is_closed_not_pooled() {
        let connector = FakeConnector::new();
        let healthy = connector.healthy.clone();
        let pool = ConnectionPool::new(connector, test_config()).await;

        let entry = pool.get_connection(Some(Duration::from_secs(1)), 3).await.unwrap();
        let before = pool.available().await;

        healthy.store(false, Ordering::SeqCst);
        pool.return_connection(entry).await;

        assert_eq!(pool.available().await, before);
        assert!(pool.stats().await.failed_connections >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_errors_after_retries() {
        let connector = FakeConnector::new();
        connector.fail_connect.store(true, Ordering::SeqCst);
        let healthy = connector.healthy.clone();
        let pool = ConnectionPool::new(connector, test_config()).await;

        // Nothing pooled (connects fail) and fresh connects keep failing.
        healthy.store(false, Ordering::SeqCst);
        let err = pool.get_connection(None, 2).await.unwrap_err();
        assert!(matches!(err, AgentError::Connection(_)));
        assert_eq!(pool.stats().await.retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_manufactures_fresh_connection_on_retry() {
        let connector = FakeConnector::new();
        connector.fail_connect.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::new(connector, test_config()).await;
        assert_eq!(pool.available().await, 0);

        // Allow connects again: the retry path creates one directly.
        pool.connector.fail_connect.store(false, Ordering::SeqCst);
        let entry = pool.get_connection(None, 3).await.unwrap();
        assert!(entry.age() < Duration::from_secs(60));
        assert!(pool.stats().await.borrowed_connections >= 1);
    }

    #[tokio::test]
    async fn command_borrows_and_returns() {
        let pool = ConnectionPool::new(FakeConnector::new(), test_config()).await;
        let before = pool.available().await;

        let result = pool
            .command("ping", serde_json::json!({}), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
        assert_eq!(pool.available().await, before);
    }
}
