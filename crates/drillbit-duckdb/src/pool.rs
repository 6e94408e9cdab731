//! Bounded access to a DuckDB database.
//!
//! Each query runs on its own cloned connection inside `spawn_blocking`, so
//! a slow aggregate never stalls the async runtime. A semaphore caps how many
//! run at once; the permit travels into the blocking task and is released
//! only when DuckDB actually returns. A query whose caller timed out or went
//! away is interrupted so its permit comes back promptly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use duckdb::{Connection, InterruptHandle};
use tokio::sync::{Mutex, MutexGuard, Semaphore};
use tracing::{error, warn};

use drillbit_core::config::Config;
use drillbit_core::{EngineError, EngineResult, StoreKind};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// DuckDB size string such as `"1GB"`.
    pub memory_limit: String,
    pub size: usize,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            memory_limit: config.duckdb_memory_limit.clone(),
            size: config.pool_size,
            acquire_timeout: config.acquire_timeout(),
            query_timeout: config.query_timeout(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Interrupts the running statement on drop unless disarmed.
struct InterruptGuard {
    handle: Arc<InterruptHandle>,
    armed: bool,
}

impl InterruptGuard {
    fn new(conn: &Connection) -> Self {
        Self {
            handle: conn.interrupt_handle(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.interrupt();
        }
    }
}

pub struct ConnectionPool {
    store: StoreKind,
    base: Arc<Mutex<Connection>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    query_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(store: StoreKind, conn: Connection, settings: &PoolSettings) -> Self {
        Self {
            store,
            base: Arc::new(Mutex::new(conn)),
            permits: Arc::new(Semaphore::new(settings.size.max(1))),
            acquire_timeout: settings.acquire_timeout,
            query_timeout: settings.query_timeout,
        }
    }

    /// Lock the base connection directly. Used by tests to seed data.
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.base.lock().await
    }

    /// Run `work` against a pooled connection.
    ///
    /// Waiting for a permit longer than the acquire timeout, exceeding the
    /// query timeout and DuckDB errors all surface as
    /// [`EngineError::DownstreamUnavailable`] for this store.
    pub async fn run<T, F>(&self, label: &'static str, work: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let store = self.store;
        let permit =
            match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(EngineError::unavailable(store, "connection pool closed"))
                }
                Err(_) => {
                    warn!(%store, query = label, "timed out waiting for a connection");
                    return Err(EngineError::unavailable(
                        store,
                        "timed out waiting for a connection",
                    ));
                }
            };

        let conn = {
            let base = self.base.lock().await;
            base.try_clone()
        }
        .map_err(|e| {
            error!(%store, error = %e, "failed to clone connection");
            EngineError::unavailable(store, e.to_string())
        })?;

        let guard = InterruptGuard::new(&conn);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work(&conn)
        });

        let outcome = tokio::time::timeout(self.query_timeout, task).await;
        if outcome.is_ok() {
            guard.disarm();
        } else {
            drop(guard);
        }
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => {
                error!(%store, query = label, error = %e, "query failed");
                Err(EngineError::unavailable(store, e.to_string()))
            }
            Ok(Err(join)) => Err(EngineError::Internal(anyhow!(
                "{label} query task failed: {join}"
            ))),
            Err(_) => {
                warn!(
                    %store,
                    query = label,
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "query timed out, interrupting"
                );
                Err(EngineError::unavailable(store, "query timed out"))
            }
        }
    }

    pub async fn ping(&self) -> EngineResult<()> {
        self.run("ping", |conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await
    }
}
