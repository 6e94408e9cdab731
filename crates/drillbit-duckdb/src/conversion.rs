use std::collections::BTreeSet;

use async_trait::async_trait;
use duckdb::Connection;
use tokio::sync::MutexGuard;
use tracing::info;

use drillbit_core::attribution::AttributionKey;
use drillbit_core::catalog::ConversionColumn;
use drillbit_core::store::{ConversionBucket, ConversionScope, ConversionStore, ConversionTotals};
use drillbit_core::{EngineResult, StoreKind};

use crate::pool::{ConnectionPool, PoolSettings};
use crate::queries::conversion::{
    dimension_query, run_dimension, run_tracking, run_visitors, tracking_query, visitor_query,
    VISITOR_CHUNK,
};
use crate::schema::conversion_init_sql;

/// Read-only access to subscriptions and invoices.
pub struct DuckDbConversionStore {
    pool: ConnectionPool,
}

impl DuckDbConversionStore {
    pub fn open(path: &str, settings: &PoolSettings) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&conversion_init_sql(&settings.memory_limit))?;
        info!(
            "conversion DuckDB opened at {} with memory_limit={}, pool_size={}",
            path, settings.memory_limit, settings.size
        );
        Ok(Self {
            pool: ConnectionPool::new(StoreKind::Conversion, conn, settings),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let settings = PoolSettings::default();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&conversion_init_sql(&settings.memory_limit))?;
        Ok(Self {
            pool: ConnectionPool::new(StoreKind::Conversion, conn, &settings),
        })
    }

    pub async fn conn_for_test(&self) -> MutexGuard<'_, Connection> {
        self.pool.lock().await
    }
}

#[async_trait]
impl ConversionStore for DuckDbConversionStore {
    async fn totals_by_dimension(
        &self,
        scope: &ConversionScope,
        column: ConversionColumn,
    ) -> EngineResult<Vec<ConversionBucket>> {
        let query = dimension_query(scope, column);
        self.pool
            .run("conversion_by_dimension", move |conn| {
                run_dimension(conn, &query)
            })
            .await
    }

    async fn totals_by_tracking(
        &self,
        scope: &ConversionScope,
        keys: &[AttributionKey],
    ) -> EngineResult<Vec<(AttributionKey, ConversionTotals)>> {
        let wanted: BTreeSet<AttributionKey> = keys
            .iter()
            .filter(|key| !key.is_untracked())
            .cloned()
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let query = tracking_query(scope);
        self.pool
            .run("conversion_by_tracking", move |conn| {
                run_tracking(conn, &query, &wanted)
            })
            .await
    }

    async fn totals_by_visitor(
        &self,
        scope: &ConversionScope,
        visitors: &[String],
    ) -> EngineResult<Vec<(String, ConversionTotals)>> {
        if visitors.is_empty() {
            return Ok(Vec::new());
        }
        let queries: Vec<_> = visitors
            .chunks(VISITOR_CHUNK)
            .map(|chunk| visitor_query(scope, chunk))
            .collect();
        self.pool
            .run("conversion_by_visitor", move |conn| {
                run_visitors(conn, &queries)
            })
            .await
    }

    async fn ping(&self) -> EngineResult<()> {
        self.pool.ping().await
    }
}
