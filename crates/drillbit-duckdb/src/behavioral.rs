use async_trait::async_trait;
use duckdb::Connection;
use tokio::sync::MutexGuard;
use tracing::info;

use drillbit_core::catalog::EnrichedLevel;
use drillbit_core::detail::DetailScope;
use drillbit_core::report::{DateRange, ReportScope};
use drillbit_core::store::{AggregateRow, BehavioralStore, DetailPage, TrackingKeyRow, VisitorRow};
use drillbit_core::{EngineResult, StoreKind};

use crate::pool::{ConnectionPool, PoolSettings};
use crate::queries::{detail, entities, report};
use crate::schema::behavioral_init_sql;

/// Read-only access to page views, sessions, ad entity names and URL
/// classification.
pub struct DuckDbBehavioralStore {
    pool: ConnectionPool,
}

impl DuckDbBehavioralStore {
    /// Open (or create) the behavioral database at `path` and apply the
    /// schema.
    pub fn open(path: &str, settings: &PoolSettings) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&behavioral_init_sql(&settings.memory_limit))?;
        info!(
            "behavioral DuckDB opened at {} with memory_limit={}, pool_size={}",
            path, settings.memory_limit, settings.size
        );
        Ok(Self {
            pool: ConnectionPool::new(StoreKind::Behavioral, conn, settings),
        })
    }

    /// Open an in-memory database. Data is discarded on drop.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let settings = PoolSettings::default();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&behavioral_init_sql(&settings.memory_limit))?;
        Ok(Self {
            pool: ConnectionPool::new(StoreKind::Behavioral, conn, &settings),
        })
    }

    /// Direct access to the base connection, for seeding test data.
    pub async fn conn_for_test(&self) -> MutexGuard<'_, Connection> {
        self.pool.lock().await
    }
}

#[async_trait]
impl BehavioralStore for DuckDbBehavioralStore {
    async fn aggregate(&self, scope: &ReportScope) -> EngineResult<Vec<AggregateRow>> {
        let query = report::aggregate_query(scope)?;
        self.pool
            .run("aggregate", move |conn| report::run_aggregate(conn, &query))
            .await
    }

    async fn tracking_keys(&self, scope: &ReportScope) -> EngineResult<Vec<TrackingKeyRow>> {
        let query = report::tracking_key_query(scope)?;
        self.pool
            .run("tracking_keys", move |conn| {
                report::run_tracking_keys(conn, &query)
            })
            .await
    }

    async fn visitor_keys(&self, scope: &ReportScope) -> EngineResult<Vec<VisitorRow>> {
        let query = report::visitor_query(scope)?;
        self.pool
            .run("visitor_keys", move |conn| report::run_visitors(conn, &query))
            .await
    }

    async fn detail(&self, scope: &DetailScope) -> EngineResult<DetailPage> {
        let queries = detail::detail_queries(scope)?;
        self.pool
            .run("detail", move |conn| detail::run_detail(conn, &queries))
            .await
    }

    async fn resolve_entity_ids(
        &self,
        level: EnrichedLevel,
        name: &str,
        range: DateRange,
    ) -> EngineResult<Vec<String>> {
        if name.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = entities::entity_ids_query(level, name, range);
        self.pool
            .run("entity_ids", move |conn| entities::run_entity_ids(conn, &query))
            .await
    }

    async fn ping(&self) -> EngineResult<()> {
        self.pool.ping().await
    }
}
