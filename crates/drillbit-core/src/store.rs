//! Repository traits for the two datastores the engine composes.

use async_trait::async_trait;

use crate::attribution::AttributionKey;
use crate::catalog::{ConversionColumn, EnrichedLevel};
use crate::detail::DetailScope;
use crate::error::EngineResult;
use crate::normalize::{ratio, DimensionValue, RawDetailRow, RawValue};
use crate::report::{DateRange, ReportMetrics, ReportScope};

/// Behavioral aggregates for one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehavioralMetrics {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub sessions: i64,
    pub bounced_count: i64,
    pub active_time_count: i64,
    pub total_active_time: f64,
    pub scroll_past_hero: i64,
    pub form_views: i64,
    pub form_starters: i64,
}

impl BehavioralMetrics {
    pub fn into_report(self) -> ReportMetrics {
        let active = self.active_time_count as f64;
        ReportMetrics {
            bounce_rate: ratio(self.bounced_count as f64, active),
            avg_active_time: ratio(self.total_active_time, active),
            page_views: self.page_views,
            unique_visitors: self.unique_visitors,
            sessions: self.sessions,
            bounced_count: self.bounced_count,
            active_time_count: self.active_time_count,
            total_active_time: self.total_active_time,
            scroll_past_hero: self.scroll_past_hero,
            form_views: self.form_views,
            form_starters: self.form_starters,
            trials: None,
            paid_subscriptions: None,
            revenue: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub dimensions: Vec<DimensionValue>,
    pub metrics: BehavioralMetrics,
}

/// Unique visitors of one bucket that arrived with one tracking key.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingKeyRow {
    pub bucket: Vec<DimensionValue>,
    pub key: AttributionKey,
    pub visitors: i64,
}

/// A visitor seen in one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitorRow {
    pub bucket: Vec<DimensionValue>,
    pub visitor_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailPage {
    pub rows: Vec<RawDetailRow>,
    pub total: i64,
}

#[async_trait]
pub trait BehavioralStore: Send + Sync + 'static {
    /// Grouped metrics for the scope, ordered by `scope.order` (page views
    /// when the store cannot order by that key) and limited to
    /// `scope.limit` rows.
    async fn aggregate(&self, scope: &ReportScope) -> EngineResult<Vec<AggregateRow>>;

    /// Unique visitors per (bucket, tracking key) under the same scope.
    async fn tracking_keys(&self, scope: &ReportScope) -> EngineResult<Vec<TrackingKeyRow>>;

    /// Distinct (bucket, visitor) pairs under the same scope.
    async fn visitor_keys(&self, scope: &ReportScope) -> EngineResult<Vec<VisitorRow>>;

    async fn detail(&self, scope: &DetailScope) -> EngineResult<DetailPage>;

    /// Tracking ids at `level` whose display name equals `name`
    /// (case-insensitive) within `range`.
    async fn resolve_entity_ids(
        &self,
        level: EnrichedLevel,
        name: &str,
        range: DateRange,
    ) -> EngineResult<Vec<String>>;

    async fn ping(&self) -> EngineResult<()>;
}

/// Conversion-side predicate on one column. Values are compared lower-cased;
/// `unknown` matches a missing value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFilter {
    pub column: ConversionColumn,
    pub negated: bool,
    pub values: Vec<String>,
    pub unknown: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionScope {
    pub date_range: DateRange,
    pub filters: Vec<ConversionFilter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConversionTotals {
    pub trials: i64,
    pub paid_subscriptions: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionBucket {
    pub value: RawValue,
    pub totals: ConversionTotals,
}

#[async_trait]
pub trait ConversionStore: Send + Sync + 'static {
    async fn totals_by_dimension(
        &self,
        scope: &ConversionScope,
        column: ConversionColumn,
    ) -> EngineResult<Vec<ConversionBucket>>;

    /// Totals per tracking key, restricted to `keys`.
    async fn totals_by_tracking(
        &self,
        scope: &ConversionScope,
        keys: &[AttributionKey],
    ) -> EngineResult<Vec<(AttributionKey, ConversionTotals)>>;

    /// Totals per visitor id, restricted to `visitors`.
    async fn totals_by_visitor(
        &self,
        scope: &ConversionScope,
        visitors: &[String],
    ) -> EngineResult<Vec<(String, ConversionTotals)>>;

    async fn ping(&self) -> EngineResult<()>;
}
