//! Report engine: plans a request, fans out to both stores and merges the
//! results into report rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attribution::{
    allocate_direct, allocate_tracking, allocate_visitors, merge, plan_attribution,
    tracked_keys, visitor_ids, AttributionPlan, ConversionMetrics, PendingConversionFilter,
};
use crate::catalog::{ConversionColumn, DimensionCatalog};
use crate::detail::{plan_detail, DetailRequest, DetailResponse};
use crate::error::EngineResult;
use crate::normalize::{bucket_id, normalize_detail, DimensionValue, RawValue};
use crate::report::{
    plan_report, sort_rows, DateRange, ReportPlan, ReportRequest, ReportResponse, ReportRow,
};
use crate::store::{
    AggregateRow, BehavioralStore, ConversionBucket, ConversionFilter, ConversionScope,
    ConversionStore,
};

pub const DEFAULT_MAX_ROWS: u32 = 1_000;

pub struct ReportEngine {
    catalog: Arc<DimensionCatalog>,
    behavioral: Arc<dyn BehavioralStore>,
    conversion: Arc<dyn ConversionStore>,
    max_rows: u32,
}

impl ReportEngine {
    pub fn new(
        catalog: Arc<DimensionCatalog>,
        behavioral: Arc<dyn BehavioralStore>,
        conversion: Arc<dyn ConversionStore>,
    ) -> Self {
        Self {
            catalog,
            behavioral,
            conversion,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn catalog(&self) -> &Arc<DimensionCatalog> {
        &self.catalog
    }

    #[tracing::instrument(
        skip(self, request),
        fields(dimension = tracing::field::Empty, mode = tracing::field::Empty, depth = request.depth)
    )]
    pub async fn run_report(&self, request: &ReportRequest) -> EngineResult<ReportResponse> {
        let plan = plan_report(&self.catalog, request, self.max_rows)?;
        let span = tracing::Span::current();
        span.record("dimension", plan.group().id.as_str());
        span.record("mode", plan.scope.mode.as_str());

        let attribution = plan
            .include_conversions
            .then(|| plan_attribution(&self.catalog, plan.group(), &plan.scope.filters));

        let (aggregate, conversions) = match &attribution {
            None => (self.behavioral.aggregate(&plan.scope).await?, None),
            Some(AttributionPlan::Direct { column, filters }) => {
                let (aggregate, buckets) = tokio::try_join!(
                    self.behavioral.aggregate(&plan.scope),
                    self.direct_totals(plan.scope.date_range, *column, filters),
                )?;
                let values: Vec<DimensionValue> = aggregate.iter().map(first_value).collect();
                let allocated = allocate_direct(&values, &buckets, *column);
                (aggregate, Some(allocated))
            }
            Some(AttributionPlan::Tracking { filters }) => {
                self.tracking_totals(&plan, filters).await?
            }
        };

        let mut rows = build_rows(&plan, aggregate, conversions);
        sort_rows(&mut rows, plan.sort);
        rows.truncate(plan.limit as usize);
        tracing::debug!(
            rows = rows.len(),
            attribution = ?attribution.as_ref().map(AttributionPlan::strategy),
            "report complete"
        );

        Ok(ReportResponse {
            rows,
            mode: plan.scope.mode,
            attribution: attribution.as_ref().map(AttributionPlan::strategy),
        })
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn run_detail(&self, request: &DetailRequest) -> EngineResult<DetailResponse> {
        let scope = plan_detail(&self.catalog, request)?;
        let page = self.behavioral.detail(&scope).await?;
        Ok(DetailResponse {
            records: page.rows.into_iter().map(normalize_detail).collect(),
            total: page.total,
            page: scope.page,
            page_size: scope.page_size,
        })
    }

    /// Check both stores are reachable.
    pub async fn ping(&self) -> EngineResult<()> {
        tokio::try_join!(self.behavioral.ping(), self.conversion.ping())?;
        Ok(())
    }

    async fn direct_totals(
        &self,
        date_range: DateRange,
        column: ConversionColumn,
        filters: &[PendingConversionFilter],
    ) -> EngineResult<Vec<ConversionBucket>> {
        let scope = self.conversion_scope(date_range, filters).await?;
        self.conversion.totals_by_dimension(&scope, column).await
    }

    /// Wave 1: behavioral aggregate plus tracking keys and visitor sets.
    /// Wave 2: conversion totals for the observed keys and visitors.
    async fn tracking_totals(
        &self,
        plan: &ReportPlan,
        filters: &[PendingConversionFilter],
    ) -> EngineResult<(Vec<AggregateRow>, Option<Vec<ConversionMetrics>>)> {
        let (aggregate, tracking, visitors, scope) = tokio::try_join!(
            self.behavioral.aggregate(&plan.scope),
            self.behavioral.tracking_keys(&plan.scope),
            self.behavioral.visitor_keys(&plan.scope),
            self.conversion_scope(plan.scope.date_range, filters),
        )?;

        let keys = tracked_keys(&tracking);
        let ids = visitor_ids(&visitors);
        let (by_key, by_visitor) = tokio::try_join!(
            self.conversion.totals_by_tracking(&scope, &keys),
            self.conversion.totals_by_visitor(&scope, &ids),
        )?;
        tracing::debug!(
            keys = keys.len(),
            visitors = ids.len(),
            "tracking attribution inputs"
        );

        let by_key: BTreeMap<_, ConversionMetrics> = by_key
            .into_iter()
            .map(|(key, totals)| (key, totals.into()))
            .collect();
        let by_visitor: BTreeMap<_, ConversionMetrics> = by_visitor
            .into_iter()
            .map(|(visitor, totals)| (visitor, totals.into()))
            .collect();
        let tracking_alloc = allocate_tracking(&tracking, &by_key);
        let visitor_alloc = allocate_visitors(&visitors, &by_visitor);

        let merged = aggregate
            .iter()
            .map(|row| {
                let id = bucket_id(&row.dimensions);
                merge(visitor_alloc.get(&id), tracking_alloc.get(&id))
            })
            .collect();
        Ok((aggregate, Some(merged)))
    }

    /// Resolve enriched filter values to ids and build the conversion scope.
    async fn conversion_scope(
        &self,
        date_range: DateRange,
        filters: &[PendingConversionFilter],
    ) -> EngineResult<ConversionScope> {
        let mut resolved = Vec::with_capacity(filters.len());
        for filter in filters {
            let ids = match filter.level {
                Some(level) if !filter.is_unknown() => {
                    self.behavioral
                        .resolve_entity_ids(level, &filter.value, date_range)
                        .await?
                }
                _ => Vec::new(),
            };
            resolved.push(ConversionFilter {
                column: filter.column,
                negated: filter.negated,
                values: filter.match_values(&ids),
                unknown: filter.is_unknown(),
            });
        }
        Ok(ConversionScope {
            date_range,
            filters: resolved,
        })
    }
}

fn first_value(row: &AggregateRow) -> DimensionValue {
    row.dimensions
        .first()
        .cloned()
        .unwrap_or_else(|| DimensionValue::plain(RawValue::Null))
}

fn build_rows(
    plan: &ReportPlan,
    aggregate: Vec<AggregateRow>,
    conversions: Option<Vec<ConversionMetrics>>,
) -> Vec<ReportRow> {
    let mut conversions = conversions.map(Vec::into_iter);
    aggregate
        .into_iter()
        .map(|row| {
            let value = first_value(&row);
            let attribute = value.label();
            let mut metrics = row.metrics.into_report();
            if let Some(allocated) = conversions.as_mut() {
                let allocated = allocated.next().unwrap_or_default();
                metrics.trials = Some(allocated.trials);
                metrics.paid_subscriptions = Some(allocated.paid_subscriptions);
                metrics.revenue = Some(allocated.revenue);
            }
            ReportRow {
                key: plan.row_key(value.raw_id.as_deref().unwrap_or(&attribute)),
                attribute,
                attribute_id: value.raw_id,
                depth: plan.depth,
                has_children: plan.has_children,
                metrics,
            }
        })
        .collect()
}
