//! Report request/response types and request planning.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::attribution::AttributionStrategy;
use crate::catalog::{DimensionCatalog, ResolvedDimension};
use crate::error::{EngineError, EngineResult};

/// Hard ceiling on `limit`, independent of the configured default.
pub const MAX_REQUEST_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> EngineResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.end < self.start {
            return Err(EngineError::invalid(
                "dateRange",
                "end must be on or after start",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

impl FilterOperator {
    pub fn is_negated(self) -> bool {
        matches!(self, FilterOperator::NotEquals | FilterOperator::NotContains)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Equals,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryMode {
    Entry,
    AllPageView,
    Funnel,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::Entry => "entry",
            QueryMode::AllPageView => "allPageView",
            QueryMode::Funnel => "funnel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "ASC", alias = "asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc")]
    Desc,
}

/// Every metric a report row can carry, addressable by its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    PageViews,
    UniqueVisitors,
    Sessions,
    BouncedCount,
    ActiveTimeCount,
    TotalActiveTime,
    ScrollPastHero,
    FormViews,
    FormStarters,
    BounceRate,
    AvgActiveTime,
    Trials,
    PaidSubscriptions,
    Revenue,
}

impl Metric {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "pageViews" => Metric::PageViews,
            "uniqueVisitors" => Metric::UniqueVisitors,
            "sessions" => Metric::Sessions,
            "bouncedCount" => Metric::BouncedCount,
            "activeTimeCount" => Metric::ActiveTimeCount,
            "totalActiveTime" => Metric::TotalActiveTime,
            "scrollPastHero" => Metric::ScrollPastHero,
            "formViews" => Metric::FormViews,
            "formStarters" => Metric::FormStarters,
            "bounceRate" => Metric::BounceRate,
            "avgActiveTime" => Metric::AvgActiveTime,
            "trials" => Metric::Trials,
            "paidSubscriptions" => Metric::PaidSubscriptions,
            "revenue" => Metric::Revenue,
            _ => return None,
        })
    }

    /// Whether the behavioral store can order by this metric itself.
    pub fn is_behavioral(self) -> bool {
        !matches!(
            self,
            Metric::Trials | Metric::PaidSubscriptions | Metric::Revenue
        )
    }

    pub fn value(self, metrics: &ReportMetrics) -> f64 {
        match self {
            Metric::PageViews => metrics.page_views as f64,
            Metric::UniqueVisitors => metrics.unique_visitors as f64,
            Metric::Sessions => metrics.sessions as f64,
            Metric::BouncedCount => metrics.bounced_count as f64,
            Metric::ActiveTimeCount => metrics.active_time_count as f64,
            Metric::TotalActiveTime => metrics.total_active_time,
            Metric::ScrollPastHero => metrics.scroll_past_hero as f64,
            Metric::FormViews => metrics.form_views as f64,
            Metric::FormStarters => metrics.form_starters as f64,
            Metric::BounceRate => metrics.bounce_rate,
            Metric::AvgActiveTime => metrics.avg_active_time,
            Metric::Trials => metrics.trials.unwrap_or(0.0),
            Metric::PaidSubscriptions => metrics.paid_subscriptions.unwrap_or(0.0),
            Metric::Revenue => metrics.revenue.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Attribute,
    Metric(Metric),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Metric(Metric::PageViews),
            direction: SortDirection::Desc,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub date_range: DateRange,
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub parent_filters: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
    #[serde(default = "default_true")]
    pub include_conversions: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Per-row metrics as returned on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub sessions: i64,
    pub bounced_count: i64,
    pub active_time_count: i64,
    pub total_active_time: f64,
    pub scroll_past_hero: i64,
    pub form_views: i64,
    pub form_starters: i64,
    pub bounce_rate: f64,
    pub avg_active_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trials: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_subscriptions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub key: String,
    pub attribute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_id: Option<String>,
    pub depth: usize,
    pub has_children: bool,
    pub metrics: ReportMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub rows: Vec<ReportRow>,
    pub mode: QueryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionStrategy>,
}

/// Everything a behavioral store needs to build the aggregate for one
/// request: the resolved grouping, the active mode and the raw filters
/// (parent filters first, as `equals`).
#[derive(Debug, Clone)]
pub struct ReportScope {
    pub catalog: Arc<DimensionCatalog>,
    pub mode: QueryMode,
    pub date_range: DateRange,
    pub group: Vec<ResolvedDimension>,
    pub filters: Vec<Filter>,
    /// Store-side ordering. Keys the store cannot order by fall back to
    /// page views.
    pub order: SortSpec,
    /// Rows fetched from the store.
    pub limit: u32,
}

/// A validated report request.
#[derive(Debug, Clone)]
pub struct ReportPlan {
    pub scope: ReportScope,
    pub depth: usize,
    pub has_children: bool,
    /// `dim=value` segments of the expanded ancestors, joined with `|`.
    pub parent_path: String,
    /// Filters the user typed (parent filters excluded).
    pub user_filters: Vec<Filter>,
    /// Parent filters in hierarchy order.
    pub parent_filters: Vec<Filter>,
    pub sort: SortSpec,
    /// Rows returned after sorting.
    pub limit: u32,
    pub include_conversions: bool,
}

impl ReportPlan {
    pub fn group(&self) -> &ResolvedDimension {
        // plan_report always resolves exactly one grouping dimension
        &self.scope.group[0]
    }

    pub fn row_key(&self, value: &str) -> String {
        let segment = format!("{}={}", self.group().id, value);
        if self.parent_path.is_empty() {
            segment
        } else {
            format!("{}|{}", self.parent_path, segment)
        }
    }
}

/// Validate a request against the catalog and turn it into a plan. Nothing
/// touches a datastore before this succeeds.
pub fn plan_report(
    catalog: &Arc<DimensionCatalog>,
    request: &ReportRequest,
    max_rows: u32,
) -> EngineResult<ReportPlan> {
    request.date_range.validate()?;

    if request.dimensions.is_empty() {
        return Err(EngineError::invalid(
            "dimensions",
            "at least one dimension is required",
        ));
    }
    for id in &request.dimensions {
        if !catalog.contains(id) {
            return Err(EngineError::invalid(
                "dimensions",
                format!("unknown dimension '{id}'"),
            ));
        }
    }
    if request.depth >= request.dimensions.len() {
        return Err(EngineError::invalid(
            "depth",
            format!(
                "depth must be less than the number of dimensions ({})",
                request.dimensions.len()
            ),
        ));
    }
    for field in request.parent_filters.keys() {
        if !catalog.contains(field) {
            return Err(EngineError::invalid(
                "parentFilters",
                format!("unknown dimension '{field}'"),
            ));
        }
    }

    let sort = parse_sort(request.sort_by.as_deref(), request.sort_direction)?;
    let limit = match request.limit {
        None => max_rows,
        Some(limit) if limit == 0 || limit > MAX_REQUEST_LIMIT => {
            return Err(EngineError::invalid(
                "limit",
                format!("limit must be between 1 and {MAX_REQUEST_LIMIT}"),
            ));
        }
        Some(limit) => limit.min(max_rows),
    };
    // Conversion metrics and labels only exist after attribution, so the
    // top rows can't be picked in SQL.
    let fetch = match sort.key {
        SortKey::Metric(metric) if metric.is_behavioral() => limit,
        _ => max_rows,
    };

    let group_id = request.dimensions[request.depth].as_str();

    // Parent filters follow the drill hierarchy; any extra (cross-mode)
    // parents come after in key order.
    let mut parent_filters = Vec::new();
    let mut path = Vec::new();
    for id in &request.dimensions[..request.depth] {
        if let Some(value) = request.parent_filters.get(id) {
            parent_filters.push(Filter::equals(id.as_str(), value.as_str()));
            path.push(format!("{id}={value}"));
        }
    }
    for (id, value) in &request.parent_filters {
        if !request.dimensions[..request.depth].contains(id) {
            parent_filters.push(Filter::equals(id.as_str(), value.as_str()));
            path.push(format!("{id}={value}"));
        }
    }

    let mut fields: Vec<&str> = vec![group_id];
    fields.extend(parent_filters.iter().map(|f| f.field.as_str()));
    fields.extend(
        request
            .filters
            .iter()
            .map(|f| f.field.as_str())
            .filter(|field| catalog.contains(field)),
    );
    let mode = catalog.select_mode(fields);
    let group = catalog.resolve(group_id, mode)?;

    let mut filters = parent_filters.clone();
    filters.extend(request.filters.iter().cloned());

    Ok(ReportPlan {
        scope: ReportScope {
            catalog: Arc::clone(catalog),
            mode,
            date_range: request.date_range,
            group: vec![group],
            filters,
            order: sort,
            limit: fetch,
        },
        depth: request.depth,
        has_children: request.depth + 1 < request.dimensions.len(),
        parent_path: path.join("|"),
        user_filters: request.filters.clone(),
        parent_filters,
        sort,
        limit,
        include_conversions: request.include_conversions,
    })
}

fn parse_sort(sort_by: Option<&str>, direction: Option<SortDirection>) -> EngineResult<SortSpec> {
    let key = match sort_by.map(str::trim) {
        None | Some("") => return Ok(SortSpec {
            direction: direction.unwrap_or(SortDirection::Desc),
            ..SortSpec::default()
        }),
        Some("attribute") => SortKey::Attribute,
        Some(raw) => SortKey::Metric(Metric::parse(raw).ok_or_else(|| {
            EngineError::invalid("sortBy", format!("unknown metric '{raw}'"))
        })?),
    };
    let default_direction = match key {
        SortKey::Attribute => SortDirection::Asc,
        SortKey::Metric(_) => SortDirection::Desc,
    };
    Ok(SortSpec {
        key,
        direction: direction.unwrap_or(default_direction),
    })
}

/// Order rows by the requested key; ties fall back to attribute then key so
/// the output is stable across runs.
pub fn sort_rows(rows: &mut [ReportRow], sort: SortSpec) {
    rows.sort_by(|a, b| {
        let primary = match sort.key {
            SortKey::Attribute => a.attribute.cmp(&b.attribute),
            SortKey::Metric(metric) => metric
                .value(&a.metrics)
                .partial_cmp(&metric.value(&b.metrics))
                .unwrap_or(Ordering::Equal),
        };
        let primary = match sort.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary
            .then_with(|| a.attribute.cmp(&b.attribute))
            .then_with(|| a.key.cmp(&b.key))
    });
}
