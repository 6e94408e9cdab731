//! Detail drill-through: the page views behind a report cell.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::DimensionCatalog;
use crate::error::{EngineError, EngineResult};
use crate::normalize::DetailRecord;
use crate::report::{DateRange, Filter};

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 50_000;

/// Row predicate that narrows the detail to the records a metric counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailMetric {
    BouncedCount,
    ActiveTimeCount,
    ScrollPastHero,
    FormViews,
    /// One row per visitor: their first page view that started a form.
    FormStarters,
}

impl DetailMetric {
    /// `Ok(None)` for metrics that count every row.
    pub fn parse(raw: &str) -> EngineResult<Option<Self>> {
        Ok(Some(match raw {
            "pageViews" | "uniqueVisitors" | "sessions" => return Ok(None),
            "bouncedCount" => DetailMetric::BouncedCount,
            "activeTimeCount" => DetailMetric::ActiveTimeCount,
            "scrollPastHero" => DetailMetric::ScrollPastHero,
            "formViews" => DetailMetric::FormViews,
            "formStarters" => DetailMetric::FormStarters,
            other => {
                return Err(EngineError::invalid(
                    "metricId",
                    format!("metric '{other}' has no detail view"),
                ))
            }
        }))
    }
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRequest {
    pub date_range: DateRange,
    #[serde(default)]
    pub dimension_filters: BTreeMap<String, String>,
    #[serde(default)]
    pub metric_id: Option<String>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailResponse {
    pub records: Vec<DetailRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct DetailScope {
    pub catalog: Arc<DimensionCatalog>,
    pub date_range: DateRange,
    pub filters: Vec<Filter>,
    pub metric: Option<DetailMetric>,
    pub page: u32,
    pub page_size: u32,
}

impl DetailScope {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

pub fn plan_detail(
    catalog: &Arc<DimensionCatalog>,
    request: &DetailRequest,
) -> EngineResult<DetailScope> {
    request.date_range.validate()?;
    let pagination = request.pagination.unwrap_or_default();
    if pagination.page < 1 {
        return Err(EngineError::invalid("pagination.page", "page must be at least 1"));
    }
    if pagination.page_size < 1 || pagination.page_size > MAX_PAGE_SIZE {
        return Err(EngineError::invalid(
            "pagination.pageSize",
            format!("pageSize must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }
    for field in request.dimension_filters.keys() {
        if !catalog.contains(field) {
            return Err(EngineError::invalid(
                "dimensionFilters",
                format!("unknown dimension '{field}'"),
            ));
        }
    }
    let metric = match request.metric_id.as_deref() {
        Some(raw) => DetailMetric::parse(raw)?,
        None => None,
    };

    Ok(DetailScope {
        catalog: Arc::clone(catalog),
        date_range: request.date_range,
        filters: request
            .dimension_filters
            .iter()
            .map(|(field, value)| Filter::equals(field.as_str(), value.as_str()))
            .collect(),
        metric,
        page: pagination.page,
        page_size: pagination.page_size,
    })
}
