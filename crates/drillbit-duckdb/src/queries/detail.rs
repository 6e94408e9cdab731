//! Detail drill-through: paginated page views behind a report cell.

use duckdb::Connection;

use drillbit_core::catalog::{Alias, ResolvedDimension};
use drillbit_core::detail::{DetailMetric, DetailScope};
use drillbit_core::filter::{compile, split_entry_level};
use drillbit_core::normalize::{metric_i64, RawDetailRow};
use drillbit_core::report::QueryMode;
use drillbit_core::sql::{and_all, Query, SqlBuilder};
use drillbit_core::store::DetailPage;
use drillbit_core::EngineResult;

use crate::queries::report::{
    active_time, first_page_views_cte, product_join, uses, BOUNCE_THRESHOLD_SECONDS,
    VISIT_NUMBERS_CTE,
};
use crate::values::{bind_query, raw_at};

const RECORD_COLUMNS: &str = "pv.id, pv.session_id, pv.visitor_id, pv.created_at, pv.url_path, \
pv.hostname, pv.referrer, pv.country_code, pv.device_type, pv.os_name, pv.browser_name, \
pv.utm_source, pv.utm_medium, pv.utm_campaign, pv.campaign_id, \
COALESCE(pv.time_on_page, pv.heartbeat_active_time) AS active_time, \
pv.scrolled_past_hero, pv.form_viewed, pv.form_started";

#[derive(Debug, Clone, PartialEq)]
pub struct DetailQueries {
    pub count: Query,
    pub records: Query,
}

fn metric_predicate(metric: DetailMetric) -> String {
    let active = active_time(Alias::PageView);
    match metric {
        DetailMetric::BouncedCount => format!("{active} < {BOUNCE_THRESHOLD_SECONDS:.1}"),
        DetailMetric::ActiveTimeCount => format!("{active} IS NOT NULL"),
        DetailMetric::ScrollPastHero => "pv.scrolled_past_hero".to_string(),
        DetailMetric::FormViews => "pv.form_viewed".to_string(),
        DetailMetric::FormStarters => "pv.form_started".to_string(),
    }
}

/// Form starters are counted per visitor, so their detail keeps each
/// visitor's first form-start page view.
fn per_visitor(scope: &DetailScope) -> bool {
    scope.metric == Some(DetailMetric::FormStarters)
}

/// `(WITH prefix, FROM ... WHERE ...)` shared by the count and the page.
/// Entry-level filters become a sub-filter on the session id.
fn body(scope: &DetailScope, sql: &mut SqlBuilder) -> EngineResult<(String, String)> {
    let range = sql.bind_range(scope.date_range.start, scope.date_range.end);
    let (entry_filters, page_filters) = split_entry_level(&scope.catalog, &scope.filters);
    let entry = compile(&entry_filters, &scope.catalog, QueryMode::Entry, &range, sql)?;
    let page = compile(&page_filters, &scope.catalog, QueryMode::Funnel, &range, sql)?;

    let mut ctes = Vec::new();
    let mut clauses = vec![range.covers_timestamp("pv.created_at")];
    if let Some(entry_clause) = &entry.clause {
        let entry_used: Vec<&ResolvedDimension> = entry.dimensions.iter().collect();
        ctes.push(first_page_views_cte(&range));
        let mut sub = "SELECT fp.session_id FROM first_page_views fp".to_string();
        if uses(&entry_used, Alias::VisitNumber) {
            ctes.push(VISIT_NUMBERS_CTE.to_string());
            sub.push_str(" LEFT JOIN visit_numbers vn ON vn.session_id = fp.session_id");
        }
        if uses(&entry_used, Alias::EntryUrlProduct) {
            sub.push_str(&product_join(Alias::EntryUrlProduct, Alias::FirstPageView));
        }
        clauses.push(format!("pv.session_id IN ({sub} WHERE {entry_clause})"));
    }

    let mut from = "page_views pv".to_string();
    let page_used: Vec<&ResolvedDimension> = page.dimensions.iter().collect();
    if uses(&page_used, Alias::UrlProduct) {
        from.push_str(&product_join(Alias::UrlProduct, Alias::PageView));
    }
    clauses.extend(page.clause.clone());
    if let Some(metric) = scope.metric {
        clauses.push(metric_predicate(metric));
    }
    if per_visitor(scope) {
        clauses.push("pv.visitor_id IS NOT NULL".to_string());
    }

    let with = if ctes.is_empty() {
        String::new()
    } else {
        format!("WITH {} ", ctes.join(", "))
    };
    Ok((with, format!("FROM {from} WHERE {}", and_all(&clauses))))
}

pub fn detail_queries(scope: &DetailScope) -> EngineResult<DetailQueries> {
    let mut count_sql = SqlBuilder::new();
    let (with, rest) = body(scope, &mut count_sql)?;
    let (counted, qualify) = if per_visitor(scope) {
        (
            "COUNT(DISTINCT pv.visitor_id)",
            " QUALIFY ROW_NUMBER() OVER (PARTITION BY pv.visitor_id ORDER BY pv.created_at, pv.id) = 1",
        )
    } else {
        ("COUNT(*)", "")
    };
    let count = format!("{with}SELECT {counted} {rest}");

    let mut records_sql = SqlBuilder::new();
    let (with, rest) = body(scope, &mut records_sql)?;
    let limit = records_sql.bind(i64::from(scope.page_size));
    let offset = records_sql.bind(scope.offset());
    let records = format!(
        "{with}SELECT {RECORD_COLUMNS} {rest}{qualify} ORDER BY pv.created_at, pv.id LIMIT {limit} OFFSET {offset}"
    );

    Ok(DetailQueries {
        count: count_sql.finish(count),
        records: records_sql.finish(records),
    })
}

pub(crate) fn run_detail(conn: &Connection, queries: &DetailQueries) -> anyhow::Result<DetailPage> {
    let params = bind_query(&queries.count);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let total = conn.query_row(&queries.count.sql, param_refs.as_slice(), |row| raw_at(row, 0))?;

    let params = bind_query(&queries.records);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&queries.records.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(RawDetailRow {
            id: raw_at(row, 0)?,
            session_id: raw_at(row, 1)?,
            visitor_id: raw_at(row, 2)?,
            created_at: raw_at(row, 3)?,
            url_path: raw_at(row, 4)?,
            hostname: raw_at(row, 5)?,
            referrer: raw_at(row, 6)?,
            country_code: raw_at(row, 7)?,
            device_type: raw_at(row, 8)?,
            os_name: raw_at(row, 9)?,
            browser_name: raw_at(row, 10)?,
            utm_source: raw_at(row, 11)?,
            utm_medium: raw_at(row, 12)?,
            utm_campaign: raw_at(row, 13)?,
            campaign_id: raw_at(row, 14)?,
            active_time: raw_at(row, 15)?,
            scrolled_past_hero: raw_at(row, 16)?,
            form_viewed: raw_at(row, 17)?,
            form_started: raw_at(row, 18)?,
        })
    })?;

    Ok(DetailPage {
        rows: rows.collect::<Result<Vec<_>, _>>()?,
        total: metric_i64(&total),
    })
}
