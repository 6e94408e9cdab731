//! Report queries for the three query modes.
//!
//! Every statement binds the date range first (`?1`/`?2`), then filter
//! values, then the row limit. The FROM/WHERE skeleton is shared by the
//! aggregate, tracking-key and visitor queries so all three see exactly the
//! same rows.

use duckdb::{Connection, Row};

use drillbit_core::attribution::AttributionKey;
use drillbit_core::catalog::{Alias, ResolvedDimension};
use drillbit_core::enrichment::{display_expr, plan_joins, EnrichmentJoin};
use drillbit_core::filter::{compile, split_entry_level, CompiledFilter};
use drillbit_core::normalize::{metric_f64, metric_i64, optional_text, DimensionValue};
use drillbit_core::report::{Metric, QueryMode, ReportScope, SortDirection, SortKey, SortSpec};
use drillbit_core::sql::{and_all, Query, RangeParams, SqlBuilder};
use drillbit_core::store::{AggregateRow, BehavioralMetrics, TrackingKeyRow, VisitorRow};
use drillbit_core::EngineResult;

use crate::values::{bind_query, raw_at};

/// Active time below this many seconds counts as a bounce.
pub const BOUNCE_THRESHOLD_SECONDS: f64 = 5.0;

pub(crate) const VISIT_NUMBERS_CTE: &str = "visit_numbers AS (\
SELECT session_id, ROW_NUMBER() OVER (PARTITION BY visitor_id ORDER BY started_at, session_id) AS visit_number \
FROM sessions)";

/// First page view of every session that started inside the range.
pub(crate) fn first_page_views_cte(range: &RangeParams) -> String {
    format!(
        "first_page_views AS (\
SELECT p.* FROM page_views p \
JOIN sessions s0 ON s0.session_id = p.session_id \
WHERE {} \
QUALIFY ROW_NUMBER() OVER (PARTITION BY p.session_id ORDER BY p.created_at, p.id) = 1)",
        range.covers_timestamp("s0.started_at")
    )
}

pub(crate) fn active_time(rows: Alias) -> String {
    let r = rows.as_str();
    format!("COALESCE({r}.time_on_page, {r}.heartbeat_active_time)")
}

pub(crate) fn product_join(product: Alias, on: Alias) -> String {
    format!(
        " LEFT JOIN url_products {p} ON {p}.url_path = {o}.url_path",
        p = product.as_str(),
        o = on.as_str()
    )
}

pub(crate) fn uses(dims: &[&ResolvedDimension], alias: Alias) -> bool {
    dims.iter().any(|dim| dim.alias() == alias)
}

/// One grouped column. Enriched dimensions group by the raw id and display
/// the resolved name.
#[derive(Debug, Clone, PartialEq)]
struct GroupColumn {
    expr: String,
    display: Option<String>,
}

/// FROM/WHERE skeleton of a report statement.
#[derive(Debug, Clone)]
struct Source {
    ctes: Vec<String>,
    from: String,
    filter: String,
    /// Rows being counted.
    rows: Alias,
    /// Rows whose tracking columns identify the acquisition.
    tracking: Alias,
    group: Vec<GroupColumn>,
}

impl Source {
    fn with_clause(&self) -> String {
        if self.ctes.is_empty() {
            String::new()
        } else {
            format!("WITH {} ", self.ctes.join(", "))
        }
    }

    fn select_group(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (i, column) in self.group.iter().enumerate() {
            match &column.display {
                Some(display) => {
                    out.push(format!("MAX({display}) AS d{i}"));
                    out.push(format!("{} AS d{i}_raw", column.expr));
                }
                None => out.push(format!("{} AS d{i}", column.expr)),
            }
        }
        out
    }

    fn group_by(&self) -> Vec<String> {
        self.group.iter().map(|column| column.expr.clone()).collect()
    }

    fn layout(&self) -> Vec<bool> {
        self.group.iter().map(|column| column.display.is_some()).collect()
    }
}

/// A statement plus how to read its leading dimension columns
/// (`true` = display + raw id pair).
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub query: Query,
    pub layout: Vec<bool>,
}

fn source(scope: &ReportScope, sql: &mut SqlBuilder) -> EngineResult<Source> {
    let range = sql.bind_range(scope.date_range.start, scope.date_range.end);
    match scope.mode {
        QueryMode::Entry => entry_source(scope, &range, sql),
        QueryMode::AllPageView => page_view_source(scope, &range, sql),
        QueryMode::Funnel => funnel_source(scope, &range, sql),
    }
}

fn used_dimensions<'a>(
    group: &'a [ResolvedDimension],
    filter: &'a CompiledFilter,
) -> Vec<&'a ResolvedDimension> {
    group.iter().chain(filter.dimensions.iter()).collect()
}

fn push_enrichment(from: &mut String, joins: &[EnrichmentJoin], range: &RangeParams) {
    for join in joins {
        from.push(' ');
        from.push_str(&join.render(range));
    }
}

fn group_columns(group: &[ResolvedDimension], joins: &[EnrichmentJoin]) -> Vec<GroupColumn> {
    group
        .iter()
        .map(|dim| GroupColumn {
            expr: dim.value_sql(),
            display: display_expr(joins, dim),
        })
        .collect()
}

fn entry_source(
    scope: &ReportScope,
    range: &RangeParams,
    sql: &mut SqlBuilder,
) -> EngineResult<Source> {
    let filter = compile(&scope.filters, &scope.catalog, QueryMode::Entry, range, sql)?;
    let used = used_dimensions(&scope.group, &filter);
    let joins = plan_joins(&scope.group);

    let mut ctes = vec![first_page_views_cte(range)];
    let mut from =
        "first_page_views fp JOIN sessions s ON s.session_id = fp.session_id".to_string();
    if uses(&used, Alias::VisitNumber) {
        ctes.push(VISIT_NUMBERS_CTE.to_string());
        from.push_str(" LEFT JOIN visit_numbers vn ON vn.session_id = fp.session_id");
    }
    if uses(&used, Alias::EntryUrlProduct) {
        from.push_str(&product_join(Alias::EntryUrlProduct, Alias::FirstPageView));
    }
    push_enrichment(&mut from, &joins, range);

    Ok(Source {
        ctes,
        from,
        filter: filter.clause_or_true(),
        rows: Alias::FirstPageView,
        tracking: Alias::FirstPageView,
        group: group_columns(&scope.group, &joins),
    })
}

fn page_view_source(
    scope: &ReportScope,
    range: &RangeParams,
    sql: &mut SqlBuilder,
) -> EngineResult<Source> {
    let filter = compile(
        &scope.filters,
        &scope.catalog,
        QueryMode::AllPageView,
        range,
        sql,
    )?;
    let used = used_dimensions(&scope.group, &filter);
    let joins = plan_joins(&scope.group);

    let mut ctes = Vec::new();
    let mut from = "page_views pv".to_string();
    if uses(&used, Alias::VisitNumber) {
        ctes.push(VISIT_NUMBERS_CTE.to_string());
        from.push_str(" LEFT JOIN visit_numbers vn ON vn.session_id = pv.session_id");
    }
    if uses(&used, Alias::UrlProduct) {
        from.push_str(&product_join(Alias::UrlProduct, Alias::PageView));
    }
    push_enrichment(&mut from, &joins, range);

    let mut clauses = vec![range.covers_timestamp("pv.created_at")];
    clauses.extend(filter.clause);
    Ok(Source {
        ctes,
        from,
        filter: and_all(&clauses),
        rows: Alias::PageView,
        tracking: Alias::PageView,
        group: group_columns(&scope.group, &joins),
    })
}

/// Stage A narrows sessions by their entry page, stage B counts the page
/// views of the surviving sessions.
fn funnel_source(
    scope: &ReportScope,
    range: &RangeParams,
    sql: &mut SqlBuilder,
) -> EngineResult<Source> {
    let (entry_filters, page_filters) = split_entry_level(&scope.catalog, &scope.filters);
    let entry = compile(&entry_filters, &scope.catalog, QueryMode::Entry, range, sql)?;
    let page = compile(&page_filters, &scope.catalog, QueryMode::Funnel, range, sql)?;

    let mut stage_a = "SELECT fp.*, vn.visit_number FROM first_page_views fp \
LEFT JOIN visit_numbers vn ON vn.session_id = fp.session_id"
        .to_string();
    let entry_used: Vec<&ResolvedDimension> = entry.dimensions.iter().collect();
    if uses(&entry_used, Alias::EntryUrlProduct) {
        stage_a.push_str(&product_join(Alias::EntryUrlProduct, Alias::FirstPageView));
    }
    stage_a.push_str(" WHERE ");
    stage_a.push_str(&entry.clause_or_true());

    let ctes = vec![
        first_page_views_cte(range),
        VISIT_NUMBERS_CTE.to_string(),
        format!("matching_sessions AS ({stage_a})"),
    ];

    let used = used_dimensions(&scope.group, &page);
    let joins = plan_joins(&scope.group);
    let mut from =
        "page_views pv JOIN matching_sessions ms ON ms.session_id = pv.session_id".to_string();
    if uses(&used, Alias::UrlProduct) {
        from.push_str(&product_join(Alias::UrlProduct, Alias::PageView));
    }
    if uses(&used, Alias::EntryUrlProduct) {
        from.push_str(&product_join(Alias::EntryUrlProduct, Alias::MatchingSession));
    }
    push_enrichment(&mut from, &joins, range);

    let mut clauses = vec![range.covers_timestamp("pv.created_at")];
    clauses.extend(page.clause);
    Ok(Source {
        ctes,
        from,
        filter: and_all(&clauses),
        rows: Alias::PageView,
        tracking: Alias::MatchingSession,
        group: group_columns(&scope.group, &joins),
    })
}

/// Aggregate metric expressions with their column names, in read order.
fn metric_exprs(rows: Alias) -> Vec<(&'static str, String)> {
    let r = rows.as_str();
    let active = active_time(rows);
    vec![
        ("page_views", "COUNT(*)".to_string()),
        ("unique_visitors", format!("COUNT(DISTINCT {r}.visitor_id)")),
        ("sessions", format!("COUNT(DISTINCT {r}.session_id)")),
        (
            "bounced_count",
            format!("COUNT(*) FILTER (WHERE {active} < {BOUNCE_THRESHOLD_SECONDS:.1})"),
        ),
        ("active_time_count", format!("COUNT({active})")),
        (
            "total_active_time",
            format!("CAST(COALESCE(SUM({active}), 0) AS DOUBLE)"),
        ),
        (
            "scroll_past_hero",
            format!("COUNT(*) FILTER (WHERE {r}.scrolled_past_hero)"),
        ),
        ("form_views", format!("COUNT(*) FILTER (WHERE {r}.form_viewed)")),
        (
            "form_starters",
            format!("COUNT(DISTINCT {r}.visitor_id) FILTER (WHERE {r}.form_started)"),
        ),
    ]
}

fn metric_columns(rows: Alias) -> Vec<String> {
    metric_exprs(rows)
        .into_iter()
        .map(|(name, expr)| format!("{expr} AS {name}"))
        .collect()
}

/// SQL for a behavioral metric, matching how rows compute it. `None` for
/// conversion metrics.
fn metric_sql(metric: Metric, rows: Alias) -> Option<String> {
    let exprs = metric_exprs(rows);
    let expr = |name: &str| {
        exprs
            .iter()
            .find(|(column, _)| *column == name)
            .map(|(_, expr)| expr.clone())
            .unwrap_or_default()
    };
    let ratio = |numerator: &str| {
        format!(
            "COALESCE(CAST({} AS DOUBLE) / NULLIF({}, 0), 0)",
            expr(numerator),
            expr("active_time_count")
        )
    };
    Some(match metric {
        Metric::PageViews => expr("page_views"),
        Metric::UniqueVisitors => expr("unique_visitors"),
        Metric::Sessions => expr("sessions"),
        Metric::BouncedCount => expr("bounced_count"),
        Metric::ActiveTimeCount => expr("active_time_count"),
        Metric::TotalActiveTime => expr("total_active_time"),
        Metric::ScrollPastHero => expr("scroll_past_hero"),
        Metric::FormViews => expr("form_views"),
        Metric::FormStarters => expr("form_starters"),
        Metric::BounceRate => ratio("bounced_count"),
        Metric::AvgActiveTime => ratio("total_active_time"),
        Metric::Trials | Metric::PaidSubscriptions | Metric::Revenue => return None,
    })
}

/// Leading ORDER BY term: the requested behavioral metric, else page views.
fn primary_order(order: SortSpec, rows: Alias) -> String {
    let metric = match order.key {
        SortKey::Metric(metric) => metric_sql(metric, rows),
        SortKey::Attribute => None,
    };
    match metric {
        Some(expr) => {
            let direction = match order.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{expr} {direction}")
        }
        None => "page_views DESC".to_string(),
    }
}

/// Grouped metrics, ordered by `scope.order` then dimension values.
pub fn aggregate_query(scope: &ReportScope) -> EngineResult<ReportQuery> {
    let mut sql = SqlBuilder::new();
    let source = source(scope, &mut sql)?;
    let mut select = source.select_group();
    select.extend(metric_columns(source.rows));
    let mut order = vec![primary_order(scope.order, source.rows)];
    order.extend((0..source.group.len()).map(|i| format!("d{i} ASC NULLS LAST")));
    let limit = sql.bind(i64::from(scope.limit));

    let statement = format!(
        "{with}SELECT {select} FROM {from} WHERE {filter} GROUP BY {group} ORDER BY {order} LIMIT {limit}",
        with = source.with_clause(),
        select = select.join(", "),
        from = source.from,
        filter = source.filter,
        group = source.group_by().join(", "),
        order = order.join(", "),
    );
    Ok(ReportQuery {
        query: sql.finish(statement),
        layout: source.layout(),
    })
}

/// Unique visitors per bucket and normalized tracking key.
pub fn tracking_key_query(scope: &ReportScope) -> EngineResult<ReportQuery> {
    let mut sql = SqlBuilder::new();
    let source = source(scope, &mut sql)?;
    let t = source.tracking.as_str();
    let keys = [
        format!("LOWER(TRIM(COALESCE({t}.utm_source, '')))"),
        format!("TRIM(COALESCE({t}.campaign_id, ''))"),
        format!("TRIM(COALESCE({t}.adset_id, ''))"),
        format!("TRIM(COALESCE({t}.ad_id, ''))"),
    ];
    let mut select = source.select_group();
    select.extend(keys.iter().cloned());
    select.push(format!(
        "COUNT(DISTINCT {}.visitor_id) AS visitors",
        source.rows.as_str()
    ));
    let mut group = source.group_by();
    group.extend(keys);

    let statement = format!(
        "{with}SELECT {select} FROM {from} WHERE {filter} GROUP BY {group}",
        with = source.with_clause(),
        select = select.join(", "),
        from = source.from,
        filter = source.filter,
        group = group.join(", "),
    );
    Ok(ReportQuery {
        query: sql.finish(statement),
        layout: source.layout(),
    })
}

/// Distinct (bucket, visitor) pairs.
pub fn visitor_query(scope: &ReportScope) -> EngineResult<ReportQuery> {
    let mut sql = SqlBuilder::new();
    let source = source(scope, &mut sql)?;
    let visitor = format!("{}.visitor_id", source.rows.as_str());
    let mut select = source.select_group();
    select.push(format!("{visitor} AS visitor_id"));
    let mut group = source.group_by();
    group.push(visitor.clone());

    let statement = format!(
        "{with}SELECT {select} FROM {from} WHERE {filter} AND {visitor} IS NOT NULL GROUP BY {group}",
        with = source.with_clause(),
        select = select.join(", "),
        from = source.from,
        filter = source.filter,
        group = group.join(", "),
    );
    Ok(ReportQuery {
        query: sql.finish(statement),
        layout: source.layout(),
    })
}

/// Read the leading dimension columns; returns the values and the index of
/// the first column after them.
fn read_bucket(row: &Row<'_>, layout: &[bool]) -> duckdb::Result<(Vec<DimensionValue>, usize)> {
    let mut idx = 0;
    let mut values = Vec::with_capacity(layout.len());
    for enriched in layout {
        let value = raw_at(row, idx)?;
        idx += 1;
        let raw_id = if *enriched {
            let id = optional_text(&raw_at(row, idx)?);
            idx += 1;
            id
        } else {
            None
        };
        values.push(DimensionValue { value, raw_id });
    }
    Ok((values, idx))
}

pub(crate) fn run_aggregate(conn: &Connection, report: &ReportQuery) -> anyhow::Result<Vec<AggregateRow>> {
    let params = bind_query(&report.query);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&report.query.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let (dimensions, i) = read_bucket(row, &report.layout)?;
        Ok(AggregateRow {
            dimensions,
            metrics: BehavioralMetrics {
                page_views: metric_i64(&raw_at(row, i)?),
                unique_visitors: metric_i64(&raw_at(row, i + 1)?),
                sessions: metric_i64(&raw_at(row, i + 2)?),
                bounced_count: metric_i64(&raw_at(row, i + 3)?),
                active_time_count: metric_i64(&raw_at(row, i + 4)?),
                total_active_time: metric_f64(&raw_at(row, i + 5)?),
                scroll_past_hero: metric_i64(&raw_at(row, i + 6)?),
                form_views: metric_i64(&raw_at(row, i + 7)?),
                form_starters: metric_i64(&raw_at(row, i + 8)?),
            },
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn run_tracking_keys(
    conn: &Connection,
    report: &ReportQuery,
) -> anyhow::Result<Vec<TrackingKeyRow>> {
    let params = bind_query(&report.query);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&report.query.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let (bucket, i) = read_bucket(row, &report.layout)?;
        let source = optional_text(&raw_at(row, i)?);
        let campaign = optional_text(&raw_at(row, i + 1)?);
        let adset = optional_text(&raw_at(row, i + 2)?);
        let ad = optional_text(&raw_at(row, i + 3)?);
        Ok(TrackingKeyRow {
            bucket,
            key: AttributionKey::new(
                source.as_deref(),
                campaign.as_deref(),
                adset.as_deref(),
                ad.as_deref(),
            ),
            visitors: metric_i64(&raw_at(row, i + 4)?),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn run_visitors(conn: &Connection, report: &ReportQuery) -> anyhow::Result<Vec<VisitorRow>> {
    let params = bind_query(&report.query);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&report.query.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let (bucket, i) = read_bucket(row, &report.layout)?;
        Ok((bucket, optional_text(&raw_at(row, i)?)))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (bucket, visitor) = row?;
        if let Some(visitor_id) = visitor {
            out.push(VisitorRow { bucket, visitor_id });
        }
    }
    Ok(out)
}
