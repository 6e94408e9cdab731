//! Conversion-store totals: trials, paid subscriptions and paid revenue.

use std::collections::{BTreeMap, BTreeSet};

use duckdb::Connection;

use drillbit_core::attribution::AttributionKey;
use drillbit_core::catalog::ConversionColumn;
use drillbit_core::normalize::{metric_f64, metric_i64, optional_text, RawValue};
use drillbit_core::sql::{and_all, Query, SqlBuilder};
use drillbit_core::store::{ConversionBucket, ConversionFilter, ConversionScope, ConversionTotals};

use crate::values::{bind_query, raw_at};

/// Visitor ids bound per statement.
pub const VISITOR_CHUNK: usize = 500;

const PAID_INVOICES_CTE: &str = "WITH inv AS (\
SELECT subscription_id, CAST(SUM(amount) AS DOUBLE) AS paid_amount \
FROM invoices WHERE status = 'paid' GROUP BY subscription_id) ";

const TOTALS: &str = "COUNT(*) FILTER (WHERE s.is_trial) AS trials, \
COUNT(*) FILTER (WHERE s.converted_at IS NOT NULL OR NOT s.is_trial) AS paid_subscriptions, \
CAST(COALESCE(SUM(inv.paid_amount), 0) AS DOUBLE) AS revenue";

const FROM: &str = "FROM subscriptions s LEFT JOIN inv ON inv.subscription_id = s.id";

const TRACKING_KEY: [&str; 4] = [
    "LOWER(TRIM(COALESCE(s.source, '')))",
    "TRIM(COALESCE(s.campaign_id, ''))",
    "TRIM(COALESCE(s.adset_id, ''))",
    "TRIM(COALESCE(s.ad_id, ''))",
];

fn normalized(column: ConversionColumn) -> String {
    format!("LOWER(CAST({} AS VARCHAR))", column.value_sql())
}

fn filter_predicate(filter: &ConversionFilter, sql: &mut SqlBuilder) -> String {
    let column = filter.column.value_sql();
    if filter.unknown {
        return if filter.negated {
            format!("{column} IS NOT NULL")
        } else {
            format!("{column} IS NULL")
        };
    }
    if filter.values.is_empty() {
        return if filter.negated { "TRUE" } else { "FALSE" }.to_string();
    }
    let list = sql.bind_text_list(filter.values.iter().cloned());
    if filter.negated {
        format!("({column} IS NULL OR {} NOT IN {list})", normalized(filter.column))
    } else {
        format!("{} IN {list}", normalized(filter.column))
    }
}

/// Range plus filters: OR within a column, AND across columns.
fn where_clause(scope: &ConversionScope, sql: &mut SqlBuilder) -> Vec<String> {
    let range = sql.bind_range(scope.date_range.start, scope.date_range.end);
    let mut by_column: BTreeMap<ConversionColumn, Vec<&ConversionFilter>> = BTreeMap::new();
    for filter in &scope.filters {
        by_column.entry(filter.column).or_default().push(filter);
    }

    let mut clauses = vec![range.covers_timestamp("s.created_at")];
    for group in by_column.values() {
        let mut predicates: Vec<String> = group
            .iter()
            .map(|filter| filter_predicate(filter, sql))
            .collect();
        clauses.push(if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            format!("({})", predicates.join(" OR "))
        });
    }
    clauses
}

pub fn dimension_query(scope: &ConversionScope, column: ConversionColumn) -> Query {
    let mut sql = SqlBuilder::new();
    let clauses = where_clause(scope, &mut sql);
    let value = column.value_sql();
    let statement = format!(
        "{PAID_INVOICES_CTE}SELECT {value} AS value, {TOTALS} {FROM} WHERE {} GROUP BY {value}",
        and_all(&clauses)
    );
    sql.finish(statement)
}

pub fn tracking_query(scope: &ConversionScope) -> Query {
    let mut sql = SqlBuilder::new();
    let clauses = where_clause(scope, &mut sql);
    let keys = TRACKING_KEY.join(", ");
    let statement = format!(
        "{PAID_INVOICES_CTE}SELECT {keys}, {TOTALS} {FROM} WHERE {} GROUP BY {keys}",
        and_all(&clauses)
    );
    sql.finish(statement)
}

pub fn visitor_query(scope: &ConversionScope, visitors: &[String]) -> Query {
    let mut sql = SqlBuilder::new();
    let mut clauses = where_clause(scope, &mut sql);
    let list = sql.bind_text_list(visitors.iter().cloned());
    clauses.push(format!("s.visitor_id IN {list}"));
    let statement = format!(
        "{PAID_INVOICES_CTE}SELECT s.visitor_id, {TOTALS} {FROM} WHERE {} GROUP BY s.visitor_id",
        and_all(&clauses)
    );
    sql.finish(statement)
}

fn totals_at(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<ConversionTotals> {
    Ok(ConversionTotals {
        trials: metric_i64(&raw_at(row, idx)?),
        paid_subscriptions: metric_i64(&raw_at(row, idx + 1)?),
        revenue: metric_f64(&raw_at(row, idx + 2)?),
    })
}

pub(crate) fn run_dimension(conn: &Connection, query: &Query) -> anyhow::Result<Vec<ConversionBucket>> {
    let params = bind_query(query);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(ConversionBucket {
            value: raw_at(row, 0)?,
            totals: totals_at(row, 1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Totals per normalized key, restricted to `wanted`. Raw values that
/// normalize to the same key are summed.
pub(crate) fn run_tracking(
    conn: &Connection,
    query: &Query,
    wanted: &BTreeSet<AttributionKey>,
) -> anyhow::Result<Vec<(AttributionKey, ConversionTotals)>> {
    let params = bind_query(query);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let parts = [
            raw_at(row, 0)?,
            raw_at(row, 1)?,
            raw_at(row, 2)?,
            raw_at(row, 3)?,
        ]
        .map(|value| optional_text(&value));
        let key = AttributionKey::new(
            parts[0].as_deref(),
            parts[1].as_deref(),
            parts[2].as_deref(),
            parts[3].as_deref(),
        );
        Ok((key, totals_at(row, 4)?))
    })?;

    let mut out: BTreeMap<AttributionKey, ConversionTotals> = BTreeMap::new();
    for row in rows {
        let (key, totals) = row?;
        if !wanted.contains(&key) {
            continue;
        }
        let entry = out.entry(key).or_default();
        entry.trials += totals.trials;
        entry.paid_subscriptions += totals.paid_subscriptions;
        entry.revenue += totals.revenue;
    }
    Ok(out.into_iter().collect())
}

pub(crate) fn run_visitors(
    conn: &Connection,
    queries: &[Query],
) -> anyhow::Result<Vec<(String, ConversionTotals)>> {
    let mut out = Vec::new();
    for query in queries {
        let params = bind_query(query);
        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query.sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((raw_at(row, 0)?, totals_at(row, 1)?))
        })?;
        for row in rows {
            let (visitor, totals) = row?;
            if let RawValue::Text(visitor) = visitor {
                out.push((visitor, totals));
            }
        }
    }
    Ok(out)
}
