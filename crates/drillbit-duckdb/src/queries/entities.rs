//! Display name to tracking id lookups against `ad_entities`.

use duckdb::Connection;

use drillbit_core::catalog::EnrichedLevel;
use drillbit_core::enrichment::name_match_subquery;
use drillbit_core::normalize::optional_text;
use drillbit_core::report::DateRange;
use drillbit_core::sql::{Query, SqlBuilder};

use crate::values::{bind_query, raw_at};

/// Ids at `level` whose name equals `name`, case-insensitively, in `range`.
pub fn entity_ids_query(level: EnrichedLevel, name: &str, range: DateRange) -> Query {
    let mut sql = SqlBuilder::new();
    let range = sql.bind_range(range.start, range.end);
    let needle = format!("LOWER({})", sql.bind_text(name.trim()));
    let id = level.id_column();
    let statement = format!(
        "SELECT DISTINCT ids.{id} FROM ({}) ids ORDER BY 1",
        name_match_subquery(level, false, &needle, &range)
    );
    sql.finish(statement)
}

pub(crate) fn run_entity_ids(conn: &Connection, query: &Query) -> anyhow::Result<Vec<String>> {
    let params = bind_query(query);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query.sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| raw_at(row, 0))?;
    let mut ids = Vec::new();
    for row in rows {
        if let Some(id) = optional_text(&row?) {
            ids.push(id);
        }
    }
    Ok(ids)
}
