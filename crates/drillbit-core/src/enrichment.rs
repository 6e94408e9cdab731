//! Display-name resolution for tracking-id dimensions.
//!
//! Rows group by the raw id and display `COALESCE(name, id)`. Names come
//! from `ad_entities`, collapsed to one row per id (latest report date in
//! range wins) so the join never fans out.

use crate::catalog::{Alias, EnrichedLevel, ResolvedDimension};
use crate::sql::RangeParams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJoin {
    /// Alias of the rows being enriched (`pv`, `fp` or `ms`).
    pub row_alias: Alias,
    pub join_alias: &'static str,
    /// Most specific level present; the join key.
    pub key: EnrichedLevel,
    /// Name columns to select, least specific first.
    pub names: Vec<EnrichedLevel>,
}

/// Plan one join per row alias that has enriched dimensions among `dims`.
pub fn plan_joins(dims: &[ResolvedDimension]) -> Vec<EnrichmentJoin> {
    let mut joins: Vec<EnrichmentJoin> = Vec::new();
    for dim in dims {
        let Some(level) = dim.enriched_level() else {
            continue;
        };
        let row_alias = dim.alias();
        match joins.iter_mut().find(|join| join.row_alias == row_alias) {
            Some(join) => {
                join.key = join.key.max(level);
                if !join.names.contains(&level) {
                    join.names.push(level);
                    join.names.sort();
                }
            }
            None => joins.push(EnrichmentJoin {
                row_alias,
                join_alias: join_alias_for(row_alias),
                key: level,
                names: vec![level],
            }),
        }
    }
    joins
}

fn join_alias_for(row_alias: Alias) -> &'static str {
    match row_alias {
        Alias::PageView => "en",
        _ => "een",
    }
}

impl EnrichmentJoin {
    pub fn render(&self, range: &RangeParams) -> String {
        let key = self.key.id_column();
        let names: Vec<String> = self
            .names
            .iter()
            .map(|level| {
                let name = level.name_column();
                format!("arg_max({name}, report_date) AS {name}")
            })
            .collect();
        format!(
            "LEFT JOIN (SELECT {key}, {names} FROM ad_entities WHERE {range} AND {key} IS NOT NULL GROUP BY {key}) {alias} ON {alias}.{key} = {row}.{key}",
            names = names.join(", "),
            range = range.covers_date("report_date"),
            alias = self.join_alias,
            row = self.row_alias.as_str(),
        )
    }
}

/// Display expression for `dim`, or `None` when it is not enriched.
pub fn display_expr(joins: &[EnrichmentJoin], dim: &ResolvedDimension) -> Option<String> {
    let level = dim.enriched_level()?;
    let join = joins.iter().find(|join| join.row_alias == dim.alias())?;
    Some(format!(
        "COALESCE({}.{}, {})",
        join.join_alias,
        level.name_column(),
        dim.value_sql()
    ))
}

/// Ids at `level` whose display name matches `needle` (an already-lowered
/// bound placeholder) within the date range.
pub fn name_match_subquery(
    level: EnrichedLevel,
    contains: bool,
    needle: &str,
    range: &RangeParams,
) -> String {
    let id = level.id_column();
    let name = level.name_column();
    let matched = if contains {
        format!("position({needle} in LOWER(ae.{name})) > 0")
    } else {
        format!("LOWER(ae.{name}) = {needle}")
    };
    format!(
        "SELECT ae.{id} FROM ad_entities ae WHERE {} AND ae.{id} IS NOT NULL AND {matched}",
        range.covers_date("ae.report_date")
    )
}
