//! Filter compiler: `(field, operator, value)` triples to a parameterized
//! boolean expression.
//!
//! Filters on the same field are OR-ed, groups of different fields are
//! AND-ed. Comparisons are case-insensitive and `contains` goes through
//! `position()`, so `%` and `_` in user input are matched literally.

use std::collections::BTreeMap;

use crate::catalog::{DimensionCatalog, DimensionScope, ResolvedDimension};
use crate::enrichment::name_match_subquery;
use crate::error::{EngineError, EngineResult};
use crate::normalize::UNKNOWN;
use crate::report::{Filter, FilterOperator, QueryMode};
use crate::sql::{RangeParams, SqlBuilder};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub clause: Option<String>,
    /// Dimensions referenced by the clause, so builders can add the joins
    /// they need (URL classification, visit numbers).
    pub dimensions: Vec<ResolvedDimension>,
}

impl CompiledFilter {
    pub fn clause_or_true(&self) -> String {
        self.clause.clone().unwrap_or_else(|| "TRUE".to_string())
    }
}

/// The `Unknown` sentinel stands for a missing value.
pub fn is_unknown(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(UNKNOWN)
}

/// Split filters into those evaluated on the session entry (entry-scoped
/// dimensions and the visit number) and everything else.
pub fn split_entry_level(
    catalog: &DimensionCatalog,
    filters: &[Filter],
) -> (Vec<Filter>, Vec<Filter>) {
    filters.iter().cloned().partition(|filter| {
        matches!(
            catalog.definition(&filter.field).map(|def| def.scope),
            Some(DimensionScope::Entry | DimensionScope::Session)
        )
    })
}

/// Compile `filters` for `mode`. Fields the catalog does not know are
/// dropped.
pub fn compile(
    filters: &[Filter],
    catalog: &DimensionCatalog,
    mode: QueryMode,
    range: &RangeParams,
    sql: &mut SqlBuilder,
) -> EngineResult<CompiledFilter> {
    let mut by_field: BTreeMap<&str, Vec<&Filter>> = BTreeMap::new();
    for filter in filters {
        by_field.entry(filter.field.as_str()).or_default().push(filter);
    }

    let mut groups = Vec::new();
    let mut dimensions = Vec::new();
    for (field, group) in by_field {
        if !catalog.contains(field) {
            tracing::warn!(field, "dropping filter on unknown field");
            continue;
        }
        let dim = catalog.resolve(field, mode).map_err(|_| {
            EngineError::invalid(
                "filters",
                format!("field '{field}' is not available in {} mode", mode.as_str()),
            )
        })?;
        let mut predicates: Vec<String> = group
            .iter()
            .map(|filter| predicate(&dim, filter, range, sql))
            .collect();
        groups.push(if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            format!("({})", predicates.join(" OR "))
        });
        dimensions.push(dim);
    }

    Ok(CompiledFilter {
        clause: (!groups.is_empty()).then(|| groups.join(" AND ")),
        dimensions,
    })
}

fn predicate(
    dim: &ResolvedDimension,
    filter: &Filter,
    range: &RangeParams,
    sql: &mut SqlBuilder,
) -> String {
    let expr = dim.value_sql();
    if is_unknown(&filter.value) {
        return if filter.operator.is_negated() {
            format!("{expr} IS NOT NULL")
        } else {
            format!("{expr} IS NULL")
        };
    }

    let needle = format!("LOWER({})", sql.bind_text(filter.value.trim()));
    let haystack = format!("LOWER(CAST({expr} AS VARCHAR))");
    let contains = matches!(
        filter.operator,
        FilterOperator::Contains | FilterOperator::NotContains
    );
    let matched = if contains {
        format!("position({needle} in {haystack}) > 0")
    } else {
        format!("{haystack} = {needle}")
    };
    let matched = match dim.enriched_level() {
        Some(level) => format!(
            "({matched} OR {expr} IN ({}))",
            name_match_subquery(level, contains, &needle, range)
        ),
        None => matched,
    };

    if filter.operator.is_negated() {
        format!("({expr} IS NULL OR NOT ({matched}))")
    } else {
        matched
    }
}
