//! Cross-store attribution: folding conversion-store totals into behavioral
//! buckets.
//!
//! Direct mode indexes conversion totals by the equivalent conversion-store
//! column. Tracking mode correlates through `(source, campaign, adset, ad)`
//! tuples, split by each bucket's share of unique visitors, and through
//! visitor ids, split evenly across the buckets a visitor appears in. A
//! bucket takes its visitor result when that is non-zero, otherwise its
//! tracking result. Conversions that match no bucket are dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::catalog::{
    ConversionColumn, DimensionCatalog, DimensionKind, EnrichedLevel, ResolvedDimension,
};
use crate::filter::is_unknown;
use crate::normalize::{bucket_id, dimension_label, DimensionValue};
use crate::report::{Filter, FilterOperator};
use crate::store::{ConversionBucket, ConversionTotals, TrackingKeyRow, VisitorRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributionStrategy {
    Direct,
    Tracking,
}

/// Source vocabulary spelled differently in the two stores.
const SOURCE_ALIASES: &[(&str, &str)] = &[
    ("adwords", "google"),
    ("fb", "facebook"),
    ("ig", "instagram"),
];

pub fn canonical_source(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    SOURCE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// Every spelling that canonicalizes to the same source as `value`.
pub fn source_variants(value: &str) -> Vec<String> {
    let canonical = canonical_source(value);
    let mut variants = vec![canonical.clone()];
    variants.extend(
        SOURCE_ALIASES
            .iter()
            .filter(|(_, target)| *target == canonical)
            .map(|(alias, _)| alias.to_string()),
    );
    variants
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributionKey {
    pub source: String,
    pub campaign_id: String,
    pub adset_id: String,
    pub ad_id: String,
}

impl AttributionKey {
    pub fn new(
        source: Option<&str>,
        campaign_id: Option<&str>,
        adset_id: Option<&str>,
        ad_id: Option<&str>,
    ) -> Self {
        let id = |raw: Option<&str>| raw.map(str::trim).unwrap_or_default().to_string();
        Self {
            source: source.map(|s| s.trim().to_lowercase()).unwrap_or_default(),
            campaign_id: id(campaign_id),
            adset_id: id(adset_id),
            ad_id: id(ad_id),
        }
    }

    /// The empty tuple: traffic with no tracking information at all.
    pub fn is_untracked(&self) -> bool {
        self.source.is_empty()
            && self.campaign_id.is_empty()
            && self.adset_id.is_empty()
            && self.ad_id.is_empty()
    }
}

/// Conversion metrics after allocation; fractional once split.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConversionMetrics {
    pub trials: f64,
    pub paid_subscriptions: f64,
    pub revenue: f64,
}

impl From<ConversionTotals> for ConversionMetrics {
    fn from(totals: ConversionTotals) -> Self {
        Self {
            trials: totals.trials as f64,
            paid_subscriptions: totals.paid_subscriptions as f64,
            revenue: totals.revenue,
        }
    }
}

impl ConversionMetrics {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            trials: self.trials * factor,
            paid_subscriptions: self.paid_subscriptions * factor,
            revenue: self.revenue * factor,
        }
    }

    pub fn add(&mut self, other: Self) {
        self.trials += other.trials;
        self.paid_subscriptions += other.paid_subscriptions;
        self.revenue += other.revenue;
    }

    pub fn is_zero(&self) -> bool {
        self.trials == 0.0 && self.paid_subscriptions == 0.0 && self.revenue == 0.0
    }
}

/// A conversion-side filter before enriched names are resolved to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConversionFilter {
    pub column: ConversionColumn,
    pub level: Option<EnrichedLevel>,
    pub negated: bool,
    pub value: String,
}

impl PendingConversionFilter {
    pub fn is_unknown(&self) -> bool {
        is_unknown(&self.value)
    }

    /// Lower-cased values to match, including source aliases and any ids
    /// resolved from a display name.
    pub fn match_values(&self, resolved_ids: &[String]) -> Vec<String> {
        if self.is_unknown() {
            return Vec::new();
        }
        let mut values = if self.column.is_source() {
            source_variants(&self.value)
        } else {
            vec![self.value.trim().to_lowercase()]
        };
        for id in resolved_ids {
            let id = id.to_lowercase();
            if !values.contains(&id) {
                values.push(id);
            }
        }
        values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributionPlan {
    Direct {
        column: ConversionColumn,
        filters: Vec<PendingConversionFilter>,
    },
    Tracking {
        filters: Vec<PendingConversionFilter>,
    },
}

impl AttributionPlan {
    pub fn strategy(&self) -> AttributionStrategy {
        match self {
            AttributionPlan::Direct { .. } => AttributionStrategy::Direct,
            AttributionPlan::Tracking { .. } => AttributionStrategy::Tracking,
        }
    }

    pub fn filters(&self) -> &[PendingConversionFilter] {
        match self {
            AttributionPlan::Direct { filters, .. } | AttributionPlan::Tracking { filters } => {
                filters
            }
        }
    }
}

/// Choose direct or tracking mode. `filters` holds parent filters and user
/// filters; fields unknown to the catalog are ignored as they are on the
/// behavioral side.
pub fn plan_attribution(
    catalog: &DimensionCatalog,
    group: &ResolvedDimension,
    filters: &[Filter],
) -> AttributionPlan {
    let mut mappable = Vec::new();
    let mut all_mappable = true;
    for filter in filters {
        let Some(def) = catalog.definition(&filter.field) else {
            continue;
        };
        let comparable = matches!(
            filter.operator,
            FilterOperator::Equals | FilterOperator::NotEquals
        );
        match (def.conversion, comparable) {
            (Some(column), true) => mappable.push(PendingConversionFilter {
                column,
                level: match def.kind {
                    DimensionKind::Enriched(level) => Some(level),
                    _ => None,
                },
                negated: filter.operator.is_negated(),
                value: filter.value.clone(),
            }),
            _ => all_mappable = false,
        }
    }

    match group.conversion {
        Some(column) if all_mappable => AttributionPlan::Direct {
            column,
            filters: mappable,
        },
        _ => AttributionPlan::Tracking { filters: mappable },
    }
}

/// Key a value is indexed under in direct mode.
pub fn direct_match_key(value: &str, column: ConversionColumn) -> String {
    if column.is_source() {
        canonical_source(value)
    } else {
        value.trim().to_lowercase()
    }
}

/// Direct-mode allocation. `buckets` are the behavioral row values in row
/// order; buckets that collapse onto the same key share its totals evenly.
pub fn allocate_direct(
    buckets: &[DimensionValue],
    conversions: &[ConversionBucket],
    column: ConversionColumn,
) -> Vec<ConversionMetrics> {
    let mut index: BTreeMap<String, ConversionMetrics> = BTreeMap::new();
    for bucket in conversions {
        let key = direct_match_key(&dimension_label(&bucket.value), column);
        index
            .entry(key)
            .or_default()
            .add(ConversionMetrics::from(bucket.totals));
    }

    let keys: Vec<String> = buckets
        .iter()
        .map(|value| direct_match_key(&value.bucket_id(), column))
        .collect();
    let mut sharing: BTreeMap<&str, usize> = BTreeMap::new();
    for key in &keys {
        *sharing.entry(key.as_str()).or_default() += 1;
    }

    keys.iter()
        .map(|key| match index.get(key) {
            Some(metrics) => {
                let share = sharing.get(key.as_str()).copied().unwrap_or(1).max(1);
                metrics.scaled(1.0 / share as f64)
            }
            None => ConversionMetrics::default(),
        })
        .collect()
}

/// Distinct tracked keys among `rows`, in key order.
pub fn tracked_keys(rows: &[TrackingKeyRow]) -> Vec<AttributionKey> {
    rows.iter()
        .filter(|row| !row.key.is_untracked())
        .map(|row| row.key.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct visitor ids among `rows`, in id order.
pub fn visitor_ids(rows: &[VisitorRow]) -> Vec<String> {
    rows.iter()
        .map(|row| row.visitor_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Tracking allocation: each key's totals split over the buckets that carry
/// the key, proportional to their unique visitors with that key.
pub fn allocate_tracking(
    rows: &[TrackingKeyRow],
    totals: &BTreeMap<AttributionKey, ConversionMetrics>,
) -> BTreeMap<String, ConversionMetrics> {
    let mut visitors_per_key: BTreeMap<&AttributionKey, i64> = BTreeMap::new();
    for row in rows.iter().filter(|row| !row.key.is_untracked() && row.visitors > 0) {
        *visitors_per_key.entry(&row.key).or_default() += row.visitors;
    }

    let mut out: BTreeMap<String, ConversionMetrics> = BTreeMap::new();
    for row in rows.iter().filter(|row| !row.key.is_untracked() && row.visitors > 0) {
        let (Some(metrics), Some(total)) = (totals.get(&row.key), visitors_per_key.get(&row.key))
        else {
            continue;
        };
        let share = row.visitors as f64 / *total as f64;
        out.entry(bucket_id(&row.bucket))
            .or_default()
            .add(metrics.scaled(share));
    }
    out
}

/// Visitor allocation: each visitor's totals split evenly over the distinct
/// buckets the visitor was seen in.
pub fn allocate_visitors(
    rows: &[VisitorRow],
    totals: &BTreeMap<String, ConversionMetrics>,
) -> BTreeMap<String, ConversionMetrics> {
    let mut buckets_per_visitor: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for row in rows {
        buckets_per_visitor
            .entry(row.visitor_id.as_str())
            .or_default()
            .insert(bucket_id(&row.bucket));
    }

    let mut out: BTreeMap<String, ConversionMetrics> = BTreeMap::new();
    for (visitor, buckets) in buckets_per_visitor {
        let Some(metrics) = totals.get(visitor) else {
            continue;
        };
        let share = 1.0 / buckets.len() as f64;
        for bucket in buckets {
            out.entry(bucket).or_default().add(metrics.scaled(share));
        }
    }
    out
}

/// Visitor result when non-zero, otherwise tracking result, otherwise zero.
pub fn merge(
    visitor: Option<&ConversionMetrics>,
    tracking: Option<&ConversionMetrics>,
) -> ConversionMetrics {
    match (visitor, tracking) {
        (Some(v), _) if !v.is_zero() => *v,
        (_, Some(t)) => *t,
        _ => ConversionMetrics::default(),
    }
}
