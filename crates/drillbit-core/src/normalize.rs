//! Row normalization shared by the report and detail paths.

use chrono::{NaiveDate, NaiveDateTime, SecondsFormat};
use serde::Serialize;

/// Display label for a missing dimension value.
pub const UNKNOWN: &str = "Unknown";

/// Driver-independent cell value, as read back from a store.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    /// UTC wall-clock timestamp.
    Timestamp(NaiveDateTime),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

/// One grouped dimension value: what to display plus the raw tracking id
/// for enriched dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionValue {
    pub value: RawValue,
    pub raw_id: Option<String>,
}

impl DimensionValue {
    pub fn plain(value: RawValue) -> Self {
        Self {
            value,
            raw_id: None,
        }
    }

    pub fn label(&self) -> String {
        dimension_label(&self.value)
    }

    /// Identity of the bucket this value groups into.
    pub fn bucket_id(&self) -> String {
        match &self.raw_id {
            Some(id) => id.clone(),
            None => self.label(),
        }
    }
}

/// Bucket identity for a multi-dimension grouping.
pub fn bucket_id(values: &[DimensionValue]) -> String {
    values
        .iter()
        .map(DimensionValue::bucket_id)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a dimension value; missing and blank values become `Unknown`.
pub fn dimension_label(value: &RawValue) -> String {
    match value {
        RawValue::Null => UNKNOWN.to_string(),
        RawValue::Text(s) if s.trim().is_empty() => UNKNOWN.to_string(),
        RawValue::Text(s) => s.clone(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Int(i) => i.to_string(),
        RawValue::Float(f) => f.to_string(),
        RawValue::Date(d) => format_date(*d),
        RawValue::Timestamp(ts) => format_timestamp(*ts),
    }
}

pub fn optional_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Null => None,
        other => Some(dimension_label(other)),
    }
}

pub fn metric_i64(value: &RawValue) -> i64 {
    match value {
        RawValue::Int(i) => *i,
        RawValue::Float(f) if f.is_finite() => f.round() as i64,
        RawValue::Bool(b) => i64::from(*b),
        RawValue::Text(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

pub fn metric_f64(value: &RawValue) -> f64 {
    match value {
        RawValue::Int(i) => *i as f64,
        RawValue::Float(f) if f.is_finite() => *f,
        RawValue::Bool(b) => f64::from(u8::from(*b)),
        RawValue::Text(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn optional_f64(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Null => None,
        other => Some(metric_f64(other)),
    }
}

pub fn flag(value: &RawValue) -> bool {
    match value {
        RawValue::Bool(b) => *b,
        RawValue::Int(i) => *i != 0,
        _ => false,
    }
}

/// `numerator / denominator`, or 0 when the denominator is 0.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// A page view as read from the behavioral store, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetailRow {
    pub id: RawValue,
    pub session_id: RawValue,
    pub visitor_id: RawValue,
    pub created_at: RawValue,
    pub url_path: RawValue,
    pub hostname: RawValue,
    pub referrer: RawValue,
    pub country_code: RawValue,
    pub device_type: RawValue,
    pub os_name: RawValue,
    pub browser_name: RawValue,
    pub utm_source: RawValue,
    pub utm_medium: RawValue,
    pub utm_campaign: RawValue,
    pub campaign_id: RawValue,
    pub active_time: RawValue,
    pub scrolled_past_hero: RawValue,
    pub form_viewed: RawValue,
    pub form_started: RawValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub id: String,
    pub session_id: String,
    pub visitor_id: String,
    pub created_at: Option<String>,
    pub url_path: String,
    pub hostname: String,
    pub referrer: String,
    pub country_code: String,
    pub device_type: String,
    pub os_name: String,
    pub browser_name: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub campaign_id: String,
    pub active_time: Option<f64>,
    pub scrolled_past_hero: bool,
    pub form_viewed: bool,
    pub form_started: bool,
}

pub fn normalize_detail(row: RawDetailRow) -> DetailRecord {
    DetailRecord {
        id: dimension_label(&row.id),
        session_id: dimension_label(&row.session_id),
        visitor_id: dimension_label(&row.visitor_id),
        created_at: optional_text(&row.created_at),
        url_path: dimension_label(&row.url_path),
        hostname: dimension_label(&row.hostname),
        referrer: dimension_label(&row.referrer),
        country_code: dimension_label(&row.country_code),
        device_type: dimension_label(&row.device_type),
        os_name: dimension_label(&row.os_name),
        browser_name: dimension_label(&row.browser_name),
        utm_source: dimension_label(&row.utm_source),
        utm_medium: dimension_label(&row.utm_medium),
        utm_campaign: dimension_label(&row.utm_campaign),
        campaign_id: dimension_label(&row.campaign_id),
        active_time: optional_f64(&row.active_time),
        scrolled_past_hero: flag(&row.scrolled_past_hero),
        form_viewed: flag(&row.form_viewed),
        form_started: flag(&row.form_started),
    }
}
