#![allow(dead_code)]

use std::sync::Arc;

use drillbit_core::catalog::DimensionCatalog;
use drillbit_core::report::{ReportRequest, ReportResponse, ReportRow};
use drillbit_core::ReportEngine;
use drillbit_duckdb::{DuckDbBehavioralStore, DuckDbConversionStore};

/// Three days of traffic (2026-02-04..=2026-02-06) plus one session on each
/// side of the range.
///
/// | session | visitor | day   | device  | country | source   | campaign | pages                    |
/// |---------|---------|-------|---------|---------|----------|----------|--------------------------|
/// | s1      | v1      | 02-04 | phone   | DK      | google   | c1       | /home, /pricing          |
/// | s2      | v2      | 02-04 | desktop | DK      | facebook | c2       | /home, /signup           |
/// | s3      | v3      | 02-05 | phone   | SE      | google   | c1       | /pricing                 |
/// | s4      | v4      | 02-05 | desktop | -       | bing     | c9       | /home, /pricing          |
/// | s5      | v5      | 02-06 | tablet  | DK      | google   | -        | /home                    |
/// | s6      | v1      | 02-06 | phone   | DK      | google   | c1       | /signup                  |
const BEHAVIORAL_SEED: &str = r#"
INSERT INTO sessions (session_id, visitor_id, started_at, last_seen, page_view_count) VALUES
    ('s0', 'v6', '2026-02-03 12:00:00', '2026-02-03 12:00:00', 1),
    ('s1', 'v1', '2026-02-04 10:00:00', '2026-02-04 10:01:00', 2),
    ('s2', 'v2', '2026-02-04 11:00:00', '2026-02-04 11:02:00', 2),
    ('s3', 'v3', '2026-02-05 09:00:00', '2026-02-05 09:00:00', 1),
    ('s4', 'v4', '2026-02-05 14:00:00', '2026-02-05 14:05:00', 2),
    ('s5', 'v5', '2026-02-06 08:00:00', '2026-02-06 08:00:00', 1),
    ('s6', 'v1', '2026-02-06 20:00:00', '2026-02-06 20:00:00', 1),
    ('s7', 'v7', '2026-02-07 09:00:00', '2026-02-07 09:00:00', 1);

INSERT INTO page_views (id, session_id, visitor_id, created_at, hostname, url_path, referrer,
    country_code, device_type, os_name, browser_name, utm_source, campaign_id, adset_id, ad_id,
    time_on_page, heartbeat_active_time, scrolled_past_hero, form_viewed, form_started) VALUES
    ('pv0', 's0', 'v6', '2026-02-03 12:00:00', 'example.com', '/home', NULL, 'DK', 'desktop', 'Windows', 'Edge', NULL, NULL, NULL, NULL, 12, NULL, false, false, false),
    ('pv1', 's1', 'v1', '2026-02-04 10:00:00', 'example.com', '/home', 'https://google.com', 'DK', 'phone', 'iOS', 'Safari', 'google', 'c1', 'a1', 'ad1', 3, NULL, false, false, false),
    ('pv2', 's1', 'v1', '2026-02-04 10:01:00', 'example.com', '/pricing', NULL, 'DK', 'phone', 'iOS', 'Safari', 'google', 'c1', 'a1', 'ad1', 40, NULL, true, true, false),
    ('pv3', 's2', 'v2', '2026-02-04 11:00:00', 'example.com', '/home', 'https://facebook.com', 'DK', 'desktop', 'macOS', 'Chrome', 'facebook', 'c2', 'a2', 'ad2', 30, NULL, true, false, false),
    ('pv4', 's2', 'v2', '2026-02-04 11:02:00', 'example.com', '/signup', NULL, 'DK', 'desktop', 'macOS', 'Chrome', 'facebook', 'c2', 'a2', 'ad2', NULL, 60, false, true, true),
    ('pv5', 's3', 'v3', '2026-02-05 09:00:00', 'example.com', '/pricing', 'https://google.com', 'SE', 'phone', 'Android', 'Chrome', 'google', 'c1', NULL, NULL, NULL, NULL, false, false, false),
    ('pv6', 's4', 'v4', '2026-02-05 14:00:00', 'example.com', '/home', 'https://bing.com', NULL, 'desktop', 'Windows', 'Edge', 'bing', 'c9', NULL, NULL, 10, NULL, false, false, false),
    ('pv7', 's4', 'v4', '2026-02-05 14:05:00', 'example.com', '/pricing', NULL, NULL, 'desktop', 'Windows', 'Edge', 'bing', 'c9', NULL, NULL, 2, NULL, false, false, false),
    ('pv8', 's5', 'v5', '2026-02-06 08:00:00', 'example.com', '/home', NULL, 'DK', 'tablet', 'iPadOS', 'Safari', 'google', NULL, NULL, NULL, 8, NULL, false, false, false),
    ('pv9', 's6', 'v1', '2026-02-06 20:00:00', 'example.com', '/signup', NULL, 'DK', 'phone', 'iOS', 'Safari', 'google', 'c1', 'a1', 'ad1', 20, NULL, false, true, false),
    ('pv10', 's7', 'v7', '2026-02-07 09:00:00', 'example.com', '/home', NULL, 'DK', 'phone', 'iOS', 'Safari', 'google', 'c1', 'a1', 'ad1', 15, NULL, false, false, false);

INSERT INTO ad_entities (report_date, campaign_id, campaign_name, adset_id, adset_name, ad_id, ad_name) VALUES
    ('2026-02-04', 'c1', 'Summer Sale', 'a1', 'Broad', 'ad1', 'Video A'),
    ('2026-02-04', 'c2', 'Winter Promo (old)', 'a2', 'Retarget', 'ad2', 'Carousel'),
    ('2026-02-05', 'c2', 'Winter Promo', 'a2', 'Retarget', 'ad2', 'Carousel');

INSERT INTO url_products (url_path, product) VALUES
    ('/home', 'Marketing'),
    ('/pricing', 'Marketing');
"#;

/// Subscriptions created in and around the same range. sub3 and sub5 have
/// no visitor link and can only be matched by tracking key.
const CONVERSION_SEED: &str = r#"
INSERT INTO subscriptions (id, customer_id, visitor_id, created_at, is_trial, converted_at,
    source, campaign_id, adset_id, ad_id, country_code) VALUES
    ('sub1', 'cus1', 'v1', '2026-02-04 12:00:00', true, '2026-02-05 12:00:00', 'google', 'c1', NULL, NULL, 'DK'),
    ('sub2', 'cus2', 'v2', '2026-02-04 12:30:00', true, NULL, 'facebook', 'c2', NULL, NULL, 'DK'),
    ('sub3', 'cus3', NULL, '2026-02-05 10:00:00', true, NULL, 'google', 'c1', NULL, NULL, 'SE'),
    ('sub4', 'cus4', 'v5', '2026-02-06 09:00:00', true, NULL, 'adwords', NULL, NULL, NULL, 'DK'),
    ('sub5', 'cus5', NULL, '2026-02-05 15:00:00', true, NULL, 'bing', 'c9', NULL, NULL, NULL),
    ('sub6', 'cus6', 'v1', '2026-02-10 09:00:00', true, NULL, 'google', 'c1', NULL, NULL, 'DK');

INSERT INTO invoices (id, subscription_id, created_at, amount, status) VALUES
    ('in1', 'sub1', '2026-02-05 12:00:00', 100.0, 'paid'),
    ('in2', 'sub2', '2026-02-05 12:00:00', 50.0, 'open');
"#;

pub async fn seeded_engine() -> ReportEngine {
    seeded_engine_with("", "").await
}

/// The standard seed followed by extra statements against each store.
pub async fn seeded_engine_with(behavioral_sql: &str, conversion_sql: &str) -> ReportEngine {
    let behavioral = DuckDbBehavioralStore::open_in_memory().expect("behavioral store");
    {
        let conn = behavioral.conn_for_test().await;
        conn.execute_batch(BEHAVIORAL_SEED).expect("seed behavioral");
        if !behavioral_sql.is_empty() {
            conn.execute_batch(behavioral_sql).expect("extra behavioral rows");
        }
    }
    let conversion = DuckDbConversionStore::open_in_memory().expect("conversion store");
    {
        let conn = conversion.conn_for_test().await;
        conn.execute_batch(CONVERSION_SEED).expect("seed conversion");
        if !conversion_sql.is_empty() {
            conn.execute_batch(conversion_sql).expect("extra conversion rows");
        }
    }
    ReportEngine::new(
        Arc::new(DimensionCatalog::standard()),
        Arc::new(behavioral),
        Arc::new(conversion),
    )
}

pub fn report_request(body: serde_json::Value) -> ReportRequest {
    let mut body = body;
    if body.get("dateRange").is_none() {
        body["dateRange"] = serde_json::json!({"start": "2026-02-04", "end": "2026-02-06"});
    }
    serde_json::from_value(body).expect("valid report request")
}

pub async fn run(engine: &ReportEngine, body: serde_json::Value) -> ReportResponse {
    engine
        .run_report(&report_request(body))
        .await
        .expect("report succeeds")
}

pub fn row<'a>(response: &'a ReportResponse, attribute: &str) -> &'a ReportRow {
    response
        .rows
        .iter()
        .find(|row| row.attribute == attribute)
        .unwrap_or_else(|| panic!("no row for {attribute}: {:#?}", response.rows))
}

pub fn page_views(response: &ReportResponse) -> Vec<(String, i64)> {
    response
        .rows
        .iter()
        .map(|row| (row.attribute.clone(), row.metrics.page_views))
        .collect()
}

pub fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("metric present");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
