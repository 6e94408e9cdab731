mod common;

use serde_json::json;

use drillbit_core::attribution::AttributionStrategy;
use drillbit_core::report::QueryMode;
use drillbit_core::EngineError;

use common::{assert_close, page_views, row, run, seeded_engine, seeded_engine_with};

#[tokio::test]
async fn country_report_attributes_conversions_directly() {
    let engine = seeded_engine().await;
    let response = run(&engine, json!({"dimensions": ["countryCode"]})).await;

    assert_eq!(response.mode, QueryMode::AllPageView);
    assert_eq!(response.attribution, Some(AttributionStrategy::Direct));
    assert_eq!(
        page_views(&response),
        vec![
            ("DK".to_string(), 6),
            ("Unknown".to_string(), 2),
            ("SE".to_string(), 1),
        ]
    );

    let dk = row(&response, "DK");
    assert_eq!(dk.key, "countryCode=DK");
    assert!(!dk.has_children);
    assert_eq!(dk.metrics.unique_visitors, 3);
    assert_eq!(dk.metrics.sessions, 4);
    assert_eq!(dk.metrics.active_time_count, 6);
    assert_eq!(dk.metrics.bounced_count, 1);
    assert_eq!(dk.metrics.form_views, 3);
    assert_eq!(dk.metrics.form_starters, 1);
    assert!((dk.metrics.total_active_time - 161.0).abs() < 1e-9);
    assert!((dk.metrics.avg_active_time - 161.0 / 6.0).abs() < 1e-9);
    assert_close(dk.metrics.trials, 3.0);
    assert_close(dk.metrics.paid_subscriptions, 1.0);
    assert_close(dk.metrics.revenue, 100.0);

    let unknown = row(&response, "Unknown");
    assert!((unknown.metrics.bounce_rate - 0.5).abs() < 1e-9);
    assert_close(unknown.metrics.trials, 1.0);
    assert_close(row(&response, "SE").metrics.trials, 1.0);

    let trials: f64 = response.rows.iter().filter_map(|r| r.metrics.trials).sum();
    assert!((trials - 5.0).abs() < 1e-9, "in-range trials are fully attributed");
}

#[tokio::test]
async fn drilling_into_a_country_scopes_both_stores() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["countryCode", "utmSource"],
            "depth": 1,
            "parentFilters": {"countryCode": "DK"}
        }),
    )
    .await;

    assert_eq!(response.attribution, Some(AttributionStrategy::Direct));
    assert_eq!(
        page_views(&response),
        vec![("google".to_string(), 4), ("facebook".to_string(), 2)]
    );
    let google = row(&response, "google");
    assert_eq!(google.key, "countryCode=DK|utmSource=google");
    assert_eq!(google.depth, 1);
    // adwords folds into google on the conversion side
    assert_close(google.metrics.trials, 2.0);
    assert_close(row(&response, "facebook").metrics.trials, 1.0);
}

#[tokio::test]
async fn not_equals_keeps_unknown_rows_on_both_sides() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["utmSource"],
            "filters": [{"field": "countryCode", "operator": "not_equals", "value": "DK"}]
        }),
    )
    .await;

    assert_eq!(
        page_views(&response),
        vec![("bing".to_string(), 2), ("google".to_string(), 1)]
    );
    assert_close(row(&response, "bing").metrics.trials, 1.0);
    assert_close(row(&response, "google").metrics.trials, 1.0);
}

#[tokio::test]
async fn device_report_falls_back_to_visitor_and_tracking_match() {
    let engine = seeded_engine().await;
    let response = run(&engine, json!({"dimensions": ["deviceType"]})).await;

    assert_eq!(response.attribution, Some(AttributionStrategy::Tracking));
    assert_eq!(row(&response, "phone").metrics.page_views, 4);
    assert_eq!(row(&response, "desktop").metrics.page_views, 4);
    assert_eq!(row(&response, "tablet").metrics.page_views, 1);
    // equal page views tie-break on the attribute
    assert_eq!(response.rows[0].attribute, "desktop");

    assert_close(row(&response, "phone").metrics.trials, 1.0);
    assert_close(row(&response, "phone").metrics.revenue, 100.0);
    assert_close(row(&response, "desktop").metrics.trials, 1.0);
    assert_close(row(&response, "tablet").metrics.trials, 1.0);
}

#[tokio::test]
async fn tracking_match_covers_buckets_without_visitor_conversions() {
    let engine = seeded_engine().await;
    let response = run(&engine, json!({"dimensions": ["browserName"]})).await;

    assert_eq!(response.attribution, Some(AttributionStrategy::Tracking));
    assert_close(row(&response, "Safari").metrics.trials, 2.0);
    assert_close(row(&response, "Chrome").metrics.trials, 1.0);
    // v4 never converted; sub5 carries the bing/c9 key v4 arrived with
    assert_close(row(&response, "Edge").metrics.trials, 1.0);
}

#[tokio::test]
async fn visitor_conversions_split_evenly_across_their_buckets() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["deviceType", "urlPath"],
            "depth": 1,
            "parentFilters": {"deviceType": "phone"}
        }),
    )
    .await;

    assert_eq!(row(&response, "/pricing").metrics.page_views, 2);
    assert_eq!(row(&response, "/home").metrics.page_views, 1);
    assert_eq!(row(&response, "/signup").metrics.page_views, 1);
    for path in ["/home", "/pricing", "/signup"] {
        assert_close(row(&response, path).metrics.trials, 1.0 / 3.0);
    }
    assert_eq!(
        row(&response, "/home").key,
        "deviceType=phone|urlPath=/home"
    );
}

#[tokio::test]
async fn entry_dimensions_count_sessions_by_landing_page() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({"dimensions": ["entryDeviceType"], "includeConversions": false}),
    )
    .await;

    assert_eq!(response.mode, QueryMode::Entry);
    assert_eq!(response.attribution, None);
    assert_eq!(
        page_views(&response),
        vec![
            ("phone".to_string(), 3),
            ("desktop".to_string(), 2),
            ("tablet".to_string(), 1),
        ]
    );
    assert!(response.rows.iter().all(|r| r.metrics.trials.is_none()));
}

#[tokio::test]
async fn funnel_steps_follow_sessions_that_entered_on_a_page() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["entryUrlPath", "funnelStep"],
            "depth": 1,
            "parentFilters": {"entryUrlPath": "/home"}
        }),
    )
    .await;

    assert_eq!(response.mode, QueryMode::Funnel);
    assert_eq!(
        page_views(&response),
        vec![
            ("/home".to_string(), 4),
            ("/pricing".to_string(), 2),
            ("/signup".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn mixing_entry_and_page_dimensions_selects_funnel_mode() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["deviceType"],
            "filters": [{"field": "entryUrlPath", "operator": "equals", "value": "/pricing"}],
            "includeConversions": false
        }),
    )
    .await;

    assert_eq!(response.mode, QueryMode::Funnel);
    // only s3 entered on /pricing
    assert_eq!(page_views(&response), vec![("phone".to_string(), 1)]);
}

#[tokio::test]
async fn visit_number_groups_by_visit_ordinal() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({"dimensions": ["visitNumber"], "includeConversions": false}),
    )
    .await;

    assert_eq!(row(&response, "1").metrics.page_views, 8);
    assert_eq!(row(&response, "1").metrics.sessions, 5);
    assert_eq!(row(&response, "2").metrics.page_views, 1);
    assert_eq!(row(&response, "2").metrics.sessions, 1);
}

#[tokio::test]
async fn campaigns_display_latest_names_and_keep_raw_ids() {
    let engine = seeded_engine().await;
    let response = run(&engine, json!({"dimensions": ["campaign"]})).await;

    assert_eq!(response.attribution, Some(AttributionStrategy::Direct));
    let summer = row(&response, "Summer Sale");
    assert_eq!(summer.metrics.page_views, 4);
    assert_eq!(summer.attribute_id.as_deref(), Some("c1"));
    assert_eq!(summer.key, "campaign=c1");
    assert_close(summer.metrics.trials, 2.0);

    let winter = row(&response, "Winter Promo");
    assert_eq!(winter.metrics.page_views, 2);
    assert_close(winter.metrics.trials, 1.0);

    // no name on file: the raw id is displayed
    let unnamed = row(&response, "c9");
    assert_eq!(unnamed.attribute_id.as_deref(), Some("c9"));
    assert_close(unnamed.metrics.trials, 1.0);

    let unknown = row(&response, "Unknown");
    assert_eq!(unknown.metrics.page_views, 1);
    assert_eq!(unknown.attribute_id, None);
    assert_close(unknown.metrics.trials, 1.0);
}

#[tokio::test]
async fn drilling_into_a_campaign_by_id_matches_the_parent_row() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["campaign", "deviceType"],
            "depth": 1,
            "parentFilters": {"campaign": "c1"},
            "includeConversions": false
        }),
    )
    .await;

    assert_eq!(page_views(&response), vec![("phone".to_string(), 4)]);
    assert_eq!(response.rows[0].key, "campaign=c1|deviceType=phone");
}

#[tokio::test]
async fn campaign_name_filters_resolve_to_ids_on_both_sides() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "filters": [{"field": "campaign", "operator": "equals", "value": "summer sale"}]
        }),
    )
    .await;

    assert_eq!(response.attribution, Some(AttributionStrategy::Direct));
    assert_eq!(
        page_views(&response),
        vec![("DK".to_string(), 3), ("SE".to_string(), 1)]
    );
    assert_close(row(&response, "DK").metrics.trials, 1.0);
    assert_close(row(&response, "SE").metrics.trials, 1.0);
}

#[tokio::test]
async fn same_field_filters_or_and_unknown_matches_missing_values() {
    let engine = seeded_engine().await;
    let either = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "filters": [
                {"field": "countryCode", "operator": "equals", "value": "dk"},
                {"field": "countryCode", "operator": "equals", "value": "SE"}
            ],
            "includeConversions": false
        }),
    )
    .await;
    assert_eq!(
        page_views(&either),
        vec![("DK".to_string(), 6), ("SE".to_string(), 1)]
    );

    let unknown = run(
        &engine,
        json!({
            "dimensions": ["deviceType"],
            "filters": [{"field": "countryCode", "operator": "equals", "value": "Unknown"}],
            "includeConversions": false
        }),
    )
    .await;
    assert_eq!(page_views(&unknown), vec![("desktop".to_string(), 2)]);
}

#[tokio::test]
async fn contains_matches_literally_and_case_insensitively() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dimensions": ["urlPath"],
            "filters": [{"field": "urlPath", "operator": "contains", "value": "PRIC"}],
            "includeConversions": false
        }),
    )
    .await;
    assert_eq!(page_views(&response), vec![("/pricing".to_string(), 3)]);

    let wildcard = run(
        &engine,
        json!({
            "dimensions": ["urlPath"],
            "filters": [{"field": "urlPath", "operator": "contains", "value": "%"}],
            "includeConversions": false
        }),
    )
    .await;
    assert!(wildcard.rows.is_empty());
}

#[tokio::test]
async fn products_and_dates_group_with_fallbacks() {
    let engine = seeded_engine().await;
    let products = run(
        &engine,
        json!({"dimensions": ["product"], "includeConversions": false}),
    )
    .await;
    assert_eq!(
        page_views(&products),
        vec![
            ("Marketing".to_string(), 7),
            ("Unclassified".to_string(), 2),
        ]
    );

    let dates = run(&engine, json!({"dimensions": ["date"]})).await;
    assert_eq!(
        page_views(&dates),
        vec![
            ("2026-02-04".to_string(), 4),
            ("2026-02-05".to_string(), 3),
            ("2026-02-06".to_string(), 2),
        ]
    );
    assert_close(row(&dates, "2026-02-04").metrics.trials, 2.0);
    assert_close(row(&dates, "2026-02-05").metrics.trials, 2.0);
    assert_close(row(&dates, "2026-02-06").metrics.trials, 1.0);
}

#[tokio::test]
async fn sort_and_limit_apply_to_rows() {
    let engine = seeded_engine().await;
    let sorted = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "sortBy": "attribute",
            "includeConversions": false
        }),
    )
    .await;
    let attributes: Vec<&str> = sorted.rows.iter().map(|r| r.attribute.as_str()).collect();
    assert_eq!(attributes, vec!["DK", "SE", "Unknown"]);

    let limited = run(
        &engine,
        json!({"dimensions": ["countryCode"], "limit": 1, "includeConversions": false}),
    )
    .await;
    assert_eq!(page_views(&limited), vec![("DK".to_string(), 6)]);
}

#[tokio::test]
async fn limits_keep_the_top_rows_of_the_requested_sort() {
    let engine = seeded_engine().await;
    let by_bounce = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "sortBy": "bounceRate",
            "sortDirection": "DESC",
            "includeConversions": false
        }),
    )
    .await;
    let attributes: Vec<&str> = by_bounce.rows.iter().map(|r| r.attribute.as_str()).collect();
    assert_eq!(attributes, vec!["Unknown", "DK", "SE"]);

    let top_bounce = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "sortBy": "bounceRate",
            "sortDirection": "DESC",
            "limit": 1,
            "includeConversions": false
        }),
    )
    .await;
    assert_eq!(page_views(&top_bounce), vec![("Unknown".to_string(), 2)]);
    assert!((top_bounce.rows[0].metrics.bounce_rate - 0.5).abs() < 1e-9);

    let fewest_trials = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "sortBy": "trials",
            "sortDirection": "ASC",
            "limit": 1
        }),
    )
    .await;
    assert_eq!(page_views(&fewest_trials), vec![("SE".to_string(), 1)]);

    let last_attribute = run(
        &engine,
        json!({
            "dimensions": ["countryCode"],
            "sortBy": "attribute",
            "sortDirection": "DESC",
            "limit": 1,
            "includeConversions": false
        }),
    )
    .await;
    assert_eq!(page_views(&last_attribute), vec![("Unknown".to_string(), 2)]);
}

#[tokio::test]
async fn empty_ranges_return_no_rows() {
    let engine = seeded_engine().await;
    let response = run(
        &engine,
        json!({
            "dateRange": {"start": "2025-01-01", "end": "2025-01-31"},
            "dimensions": ["countryCode"]
        }),
    )
    .await;
    assert!(response.rows.is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let engine = seeded_engine().await;
    let err = engine
        .run_report(&common::report_request(json!({
            "dimensions": ["countryCode"],
            "depth": 3
        })))
        .await
        .expect_err("depth out of range");
    assert!(matches!(err, EngineError::InvalidRequest { ref field, .. } if field == "depth"));
}

#[tokio::test]
async fn both_stores_answer_pings() {
    let engine = seeded_engine().await;
    engine.ping().await.expect("stores reachable");
}

#[tokio::test]
async fn repeated_requests_return_identical_rows() {
    let engine = seeded_engine().await;
    let body = json!({
        "dimensions": ["deviceType", "urlPath"],
        "filters": [{"field": "countryCode", "operator": "not_equals", "value": "SE"}]
    });
    let first = run(&engine, body.clone()).await;
    let second = run(&engine, body).await;
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).expect("serialize"),
        serde_json::to_string(&second).expect("serialize")
    );
}

fn sum_trials(response: &drillbit_core::report::ReportResponse) -> f64 {
    response.rows.iter().filter_map(|r| r.metrics.trials).sum()
}

#[tokio::test]
async fn children_stay_within_tolerance_of_direct_parents() {
    let engine = seeded_engine().await;
    let parents = run(&engine, json!({"dimensions": ["countryCode", "utmSource"]})).await;
    let children = run(
        &engine,
        json!({
            "dimensions": ["countryCode", "utmSource"],
            "depth": 1,
            "parentFilters": {"countryCode": "DK"}
        }),
    )
    .await;

    let parent = row(&parents, "DK");
    let child_views: i64 = children.rows.iter().map(|r| r.metrics.page_views).sum();
    assert_eq!(child_views, parent.metrics.page_views);
    let parent_trials = parent.metrics.trials.expect("parent trials");
    assert!((sum_trials(&children) - parent_trials).abs() <= 2.0);
}

#[tokio::test]
async fn children_stay_within_tolerance_of_tracking_parents() {
    let engine = seeded_engine().await;
    let parents = run(&engine, json!({"dimensions": ["deviceType", "urlPath"]})).await;
    let children = run(
        &engine,
        json!({
            "dimensions": ["deviceType", "urlPath"],
            "depth": 1,
            "parentFilters": {"deviceType": "phone"}
        }),
    )
    .await;

    assert_eq!(children.attribution, Some(AttributionStrategy::Tracking));
    let parent = row(&parents, "phone");
    let child_views: i64 = children.rows.iter().map(|r| r.metrics.page_views).sum();
    assert_eq!(child_views, parent.metrics.page_views);
    let parent_trials = parent.metrics.trials.expect("parent trials");
    assert!((sum_trials(&children) - parent_trials).abs() <= 5.0);
}

#[tokio::test]
async fn blank_values_share_the_unknown_row_and_drill_into_it() {
    let engine = seeded_engine_with(
        "UPDATE page_views SET country_code = '' WHERE id = 'pv6';",
        "UPDATE subscriptions SET country_code = '  ' WHERE id = 'sub5';",
    )
    .await;
    let parents = run(&engine, json!({"dimensions": ["countryCode", "utmSource"]})).await;
    assert_eq!(
        page_views(&parents),
        vec![
            ("DK".to_string(), 6),
            ("Unknown".to_string(), 2),
            ("SE".to_string(), 1),
        ]
    );
    let unknown = row(&parents, "Unknown");
    assert_eq!(unknown.key, "countryCode=Unknown");
    assert_close(unknown.metrics.trials, 1.0);

    let children = run(
        &engine,
        json!({
            "dimensions": ["countryCode", "utmSource"],
            "depth": 1,
            "parentFilters": {"countryCode": "Unknown"}
        }),
    )
    .await;
    assert_eq!(page_views(&children), vec![("bing".to_string(), 2)]);
    assert_close(row(&children, "bing").metrics.trials, 1.0);

    let excluded = run(
        &engine,
        json!({
            "dimensions": ["utmSource"],
            "filters": [{"field": "countryCode", "operator": "not_equals", "value": "Unknown"}],
            "includeConversions": false
        }),
    )
    .await;
    assert!(excluded.rows.iter().all(|r| r.attribute != "bing"));
}
