/// Behavioral store initialization SQL.
///
/// Executed once at open time via `Connection::execute_batch`. Every
/// statement uses `IF NOT EXISTS` so re-running on startup is a no-op.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `DRILLBIT_DUCKDB_MEMORY`, default `"1GB"`). Always set it
/// explicitly: the DuckDB default of 80% of system RAM is not acceptable
/// for a server process that holds two databases.
///
/// The engine only reads. Ingestion belongs to the tracking pipeline that
/// owns these files; the tables are created here so a fresh install and the
/// test suites start from the same shape.
pub fn behavioral_init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SESSIONS
-- ===========================================
CREATE TABLE IF NOT EXISTS sessions (
    session_id          VARCHAR PRIMARY KEY,
    visitor_id          VARCHAR NOT NULL,
    started_at          TIMESTAMP NOT NULL,
    last_seen           TIMESTAMP NOT NULL,
    page_view_count     INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);
CREATE INDEX IF NOT EXISTS idx_sessions_visitor ON sessions(visitor_id, started_at);

-- ===========================================
-- PAGE VIEWS
-- ===========================================
-- One row per page view, denormalized with the session's tracking context.
-- Active time comes from the client's page-hide beacon (time_on_page) or,
-- when that never arrived, from accumulated heartbeats.
CREATE TABLE IF NOT EXISTS page_views (
    id                      VARCHAR PRIMARY KEY,
    session_id              VARCHAR NOT NULL,
    visitor_id              VARCHAR NOT NULL,
    created_at              TIMESTAMP NOT NULL,
    hostname                VARCHAR,
    url_path                VARCHAR NOT NULL,
    referrer                VARCHAR,
    country_code            VARCHAR,
    region                  VARCHAR,
    city                    VARCHAR,
    device_type             VARCHAR,
    os_name                 VARCHAR,
    browser_name            VARCHAR,
    utm_source              VARCHAR,
    utm_medium              VARCHAR,
    utm_campaign            VARCHAR,
    utm_content             VARCHAR,
    utm_term                VARCHAR,
    campaign_id             VARCHAR,
    adset_id                VARCHAR,
    ad_id                   VARCHAR,
    time_on_page            DOUBLE,
    heartbeat_active_time   DOUBLE,
    scrolled_past_hero      BOOLEAN NOT NULL DEFAULT FALSE,
    form_viewed             BOOLEAN NOT NULL DEFAULT FALSE,
    form_started            BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_page_views_created ON page_views(created_at);
CREATE INDEX IF NOT EXISTS idx_page_views_session ON page_views(session_id, created_at);

-- ===========================================
-- AD ENTITIES
-- ===========================================
-- Daily snapshot of ad platform naming. Names can change between days; the
-- latest report date inside a query range wins.
CREATE TABLE IF NOT EXISTS ad_entities (
    report_date     DATE NOT NULL,
    campaign_id     VARCHAR,
    campaign_name   VARCHAR,
    adset_id        VARCHAR,
    adset_name      VARCHAR,
    ad_id           VARCHAR,
    ad_name         VARCHAR
);

CREATE INDEX IF NOT EXISTS idx_ad_entities_date ON ad_entities(report_date);

-- ===========================================
-- URL CLASSIFICATION
-- ===========================================
CREATE TABLE IF NOT EXISTS url_products (
    url_path        VARCHAR PRIMARY KEY,
    product         VARCHAR NOT NULL
);
"#
    )
}

/// Conversion store initialization SQL. Same conventions as
/// [`behavioral_init_sql`].
pub fn conversion_init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SUBSCRIPTIONS
-- ===========================================
-- Attribution columns are copied from the checkout that created the
-- subscription. visitor_id is NULL when the checkout could not be linked to
-- a tracked visitor.
CREATE TABLE IF NOT EXISTS subscriptions (
    id              VARCHAR PRIMARY KEY,
    customer_id     VARCHAR NOT NULL,
    visitor_id      VARCHAR,
    created_at      TIMESTAMP NOT NULL,
    is_trial        BOOLEAN NOT NULL DEFAULT TRUE,
    converted_at    TIMESTAMP,
    canceled_at     TIMESTAMP,
    source          VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    campaign_id     VARCHAR,
    adset_id        VARCHAR,
    ad_id           VARCHAR,
    country_code    VARCHAR
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_created ON subscriptions(created_at);
CREATE INDEX IF NOT EXISTS idx_subscriptions_visitor ON subscriptions(visitor_id);

-- ===========================================
-- INVOICES
-- ===========================================
CREATE TABLE IF NOT EXISTS invoices (
    id                  VARCHAR PRIMARY KEY,
    subscription_id     VARCHAR NOT NULL,
    created_at          TIMESTAMP NOT NULL,
    amount              DOUBLE NOT NULL,
    status              VARCHAR NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_invoices_subscription ON invoices(subscription_id);
"#
    )
}
