//! Dimension catalog: logical dimension ids mapped to physical expressions.
//!
//! The catalog keeps one expression map per query mode. The entry map is the
//! source of truth for session-entry columns; the funnel map is derived from
//! it by substituting the `first_page_views` alias (`fp`) with the
//! `matching_sessions` alias (`ms`), then layering the page-view map and the
//! per-mode overrides (`visitNumber`, `date`, `funnelStep`) on top.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::report::QueryMode;

/// Table aliases the query builders agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alias {
    /// `page_views pv`
    PageView,
    /// `first_page_views fp` (entry CTE)
    FirstPageView,
    /// `matching_sessions ms` (funnel stage A)
    MatchingSession,
    /// `visit_numbers vn`
    VisitNumber,
    /// `url_products up`, joined on the page view
    UrlProduct,
    /// `url_products eup`, joined on the entry page
    EntryUrlProduct,
    /// `subscriptions s` in the conversion store
    Subscription,
}

impl Alias {
    pub fn as_str(self) -> &'static str {
        match self {
            Alias::PageView => "pv",
            Alias::FirstPageView => "fp",
            Alias::MatchingSession => "ms",
            Alias::VisitNumber => "vn",
            Alias::UrlProduct => "up",
            Alias::EntryUrlProduct => "eup",
            Alias::Subscription => "s",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhysicalExpr {
    /// `alias.column`
    Column(Alias, &'static str),
    /// `CAST(alias.column AS DATE)`
    Date(Alias, &'static str),
    /// `COALESCE(alias.product, 'Unclassified')`
    Classified(Alias),
}

pub const UNCLASSIFIED: &str = "Unclassified";

impl PhysicalExpr {
    pub fn alias(&self) -> Alias {
        match self {
            PhysicalExpr::Column(alias, _)
            | PhysicalExpr::Date(alias, _)
            | PhysicalExpr::Classified(alias) => *alias,
        }
    }

    pub fn render(&self) -> String {
        match self {
            PhysicalExpr::Column(alias, column) => format!("{}.{}", alias.as_str(), column),
            PhysicalExpr::Date(alias, column) => {
                format!("CAST({}.{} AS DATE)", alias.as_str(), column)
            }
            PhysicalExpr::Classified(alias) => {
                format!("COALESCE({}.product, '{UNCLASSIFIED}')", alias.as_str())
            }
        }
    }

    /// Swap the table alias `from` for `to`, leaving other aliases alone.
    pub fn rebase(&self, from: Alias, to: Alias) -> Self {
        let swap = |alias: Alias| if alias == from { to } else { alias };
        match self {
            PhysicalExpr::Column(alias, column) => PhysicalExpr::Column(swap(*alias), column),
            PhysicalExpr::Date(alias, column) => PhysicalExpr::Date(swap(*alias), column),
            PhysicalExpr::Classified(alias) => PhysicalExpr::Classified(swap(*alias)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionScope {
    /// Attribute of the session's first page view.
    Entry,
    /// Attribute of an individual page view.
    PageView,
    /// Session-level attribute that is valid in every mode (visit number).
    Session,
    /// Valid in every mode without forcing one (date).
    Neutral,
    /// Only meaningful inside a funnel.
    Funnel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnrichedLevel {
    Campaign,
    Adset,
    Ad,
}

impl EnrichedLevel {
    pub fn id_column(self) -> &'static str {
        match self {
            EnrichedLevel::Campaign => "campaign_id",
            EnrichedLevel::Adset => "adset_id",
            EnrichedLevel::Ad => "ad_id",
        }
    }

    pub fn name_column(self) -> &'static str {
        match self {
            EnrichedLevel::Campaign => "campaign_name",
            EnrichedLevel::Adset => "adset_name",
            EnrichedLevel::Ad => "ad_name",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "campaign" => Some(EnrichedLevel::Campaign),
            "adset" => Some(EnrichedLevel::Adset),
            "ad" => Some(EnrichedLevel::Ad),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Plain,
    /// Opaque tracking id with a display name in `ad_entities`.
    Enriched(EnrichedLevel),
    /// URL classification via `url_products`.
    Product,
    VisitNumber,
    FunnelStep,
}

/// Column in the conversion store that carries the same meaning as a
/// behavioral dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversionColumn {
    CountryCode,
    Source,
    UtmMedium,
    UtmCampaign,
    CampaignId,
    AdsetId,
    AdId,
    CreatedDate,
}

impl ConversionColumn {
    pub fn sql(self) -> &'static str {
        match self {
            ConversionColumn::CountryCode => "s.country_code",
            ConversionColumn::Source => "s.source",
            ConversionColumn::UtmMedium => "s.utm_medium",
            ConversionColumn::UtmCampaign => "s.utm_campaign",
            ConversionColumn::CampaignId => "s.campaign_id",
            ConversionColumn::AdsetId => "s.adset_id",
            ConversionColumn::AdId => "s.ad_id",
            ConversionColumn::CreatedDate => "CAST(s.created_at AS DATE)",
        }
    }

    /// Grouping and matching expression: blank text folds into NULL so it
    /// lands in the same `Unknown` bucket as a missing value.
    pub fn value_sql(self) -> String {
        match self {
            ConversionColumn::CreatedDate => self.sql().to_string(),
            _ => format!("NULLIF(TRIM({}), '')", self.sql()),
        }
    }

    /// Source values go through the alias table before matching.
    pub fn is_source(self) -> bool {
        matches!(self, ConversionColumn::Source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionDef {
    pub id: String,
    pub scope: DimensionScope,
    pub kind: DimensionKind,
    pub conversion: Option<ConversionColumn>,
}

/// A dimension bound to the expression it takes in one query mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDimension {
    pub id: String,
    pub scope: DimensionScope,
    pub kind: DimensionKind,
    pub expr: PhysicalExpr,
    pub conversion: Option<ConversionColumn>,
}

impl ResolvedDimension {
    pub fn sql(&self) -> String {
        self.expr.render()
    }

    /// Expression used for grouping and filtering. Text columns are trimmed
    /// and blanks become NULL, so `Unknown` means one thing everywhere.
    pub fn value_sql(&self) -> String {
        match (&self.expr, self.kind) {
            (
                PhysicalExpr::Column(..),
                DimensionKind::Plain | DimensionKind::Enriched(_) | DimensionKind::FunnelStep,
            ) => format!("NULLIF(TRIM({}), '')", self.sql()),
            _ => self.sql(),
        }
    }

    pub fn enriched_level(&self) -> Option<EnrichedLevel> {
        match self.kind {
            DimensionKind::Enriched(level) => Some(level),
            _ => None,
        }
    }

    pub fn alias(&self) -> Alias {
        self.expr.alias()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DimensionCatalog {
    defs: HashMap<String, DimensionDef>,
    entry: HashMap<String, PhysicalExpr>,
    page_view: HashMap<String, PhysicalExpr>,
    funnel: HashMap<String, PhysicalExpr>,
}

impl DimensionCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The production catalog.
    pub fn standard() -> Self {
        use ConversionColumn as C;
        use EnrichedLevel as L;

        let mut b = Self::builder();

        let page_columns: [(&str, &'static str, Option<C>); 14] = [
            ("countryCode", "country_code", Some(C::CountryCode)),
            ("region", "region", None),
            ("city", "city", None),
            ("deviceType", "device_type", None),
            ("osName", "os_name", None),
            ("browserName", "browser_name", None),
            ("urlPath", "url_path", None),
            ("hostname", "hostname", None),
            ("referrer", "referrer", None),
            ("utmSource", "utm_source", Some(C::Source)),
            ("utmMedium", "utm_medium", Some(C::UtmMedium)),
            ("utmCampaign", "utm_campaign", Some(C::UtmCampaign)),
            ("utmContent", "utm_content", None),
            ("utmTerm", "utm_term", None),
        ];
        for (id, column, conversion) in page_columns {
            b = b.page_view(id, column, conversion);
        }
        b = b
            .enriched_page_view("campaign", L::Campaign, Some(C::CampaignId))
            .enriched_page_view("adset", L::Adset, Some(C::AdsetId))
            .enriched_page_view("ad", L::Ad, Some(C::AdId))
            .product_page_view("product");

        let entry_columns: [(&str, &'static str, Option<C>); 10] = [
            ("entryCountryCode", "country_code", Some(C::CountryCode)),
            ("entryDeviceType", "device_type", None),
            ("entryOsName", "os_name", None),
            ("entryBrowserName", "browser_name", None),
            ("entryUrlPath", "url_path", None),
            ("entryHostname", "hostname", None),
            ("entryReferrer", "referrer", None),
            ("entryUtmSource", "utm_source", Some(C::Source)),
            ("entryUtmMedium", "utm_medium", Some(C::UtmMedium)),
            ("entryUtmCampaign", "utm_campaign", Some(C::UtmCampaign)),
        ];
        for (id, column, conversion) in entry_columns {
            b = b.entry(id, column, conversion);
        }
        b.enriched_entry("entryCampaign", L::Campaign, Some(C::CampaignId))
            .enriched_entry("entryAdset", L::Adset, Some(C::AdsetId))
            .enriched_entry("entryAd", L::Ad, Some(C::AdId))
            .product_entry("entryProduct")
            .visit_number("visitNumber")
            .date("date", Some(C::CreatedDate))
            .funnel_step("funnelStep")
            .build()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.defs.contains_key(id)
    }

    pub fn definition(&self, id: &str) -> Option<&DimensionDef> {
        self.defs.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Resolve `id` to its physical expression for `mode`.
    pub fn resolve(&self, id: &str, mode: QueryMode) -> EngineResult<ResolvedDimension> {
        let def = self.defs.get(id).ok_or_else(|| {
            EngineError::invalid("dimensions", format!("unknown dimension '{id}'"))
        })?;
        let map = match mode {
            QueryMode::Entry => &self.entry,
            QueryMode::AllPageView => &self.page_view,
            QueryMode::Funnel => &self.funnel,
        };
        let expr = map.get(id).ok_or_else(|| {
            EngineError::invalid(
                "dimensions",
                format!("dimension '{id}' is not available in {} mode", mode.as_str()),
            )
        })?;
        Ok(ResolvedDimension {
            id: def.id.clone(),
            scope: def.scope,
            kind: def.kind,
            expr: expr.clone(),
            conversion: def.conversion,
        })
    }

    /// Pick the cheapest mode that can express every dimension in `ids`.
    /// Ids the catalog does not know are ignored.
    pub fn select_mode<'a, I>(&self, ids: I) -> QueryMode
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut has_entry = false;
        let mut has_page = false;
        for id in ids {
            match self.defs.get(id).map(|def| def.scope) {
                Some(DimensionScope::Funnel) => return QueryMode::Funnel,
                Some(DimensionScope::Entry) => has_entry = true,
                Some(DimensionScope::PageView) => has_page = true,
                Some(DimensionScope::Session | DimensionScope::Neutral) | None => {}
            }
        }
        match (has_entry, has_page) {
            (true, true) => QueryMode::Funnel,
            (true, false) => QueryMode::Entry,
            _ => QueryMode::AllPageView,
        }
    }
}

/// Incremental catalog construction, used by [`DimensionCatalog::standard`]
/// and by tests that need a small synthetic catalog.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    defs: Vec<DimensionDef>,
    entry: HashMap<String, PhysicalExpr>,
    page_view: HashMap<String, PhysicalExpr>,
    overrides: HashMap<String, PhysicalExpr>,
}

impl CatalogBuilder {
    fn def(
        &mut self,
        id: &str,
        scope: DimensionScope,
        kind: DimensionKind,
        conversion: Option<ConversionColumn>,
    ) {
        self.defs.push(DimensionDef {
            id: id.to_string(),
            scope,
            kind,
            conversion,
        });
    }

    pub fn page_view(
        mut self,
        id: &str,
        column: &'static str,
        conversion: Option<ConversionColumn>,
    ) -> Self {
        self.def(id, DimensionScope::PageView, DimensionKind::Plain, conversion);
        self.page_view
            .insert(id.to_string(), PhysicalExpr::Column(Alias::PageView, column));
        self
    }

    pub fn enriched_page_view(
        mut self,
        id: &str,
        level: EnrichedLevel,
        conversion: Option<ConversionColumn>,
    ) -> Self {
        self.def(
            id,
            DimensionScope::PageView,
            DimensionKind::Enriched(level),
            conversion,
        );
        self.page_view.insert(
            id.to_string(),
            PhysicalExpr::Column(Alias::PageView, level.id_column()),
        );
        self
    }

    pub fn product_page_view(mut self, id: &str) -> Self {
        self.def(id, DimensionScope::PageView, DimensionKind::Product, None);
        self.page_view
            .insert(id.to_string(), PhysicalExpr::Classified(Alias::UrlProduct));
        self
    }

    pub fn entry(
        mut self,
        id: &str,
        column: &'static str,
        conversion: Option<ConversionColumn>,
    ) -> Self {
        self.def(id, DimensionScope::Entry, DimensionKind::Plain, conversion);
        self.entry.insert(
            id.to_string(),
            PhysicalExpr::Column(Alias::FirstPageView, column),
        );
        self
    }

    pub fn enriched_entry(
        mut self,
        id: &str,
        level: EnrichedLevel,
        conversion: Option<ConversionColumn>,
    ) -> Self {
        self.def(
            id,
            DimensionScope::Entry,
            DimensionKind::Enriched(level),
            conversion,
        );
        self.entry.insert(
            id.to_string(),
            PhysicalExpr::Column(Alias::FirstPageView, level.id_column()),
        );
        self
    }

    pub fn product_entry(mut self, id: &str) -> Self {
        self.def(id, DimensionScope::Entry, DimensionKind::Product, None);
        self.entry.insert(
            id.to_string(),
            PhysicalExpr::Classified(Alias::EntryUrlProduct),
        );
        self
    }

    /// Visit ordinal: `vn.visit_number` in entry and page-view modes,
    /// precomputed `ms.visit_number` in funnels.
    pub fn visit_number(mut self, id: &str) -> Self {
        self.def(id, DimensionScope::Session, DimensionKind::VisitNumber, None);
        let vn = PhysicalExpr::Column(Alias::VisitNumber, "visit_number");
        self.entry.insert(id.to_string(), vn.clone());
        self.page_view.insert(id.to_string(), vn);
        self.overrides.insert(
            id.to_string(),
            PhysicalExpr::Column(Alias::MatchingSession, "visit_number"),
        );
        self
    }

    /// Calendar day of the row: entry page in entry mode, page view otherwise.
    pub fn date(mut self, id: &str, conversion: Option<ConversionColumn>) -> Self {
        self.def(id, DimensionScope::Neutral, DimensionKind::Plain, conversion);
        self.entry.insert(
            id.to_string(),
            PhysicalExpr::Date(Alias::FirstPageView, "created_at"),
        );
        let pv = PhysicalExpr::Date(Alias::PageView, "created_at");
        self.page_view.insert(id.to_string(), pv.clone());
        self.overrides.insert(id.to_string(), pv);
        self
    }

    pub fn funnel_step(mut self, id: &str) -> Self {
        self.def(id, DimensionScope::Funnel, DimensionKind::FunnelStep, None);
        self.overrides.insert(
            id.to_string(),
            PhysicalExpr::Column(Alias::PageView, "url_path"),
        );
        self
    }

    pub fn build(self) -> DimensionCatalog {
        let mut funnel: HashMap<String, PhysicalExpr> = self
            .entry
            .iter()
            .map(|(id, expr)| {
                (
                    id.clone(),
                    expr.rebase(Alias::FirstPageView, Alias::MatchingSession),
                )
            })
            .collect();
        for (id, expr) in &self.page_view {
            funnel.insert(id.clone(), expr.clone());
        }
        for (id, expr) in self.overrides {
            funnel.insert(id, expr);
        }

        // Entry mode can only express entry, session and neutral dimensions.
        let defs: HashMap<String, DimensionDef> = self
            .defs
            .into_iter()
            .map(|def| (def.id.clone(), def))
            .collect();
        let entry = self
            .entry
            .into_iter()
            .filter(|(id, _)| {
                defs.get(id)
                    .is_some_and(|def| def.scope != DimensionScope::PageView)
            })
            .collect();
        let page_view = self
            .page_view
            .into_iter()
            .filter(|(id, _)| {
                defs.get(id)
                    .is_some_and(|def| def.scope != DimensionScope::Entry)
            })
            .collect();

        DimensionCatalog {
            defs,
            entry,
            page_view,
            funnel,
        }
    }
}
