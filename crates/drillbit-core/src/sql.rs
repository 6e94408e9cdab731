//! Parameterized SQL assembly.
//!
//! Every value that ends up in a query goes through [`SqlBuilder::bind`],
//! which records the value and hands back the numbered placeholder (`?N`)
//! for it. Placeholders are numbered, so fragments can be rendered in any
//! order and spliced anywhere in the final statement without the positional
//! bookkeeping drifting.

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Float(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

/// A finished statement plus its positional bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Query {
    /// Check that placeholders `?1..=?N` all appear in the SQL and nothing
    /// beyond `?N` does. DuckDB rejects statements whose parameter count does
    /// not match the bindings, so this catches the mismatch without a
    /// database.
    pub fn check_placeholders(&self) -> Result<(), String> {
        let used = placeholder_indexes(&self.sql);
        for idx in 1..=self.params.len() {
            if !used.contains(&idx) {
                return Err(format!("placeholder ?{idx} is bound but never used"));
            }
        }
        if let Some(max) = used.iter().max() {
            if *max > self.params.len() {
                return Err(format!(
                    "placeholder ?{max} is used but only {} values are bound",
                    self.params.len()
                ));
            }
        }
        Ok(())
    }
}

fn placeholder_indexes(sql: &str) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'?' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                if let Ok(idx) = sql[start..end].parse::<usize>() {
                    out.push(idx);
                }
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    out
}

/// Mutable builder threaded through catalog, filter compiler and the query
/// mode builders while a single statement is assembled.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    params: Vec<SqlParam>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` and return its bare placeholder, e.g. `?3`.
    pub fn bind(&mut self, value: impl Into<SqlParam>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }

    /// Bind a string and return a placeholder typed as `VARCHAR`.
    pub fn bind_text(&mut self, value: impl Into<String>) -> String {
        let placeholder = self.bind(SqlParam::Text(value.into()));
        format!("CAST({placeholder} AS VARCHAR)")
    }

    /// Bind a calendar date (`YYYY-MM-DD`) and return a placeholder typed as `DATE`.
    pub fn bind_date(&mut self, date: NaiveDate) -> String {
        let placeholder = self.bind(SqlParam::Text(date.format("%Y-%m-%d").to_string()));
        format!("CAST({placeholder} AS DATE)")
    }

    /// Bind every value of a non-empty list, returning `(?a, ?b, ...)`.
    pub fn bind_text_list<I, S>(&mut self, values: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let placeholders: Vec<String> = values
            .into_iter()
            .map(|value| self.bind_text(value))
            .collect();
        format!("({})", placeholders.join(", "))
    }

    /// Bind an inclusive calendar range. Callers bind this first so the
    /// range is always `?1`/`?2` and can be referenced from any fragment.
    pub fn bind_range(&mut self, start: NaiveDate, end: NaiveDate) -> RangeParams {
        RangeParams {
            start: self.bind_date(start),
            end: self.bind_date(end),
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn finish(self, sql: String) -> Query {
        Query {
            sql,
            params: self.params,
        }
    }
}

/// Placeholders for a bound inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeParams {
    pub start: String,
    pub end: String,
}

impl RangeParams {
    /// Half-open timestamp predicate covering whole days `start..=end`.
    pub fn covers_timestamp(&self, column: &str) -> String {
        format!(
            "{column} >= {start} AND {column} < {end} + INTERVAL 1 DAY",
            start = self.start,
            end = self.end
        )
    }

    pub fn covers_date(&self, column: &str) -> String {
        format!("{column} BETWEEN {} AND {}", self.start, self.end)
    }
}

/// Join boolean fragments with `AND`, or `TRUE` when there are none.
pub fn and_all(clauses: &[String]) -> String {
    if clauses.is_empty() {
        "TRUE".to_string()
    } else {
        clauses.join(" AND ")
    }
}
