use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Predicate over a single key/value pair of a record.
///
/// Checks must be free of side effects and must never panic on odd input:
/// a value that cannot be interpreted simply does not match.
pub trait Filter: Send + Sync {
    fn check(&self, key: &str, value: &str) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn check(&self, key: &str, value: &str) -> bool {
        self(key, value)
    }
}

/// Matches whenever the key is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyFilter;

impl Filter for KeyFilter {
    fn check(&self, _key: &str, _value: &str) -> bool {
        true
    }
}

/// Matches values that belong to a fixed set.
#[derive(Debug, Clone, Default)]
pub struct ValueSetFilter {
    values: HashSet<String>,
}

impl ValueSetFilter {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Filter for ValueSetFilter {
    fn check(&self, _key: &str, value: &str) -> bool {
        self.values.contains(value)
    }
}

/// Matches integers in the half-open range `(from, to]`.
#[derive(Debug, Clone, Copy)]
pub struct IntRangeFilter {
    pub from: i64,
    pub to: i64,
}

impl Filter for IntRangeFilter {
    fn check(&self, _key: &str, value: &str) -> bool {
        match value.trim().parse::<i64>() {
            Ok(v) => v > self.from && v <= self.to,
            Err(_) => false,
        }
    }
}

/// Matches floats in the half-open range `(from, to]`.
#[derive(Debug, Clone, Copy)]
pub struct FloatRangeFilter {
    pub from: f64,
    pub to: f64,
}

impl Filter for FloatRangeFilter {
    fn check(&self, _key: &str, value: &str) -> bool {
        match value.trim().parse::<f64>() {
            Ok(v) => v > self.from && v <= self.to,
            Err(_) => false,
        }
    }
}

/// Matches times strictly between `from` and `to`.
///
/// Without a layout, values are parsed as RFC 3339. A layout uses chrono's
/// `strftime` syntax; layouts without an offset are read as UTC.
#[derive(Debug, Clone)]
pub struct TimeRangeFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    layout: Option<String>,
}

impl TimeRangeFilter {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            layout: None,
        }
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        match &self.layout {
            None => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Some(layout) => DateTime::parse_from_str(value, layout)
                .map(|t| t.with_timezone(&Utc))
                .or_else(|_| NaiveDateTime::parse_from_str(value, layout).map(|t| t.and_utc()))
                .ok(),
        }
    }
}

impl Filter for TimeRangeFilter {
    fn check(&self, _key: &str, value: &str) -> bool {
        match self.parse(value) {
            Some(t) => self.from < t && t < self.to,
            None => false,
        }
    }
}

/// Matches values against a regular expression.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    pattern: Regex,
}

impl RegexFilter {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::new)
    }
}

impl Filter for RegexFilter {
    fn check(&self, _key: &str, value: &str) -> bool {
        self.pattern.is_match(value)
    }
}

/// The single rule a sink keeps for one key. Rules for the same key
/// replace each other by construction.
#[derive(Clone)]
pub enum FilterSlot {
    /// Records lacking the key are rejected; any value passes.
    Required,
    /// The pair must satisfy the filter, otherwise the record is rejected.
    /// Records without the key are not affected.
    Positive(Arc<dyn Filter>),
    /// A pair satisfying the filter rejects the record.
    Negative(Arc<dyn Filter>),
}

impl FilterSlot {
    pub fn rejects(&self, key: &str, value: &str) -> bool {
        match self {
            FilterSlot::Required => false,
            FilterSlot::Positive(filter) => !filter.check(key, value),
            FilterSlot::Negative(filter) => filter.check(key, value),
        }
    }

    pub fn requires_presence(&self) -> bool {
        matches!(self, FilterSlot::Required)
    }
}

impl fmt::Debug for FilterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSlot::Required => f.write_str("Required"),
            FilterSlot::Positive(_) => f.write_str("Positive(..)"),
            FilterSlot::Negative(_) => f.write_str("Negative(..)"),
        }
    }
}
