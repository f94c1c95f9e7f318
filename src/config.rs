use crate::collector::Collector;
use crate::error::ConfigError;
use crate::filter::TimeRangeFilter;
use crate::output_format::OutputFormat;
use crate::sink::{Destination, Sink};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Tuning shared by every sink of a collector
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Records a sink may hold before producers block
    pub queue_capacity: usize,
    /// Upper bound for flushes, close and `dispatch_and_wait`
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// What to do with input lines that fail to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    /// Skip problematic lines and continue processing
    #[default]
    Skip,
    /// Stop processing on first error
    FailFast,
}

/// Parses durations such as `250ms`, `3s` or `1m 30s`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSpec<T> {
    pub from: T,
    pub to: T,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeRangeSpec {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// strftime layout for the record's values; RFC 3339 when absent
    #[serde(default)]
    pub layout: Option<String>,
}

fn default_start() -> bool {
    true
}

/// One sink as described in a config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub destination: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_start")]
    pub start: bool,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub require_values: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub exclude_values: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub require_int_ranges: IndexMap<String, RangeSpec<i64>>,
    #[serde(default)]
    pub exclude_int_ranges: IndexMap<String, RangeSpec<i64>>,
    #[serde(default)]
    pub require_float_ranges: IndexMap<String, RangeSpec<f64>>,
    #[serde(default)]
    pub exclude_float_ranges: IndexMap<String, RangeSpec<f64>>,
    #[serde(default)]
    pub require_time_ranges: IndexMap<String, TimeRangeSpec>,
    #[serde(default)]
    pub exclude_time_ranges: IndexMap<String, TimeRangeSpec>,
    #[serde(default)]
    pub require_patterns: IndexMap<String, String>,
    #[serde(default)]
    pub hide: Vec<String>,
}

impl SinkConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        SinkConfig {
            destination: destination.into(),
            format: OutputFormat::default(),
            start: true,
            require: Vec::new(),
            exclude: Vec::new(),
            require_values: IndexMap::new(),
            exclude_values: IndexMap::new(),
            require_int_ranges: IndexMap::new(),
            exclude_int_ranges: IndexMap::new(),
            require_float_ranges: IndexMap::new(),
            exclude_float_ranges: IndexMap::new(),
            require_time_ranges: IndexMap::new(),
            exclude_time_ranges: IndexMap::new(),
            require_patterns: IndexMap::new(),
            hide: Vec::new(),
        }
    }

    /// Checks everything that can be checked without touching the destination.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let int_ranges = self.require_int_ranges.iter().chain(&self.exclude_int_ranges);
        for (key, range) in int_ranges {
            if range.from >= range.to {
                return Err(empty_range(key, &range.from, &range.to));
            }
        }
        let float_ranges = self
            .require_float_ranges
            .iter()
            .chain(&self.exclude_float_ranges);
        for (key, range) in float_ranges {
            if range.from.is_nan() || range.to.is_nan() || range.from >= range.to {
                return Err(empty_range(key, &range.from, &range.to));
            }
        }
        let time_ranges = self
            .require_time_ranges
            .iter()
            .chain(&self.exclude_time_ranges);
        for (key, range) in time_ranges {
            if range.from >= range.to {
                return Err(empty_range(key, &range.from, &range.to));
            }
        }
        for (key, pattern) in &self.require_patterns {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidFilter {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Installs filters and hidden keys on `sink`, then starts it if asked to.
    pub fn apply(&self, sink: &Sink) -> Result<(), ConfigError> {
        self.validate()?;

        sink.require_key(&self.require).exclude_key(&self.exclude);
        for (key, values) in &self.require_values {
            sink.require_value(key, values.iter().cloned());
        }
        for (key, values) in &self.exclude_values {
            sink.exclude_value(key, values.iter().cloned());
        }
        for (key, range) in &self.require_int_ranges {
            sink.require_int_range(key, range.from, range.to);
        }
        for (key, range) in &self.exclude_int_ranges {
            sink.exclude_int_range(key, range.from, range.to);
        }
        for (key, range) in &self.require_float_ranges {
            sink.require_float_range(key, range.from, range.to);
        }
        for (key, range) in &self.exclude_float_ranges {
            sink.exclude_float_range(key, range.from, range.to);
        }
        for (key, range) in &self.require_time_ranges {
            sink.with_time_filter(key, range.filter(), false);
        }
        for (key, range) in &self.exclude_time_ranges {
            sink.with_time_filter(key, range.filter(), true);
        }
        for (key, pattern) in &self.require_patterns {
            let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidFilter {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            sink.require_pattern(key, regex);
        }
        sink.hide(&self.hide);

        if self.start {
            sink.start();
        }
        Ok(())
    }
}

impl TimeRangeSpec {
    fn filter(&self) -> TimeRangeFilter {
        let filter = TimeRangeFilter::new(self.from, self.to);
        match &self.layout {
            Some(layout) => filter.with_layout(layout.clone()),
            None => filter,
        }
    }
}

fn empty_range(key: &str, from: &dyn std::fmt::Display, to: &dyn std::fmt::Display) -> ConfigError {
    ConfigError::InvalidFilter {
        key: key.to_string(),
        reason: format!("range {}..{} matches nothing", from, to),
    }
}

/// Sinks and collector tuning loaded from YAML:
///
/// ```yaml
/// collector:
///   queue_capacity: 64
///   flush_timeout: 500ms
/// sinks:
///   - destination: errors.log
///     format: json
///     require_values:
///       level: [ERROR, FATAL]
///     hide: [trace_id]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: FileConfig = serde_yaml::from_str(text)?;
        for sink in &config.sinks {
            sink.validate()?;
        }
        Ok(config)
    }

    /// Creates (or reuses) every described sink on `collector`.
    pub fn build(&self, collector: &Arc<Collector>) -> Result<Vec<Sink>, ConfigError> {
        let mut sinks = Vec::with_capacity(self.sinks.len());
        for spec in &self.sinks {
            let destination = Destination::parse(&spec.destination)?;
            let sink = collector.sink_to(destination, spec.format.formatter())?;
            spec.apply(&sink)?;
            tracing::debug!(sink = %sink.key(), format = ?spec.format, "configured sink");
            sinks.push(sink);
        }
        Ok(sinks)
    }
}
