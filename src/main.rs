use anyhow::{bail, Context};
use clap::Parser;
use indexmap::IndexMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use kvlog::config::RangeSpec;
use kvlog::input_format::ParseErrorInfo;
use kvlog::{
    read_records, Collector, CollectorConfig, ErrorStrategy, FileConfig, FlushStatus, InputFormat,
    InputStats, OutputFormat, SinkConfig,
};

#[derive(Parser)]
#[command(name = "kvlog")]
#[command(about = "Route structured log records through filtered sinks")]
#[command(version)]
struct Args {
    /// Input files (default: stdin)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Input record format
    #[arg(short = 'f', long = "input-format", value_enum, default_value = "jsonl")]
    input_format: InputFormat,

    /// Output format of the command-line sink
    #[arg(short = 'F', long = "format", value_enum, default_value = "logfmt")]
    output_format: OutputFormat,

    /// Append output to this file (default: stdout)
    #[arg(short = 'o', long = "output")]
    output_file: Option<PathBuf>,

    /// Only pass records carrying all of these keys
    #[arg(long, value_name = "KEYS", value_delimiter = ',')]
    require: Vec<String>,

    /// Reject records carrying any of these keys
    #[arg(long, value_name = "KEYS", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Only pass records where KEY holds one of the values
    #[arg(long = "require-value", value_name = "KEY=V1,V2")]
    require_value: Vec<String>,

    /// Reject records where KEY holds one of the values
    #[arg(long = "exclude-value", value_name = "KEY=V1,V2")]
    exclude_value: Vec<String>,

    /// Only pass records where KEY is an integer in (FROM, TO]
    #[arg(long = "int-range", value_name = "KEY=FROM..TO")]
    int_range: Vec<String>,

    /// Leave these keys out of the output
    #[arg(long, value_name = "KEYS", value_delimiter = ',')]
    hide: Vec<String>,

    /// YAML file describing sinks and their filters
    #[arg(short = 'c', long = "config")]
    config_file: Option<PathBuf>,

    /// Maximum time to wait for sinks when flushing (e.g. 500ms, 3s)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    flush_timeout: Option<Duration>,

    /// Records a sink may queue before input reading blocks
    #[arg(long, value_name = "N")]
    queue_capacity: Option<usize>,

    /// Debug mode - show processing details
    #[arg(long)]
    debug: bool,

    /// Fail on first malformed line instead of skipping it
    #[arg(long)]
    fail_fast: bool,
}

impl Args {
    fn has_sink_flags(&self) -> bool {
        self.output_file.is_some()
            || !self.require.is_empty()
            || !self.exclude.is_empty()
            || !self.require_value.is_empty()
            || !self.exclude_value.is_empty()
            || !self.int_range.is_empty()
            || !self.hide.is_empty()
    }

    fn validate(&self) -> Result<(), String> {
        if self.config_file.is_some() && self.has_sink_flags() {
            return Err("Cannot combine --config with output or filter flags".to_string());
        }
        if self.queue_capacity == Some(0) {
            return Err("--queue-capacity must be at least 1".to_string());
        }
        Ok(())
    }

    fn error_strategy(&self) -> ErrorStrategy {
        if self.fail_fast {
            ErrorStrategy::FailFast
        } else {
            ErrorStrategy::Skip
        }
    }

    /// The single sink described by the command-line flags.
    fn sink_config(&self) -> anyhow::Result<SinkConfig> {
        let destination = match &self.output_file {
            Some(path) => path.display().to_string(),
            None => "stdout".to_string(),
        };
        let mut sink = SinkConfig::new(destination);
        sink.format = self.output_format;
        sink.require = self.require.clone();
        sink.exclude = self.exclude.clone();
        sink.require_values = parse_value_lists(&self.require_value)?;
        sink.exclude_values = parse_value_lists(&self.exclude_value)?;
        for spec in &self.int_range {
            let (key, range) = parse_int_range(spec)?;
            sink.require_int_ranges.insert(key, range);
        }
        sink.hide = self.hide.clone();
        Ok(sink)
    }
}

/// `KEY=V1,V2` pairs; a bare `KEY` means the key itself is the rule.
fn parse_value_lists(specs: &[String]) -> anyhow::Result<IndexMap<String, Vec<String>>> {
    let mut lists = IndexMap::new();
    for spec in specs {
        let (key, values) = spec.split_once('=').unwrap_or((spec.as_str(), ""));
        if key.is_empty() {
            bail!("Missing key in value filter '{}'", spec);
        }
        let values = values
            .split(',')
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        lists.insert(key.to_string(), values);
    }
    Ok(lists)
}

fn parse_int_range(spec: &str) -> anyhow::Result<(String, RangeSpec<i64>)> {
    let (key, range) = spec
        .split_once('=')
        .with_context(|| format!("Expected KEY=FROM..TO, got '{}'", spec))?;
    let (from, to) = range
        .split_once("..")
        .with_context(|| format!("Expected FROM..TO in '{}'", spec))?;
    let from = from
        .trim()
        .parse()
        .with_context(|| format!("Invalid range start in '{}'", spec))?;
    let to = to
        .trim()
        .parse()
        .with_context(|| format!("Invalid range end in '{}'", spec))?;
    Ok((key.to_string(), RangeSpec { from, to }))
}

fn init_tracing(debug: bool) {
    let default = if debug { "kvlog=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("KVLOG_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("kvlog: {}", e);
        std::process::exit(2);
    }

    init_tracing(args.debug);

    if let Err(e) = run(args) {
        eprintln!("kvlog: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let started = Instant::now();

    let mut file_config = match &args.config_file {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => FileConfig {
            collector: CollectorConfig::default(),
            sinks: vec![args.sink_config()?],
        },
    };
    if let Some(timeout) = args.flush_timeout {
        file_config.collector.flush_timeout = timeout;
    }
    if let Some(capacity) = args.queue_capacity {
        file_config.collector.queue_capacity = capacity;
    }

    let collector = Collector::with_config(file_config.collector.clone());
    let sinks = file_config
        .build(&collector)
        .context("Failed to set up sinks")?;

    let mut stats = InputStats::default();
    let strategy = args.error_strategy();
    let sources: Vec<Option<&PathBuf>> = if args.files.is_empty() {
        vec![None]
    } else {
        args.files.iter().map(Some).collect()
    };

    for source in sources {
        let reader: Box<dyn BufRead> = match source {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open input file '{}'", path.display()))?;
                Box::new(BufReader::new(file))
            }
            None => Box::new(BufReader::new(io::stdin())),
        };
        let name = source
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<stdin>".to_string());

        let read = read_records(reader, args.input_format, strategy, |record| {
            collector.dispatch(record)
        });
        let file_stats = match read {
            Ok(file_stats) => file_stats,
            Err(e) => {
                // Deliver what was already read before giving up.
                let _ = collector.flush_all();
                collector.close_all();
                return Err(e).with_context(|| format!("Failed to read '{}'", name));
            }
        };
        report_parse_errors(&name, &file_stats.parse_errors);
        stats.lines_read += file_stats.lines_read;
        stats.records += file_stats.records;
        stats.parse_errors.extend(file_stats.parse_errors);
    }

    if collector.flush_all() == FlushStatus::TimedOut {
        eprintln!(
            "kvlog: sinks did not drain within {:?}; output may be incomplete",
            file_config.collector.flush_timeout
        );
    }

    if args.debug {
        eprintln!("Final statistics:");
        eprintln!("  Lines read: {}", stats.lines_read);
        eprintln!("  Records dispatched: {}", stats.records);
        eprintln!("  Parse errors: {}", stats.parse_errors.len());
        for sink in &sinks {
            let s = sink.stats();
            eprintln!(
                "  Sink {}: written={} rejected={} dropped={} write_errors={}",
                sink.key(),
                s.written,
                s.rejected,
                s.dropped,
                s.write_errors
            );
        }
        eprintln!("  Processing time: {:?}", started.elapsed());
    }

    collector.close_all();
    Ok(())
}

fn report_parse_errors(name: &str, errors: &[ParseErrorInfo]) {
    for error in errors {
        eprintln!(
            "kvlog: {}:{}: skipped {} line: {}",
            name, error.line_number, error.format_name, error.error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_lists() {
        let lists = parse_value_lists(&[
            "level=ERROR,FATAL".to_string(),
            "trace".to_string(),
        ])
        .unwrap();
        assert_eq!(lists["level"], ["ERROR", "FATAL"]);
        assert!(lists["trace"].is_empty());
        assert!(parse_value_lists(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_parse_int_range() {
        let (key, range) = parse_int_range("status=399..599").unwrap();
        assert_eq!(key, "status");
        assert_eq!(range, RangeSpec { from: 399, to: 599 });
        assert!(parse_int_range("status=399").is_err());
        assert!(parse_int_range("status=a..b").is_err());
    }

    #[test]
    fn test_config_excludes_sink_flags() {
        let args = Args::parse_from(["kvlog", "--config", "x.yaml", "--hide", "a"]);
        assert!(args.validate().is_err());
        let args = Args::parse_from(["kvlog", "--config", "x.yaml"]);
        assert!(args.validate().is_ok());
    }
}
