use crate::formatters::{Formatter, JsonFormatter, LogfmtFormatter};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    #[value(name = "logfmt", help = "Logfmt format (key=value pairs)")]
    Logfmt,
    #[value(name = "json", help = "JSON Lines format (one JSON object per line)")]
    Json,
}

impl OutputFormat {
    /// Fresh formatter instance for a sink.
    pub fn formatter(self) -> Box<dyn Formatter> {
        match self {
            OutputFormat::Logfmt => Box::new(LogfmtFormatter::new()),
            OutputFormat::Json => Box::new(JsonFormatter::new()),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logfmt" => Ok(OutputFormat::Logfmt),
            "json" | "jsonl" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}
