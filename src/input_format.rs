use crate::config::ErrorStrategy;
use crate::error::ParseError;
use crate::pair::{Pair, Record, ValueType, MESSAGE_KEY};
use std::io::BufRead;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InputFormat {
    #[default]
    #[value(name = "jsonl")]
    Jsonl,
    #[value(name = "logfmt")]
    Logfmt,
    /// Every line becomes a record with a single `message` pair
    #[value(name = "text")]
    Text,
}

impl InputFormat {
    pub fn parser(self) -> Box<dyn LineParser> {
        match self {
            InputFormat::Jsonl => Box::new(JsonlParser::new()),
            InputFormat::Logfmt => Box::new(LogfmtParser::new()),
            InputFormat::Text => Box::new(TextParser),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InputFormat::Jsonl => "JSON",
            InputFormat::Logfmt => "logfmt",
            InputFormat::Text => "text",
        }
    }
}

pub trait LineParser {
    fn parse_line(&self, line: &str) -> Result<Record, String>;
}

#[derive(Debug, Default)]
pub struct JsonlParser;

impl JsonlParser {
    pub fn new() -> Self {
        Self
    }

    fn pair(key: String, value: serde_json::Value) -> Pair {
        use serde_json::Value;
        match value {
            Value::Null => Pair::new(key, "", ValueType::Void),
            Value::Bool(b) => Pair::new(key, b.to_string(), ValueType::Boolean),
            Value::Number(n) if n.is_f64() => Pair::new(key, n.to_string(), ValueType::Float),
            Value::Number(n) => Pair::new(key, n.to_string(), ValueType::Integer),
            Value::String(s) => Pair::new(key, s, ValueType::String),
            // Nested values pass through as compact JSON
            nested @ (Value::Array(_) | Value::Object(_)) => {
                Pair::new(key, nested.to_string(), ValueType::CustomUnquoted)
            }
        }
    }
}

impl LineParser for JsonlParser {
    fn parse_line(&self, line: &str) -> Result<Record, String> {
        let value: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| format!("Failed to parse JSONL: {}", e))?;
        match value {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| Self::pair(key, value))
                .collect()),
            other => Err(format!(
                "Expected a JSON object, found {}",
                json_kind(&other)
            )),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[derive(Debug, Default)]
pub struct LogfmtParser;

impl LogfmtParser {
    pub fn new() -> Self {
        Self
    }

    /// Infers the type of an unquoted value.
    fn bare_pair(key: String, value: String) -> Pair {
        let kind = if value.is_empty() {
            ValueType::Void
        } else if value == "true" || value == "false" {
            ValueType::Boolean
        } else if value.parse::<i64>().is_ok() {
            ValueType::Integer
        } else if value.parse::<f64>().is_ok() {
            ValueType::Float
        } else {
            ValueType::String
        };
        Pair::new(key, value, kind)
    }

    // key1=value1 key2="value with spaces" flag
    fn parse_logfmt_pairs(&self, line: &str) -> Result<Vec<Pair>, String> {
        let mut pairs = Vec::new();
        let mut chars = line.chars().peekable();

        loop {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == '=' || ch.is_whitespace() {
                    break;
                }
                if ch == '"' {
                    return Err(format!("Unexpected quote in key '{}'", key));
                }
                key.push(ch);
                chars.next();
            }

            if key.is_empty() {
                return Err("Empty key found".to_string());
            }

            if chars.peek() != Some(&'=') {
                pairs.push(Pair::new(key, "", ValueType::Void));
                continue;
            }
            chars.next();

            if chars.peek() == Some(&'"') {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('r') => value.push('\r'),
                            Some('\\') => value.push('\\'),
                            Some('"') => value.push('"'),
                            Some(other) => {
                                value.push('\\');
                                value.push(other);
                            }
                            None => value.push('\\'),
                        },
                        _ => value.push(ch),
                    }
                }
                if !closed {
                    return Err(format!("Unclosed quote in value of '{}'", key));
                }
                pairs.push(Pair::new(key, value, ValueType::String));
            } else {
                let mut value = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() {
                        break;
                    }
                    value.push(ch);
                    chars.next();
                }
                pairs.push(Self::bare_pair(key, value));
            }
        }

        Ok(pairs)
    }
}

impl LineParser for LogfmtParser {
    fn parse_line(&self, line: &str) -> Result<Record, String> {
        self.parse_logfmt_pairs(line.trim()).map(Record::from)
    }
}

#[derive(Debug, Default)]
pub struct TextParser;

impl LineParser for TextParser {
    fn parse_line(&self, line: &str) -> Result<Record, String> {
        Ok(Record::new().pair(MESSAGE_KEY, line))
    }
}

/// A line that was skipped because it did not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseErrorInfo {
    pub line_number: usize,
    pub format_name: String,
    pub error: String,
}

#[derive(Debug, Default, Clone)]
pub struct InputStats {
    pub lines_read: usize,
    pub records: usize,
    pub parse_errors: Vec<ParseErrorInfo>,
}

/// Parses every non-blank line of `reader` and hands the records to `emit`.
/// Malformed lines are skipped and reported in the stats, or end the read
/// with an error under [`ErrorStrategy::FailFast`].
pub fn read_records<R, F>(
    reader: R,
    format: InputFormat,
    strategy: ErrorStrategy,
    mut emit: F,
) -> Result<InputStats, ParseError>
where
    R: BufRead,
    F: FnMut(Record),
{
    let parser = format.parser();
    let mut stats = InputStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        stats.lines_read += 1;
        let line_number = index + 1;
        let content = line.trim_end_matches(['\r', '\n']);
        if content.trim().is_empty() {
            continue;
        }

        match parser.parse_line(content) {
            Ok(record) => {
                stats.records += 1;
                emit(record);
            }
            Err(message) => match strategy {
                ErrorStrategy::FailFast => {
                    return Err(ParseError::Malformed {
                        line_number,
                        message,
                    });
                }
                ErrorStrategy::Skip => {
                    tracing::debug!(line_number, error = %message, "skipping malformed line");
                    stats.parse_errors.push(ParseErrorInfo {
                        line_number,
                        format_name: format.name().to_string(),
                        error: message,
                    });
                }
            },
        }
    }

    Ok(stats)
}
