use crate::formatters::{push_quoted, Formatter};
use crate::pair::ValueType;

/// Standard logfmt formatter: space-separated `key=value`, one record per line.
#[derive(Debug, Clone)]
pub struct LogfmtFormatter {
    line: Vec<u8>,
    empty: bool,
}

impl Default for LogfmtFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogfmtFormatter {
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(256),
            empty: true,
        }
    }

    /// Check if a key needs quoting per logfmt rules
    fn key_needs_quoting(key: &str) -> bool {
        key.is_empty()
            || key
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '=')
    }

    /// Unquoted kinds still get quotes when their text would break the line apart
    fn value_needs_quoting(value: &str) -> bool {
        value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '"')
    }
}

impl Formatter for LogfmtFormatter {
    fn begin(&mut self) {
        self.line.clear();
        self.empty = true;
    }

    fn pair(&mut self, key: &str, value: &str, kind: ValueType) {
        if !self.empty {
            self.line.push(b' ');
        }
        self.empty = false;

        if Self::key_needs_quoting(key) {
            push_quoted(&mut self.line, key);
        } else {
            self.line.extend_from_slice(key.as_bytes());
        }
        self.line.push(b'=');

        match kind {
            ValueType::Void => {}
            kind if kind.is_quoted() || Self::value_needs_quoting(value) => {
                push_quoted(&mut self.line, value)
            }
            _ => self.line.extend_from_slice(value.as_bytes()),
        }
    }

    fn finish(&mut self) -> &[u8] {
        self.line.push(b'\n');
        &self.line
    }
}
