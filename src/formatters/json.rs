use crate::formatters::{push_quoted, Formatter};
use crate::pair::ValueType;

/// One JSON object per line. Unquoted kinds are written bare only when the
/// text is valid JSON for them, so every line stays parseable.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    line: Vec<u8>,
    empty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(256),
            empty: true,
        }
    }

    fn is_bare(value: &str, kind: ValueType) -> bool {
        match kind {
            ValueType::Boolean => value == "true" || value == "false",
            ValueType::Integer | ValueType::Float => {
                serde_json::from_str::<serde_json::Number>(value).is_ok()
            }
            ValueType::CustomUnquoted => serde_json::from_str::<serde_json::Value>(value).is_ok(),
            _ => false,
        }
    }
}

impl Formatter for JsonFormatter {
    fn begin(&mut self) {
        self.line.clear();
        self.line.push(b'{');
        self.empty = true;
    }

    fn pair(&mut self, key: &str, value: &str, kind: ValueType) {
        if !self.empty {
            self.line.push(b',');
        }
        self.empty = false;

        push_quoted(&mut self.line, key);
        self.line.push(b':');

        if kind == ValueType::Void {
            self.line.extend_from_slice(b"null");
        } else if Self::is_bare(value, kind) {
            self.line.extend_from_slice(value.as_bytes());
        } else {
            push_quoted(&mut self.line, value);
        }
    }

    fn finish(&mut self) -> &[u8] {
        self.line.extend_from_slice(b"}\n");
        &self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(pairs: &[(&str, &str, ValueType)]) -> String {
        let mut formatter = JsonFormatter::new();
        formatter.begin();
        for (k, v, t) in pairs {
            formatter.pair(k, v, *t);
        }
        String::from_utf8(formatter.finish().to_vec()).unwrap()
    }

    #[test]
    fn test_single_integer() {
        assert_eq!(render(&[("x", "1", ValueType::Integer)]), "{\"x\":1}\n");
    }

    #[test]
    fn test_output_is_valid_json() {
        let line = render(&[
            ("level", "INFO", ValueType::String),
            ("ratio", "3.14159e+00", ValueType::Float),
            ("nan", "NaN", ValueType::Float),
            ("ok", "true", ValueType::Boolean),
            ("z", "(1.000000+2.000000i)", ValueType::Complex),
            ("obj", "{\"a\":[1,2]}", ValueType::CustomUnquoted),
            ("gone", "", ValueType::Void),
            ("multi\nline", "tab\there", ValueType::String),
        ]);
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

        assert_eq!(
            parsed,
            json!({
                "level": "INFO",
                "ratio": 3.14159,
                "nan": "NaN",
                "ok": true,
                "z": "(1.000000+2.000000i)",
                "obj": {"a": [1, 2]},
                "gone": null,
                "multi\nline": "tab\there",
            })
        );
    }

    #[test]
    fn test_empty_record() {
        assert_eq!(render(&[]), "{}\n");
    }
}
