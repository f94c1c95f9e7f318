use crate::pair::ValueType;

/// Turns one admitted record into bytes for the destination.
///
/// A sink drives it as `begin`, then `pair` for every visible pair in record
/// order, then `finish`. The returned slice is valid until the next `begin`.
/// Identical call sequences must produce identical bytes.
pub trait Formatter: Send {
    fn begin(&mut self);
    fn pair(&mut self, key: &str, value: &str, kind: ValueType);
    fn finish(&mut self) -> &[u8];
}

impl<F: Formatter + ?Sized> Formatter for Box<F> {
    fn begin(&mut self) {
        (**self).begin()
    }

    fn pair(&mut self, key: &str, value: &str, kind: ValueType) {
        (**self).pair(key, value, kind)
    }

    fn finish(&mut self) -> &[u8] {
        (**self).finish()
    }
}

/// Appends `s` as a double-quoted string with `\n`, `\t`, `\"` style escapes.
pub(crate) fn push_quoted(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if c.is_control() => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

pub mod json;
pub mod logfmt;

pub use json::JsonFormatter;
pub use logfmt::LogfmtFormatter;
