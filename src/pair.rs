use chrono::{DateTime, SecondsFormat, TimeZone};
use std::fmt;
use std::sync::Arc;

/// Key added by the level helpers and by plain-text input lines.
pub const MESSAGE_KEY: &str = "message";

/// Hint telling formatters how a value was produced and whether to quote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    #[default]
    Void,
    String,
    Boolean,
    Integer,
    Float,
    Complex,
    Time,
    CustomQuoted,
    CustomUnquoted,
}

impl ValueType {
    /// Quoted kinds are rendered as strings by every formatter.
    pub fn is_quoted(self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::Time | ValueType::CustomQuoted
        )
    }
}

/// A value that is either already rendered or rendered on demand.
#[derive(Clone)]
pub enum Value {
    Literal(String),
    /// Evaluated once per record, right before the record is dispatched.
    Deferred(Arc<dyn Fn() -> String + Send + Sync>),
}

impl Value {
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Value::Deferred(Arc::new(f))
    }

    pub fn resolve(&self) -> String {
        match self {
            Value::Literal(s) => s.clone(),
            Value::Deferred(f) => f(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Value::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Output of the value convertor: canonical value plus its type tag.
#[derive(Debug, Clone)]
pub struct TypedValue {
    pub value: Value,
    pub kind: ValueType,
}

impl TypedValue {
    pub fn new(kind: ValueType, value: impl Into<String>) -> Self {
        Self {
            value: Value::Literal(value.into()),
            kind,
        }
    }

    pub fn void() -> Self {
        Self::new(ValueType::Void, String::new())
    }

    /// Application-defined value; `quoted` picks CustomQuoted or CustomUnquoted.
    pub fn custom(value: impl Into<String>, quoted: bool) -> Self {
        let kind = if quoted {
            ValueType::CustomQuoted
        } else {
            ValueType::CustomUnquoted
        };
        Self::new(kind, value)
    }

    pub fn deferred<F>(kind: ValueType, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            value: Value::deferred(f),
            kind,
        }
    }
}

/// Conversion of application values into their canonical logged form.
pub trait IntoValue {
    fn into_value(self) -> TypedValue;
}

impl IntoValue for TypedValue {
    fn into_value(self) -> TypedValue {
        self
    }
}

impl IntoValue for &str {
    fn into_value(self) -> TypedValue {
        TypedValue::new(ValueType::String, self)
    }
}

impl IntoValue for String {
    fn into_value(self) -> TypedValue {
        TypedValue::new(ValueType::String, self)
    }
}

impl IntoValue for &String {
    fn into_value(self) -> TypedValue {
        TypedValue::new(ValueType::String, self.as_str())
    }
}

impl IntoValue for bool {
    fn into_value(self) -> TypedValue {
        TypedValue::new(ValueType::Boolean, if self { "true" } else { "false" })
    }
}

macro_rules! integer_into_value {
    ($($t:ty),*) => {
        $(
            impl IntoValue for $t {
                fn into_value(self) -> TypedValue {
                    TypedValue::new(ValueType::Integer, self.to_string())
                }
            }
        )*
    };
}

integer_into_value!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl IntoValue for f64 {
    fn into_value(self) -> TypedValue {
        TypedValue::new(ValueType::Float, format_float(self))
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> TypedValue {
        let rendered = if self.is_finite() {
            exponent_form(&format!("{:e}", self))
        } else {
            format_float(f64::from(self))
        };
        TypedValue::new(ValueType::Float, rendered)
    }
}

impl<Tz: TimeZone> IntoValue for DateTime<Tz>
where
    Tz::Offset: fmt::Display,
{
    fn into_value(self) -> TypedValue {
        TypedValue::new(ValueType::Time, format_time(&self))
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> TypedValue {
        match self {
            Some(v) => v.into_value(),
            None => TypedValue::void(),
        }
    }
}

/// Renders a float in shortest exponent form with a signed two-digit
/// exponent, e.g. `3.14159e+00`, `1e-07`, `NaN`, `+Inf`.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    exponent_form(&format!("{:e}", v))
}

fn exponent_form(rendered: &str) -> String {
    match rendered.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(exp) => format!(
                "{}e{}{:02}",
                mantissa,
                if exp < 0 { '-' } else { '+' },
                exp.unsigned_abs()
            ),
            Err(_) => rendered.to_string(),
        },
        None => rendered.to_string(),
    }
}

/// RFC 3339 with second precision and `Z` for UTC. Time range filters
/// without an explicit layout parse this form back.
pub fn format_time<Tz: TimeZone>(t: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One resolved key/value entry of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub key: String,
    pub value: String,
    pub kind: ValueType,
}

impl Pair {
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: ValueType) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind,
        }
    }

    /// Converts and resolves `value` immediately.
    pub fn typed(key: impl Into<String>, value: impl IntoValue) -> Self {
        let typed = value.into_value();
        Self::new(key, typed.value.resolve(), typed.kind)
    }
}

/// A pair whose value may still be deferred. Loggers keep these in their
/// context; they become [`Pair`]s when a record is dispatched.
#[derive(Debug, Clone)]
pub struct Field {
    pub key: String,
    pub value: Value,
    pub kind: ValueType,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl IntoValue) -> Self {
        let typed = value.into_value();
        Self {
            key: key.into(),
            value: typed.value,
            kind: typed.kind,
        }
    }

    pub fn resolve(&self) -> Pair {
        Pair::new(self.key.clone(), self.value.resolve(), self.kind)
    }
}

/// An ordered sequence of pairs. Duplicate keys are kept as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pairs: Vec<Pair>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style append of a converted value.
    pub fn pair(mut self, key: impl Into<String>, value: impl IntoValue) -> Self {
        self.pairs.push(Pair::typed(key, value));
        self
    }

    pub fn push(&mut self, pair: Pair) {
        self.pairs.push(pair);
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// First pair with the given key.
    pub fn get(&self, key: &str) -> Option<&Pair> {
        self.pairs.iter().find(|p| p.key == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl FromIterator<Pair> for Record {
    fn from_iter<I: IntoIterator<Item = Pair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Pair>> for Record {
    fn from(pairs: Vec<Pair>) -> Self {
        Self { pairs }
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Pair;
    type IntoIter = std::slice::Iter<'a, Pair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_float_rendering() {
        assert_eq!(format_float(3.14159), "3.14159e+00");
        assert_eq!(format_float(100.0), "1e+02");
        assert_eq!(format_float(0.0000001), "1e-07");
        assert_eq!(format_float(-2.5), "-2.5e+00");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_convertor_type_tags() {
        assert_eq!("text".into_value().kind, ValueType::String);
        assert_eq!(true.into_value().kind, ValueType::Boolean);
        assert_eq!(42u8.into_value().kind, ValueType::Integer);
        assert_eq!(1.5f32.into_value().kind, ValueType::Float);
        assert_eq!(None::<i32>.into_value().kind, ValueType::Void);
        assert_eq!(
            TypedValue::custom("x", false).kind,
            ValueType::CustomUnquoted
        );

        let pair = Pair::typed("n", -17i64);
        assert_eq!(pair.value, "-17");
    }

    #[test]
    fn test_time_value_uses_rfc3339() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let pair = Pair::typed("ts", t);
        assert_eq!(pair.value, "2024-01-02T03:04:05Z");
        assert_eq!(pair.kind, ValueType::Time);
    }

    #[test]
    fn test_deferred_value_evaluated_on_resolve() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let field = Field::new(
            "calls",
            TypedValue::deferred(ValueType::Integer, move || {
                (c.fetch_add(1, Ordering::SeqCst) + 1).to_string()
            }),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(field.resolve().value, "1");
        assert_eq!(field.resolve().value, "2");
    }

    #[test]
    fn test_record_keeps_duplicates_in_order() {
        let record = Record::new().pair("k", "a").pair("x", 1).pair("k", "b");
        let keys: Vec<&str> = record.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["k", "x", "k"]);
        assert_eq!(record.get("k").map(|p| p.value.as_str()), Some("a"));
    }
}
