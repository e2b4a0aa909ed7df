//! Argument values, declared parameter types and call arguments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value passed to a registry method or a proxy command.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Floating point number
    Float(f64),
    /// Integer
    Int(i64),
    /// Boolean, rendered per [`BoolFormat`]
    Bool(bool),
    /// Free text. Quoted when used as a proxy argument.
    Str(String),
    /// Protocol keyword such as `VOLT` or `MAX`. Never quoted.
    Mnemonic(String),
}

impl Value {
    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Float(_) => "float",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Mnemonic(_) => "mnemonic",
        }
    }

    /// Text substituted into a command template.
    pub fn render(&self, bools: BoolFormat) -> String {
        match self {
            Value::Float(v) => format_number(*v),
            Value::Int(v) => v.to_string(),
            Value::Bool(v) => bools.render(*v).to_string(),
            Value::Str(s) | Value::Mnemonic(s) => s.clone(),
        }
    }

    /// Text used as a proxy command argument. Strings are single-quoted.
    pub fn render_argument(&self, bools: BoolFormat) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
            other => other.render(bools),
        }
    }

    /// Best-effort typing of text typed by a user, e.g. on the command line.
    ///
    /// `true`/`false` become booleans, integer and decimal literals become
    /// numbers, anything else stays a string.
    pub fn parse_loose(text: &str) -> Value {
        let trimmed = text.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Value::Float(f),
            _ => Value::Str(text.to_string()),
        }
    }

    /// Converts a YAML scalar. Sequences, mappings and nulls are rejected.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Value> {
        match value {
            serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_yaml::Value::String(s) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }

    /// Numeric view, for ints and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => f.write_str(&other.render(BoolFormat::TrueFalse)),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Renders a float as plain decimal text.
///
/// Uses the shortest representation that round-trips, without exponent:
/// `1.5` → `"1.5"`, `2.0` → `"2"`, `1e-6` → `"0.000001"`. Non-finite values
/// map to the SCPI mnemonics `NAN`, `INF` and `-INF`.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "INF" } else { "-INF" };
        text.to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// Declared type of a method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    /// Accepts floats and ints
    #[serde(rename = "float")]
    Float,
    /// Accepts ints only
    #[serde(rename = "int")]
    Int,
    /// Accepts booleans only
    #[serde(rename = "bool")]
    Bool,
    /// Accepts strings and mnemonics
    #[serde(rename = "string", alias = "str")]
    String,
}

impl ParamType {
    /// Name as written in resources.
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::Float => "float",
            ParamType::Int => "int",
            ParamType::Bool => "bool",
            ParamType::String => "string",
        }
    }

    /// Returns `value` converted to this type, or `None` on mismatch.
    ///
    /// Ints widen to floats. Nothing else converts.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::Float, Value::Float(v)) => Some(Value::Float(*v)),
            (ParamType::Float, Value::Int(v)) => Some(Value::Float(*v as f64)),
            (ParamType::Int, Value::Int(v)) => Some(Value::Int(*v)),
            (ParamType::Bool, Value::Bool(v)) => Some(Value::Bool(*v)),
            (ParamType::String, Value::Str(_) | Value::Mnemonic(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How booleans are written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolFormat {
    /// `ON` / `OFF`
    #[default]
    OnOff,
    /// `1` / `0`
    OneZero,
    /// `TRUE` / `FALSE`
    TrueFalse,
}

impl BoolFormat {
    /// Wire text for `value`.
    pub fn render(self, value: bool) -> &'static str {
        match (self, value) {
            (BoolFormat::OnOff, true) => "ON",
            (BoolFormat::OnOff, false) => "OFF",
            (BoolFormat::OneZero, true) => "1",
            (BoolFormat::OneZero, false) => "0",
            (BoolFormat::TrueFalse, true) => "TRUE",
            (BoolFormat::TrueFalse, false) => "FALSE",
        }
    }
}

/// Arguments of one method call: positional values followed by named ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl CallArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }

    /// Append a positional argument in place.
    pub fn push(&mut self, value: impl Into<Value>) {
        self.positional.push(value.into());
    }

    /// Add a named argument in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.named.push((name.into(), value.into()));
    }

    /// Positional arguments in call order.
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Named arguments in call order.
    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    /// Named argument lookup.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Named argument, falling back to positional slot `index`.
    pub fn get_or_positional(&self, name: &str, index: usize) -> Option<&Value> {
        self.get(name).or_else(|| self.positional.get(index))
    }

    /// Total number of arguments.
    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    /// True when no arguments were given.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses `key=value` words; words without `=` become positional.
    pub fn from_pairs<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = CallArgs::new();
        for word in words {
            let word = word.as_ref();
            match word.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    args.insert(key.trim(), Value::parse_loose(value))
                }
                _ => args.push(Value::parse_loose(word)),
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_render_without_exponent() {
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(1e-6), "0.000001");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(1e21), "1000000000000000000000");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NAN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-INF");
    }

    #[test]
    fn test_bool_formats() {
        assert_eq!(Value::Bool(true).render(BoolFormat::OnOff), "ON");
        assert_eq!(Value::Bool(false).render(BoolFormat::OneZero), "0");
        assert_eq!(Value::Bool(true).render(BoolFormat::TrueFalse), "TRUE");
    }

    #[test]
    fn test_proxy_arguments_quote_strings_only() {
        let bools = BoolFormat::OnOff;
        assert_eq!(Value::from("hello").render_argument(bools), "'hello'");
        assert_eq!(Value::from("it's").render_argument(bools), "'it''s'");
        assert_eq!(Value::Mnemonic("VOLT".into()).render_argument(bools), "VOLT");
        assert_eq!(Value::from(3).render_argument(bools), "3");
    }

    #[test]
    fn test_coercion_widens_ints_only() {
        assert_eq!(ParamType::Float.coerce(&Value::Int(2)), Some(Value::Float(2.0)));
        assert_eq!(ParamType::Int.coerce(&Value::Float(2.0)), None);
        assert_eq!(ParamType::Bool.coerce(&Value::Int(1)), None);
        assert_eq!(ParamType::String.coerce(&Value::Bool(true)), None);
        assert!(ParamType::String
            .coerce(&Value::Mnemonic("MAX".into()))
            .is_some());
    }

    #[test]
    fn test_loose_parsing() {
        assert_eq!(Value::parse_loose("true"), Value::Bool(true));
        assert_eq!(Value::parse_loose("42"), Value::Int(42));
        assert_eq!(Value::parse_loose("1.5"), Value::Float(1.5));
        assert_eq!(Value::parse_loose("VOLT"), Value::Str("VOLT".into()));
        assert_eq!(Value::parse_loose("nan"), Value::Str("nan".into()));
    }

    #[test]
    fn test_call_args_from_pairs() {
        let args = CallArgs::from_pairs(["voltage=1.5", "ON", "count=3"]);
        assert_eq!(args.get("voltage"), Some(&Value::Float(1.5)));
        assert_eq!(args.get("count"), Some(&Value::Int(3)));
        assert_eq!(args.positional(), &[Value::Str("ON".into())]);
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_param_type_names_deserialize() {
        let t: ParamType = serde_yaml::from_str("str").unwrap();
        assert_eq!(t, ParamType::String);
        let b: BoolFormat = serde_yaml::from_str("one_zero").unwrap();
        assert_eq!(b, BoolFormat::OneZero);
    }
}
