//! # Type System for Path Parameters
//!
//! Casting of captured URL tokens into typed values.
//!
//! Casting never fails: a numeric capture that does not parse becomes `0`,
//! and a `bool` capture is `true` only for the literal token `"true"`.

use std::fmt;

/// Supported path parameter types
///
/// Declared in a pattern as `{type:name}`. Default is `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    /// String type (default) - no conversion
    #[default]
    String,
    /// Integer type - parses to i64
    Int,
    /// Float type - parses to f64
    Float,
    /// Any number - integer when possible, float otherwise
    Numeric,
    /// Boolean type - `true` only for the literal `"true"`
    Bool,
}

impl ParamType {
    /// Parse type specifier from route pattern (e.g., "int" from "{int:id}")
    ///
    /// Unknown specifiers fall back to `String`.
    #[must_use]
    pub fn from_specifier(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "int" => Self::Int,
            "float" => Self::Float,
            "numeric" => Self::Numeric,
            "bool" => Self::Bool,
            _ => Self::String,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Numeric => "numeric",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Converted parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// String value (no conversion performed)
    String(String),
    /// Integer value (i64)
    Int(i64),
    /// Float value (f64)
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl ParamValue {
    /// Get the value as a string
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Borrow the value if String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if Int variant
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if Float variant, or Int widened to f64
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as bool if Bool variant
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Name and type of one capture in a route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    /// Capture name as written in the pattern
    pub name: String,
    /// Declared type
    pub param_type: ParamType,
}

impl ParamDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
        }
    }
}

/// A single captured parameter
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedParam {
    /// Capture name
    pub name: String,
    /// Cast value
    pub value: ParamValue,
}

/// Captured parameters in pattern order
///
/// Order follows where each capture appears in the route pattern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<CapturedParam>,
}

impl Params {
    /// Create an empty parameter list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a captured parameter
    pub fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.entries.push(CapturedParam {
            name: name.into(),
            value,
        });
    }

    /// Value at a position
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&ParamValue> {
        self.entries.get(index).map(|p| &p.value)
    }

    /// First value captured under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Get a parameter as i64 (convenience method)
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    /// Get a parameter as f64 (convenience method)
    #[must_use]
    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_float)
    }

    /// Get a parameter as bool (convenience method)
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    /// Get a parameter as &str (convenience method)
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    /// All values in order
    pub fn values(&self) -> impl Iterator<Item = &ParamValue> {
        self.entries.iter().map(|p| &p.value)
    }

    /// All entries in order
    pub fn iter(&self) -> std::slice::Iter<'_, CapturedParam> {
        self.entries.iter()
    }

    /// Number of captured parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a CapturedParam;
    type IntoIter = std::slice::Iter<'a, CapturedParam>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Convert raw string to typed value based on `ParamType`
///
/// All type conversion logic is centralized here.
#[must_use]
pub fn cast_param(raw: &str, param_type: ParamType) -> ParamValue {
    match param_type {
        ParamType::String => ParamValue::String(raw.to_string()),
        // The whole token must parse; "12abc" and "1.5" are 0.
        ParamType::Int => ParamValue::Int(raw.parse::<i64>().unwrap_or(0)),
        ParamType::Float => ParamValue::Float(parse_float(raw).unwrap_or(0.0)),
        ParamType::Numeric => raw.parse::<i64>().map_or_else(
            |_| parse_float(raw).map_or(ParamValue::Int(0), ParamValue::Float),
            ParamValue::Int,
        ),
        // "TRUE", "1" and "yes" are all false here.
        ParamType::Bool => ParamValue::Bool(raw == "true"),
    }
}

// Rust accepts "inf" and "nan"; those are not numbers in a URL.
fn parse_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a capture token to extract name and type
///
/// Examples:
/// - `{id}` -> ("id", ParamType::String)
/// - `{int:id}` -> ("id", ParamType::Int)
/// - `{float:price}` -> ("price", ParamType::Float)
///
/// # Returns
///
/// `Some(descriptor)` if the token is a capture, `None` if it is static.
#[must_use]
pub fn parse_param_pattern(token: &str) -> Option<ParamDescriptor> {
    let inner = token.strip_prefix('{')?.strip_suffix('}')?;
    match inner.split_once(':') {
        Some((type_spec, name)) => Some(ParamDescriptor::new(
            name.trim(),
            ParamType::from_specifier(type_spec.trim()),
        )),
        None => Some(ParamDescriptor::new(inner.trim(), ParamType::String)),
    }
}

/// Fold one pattern token and its URL token into the accumulator
///
/// Non-capturing tokens leave the accumulator unchanged. A missing
/// accumulator starts out empty.
#[must_use]
pub fn capture_route_parameter(token: &str, url_token: &str, acc: Option<Params>) -> Params {
    let mut params = acc.unwrap_or_default();
    if let Some(descriptor) = parse_param_pattern(token) {
        params.push(descriptor.name, cast_param(url_token, descriptor.param_type));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_from_specifier() {
        assert_eq!(ParamType::from_specifier("int"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("INT"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("float"), ParamType::Float);
        assert_eq!(ParamType::from_specifier("numeric"), ParamType::Numeric);
        assert_eq!(ParamType::from_specifier("bool"), ParamType::Bool);
        assert_eq!(ParamType::from_specifier("string"), ParamType::String);
        assert_eq!(ParamType::from_specifier("unknown"), ParamType::String);
    }

    #[test]
    fn test_cast_string() {
        assert_eq!(
            cast_param("Hello", ParamType::String),
            ParamValue::String("Hello".to_string())
        );
    }

    #[test]
    fn test_cast_int() {
        assert_eq!(cast_param("1", ParamType::Int), ParamValue::Int(1));
        assert_eq!(cast_param("-456", ParamType::Int), ParamValue::Int(-456));
        assert_eq!(cast_param("abc", ParamType::Int), ParamValue::Int(0));
    }

    #[test]
    fn test_cast_float() {
        assert_eq!(cast_param("33.5", ParamType::Float), ParamValue::Float(33.5));
        assert_eq!(cast_param("x", ParamType::Float), ParamValue::Float(0.0));
        assert_eq!(cast_param("inf", ParamType::Float), ParamValue::Float(0.0));
    }

    #[test]
    fn test_cast_numeric() {
        assert_eq!(cast_param("notnumber", ParamType::Numeric), ParamValue::Int(0));
        assert_eq!(cast_param("42", ParamType::Numeric), ParamValue::Int(42));
        assert_eq!(cast_param("4.25", ParamType::Numeric), ParamValue::Float(4.25));
    }

    #[test]
    fn test_cast_bool_is_strict() {
        assert_eq!(cast_param("true", ParamType::Bool), ParamValue::Bool(true));
        assert_eq!(cast_param("false", ParamType::Bool), ParamValue::Bool(false));
        assert_eq!(cast_param("0", ParamType::Bool), ParamValue::Bool(false));
        // Only the exact lowercase literal counts as true.
        assert_eq!(cast_param("TRUE", ParamType::Bool), ParamValue::Bool(false));
        assert_eq!(cast_param("1", ParamType::Bool), ParamValue::Bool(false));
    }

    #[test]
    fn test_cast_int_is_whole_token() {
        // No prefix parsing: a partly numeric token is not an int.
        assert_eq!(cast_param("12abc", ParamType::Int), ParamValue::Int(0));
        assert_eq!(cast_param("1.5", ParamType::Int), ParamValue::Int(0));
        assert_eq!(cast_param("+7", ParamType::Int), ParamValue::Int(7));
    }

    #[test]
    fn test_parse_param_pattern() {
        assert_eq!(
            parse_param_pattern("{id}"),
            Some(ParamDescriptor::new("id", ParamType::String))
        );
        assert_eq!(
            parse_param_pattern("{int:id}"),
            Some(ParamDescriptor::new("id", ParamType::Int))
        );
        assert_eq!(
            parse_param_pattern("{float:price}"),
            Some(ParamDescriptor::new("price", ParamType::Float))
        );
        assert_eq!(parse_param_pattern("static"), None);
    }

    #[test]
    fn test_capture_route_parameter_identity_for_literals() {
        let mut acc = Params::new();
        acc.push("a", ParamValue::Int(1));
        let out = capture_route_parameter("users", "users", Some(acc.clone()));
        assert_eq!(out, acc);
    }

    #[test]
    fn test_capture_route_parameter_initializes_accumulator() {
        let out = capture_route_parameter("{int:x}", "7", None);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get_int("x"), Some(7));
    }

    #[test]
    fn test_params_lookup() {
        let mut params = Params::new();
        params.push("user", ParamValue::String("ann".to_string()));
        params.push("page", ParamValue::Int(2));

        assert_eq!(params.get_str("user"), Some("ann"));
        assert_eq!(params.get_int("page"), Some(2));
        assert_eq!(params.value(1), Some(&ParamValue::Int(2)));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_param_value_as_string() {
        assert_eq!(ParamValue::Int(42).as_string(), "42");
        assert_eq!(ParamValue::Float(3.5).as_string(), "3.5");
        assert_eq!(ParamValue::Bool(true).as_string(), "true");
    }
}
