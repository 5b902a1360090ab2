//! Dynamically typed values and result rows.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FieldError;

/// A scalar exchanged with a driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the variant, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    /// Whether the value reads as a number, including numeric strings.
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::Integer(_) => true,
            Self::Real(f) => f.is_finite(),
            Self::Text(s) => is_numeric_str(s),
            Self::Null | Self::Blob(_) => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Numeric string check: optional surrounding whitespace, optional sign,
/// digits with an optional fraction, optional exponent. Hex, `inf` and `nan`
/// are not numeric.
pub fn is_numeric_str(s: &str) -> bool {
    let bytes = s.trim().as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;

    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
    }
    if int_digits == 0 && frac_digits == 0 {
        return false;
    }

    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// One result row: column names paired with values, in column order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Typed lookup. A missing column is reported as an unknown field.
    pub fn decode<T: FromValue>(&self, column: &str) -> Result<T, FieldError> {
        let value = self
            .get(column)
            .ok_or_else(|| FieldError::Unknown(column.to_string()))?;
        T::from_value(column, value.clone())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Conversion from a [`Value`] into a typed entity field.
pub trait FromValue: Sized {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError>;
}

fn mismatch(field: &str, expected: &'static str, value: &Value) -> FieldError {
    FieldError::Type {
        field: field.to_string(),
        expected,
        found: value.kind(),
    }
}

impl FromValue for Value {
    fn from_value(_field: &str, value: Value) -> Result<Self, FieldError> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Integer(i) => Ok(i),
            Value::Text(ref s) => s.trim().parse().map_err(|_| mismatch(field, "integer", &value)),
            other => Err(mismatch(field, "integer", &other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        let wide = i64::from_value(field, value)?;
        i32::try_from(wide).map_err(|_| FieldError::Type {
            field: field.to_string(),
            expected: "32-bit integer",
            found: "integer",
        })
    }
}

impl FromValue for u64 {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        let wide = i64::from_value(field, value)?;
        u64::try_from(wide).map_err(|_| FieldError::Type {
            field: field.to_string(),
            expected: "unsigned integer",
            found: "integer",
        })
    }
}

impl FromValue for f64 {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Real(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(i) => Ok(i as f64),
            Value::Text(ref s) => s.trim().parse().map_err(|_| mismatch(field, "real", &value)),
            other => Err(mismatch(field, "real", &other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Integer(i) => Ok(i != 0),
            Value::Text(ref s) => match s.as_str() {
                "1" | "true" => Ok(true),
                "0" | "false" | "" => Ok(false),
                _ => Err(mismatch(field, "boolean", &value)),
            },
            other => Err(mismatch(field, "boolean", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Integer(_) | Value::Real(_) => Ok(value.to_string()),
            Value::Blob(b) => String::from_utf8(b).map_err(|_| FieldError::Type {
                field: field.to_string(),
                expected: "text",
                found: "blob",
            }),
            Value::Null => Err(mismatch(field, "text", &value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Blob(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch(field, "blob", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(field: &str, value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(field, other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn numeric_strings() {
        for s in ["42", "-7", "+3", "3.14", ".5", "5.", "1e10", "2.5E-3", " 12 ", "0"] {
            assert!(is_numeric_str(s), "{s:?} should be numeric");
        }
    }

    #[test]
    fn non_numeric_strings() {
        for s in ["", " ", "abc", "1a", "0x1A", "1e", "e5", "-", ".", "1.2.3", "inf", "NaN", "1 2"] {
            assert!(!is_numeric_str(s), "{s:?} should not be numeric");
        }
    }

    #[test]
    fn value_numeric_classification() {
        assert!(Value::Integer(42).is_numeric());
        assert!(Value::Real(1.5).is_numeric());
        assert!(!Value::Real(f64::NAN).is_numeric());
        assert!(Value::from("17").is_numeric());
        assert!(!Value::Null.is_numeric());
        assert!(!Value::Blob(b"1".to_vec()).is_numeric());
    }

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(true), Value::Integer(1));
    }

    #[test]
    fn row_lookup_preserves_order() {
        let row: Row = [("id", Value::Integer(1)), ("name", Value::from("x"))]
            .into_iter()
            .collect();
        assert_eq!(row.len(), 2);
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.get("name"), Some(&Value::Text("x".into())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn row_decode_typed() {
        let row: Row = [("id", Value::Integer(1)), ("score", Value::from("2.5"))]
            .into_iter()
            .collect();
        assert_eq!(row.decode::<i64>("id").unwrap(), 1);
        assert_eq!(row.decode::<f64>("score").unwrap(), 2.5);
        assert_matches!(row.decode::<i64>("nope"), Err(FieldError::Unknown(f)) if f == "nope");
    }

    #[test]
    fn decode_type_mismatch() {
        let err = i64::from_value("id", Value::Blob(vec![1])).unwrap_err();
        assert_eq!(
            err,
            FieldError::Type {
                field: "id".into(),
                expected: "integer",
                found: "blob"
            }
        );
    }

    #[test]
    fn decode_optional() {
        assert_eq!(Option::<String>::from_value("n", Value::Null).unwrap(), None);
        assert_eq!(
            Option::<String>::from_value("n", Value::from("a")).unwrap(),
            Some("a".to_string())
        );
        assert!(String::from_value("n", Value::Null).is_err());
    }

    #[test]
    fn decode_narrow_integers() {
        assert_eq!(i32::from_value("n", Value::Integer(7)).unwrap(), 7);
        assert!(i32::from_value("n", Value::Integer(i64::MAX)).is_err());
        assert!(u64::from_value("n", Value::Integer(-1)).is_err());
    }

    #[test]
    fn decode_bool() {
        assert!(bool::from_value("b", Value::Integer(1)).unwrap());
        assert!(!bool::from_value("b", Value::from("0")).unwrap());
        assert!(bool::from_value("b", Value::from("maybe")).is_err());
    }

    proptest! {
        #[test]
        fn integers_are_numeric(n in any::<i64>()) {
            prop_assert!(is_numeric_str(&n.to_string()));
        }

        #[test]
        fn finite_floats_are_numeric(f in proptest::num::f64::NORMAL) {
            prop_assert!(is_numeric_str(&f.to_string()));
        }

        #[test]
        fn alphabetic_text_is_not_numeric(s in "[a-zA-Z]{1,12}") {
            // Exponent markers alone never form a number.
            prop_assert!(!is_numeric_str(&s));
        }
    }
}
