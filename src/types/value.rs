use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

/// A numeric value. Integers stay exact; anything else is an `f64`.
///
/// Equality and ordering are numeric, so `Int(1) == Float(1.0)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    /// Returns the value as an integer if it has no fractional part.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(v) => Some(v),
            Number::Float(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
                Some(v as i64)
            }
            Number::Float(_) => None,
        }
    }

    /// Collapse integral floats to `Int`, leave everything else as is.
    #[must_use]
    pub fn normalized(self) -> Number {
        match self.as_i64() {
            Some(v) => Number::Int(v),
            None => self,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(b),
            (Number::Int(a), Number::Float(b)) => cmp_int_float(*a, *b),
            (Number::Float(a), Number::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Number::Float(a), Number::Float(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
        }
    }
}

/// Compare without rounding the integer to `f64`, which loses precision past 2^53.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63, the first float above every i64.
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return (int as f64).total_cmp(&float);
    }
    if float >= BOUND {
        return Ordering::Less;
    }
    if float < -BOUND {
        return Ordering::Greater;
    }
    let fract = float.fract();
    int.cmp(&(float.trunc() as i64)).then(if fract > 0.0 {
        Ordering::Less
    } else if fract < 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{v}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A document value produced by evaluation or supplied as `input`/`data`.
///
/// Values have a total order across types (null < bool < number < string <
/// array < object < set), which is what comparison operators and set/object
/// key ordering use.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<Value, Value>),
    Set(BTreeSet<Value>),
}

impl Value {
    /// Name of the value's type, as reported by `type_name` and in type errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
        }
    }

    #[must_use]
    pub fn empty_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a single key: object field, array index or set member.
    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match (self, key) {
            (Value::Object(map), _) => map.get(key),
            (Value::Array(items), Value::Number(n)) => {
                let idx = usize::try_from(n.as_i64()?).ok()?;
                items.get(idx)
            }
            (Value::Set(items), _) => items.get(key),
            _ => None,
        }
    }

    /// Look up a field by name. Shorthand for `get(&Value::String(..))`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.get(&Value::String(name.to_owned()))
    }

    /// Convert to a JSON document. Sets become sorted arrays and non-string
    /// object keys are rendered as their JSON text.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(Number::Int(v)) => serde_json::Value::from(*v),
            Value::Number(Number::Float(v)) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => items.iter().map(Value::to_json).collect(),
            Value::Set(items) => items.iter().map(Value::to_json).collect(),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.key_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn key_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Number(Number::Int(i)),
                None => Value::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (Value::String(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::Float(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Number> for Value {
    fn from(v: Number) -> Self {
        Value::Number(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(Number::Int(v)) => serializer.serialize_i64(*v),
            Value::Number(Number::Float(v)) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(&k.key_string(), v)?;
                }
                out.end()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Set(items) => {
                if items.is_empty() {
                    return write!(f, "set()");
                }
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_i64() {
        assert_eq!(Value::from(42_i64), Value::Number(Number::Int(42)));
    }

    #[test]
    fn from_str() {
        assert_eq!(Value::from("hello"), Value::String("hello".to_owned()));
    }

    #[test]
    fn int_float_numeric_equality() {
        assert_eq!(Number::Int(10), Number::Float(10.0));
        assert!(Number::Int(10) < Number::Float(10.5));
        assert_eq!(Value::from(3_i64), Value::from(3.0_f64));
    }

    #[test]
    fn mixed_ordering_is_exact_past_f64_precision() {
        let two_63 = Number::Float(9_223_372_036_854_775_808.0);
        assert!(Number::Int(i64::MAX) < two_63);
        assert!(Number::Int(i64::MAX - 1) < two_63);
        assert!(Number::Int(i64::MAX - 1) < Number::Int(i64::MAX));
        let set: BTreeSet<Number> = [Number::Int(i64::MAX), Number::Int(i64::MAX - 1), two_63].into();
        assert_eq!(set.len(), 3);

        let two_53 = Number::Float(9_007_199_254_740_992.0);
        assert!(Number::Int(9_007_199_254_740_993) > two_53);
        assert_eq!(Number::Int(9_007_199_254_740_992), two_53);
        assert!(two_53 < Number::Int(9_007_199_254_740_993));
    }

    #[test]
    fn mixed_ordering_handles_fractions_and_extremes() {
        assert!(Number::Int(0) > Number::Float(-0.5));
        assert!(Number::Int(-1) < Number::Float(-0.5));
        assert_eq!(Number::Int(0), Number::Float(-0.0));
        assert!(Number::Int(i64::MIN) > Number::Float(f64::NEG_INFINITY));
        assert_eq!(Number::Int(i64::MIN), Number::Float(-9_223_372_036_854_775_808.0));
        assert!(Number::Int(i64::MAX) < Number::Float(f64::INFINITY));
        assert!(Number::Int(3) < Number::Float(f64::NAN));
    }

    #[test]
    fn normalized_collapses_integral_floats() {
        assert!(matches!(Number::Float(4.0).normalized(), Number::Int(4)));
        assert!(matches!(Number::Float(4.5).normalized(), Number::Float(_)));
    }

    #[test]
    fn cross_type_ordering() {
        let mut values = vec![
            Value::from("a"),
            Value::Null,
            Value::from(1_i64),
            Value::Bool(false),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![Value::Null, Value::Bool(false), Value::from(1_i64), Value::from("a")]
        );
    }

    #[test]
    fn from_json_document() {
        let v = Value::from(json!({"a": [1, 2.5, "x"], "b": null}));
        assert_eq!(
            v.field("a"),
            Some(&Value::Array(vec![
                Value::from(1_i64),
                Value::from(2.5_f64),
                Value::from("x"),
            ]))
        );
        assert_eq!(v.field("b"), Some(&Value::Null));
    }

    #[test]
    fn set_serializes_as_sorted_array() {
        let set = Value::Set([Value::from(3_i64), Value::from(1_i64)].into_iter().collect());
        assert_eq!(serde_json::to_value(&set).unwrap(), json!([1, 3]));
        assert_eq!(set.to_json(), json!([1, 3]));
    }

    #[test]
    fn non_string_keys_render_as_json_text() {
        let mut map = BTreeMap::new();
        map.insert(Value::from(1_i64), Value::from("one"));
        let obj = Value::Object(map);
        assert_eq!(obj.to_json(), json!({"1": "one"}));
    }

    #[test]
    fn get_array_index_and_set_member() {
        let arr = Value::Array(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(arr.get(&Value::from(1_i64)), Some(&Value::from("b")));
        assert_eq!(arr.get(&Value::from(2_i64)), None);
        assert_eq!(arr.get(&Value::from(-1_i64)), None);

        let set = Value::Set([Value::from("x")].into_iter().collect());
        assert_eq!(set.get(&Value::from("x")), Some(&Value::from("x")));
        assert_eq!(set.get(&Value::from("y")), None);
    }

    #[test]
    fn display() {
        assert_eq!(Value::from(42_i64).to_string(), "42");
        assert_eq!(Value::from("hi").to_string(), "\"hi\"");
        assert_eq!(Value::Set(BTreeSet::new()).to_string(), "set()");
        assert_eq!(
            Value::Array(vec![Value::Bool(true), Value::Null]).to_string(),
            "[true, null]"
        );
    }
}
