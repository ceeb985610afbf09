//! Structural equality of arbitrary serializable values.
//!
//! Both sides are rendered to JSON text and parsed back, so only what
//! survives JSON matters: field names follow serde attributes, map order is
//! irrelevant, and an integral float equals the matching integer. NaN and
//! the infinities have no JSON form and fail to convert.

use serde::Serialize;
use serde::ser::{self, Error as _, Serializer};
use thiserror::Error;

/// A value could not be rendered as JSON.
#[derive(Debug, Error)]
#[error("cannot convert value to JSON: {0}")]
pub struct ConversionError(#[from] serde_json::Error);

/// The canonical JSON form of `value`.
///
/// # Errors
///
/// Returns [`ConversionError`] if `value` fails to serialize, for example a
/// map with non-string keys or a non-finite float.
pub fn normalize<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value, ConversionError> {
    value.serialize(FiniteNumbers)?;
    let text = serde_json::to_vec(value)?;
    let parsed: serde_json::Value = serde_json::from_slice(&text)?;
    Ok(canonical_numbers(parsed))
}

/// True if `a` and `b` have the same canonical JSON form.
///
/// # Errors
///
/// Returns [`ConversionError`] if either side fails to serialize.
pub fn equal<A, B>(a: &A, b: &B) -> Result<bool, ConversionError>
where
    A: Serialize + ?Sized,
    B: Serialize + ?Sized,
{
    Ok(normalize(a)? == normalize(b)?)
}

/// Visits a value and fails on the first NaN or infinity. serde_json would
/// write those as `null`.
#[derive(Clone, Copy)]
struct FiniteNumbers;

type Checked = Result<(), serde_json::Error>;

fn finite(v: f64) -> Checked {
    if v.is_finite() {
        Ok(())
    } else {
        Err(serde_json::Error::custom(format!("{v} has no JSON representation")))
    }
}

macro_rules! accept {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(fn $method(self, _: $ty) -> Checked {
            Ok(())
        })*
    };
}

impl Serializer for FiniteNumbers {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_f32(self, v: f32) -> Checked {
        finite(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Checked {
        finite(v)
    }

    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _: &'static str, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
}

macro_rules! each_element {
    ($($trait:ident::$method:ident),* $(,)?) => {
        $(impl ser::$trait for FiniteNumbers {
            type Ok = ();
            type Error = serde_json::Error;

            fn $method<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
                value.serialize(*self)
            }

            fn end(self) -> Checked {
                Ok(())
            }
        })*
    };
}

each_element!(
    SerializeSeq::serialize_element,
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field,
);

impl ser::SerializeMap for FiniteNumbers {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Checked {
        key.serialize(*self)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

macro_rules! each_field {
    ($($trait:ident),* $(,)?) => {
        $(impl ser::$trait for FiniteNumbers {
            type Ok = ();
            type Error = serde_json::Error;

            fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
                value.serialize(*self)
            }

            fn end(self) -> Checked {
                Ok(())
            }
        })*
    };
}

each_field!(SerializeStruct, SerializeStructVariant);

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn canonical_numbers(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Json::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Json::from(f as i64)
            }
            _ => Json::Number(n),
        },
        Json::Array(items) => Json::Array(items.into_iter().map(canonical_numbers).collect()),
        Json::Object(map) => Json::Object(
            map.into_iter()
                .map(|(k, v)| (k, canonical_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::Serialize;
    use serde_json::json;

    use super::*;
    use crate::types::Value;

    #[derive(Serialize)]
    struct Person {
        name: String,
        age: u32,
        friends: Vec<String>,
    }

    #[test]
    fn struct_equals_its_document() {
        let person = Person {
            name: "Ann".into(),
            age: 30,
            friends: vec!["Bo".into()],
        };
        let doc = json!({"friends": ["Bo"], "age": 30, "name": "Ann"});
        assert!(equal(&person, &doc).unwrap());
    }

    #[test]
    fn string_is_not_a_number() {
        assert!(!equal(&json!("10"), &json!(10)).unwrap());
    }

    #[test]
    fn integral_float_equals_integer() {
        assert!(equal(&10.0_f64, &10_i64).unwrap());
        assert!(!equal(&10.5_f64, &10_i64).unwrap());
    }

    #[test]
    fn engine_values_compare_as_json() {
        let set = Value::Set([Value::from(2_i64), Value::from(1_i64)].into_iter().collect());
        assert!(equal(&set, &json!([1, 2])).unwrap());
    }

    #[test]
    fn map_order_is_irrelevant() {
        let a: HashMap<&str, i32> = [("x", 1), ("y", 2)].into_iter().collect();
        let b: BTreeMap<&str, i32> = [("y", 2), ("x", 1)].into_iter().collect();
        assert!(equal(&a, &b).unwrap());
    }

    #[test]
    fn non_finite_floats_fail_to_convert() {
        assert!(equal(&f64::NAN, &serde_json::Value::Null).is_err());
        assert!(equal(&f64::INFINITY, &()).is_err());
        assert!(equal(&json!(null), &f32::NEG_INFINITY).is_err());
        let err = normalize(&vec![1.0, f64::NEG_INFINITY]).unwrap_err();
        assert!(err.to_string().contains("-inf has no JSON representation"), "{err}");
    }

    #[test]
    fn non_finite_floats_are_found_when_nested() {
        let mut map = BTreeMap::new();
        map.insert("ratio", Some((1_u8, f64::NAN)));
        assert!(normalize(&map).is_err());
        let value = Value::Array(vec![Value::Number(crate::types::Number::Float(f64::NAN))]);
        assert!(normalize(&value).is_err());
        assert_eq!(normalize(&Some(1.5_f64)).unwrap(), json!(1.5));
    }

    #[test]
    fn non_string_keys_fail_to_convert() {
        let bad: BTreeMap<Vec<u8>, i32> = [(vec![1], 1)].into_iter().collect();
        assert!(equal(&bad, &json!({})).is_err());
    }
}
