//! Builtin functions callable from policy source.
//!
//! Every builtin takes fully evaluated arguments. `Ok(None)` means the call is
//! undefined; `Err` is an evaluation failure.

use std::collections::BTreeSet;

use crate::types::{Number, Value};

pub(crate) type BuiltinResult = Result<Option<Value>, String>;

pub(crate) struct Builtin {
    pub(crate) name: &'static str,
    pub(crate) arity: usize,
    pub(crate) func: fn(&[Value]) -> BuiltinResult,
}

macro_rules! builtin {
    ($name:literal, $arity:literal, $func:expr) => {
        Builtin {
            name: $name,
            arity: $arity,
            func: $func,
        }
    };
}

static BUILTINS: &[Builtin] = &[
    builtin!("plus", 2, plus),
    builtin!("minus", 2, minus),
    builtin!("mul", 2, mul),
    builtin!("div", 2, div),
    builtin!("rem", 2, rem),
    builtin!("and", 2, and),
    builtin!("abs", 1, abs),
    builtin!("round", 1, round),
    builtin!("ceil", 1, ceil),
    builtin!("floor", 1, floor),
    builtin!("count", 1, count),
    builtin!("sum", 1, sum),
    builtin!("product", 1, product),
    builtin!("max", 1, max),
    builtin!("min", 1, min),
    builtin!("sort", 1, sort),
    builtin!("concat", 2, concat),
    builtin!("contains", 2, contains),
    builtin!("startswith", 2, startswith),
    builtin!("endswith", 2, endswith),
    builtin!("lower", 1, lower),
    builtin!("upper", 1, upper),
    builtin!("split", 2, split),
    builtin!("trim", 2, trim),
    builtin!("replace", 3, replace),
    builtin!("sprintf", 2, sprintf),
    builtin!("to_number", 1, to_number),
    builtin!("type_name", 1, type_name),
    builtin!("is_null", 1, |a| is_type(a, "null")),
    builtin!("is_boolean", 1, |a| is_type(a, "boolean")),
    builtin!("is_number", 1, |a| is_type(a, "number")),
    builtin!("is_string", 1, |a| is_type(a, "string")),
    builtin!("is_array", 1, |a| is_type(a, "array")),
    builtin!("is_object", 1, |a| is_type(a, "object")),
    builtin!("is_set", 1, |a| is_type(a, "set")),
    builtin!("array.concat", 2, array_concat),
    builtin!("array.slice", 3, array_slice),
    builtin!("object.get", 3, object_get),
    builtin!("union", 1, union),
    builtin!("intersection", 1, intersection),
    builtin!("http.send", 1, http_send),
];

pub(crate) fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

// -- Argument helpers -------------------------------------------------------

fn type_error(position: usize, expected: &str, got: &Value) -> String {
    format!(
        "operand {} must be {expected} but got {}",
        position + 1,
        got.type_name()
    )
}

fn number_arg(args: &[Value], position: usize) -> Result<Number, String> {
    match args.get(position) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(type_error(position, "number", other)),
        None => Err(format!("missing operand {}", position + 1)),
    }
}

fn string_arg(args: &[Value], position: usize) -> Result<&str, String> {
    match args.get(position) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(type_error(position, "string", other)),
        None => Err(format!("missing operand {}", position + 1)),
    }
}

fn set_arg(args: &[Value], position: usize) -> Result<&BTreeSet<Value>, String> {
    match args.get(position) {
        Some(Value::Set(s)) => Ok(s),
        Some(other) => Err(type_error(position, "set", other)),
        None => Err(format!("missing operand {}", position + 1)),
    }
}

fn array_arg(args: &[Value], position: usize) -> Result<&[Value], String> {
    match args.get(position) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(type_error(position, "array", other)),
        None => Err(format!("missing operand {}", position + 1)),
    }
}

/// Members of an array or set.
fn collection_arg(args: &[Value], position: usize) -> Result<Vec<&Value>, String> {
    match args.get(position) {
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(Value::Set(items)) => Ok(items.iter().collect()),
        Some(other) => Err(type_error(position, "array or set", other)),
        None => Err(format!("missing operand {}", position + 1)),
    }
}

fn numbers(values: &[&Value]) -> Result<Vec<Number>, String> {
    values
        .iter()
        .map(|v| {
            v.as_number()
                .ok_or_else(|| format!("expected number elements but got {}", v.type_name()))
        })
        .collect()
}

fn int_or_float(
    a: Number,
    b: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Number {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            int_op(x, y).map_or_else(|| Number::Float(float_op(a.as_f64(), b.as_f64())), Number::Int)
        }
        _ => Number::Float(float_op(a.as_f64(), b.as_f64())).normalized(),
    }
}

fn number(n: Number) -> BuiltinResult {
    Ok(Some(Value::Number(n)))
}

// -- Arithmetic -------------------------------------------------------------

fn plus(args: &[Value]) -> BuiltinResult {
    let (a, b) = (number_arg(args, 0)?, number_arg(args, 1)?);
    number(int_or_float(a, b, i64::checked_add, |x, y| x + y))
}

/// Numeric subtraction, or set difference.
fn minus(args: &[Value]) -> BuiltinResult {
    if let [Value::Set(a), Value::Set(b)] = args {
        return Ok(Some(Value::Set(a.difference(b).cloned().collect())));
    }
    let (a, b) = (number_arg(args, 0)?, number_arg(args, 1)?);
    number(int_or_float(a, b, i64::checked_sub, |x, y| x - y))
}

fn mul(args: &[Value]) -> BuiltinResult {
    let (a, b) = (number_arg(args, 0)?, number_arg(args, 1)?);
    number(int_or_float(a, b, i64::checked_mul, |x, y| x * y))
}

fn div(args: &[Value]) -> BuiltinResult {
    let (a, b) = (number_arg(args, 0)?, number_arg(args, 1)?);
    if b.as_f64() == 0.0 {
        return Err("divide by zero".into());
    }
    let exact = |x: i64, y: i64| (x.checked_rem(y) == Some(0)).then(|| x.checked_div(y)).flatten();
    number(int_or_float(a, b, exact, |x, y| x / y))
}

fn rem(args: &[Value]) -> BuiltinResult {
    let (a, b) = (number_arg(args, 0)?, number_arg(args, 1)?);
    let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) else {
        return Err("modulo on floating-point number".into());
    };
    if y == 0 {
        return Err("modulo by zero".into());
    }
    number(Number::Int(x.checked_rem(y).unwrap_or(0)))
}

/// Set intersection (`&`).
fn and(args: &[Value]) -> BuiltinResult {
    let (a, b) = (set_arg(args, 0)?, set_arg(args, 1)?);
    Ok(Some(Value::Set(a.intersection(b).cloned().collect())))
}

fn abs(args: &[Value]) -> BuiltinResult {
    match number_arg(args, 0)? {
        Number::Int(v) => number(v.checked_abs().map_or(Number::Float(v.unsigned_abs() as f64), Number::Int)),
        Number::Float(v) => number(Number::Float(v.abs())),
    }
}

fn float_to_number(f: f64) -> BuiltinResult {
    number(Number::Float(f).normalized())
}

fn round(args: &[Value]) -> BuiltinResult {
    float_to_number(number_arg(args, 0)?.as_f64().round())
}

fn ceil(args: &[Value]) -> BuiltinResult {
    float_to_number(number_arg(args, 0)?.as_f64().ceil())
}

fn floor(args: &[Value]) -> BuiltinResult {
    float_to_number(number_arg(args, 0)?.as_f64().floor())
}

// -- Aggregates -------------------------------------------------------------

fn count(args: &[Value]) -> BuiltinResult {
    let n = match args.first() {
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        Some(Value::Set(items)) => items.len(),
        Some(other) => return Err(type_error(0, "string, array, object or set", other)),
        None => return Err("missing operand 1".into()),
    };
    number(Number::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn sum(args: &[Value]) -> BuiltinResult {
    let items = numbers(&collection_arg(args, 0)?)?;
    let total = items
        .into_iter()
        .fold(Number::Int(0), |acc, n| int_or_float(acc, n, i64::checked_add, |x, y| x + y));
    number(total)
}

fn product(args: &[Value]) -> BuiltinResult {
    let items = numbers(&collection_arg(args, 0)?)?;
    let total = items
        .into_iter()
        .fold(Number::Int(1), |acc, n| int_or_float(acc, n, i64::checked_mul, |x, y| x * y));
    number(total)
}

fn max(args: &[Value]) -> BuiltinResult {
    Ok(collection_arg(args, 0)?.into_iter().max().cloned())
}

fn min(args: &[Value]) -> BuiltinResult {
    Ok(collection_arg(args, 0)?.into_iter().min().cloned())
}

fn sort(args: &[Value]) -> BuiltinResult {
    let mut items: Vec<Value> = collection_arg(args, 0)?.into_iter().cloned().collect();
    items.sort();
    Ok(Some(Value::Array(items)))
}

// -- Strings ----------------------------------------------------------------

fn concat(args: &[Value]) -> BuiltinResult {
    let delimiter = string_arg(args, 0)?;
    let parts = collection_arg(args, 1)?
        .into_iter()
        .map(|v| {
            v.as_str()
                .ok_or_else(|| format!("expected string elements but got {}", v.type_name()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Value::from(parts.join(delimiter))))
}

fn contains(args: &[Value]) -> BuiltinResult {
    let (haystack, needle) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(Some(Value::Bool(haystack.contains(needle))))
}

fn startswith(args: &[Value]) -> BuiltinResult {
    let (s, prefix) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(Some(Value::Bool(s.starts_with(prefix))))
}

fn endswith(args: &[Value]) -> BuiltinResult {
    let (s, suffix) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(Some(Value::Bool(s.ends_with(suffix))))
}

fn lower(args: &[Value]) -> BuiltinResult {
    Ok(Some(Value::from(string_arg(args, 0)?.to_lowercase())))
}

fn upper(args: &[Value]) -> BuiltinResult {
    Ok(Some(Value::from(string_arg(args, 0)?.to_uppercase())))
}

fn split(args: &[Value]) -> BuiltinResult {
    let (s, delimiter) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(Some(Value::Array(s.split(delimiter).map(Value::from).collect())))
}

fn trim(args: &[Value]) -> BuiltinResult {
    let (s, cutset) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(Some(Value::from(s.trim_matches(|c| cutset.contains(c)))))
}

fn replace(args: &[Value]) -> BuiltinResult {
    let (s, old, new) = (string_arg(args, 0)?, string_arg(args, 1)?, string_arg(args, 2)?);
    Ok(Some(Value::from(s.replace(old, new))))
}

/// `%v`, `%s` and `%d` verbs plus `%%`.
fn sprintf(args: &[Value]) -> BuiltinResult {
    let format = string_arg(args, 0)?;
    let values = array_arg(args, 1)?;
    let mut values = values.iter();
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('v' | 's' | 'd')) => {
                let Some(value) = values.next() else {
                    out.push_str("%!");
                    out.push(verb);
                    out.push_str("(MISSING)");
                    continue;
                };
                match (verb, value) {
                    ('d', Value::Number(n)) => match n.as_i64() {
                        Some(i) => out.push_str(&i.to_string()),
                        None => out.push_str(&n.to_string()),
                    },
                    (_, Value::String(s)) => out.push_str(s),
                    (_, other) => out.push_str(&other.to_string()),
                }
            }
            Some(other) => return Err(format!("unsupported format verb %{other}")),
            None => out.push('%'),
        }
    }
    Ok(Some(Value::from(out)))
}

// -- Types ------------------------------------------------------------------

fn to_number(args: &[Value]) -> BuiltinResult {
    match args.first() {
        Some(Value::Null) => number(Number::Int(0)),
        Some(Value::Bool(b)) => number(Number::Int(i64::from(*b))),
        Some(Value::Number(n)) => number(*n),
        Some(Value::String(s)) => {
            let n = serde_json::from_str::<serde_json::Number>(s.trim())
                .map_err(|_| format!("invalid syntax: {s:?}"))?;
            match Value::from(serde_json::Value::Number(n)) {
                Value::Number(n) => number(n),
                _ => Err(format!("invalid syntax: {s:?}")),
            }
        }
        Some(other) => Err(type_error(0, "null, boolean, number or string", other)),
        None => Err("missing operand 1".into()),
    }
}

fn type_name(args: &[Value]) -> BuiltinResult {
    Ok(args.first().map(|v| Value::from(v.type_name())))
}

fn is_type(args: &[Value], name: &str) -> BuiltinResult {
    Ok(args.first().map(|v| Value::Bool(v.type_name() == name)))
}

// -- Collections ------------------------------------------------------------

fn array_concat(args: &[Value]) -> BuiltinResult {
    let (a, b) = (array_arg(args, 0)?, array_arg(args, 1)?);
    Ok(Some(Value::Array(a.iter().chain(b).cloned().collect())))
}

/// Out-of-range bounds are clamped.
fn array_slice(args: &[Value]) -> BuiltinResult {
    let items = array_arg(args, 0)?;
    let bound = |position| -> Result<usize, String> {
        let n = number_arg(args, position)?
            .as_i64()
            .ok_or_else(|| format!("operand {} must be an integer", position + 1))?;
        Ok(usize::try_from(n.max(0)).unwrap_or(usize::MAX).min(items.len()))
    };
    let (start, stop) = (bound(1)?, bound(2)?);
    if start >= stop {
        return Ok(Some(Value::Array(Vec::new())));
    }
    Ok(Some(Value::Array(items[start..stop].to_vec())))
}

fn object_get(args: &[Value]) -> BuiltinResult {
    let Some(Value::Object(map)) = args.first() else {
        return Err(type_error(0, "object", args.first().unwrap_or(&Value::Null)));
    };
    let (Some(key), Some(default)) = (args.get(1), args.get(2)) else {
        return Err("missing operand".into());
    };
    Ok(Some(map.get(key).unwrap_or(default).clone()))
}

fn sets_of(args: &[Value]) -> Result<Vec<&BTreeSet<Value>>, String> {
    set_arg(args, 0)?
        .iter()
        .map(|v| match v {
            Value::Set(s) => Ok(s),
            other => Err(format!("expected set elements but got {}", other.type_name())),
        })
        .collect()
}

fn union(args: &[Value]) -> BuiltinResult {
    let merged = sets_of(args)?.into_iter().flatten().cloned().collect();
    Ok(Some(Value::Set(merged)))
}

fn intersection(args: &[Value]) -> BuiltinResult {
    let sets = sets_of(args)?;
    let Some((first, rest)) = sets.split_first() else {
        return Ok(Some(Value::Set(BTreeSet::new())));
    };
    let common = first
        .iter()
        .filter(|v| rest.iter().all(|s| s.contains(*v)))
        .cloned()
        .collect();
    Ok(Some(Value::Set(common)))
}

// -- Network ----------------------------------------------------------------

const REQUIRED_REQUEST_KEYS: [&str; 2] = ["method", "url"];

/// Network access is never available. Requests missing required keys fail
/// with a distinct message.
fn http_send(args: &[Value]) -> BuiltinResult {
    let Some(Value::Object(request)) = args.first() else {
        return Err(type_error(0, "object", args.first().unwrap_or(&Value::Null)));
    };
    let missing: Vec<&str> = REQUIRED_REQUEST_KEYS
        .into_iter()
        .filter(|key| !request.contains_key(&Value::from(*key)))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "missing required request parameters: {}",
            missing.join(", ")
        ));
    }
    let url = request
        .get(&Value::from("url"))
        .map(ToString::to_string)
        .unwrap_or_default();
    Err(format!("network access is disabled: cannot reach {url}"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn call(name: &str, args: &[Value]) -> BuiltinResult {
        let builtin = lookup(name).unwrap();
        assert_eq!(builtin.arity, args.len(), "arity of {name}");
        (builtin.func)(args)
    }

    fn int(v: i64) -> Value {
        Value::from(v)
    }

    fn object_from(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (Value::from(*k), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn set(items: &[i64]) -> Value {
        Value::Set(items.iter().map(|v| int(*v)).collect())
    }

    #[test]
    fn lookup_unknown_is_none() {
        assert!(lookup("frobnicate").is_none());
        assert!(lookup("http.send").is_some());
    }

    #[test]
    fn integer_arithmetic_stays_exact() {
        assert_eq!(call("plus", &[int(1), int(2)]), Ok(Some(int(3))));
        assert_eq!(call("mul", &[int(4), int(5)]), Ok(Some(int(20))));
        assert_eq!(call("div", &[int(9), int(3)]), Ok(Some(int(3))));
        assert_eq!(call("div", &[int(7), int(2)]), Ok(Some(Value::from(3.5))));
        assert_eq!(call("rem", &[int(7), int(2)]), Ok(Some(int(1))));
    }

    #[test]
    fn overflow_falls_back_to_float() {
        let result = call("plus", &[int(i64::MAX), int(1)]).unwrap().unwrap();
        assert!(matches!(result, Value::Number(Number::Float(_))));
    }

    #[test]
    fn arithmetic_type_errors() {
        let err = call("plus", &[int(1), Value::from("a")]).unwrap_err();
        assert_eq!(err, "operand 2 must be number but got string");
        assert_eq!(call("div", &[int(1), int(0)]), Err("divide by zero".into()));
    }

    #[test]
    fn set_operators() {
        assert_eq!(call("minus", &[set(&[1, 2, 3]), set(&[2])]), Ok(Some(set(&[1, 3]))));
        assert_eq!(call("and", &[set(&[1, 2]), set(&[2, 3])]), Ok(Some(set(&[2]))));
        let sets = Value::Set([set(&[1]), set(&[1, 2])].into_iter().collect());
        assert_eq!(call("union", &[sets.clone()]), Ok(Some(set(&[1, 2]))));
        assert_eq!(call("intersection", &[sets]), Ok(Some(set(&[1]))));
    }

    #[test]
    fn aggregates() {
        let arr = Value::Array(vec![int(3), int(1), int(2)]);
        assert_eq!(call("count", &[arr.clone()]), Ok(Some(int(3))));
        assert_eq!(call("sum", &[arr.clone()]), Ok(Some(int(6))));
        assert_eq!(call("product", &[arr.clone()]), Ok(Some(int(6))));
        assert_eq!(call("max", &[arr.clone()]), Ok(Some(int(3))));
        assert_eq!(call("min", &[Value::Array(Vec::new())]), Ok(None));
        assert_eq!(
            call("sort", &[arr]),
            Ok(Some(Value::Array(vec![int(1), int(2), int(3)])))
        );
        assert_eq!(call("count", &[Value::from("héllo")]), Ok(Some(int(5))));
    }

    #[test]
    fn strings() {
        let parts = Value::Array(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(call("concat", &[Value::from(","), parts]), Ok(Some(Value::from("a,b"))));
        assert_eq!(
            call("split", &[Value::from("a.b"), Value::from(".")]),
            Ok(Some(Value::Array(vec![Value::from("a"), Value::from("b")])))
        );
        assert_eq!(
            call("trim", &[Value::from("  x "), Value::from(" ")]),
            Ok(Some(Value::from("x")))
        );
        assert_eq!(
            call("startswith", &[Value::from("abc"), Value::from("ab")]),
            Ok(Some(Value::Bool(true)))
        );
        assert_eq!(
            call("sprintf", &[
                Value::from("%s is %d (%v)%%"),
                Value::Array(vec![Value::from("x"), int(3), Value::Bool(true)])
            ]),
            Ok(Some(Value::from("x is 3 (true)%")))
        );
    }

    #[test]
    fn to_number_parses_strings() {
        assert_eq!(call("to_number", &[Value::from("42")]), Ok(Some(int(42))));
        assert_eq!(call("to_number", &[Value::from("2.5")]), Ok(Some(Value::from(2.5))));
        assert!(call("to_number", &[Value::from("abc")]).is_err());
    }

    #[test]
    fn array_slice_clamps() {
        let arr = Value::Array(vec![int(1), int(2), int(3)]);
        assert_eq!(
            call("array.slice", &[arr.clone(), int(1), int(10)]),
            Ok(Some(Value::Array(vec![int(2), int(3)])))
        );
        assert_eq!(
            call("array.slice", &[arr, int(2), int(1)]),
            Ok(Some(Value::Array(Vec::new())))
        );
    }

    #[test]
    fn object_get_falls_back_to_default() {
        let obj = object_from(&[("a", int(1))]);
        assert_eq!(call("object.get", &[obj.clone(), Value::from("a"), int(0)]), Ok(Some(int(1))));
        assert_eq!(call("object.get", &[obj, Value::from("b"), int(0)]), Ok(Some(int(0))));
    }

    #[test]
    fn http_send_always_fails() {
        let err = call("http.send", &[Value::empty_object()]).unwrap_err();
        assert_eq!(err, "missing required request parameters: method, url");

        let request = object_from(&[("method", Value::from("GET")), ("url", Value::from("http://x"))]);
        let err = call("http.send", &[request]).unwrap_err();
        assert!(err.starts_with("network access is disabled"));
    }
}
