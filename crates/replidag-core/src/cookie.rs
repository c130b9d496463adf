// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cookie ordering.
//!
//! A cookie marks where a snapshot sits relative to server state. It is JSON:
//! `null`, a number, a string, or an object whose `order` field is a number or
//! a string. `null` sorts before every other cookie.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::DbError;

enum OrderKey<'a> {
    Num(&'a Number),
    Str(&'a str),
}

fn order_key(cookie: &Value) -> Result<OrderKey<'_>, DbError> {
    match cookie {
        Value::Number(n) => Ok(OrderKey::Num(n)),
        Value::String(s) => Ok(OrderKey::Str(s)),
        Value::Object(obj) => match obj.get("order") {
            Some(Value::Number(n)) => Ok(OrderKey::Num(n)),
            Some(Value::String(s)) => Ok(OrderKey::Str(s)),
            _ => Err(DbError::Cookie(format!(
                "object cookie needs a string or number `order`: {cookie}"
            ))),
        },
        _ => Err(DbError::Cookie(format!("unsupported cookie: {cookie}"))),
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Render a number the way it compares against string orders: integral
/// floats drop their fraction (`1.0` is `"1"`) and `-0.0` is `"0"`.
fn number_string(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f == 0.0 => "0".to_owned(),
        Some(f) if n.is_f64() => f.to_string(),
        _ => n.to_string(),
    }
}

/// Compare two cookies.
///
/// When either side's order value is a string both are compared as strings
/// (numbers use their JSON rendering); otherwise numerically.
pub fn compare_cookies(a: &Value, b: &Value) -> Result<Ordering, DbError> {
    if a == b {
        return Ok(Ordering::Equal);
    }
    match (a, b) {
        (Value::Null, _) => return Ok(Ordering::Less),
        (_, Value::Null) => return Ok(Ordering::Greater),
        _ => {}
    }
    Ok(match (order_key(a)?, order_key(b)?) {
        (OrderKey::Num(x), OrderKey::Num(y)) => compare_numbers(x, y),
        (OrderKey::Str(x), OrderKey::Str(y)) => x.cmp(y),
        (OrderKey::Str(x), OrderKey::Num(y)) => x.cmp(number_string(y).as_str()),
        (OrderKey::Num(x), OrderKey::Str(y)) => number_string(x).as_str().cmp(y),
    })
}
