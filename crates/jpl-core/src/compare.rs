//! Canonical total order over [`JVal`]s.
//!
//! Values of different types order by [`JplType`](crate::JplType) declaration
//! order (`null < boolean < number < string < array < object < function`).
//! Comparison is pure: it needs nothing from the runtime.

use crate::jval::{JVal, Object};
use std::cmp::Ordering;

pub fn compare(a: &JVal, b: &JVal) -> Ordering {
    match (a, b) {
        (JVal::Null, JVal::Null) | (JVal::Function(_), JVal::Function(_)) => Ordering::Equal,
        (JVal::Bool(x), JVal::Bool(y)) => x.cmp(y),
        (JVal::Number(x), JVal::Number(y)) => compare_numbers(*x, *y),
        (JVal::String(x), JVal::String(y)) => compare_strings(x, y),
        (JVal::Array(x), JVal::Array(y)) => compare_arrays(x, y),
        (JVal::Object(x), JVal::Object(y)) => compare_objects(x, y),
        _ => a.type_of().cmp(&b.type_of()),
    }
}

#[inline]
pub fn equals(a: &JVal, b: &JVal) -> bool {
    compare(a, b) == Ordering::Equal
}

/// NaN sorts after every other number and equals itself.
fn compare_numbers(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering,
        None => a.is_nan().cmp(&b.is_nan()),
    }
}

/// Unicode scalar value order; a common prefix sorts first.
pub fn compare_strings(a: &str, b: &str) -> Ordering {
    a.chars().cmp(b.chars())
}

/// Element-wise lexical order; a common prefix sorts first.
pub fn compare_arrays(a: &[JVal], b: &[JVal]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let order = compare(x, y);
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

/// Sorted key sets first, then values in sorted-key order.
pub fn compare_objects(a: &Object, b: &Object) -> Ordering {
    let a_keys = sorted_keys(a);
    let b_keys = sorted_keys(b);
    for (x, y) in a_keys.iter().zip(&b_keys) {
        let order = compare_strings(x, y);
        if order != Ordering::Equal {
            return order;
        }
    }
    let order = a_keys.len().cmp(&b_keys.len());
    if order != Ordering::Equal {
        return order;
    }
    for key in a_keys {
        let order = match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => compare(x, y),
            _ => Ordering::Equal,
        };
        if order != Ordering::Equal {
            return order;
        }
    }
    Ordering::Equal
}

fn sorted_keys(entries: &Object) -> Vec<&str> {
    let mut keys: Vec<&str> = entries.keys().map(String::as_str).collect();
    keys.sort_by(|x, y| compare_strings(x, y));
    keys
}
