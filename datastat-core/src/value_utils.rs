//! Value utility functions shared across modules
//!
//! Nested field access on `serde_json::Value` documents plus the value
//! comparisons used by filters, expressions and `$sort`.

use serde_json::Value;
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support
///
/// Supports:
/// - Simple fields: "type"
/// - Nested objects: "metadonnees_techniques.type"
/// - Array indexing: "fichiers.0.nom_fichier"
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use datastat_core::value_utils::get_nested_value;
///
/// let doc = json!({"metadonnees_techniques": {"type": "image"}});
/// assert_eq!(
///     get_nested_value(&doc, "metadonnees_techniques.type"),
///     Some(&json!("image"))
/// );
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    // Fast path: no dots means simple field access
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                let index = part.parse::<usize>().ok()?;
                value = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Set a value at a nested path with dot notation support
///
/// Creates intermediate objects if they don't exist. Used by `$unwind` to put
/// the unwound element back in place and by `$project` for dotted outputs.
///
/// ```
/// use serde_json::json;
/// use datastat_core::value_utils::set_nested_value;
///
/// let mut doc = json!({"id_jeu_de_donnees": 1});
/// set_nested_value(&mut doc, "stats.nb_fichiers", json!(3));
/// assert_eq!(doc["stats"]["nb_fichiers"], 3);
/// ```
pub fn set_nested_value(doc: &mut Value, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = doc;

    while let Some(part) = parts.next() {
        let map = match current {
            Value::Object(map) => map,
            // Cannot navigate into non-object
            _ => return,
        };

        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }

        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

/// Numeric view of a JSON value. Integers and floats both map to `f64`.
#[inline]
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// True when the value is JSON `null` or missing altogether.
#[inline]
pub fn is_null_or_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Equality with numeric coercion, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        _ => a == b,
    }
}

/// Compare two JSON values
///
/// Returns `Some(Ordering)` for comparable types (numbers, strings, booleans),
/// `None` for incompatible types (e.g., comparing string to number).
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use datastat_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Compare two optional JSON values with None handling
///
/// Missing and `null` sort before any actual value; incompatible types
/// compare as equal so that sorting stays stable.
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values(av, bv).unwrap_or(Ordering::Equal),
    }
}
