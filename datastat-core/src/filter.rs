// src/filter.rs
//! `$match` filters
//!
//! Each query operator is a small type implementing [`OperatorMatcher`],
//! looked up by name in a registry. Documents are plain `serde_json::Value`
//! objects and field paths use dot notation.
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌────────────────┬────────────────┬────────────────┐
//! │ Comparison     │ Logical        │ Element        │
//! │ ($eq, $gt...)  │ ($and, $or...) │ ($exists)      │
//! └────────────────┴────────────────┴────────────────┘
//! ```

use crate::error::{DataStatError, Result};
use crate::value_utils::{compare_values, get_nested_value, values_equal};
use lazy_static::lazy_static;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Trait for all query operators
pub trait OperatorMatcher: Send + Sync {
    /// Operator name as written in filters (e.g. "$eq")
    fn name(&self) -> &'static str;

    /// Checks a field value (`None` when the field is missing) against the
    /// operand. Logical operators get the whole document instead.
    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool>;
}

lazy_static! {
    static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let operators: Vec<Box<dyn OperatorMatcher>> = vec![
            Box::new(EqOperator),
            Box::new(NeOperator),
            Box::new(GtOperator),
            Box::new(GteOperator),
            Box::new(LtOperator),
            Box::new(LteOperator),
            Box::new(InOperator),
            Box::new(NinOperator),
            Box::new(ExistsOperator),
            Box::new(AndOperator),
            Box::new(OrOperator),
            Box::new(NorOperator),
        ];
        operators.into_iter().map(|op| (op.name(), op)).collect()
    };
}

fn lookup(op_name: &str) -> Result<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY
        .get(op_name)
        .map(|op| op.as_ref())
        .ok_or_else(|| DataStatError::InvalidQuery(format!("Unknown operator: {}", op_name)))
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// $eq: equality, with array element matching. `null` also matches a missing field.
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(filter_value.is_null()),
            Some(v) => {
                if values_equal(v, filter_value) {
                    return Ok(true);
                }
                if let Value::Array(arr) = v {
                    Ok(arr.iter().any(|elem| values_equal(elem, filter_value)))
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// $ne: negation of `$eq`
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        Ok(!EqOperator.matches(doc_value, filter_value, document)?)
    }
}

/// $gt
pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| ord == Ordering::Greater)
    }
}

/// $gte
pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| ord != Ordering::Less)
    }
}

/// $lt
pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| ord == Ordering::Less)
    }
}

/// $lte
pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| ord != Ordering::Greater)
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// $in: value (or any array element) is one of the listed values
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        let candidates = filter_value.as_array().ok_or_else(|| {
            DataStatError::InvalidQuery("$in operator requires an array".to_string())
        })?;

        for candidate in candidates {
            if EqOperator.matches(doc_value, candidate, document)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// $nin: negation of `$in`
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        if !filter_value.is_array() {
            return Err(DataStatError::InvalidQuery(
                "$nin operator requires an array".to_string(),
            ));
        }
        Ok(!InOperator.matches(doc_value, filter_value, document)?)
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// $exists: field presence (an explicit `null` counts as present)
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        if let Value::Bool(should_exist) = filter_value {
            Ok(doc_value.is_some() == *should_exist)
        } else {
            Err(DataStatError::InvalidQuery(
                "$exists operator requires a boolean".to_string(),
            ))
        }
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

fn logical_clauses<'a>(
    op_name: &str,
    filter_value: &'a Value,
    document: Option<&'a Value>,
) -> Result<(&'a Vec<Value>, &'a Value)> {
    let doc = document.ok_or_else(|| {
        DataStatError::InvalidQuery(format!("{} operator requires document context", op_name))
    })?;
    let clauses = filter_value.as_array().ok_or_else(|| {
        DataStatError::InvalidQuery(format!("{} operator requires an array", op_name))
    })?;
    Ok((clauses, doc))
}

/// $and
pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        let (clauses, doc) = logical_clauses(self.name(), filter_value, document)?;
        for clause in clauses {
            if !matches_filter(doc, clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// $or
pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        let (clauses, doc) = logical_clauses(self.name(), filter_value, document)?;
        for clause in clauses {
            if matches_filter(doc, clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// $nor: true only if every clause is false
pub struct NorOperator;

impl OperatorMatcher for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        Ok(!OrOperator.matches(doc_value, filter_value, document)?)
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Shared body of $gt, $gte, $lt, $lte with array element matching
fn compare_with_predicate<F>(
    doc_value: Option<&Value>,
    filter_value: &Value,
    predicate: F,
) -> Result<bool>
where
    F: Fn(Ordering) -> bool,
{
    match doc_value {
        None => Ok(false),
        Some(v) => {
            if compare_values(v, filter_value).map(&predicate).unwrap_or(false) {
                return Ok(true);
            }
            if let Value::Array(arr) = v {
                Ok(arr.iter().any(|elem| {
                    compare_values(elem, filter_value)
                        .map(&predicate)
                        .unwrap_or(false)
                }))
            } else {
                Ok(false)
            }
        }
    }
}

/// Does `document` satisfy `filter`?
///
/// An empty filter matches everything. Unknown operators are an error.
pub fn matches_filter(document: &Value, filter: &Value) -> Result<bool> {
    let filter_obj = filter
        .as_object()
        .ok_or_else(|| DataStatError::InvalidQuery("Filter must be an object".to_string()))?;

    for (key, condition) in filter_obj {
        if key.starts_with('$') {
            // Top-level logical operator
            if !lookup(key)?.matches(None, condition, Some(document))? {
                return Ok(false);
            }
            continue;
        }

        let doc_value = get_nested_value(document, key);
        let is_operator_object = condition
            .as_object()
            .map(|obj| !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')))
            .unwrap_or(false);

        if is_operator_object {
            for (op_name, op_value) in condition.as_object().into_iter().flatten() {
                if !lookup(op_name)?.matches(doc_value, op_value, Some(document))? {
                    return Ok(false);
                }
            }
        } else if !EqOperator.matches(doc_value, condition, Some(document))? {
            // Direct equality like { "type": "image" }
            return Ok(false);
        }
    }

    Ok(true)
}
