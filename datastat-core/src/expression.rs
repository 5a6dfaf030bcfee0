// src/expression.rs
//! Aggregation expressions
//!
//! Expressions appear wherever a pipeline computes a value: `$project`
//! outputs, `$group` keys and accumulator operands. They are parsed once into
//! an [`Expression`] tree and evaluated per document.
//!
//! Missing fields evaluate to `null`. Arithmetic involving `null` yields
//! `null`, which `$avg`, `$min` and `$max` then ignore.

use crate::error::{DataStatError, Result};
use crate::timestamp::to_epoch_millis;
use crate::value_utils::{as_number, get_nested_value, values_equal};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant value (also `$literal`)
    Literal(Value),
    /// Field path without the leading `$`
    Field(String),
    /// `{ "a": <expr>, ... }` building a sub-document
    Object(Vec<(String, Expression)>),
    /// `[<expr>, ...]`
    Array(Vec<Expression>),
    /// Operator application
    Operator(Operator, Vec<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Size,
    IfNull,
    ToDate,
    Add,
    Subtract,
    Multiply,
    Divide,
    Cond,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
}

impl Operator {
    fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "$size" => Operator::Size,
            "$ifNull" => Operator::IfNull,
            "$toDate" => Operator::ToDate,
            "$add" => Operator::Add,
            "$subtract" => Operator::Subtract,
            "$multiply" => Operator::Multiply,
            "$divide" => Operator::Divide,
            "$cond" => Operator::Cond,
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$and" => Operator::And,
            "$or" => Operator::Or,
            "$not" => Operator::Not,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Size => "$size",
            Operator::IfNull => "$ifNull",
            Operator::ToDate => "$toDate",
            Operator::Add => "$add",
            Operator::Subtract => "$subtract",
            Operator::Multiply => "$multiply",
            Operator::Divide => "$divide",
            Operator::Cond => "$cond",
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::And => "$and",
            Operator::Or => "$or",
            Operator::Not => "$not",
        }
    }

    /// Accepted argument counts (min, max)
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Operator::Size | Operator::ToDate | Operator::Not => (1, Some(1)),
            Operator::IfNull => (2, None),
            Operator::Subtract | Operator::Divide => (2, Some(2)),
            Operator::Eq | Operator::Ne | Operator::Gt | Operator::Gte => (2, Some(2)),
            Operator::Lt | Operator::Lte => (2, Some(2)),
            Operator::Cond => (3, Some(3)),
            Operator::Add | Operator::Multiply | Operator::And | Operator::Or => (0, None),
        }
    }
}

impl Expression {
    /// Parse an expression from its JSON form
    pub fn parse(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(s) if s.starts_with("$$") => Err(DataStatError::ExpressionError(
                format!("Variables are not supported: {}", s),
            )),
            Value::String(s) if s.starts_with('$') => {
                let path = s.trim_start_matches('$');
                if path.is_empty() {
                    return Err(DataStatError::ExpressionError(
                        "Empty field reference".to_string(),
                    ));
                }
                Ok(Expression::Field(path.to_string()))
            }
            Value::Array(items) => Ok(Expression::Array(
                items.iter().map(Expression::parse).collect::<Result<_>>()?,
            )),
            Value::Object(obj) => Self::parse_object(obj),
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    fn parse_object(obj: &Map<String, Value>) -> Result<Self> {
        let operator_keys = obj.keys().filter(|k| k.starts_with('$')).count();

        if operator_keys == 0 {
            let mut fields = Vec::with_capacity(obj.len());
            for (name, value) in obj {
                fields.push((name.clone(), Expression::parse(value)?));
            }
            return Ok(Expression::Object(fields));
        }

        if obj.len() != 1 {
            return Err(DataStatError::ExpressionError(
                "An expression object must have exactly one operator".to_string(),
            ));
        }

        let Some((name, args)) = obj.iter().next() else {
            return Err(DataStatError::ExpressionError(
                "Empty expression object".to_string(),
            ));
        };

        if name == "$literal" {
            return Ok(Expression::Literal(args.clone()));
        }

        let op = Operator::from_name(name).ok_or_else(|| {
            DataStatError::ExpressionError(format!("Unknown expression operator: {}", name))
        })?;

        let args = match (op, args) {
            (Operator::Cond, Value::Object(branches)) => {
                let branch = |key: &str| {
                    branches.get(key).ok_or_else(|| {
                        DataStatError::ExpressionError(format!("$cond is missing '{}'", key))
                    })
                };
                vec![
                    Expression::parse(branch("if")?)?,
                    Expression::parse(branch("then")?)?,
                    Expression::parse(branch("else")?)?,
                ]
            }
            (_, Value::Array(items)) => items.iter().map(Expression::parse).collect::<Result<_>>()?,
            (_, single) => vec![Expression::parse(single)?],
        };

        let (min, max) = op.arity();
        if args.len() < min || max.map_or(false, |max| args.len() > max) {
            return Err(DataStatError::ExpressionError(format!(
                "{} got {} argument(s)",
                op.name(),
                args.len()
            )));
        }

        Ok(Expression::Operator(op, args))
    }

    /// Evaluate against one document
    pub fn evaluate(&self, doc: &Value) -> Result<Value> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Field(path) => {
                Ok(get_nested_value(doc, path).cloned().unwrap_or(Value::Null))
            }
            Expression::Object(fields) => {
                let mut out = Map::new();
                for (name, expr) in fields {
                    out.insert(name.clone(), expr.evaluate(doc)?);
                }
                Ok(Value::Object(out))
            }
            Expression::Array(items) => Ok(Value::Array(
                items.iter().map(|e| e.evaluate(doc)).collect::<Result<_>>()?,
            )),
            Expression::Operator(op, args) => evaluate_operator(*op, args, doc),
        }
    }

    /// Plain field reference, if that is all this expression is
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expression::Field(path) => Some(path),
            _ => None,
        }
    }
}

fn evaluate_operator(op: Operator, args: &[Expression], doc: &Value) -> Result<Value> {
    match op {
        Operator::Cond => {
            let branch = if is_truthy(&args[0].evaluate(doc)?) { &args[1] } else { &args[2] };
            return branch.evaluate(doc);
        }
        Operator::IfNull => {
            let (fallback, candidates) = args.split_last().ok_or_else(|| {
                DataStatError::ExpressionError("$ifNull needs arguments".to_string())
            })?;
            for candidate in candidates {
                let value = candidate.evaluate(doc)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            return fallback.evaluate(doc);
        }
        Operator::And => {
            for arg in args {
                if !is_truthy(&arg.evaluate(doc)?) {
                    return Ok(Value::Bool(false));
                }
            }
            return Ok(Value::Bool(true));
        }
        Operator::Or => {
            for arg in args {
                if is_truthy(&arg.evaluate(doc)?) {
                    return Ok(Value::Bool(true));
                }
            }
            return Ok(Value::Bool(false));
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|a| a.evaluate(doc))
        .collect::<Result<Vec<_>>>()?;
    apply_operator(op, &values)
}

/// Apply an eagerly evaluated operator to its already evaluated operands.
fn apply_operator(op: Operator, values: &[Value]) -> Result<Value> {
    match op {
        // Anything that is not an array counts as empty
        Operator::Size => Ok(Value::from(values[0].as_array().map_or(0, |a| a.len()))),
        Operator::ToDate => Ok(to_epoch_millis(&values[0]).map_or(Value::Null, Value::from)),
        Operator::Not => Ok(Value::Bool(!is_truthy(&values[0]))),
        Operator::Add => arithmetic(op, values, |a, b| a.checked_add(b), |a, b| a + b),
        Operator::Multiply => arithmetic(op, values, |a, b| a.checked_mul(b), |a, b| a * b),
        Operator::Subtract => arithmetic(op, values, |a, b| a.checked_sub(b), |a, b| a - b),
        Operator::Divide => {
            let dividend = numeric_operand(op, &values[0])?;
            let divisor = numeric_operand(op, &values[1])?;
            let (Some(dividend), Some(divisor)) = (dividend, divisor) else {
                return Ok(Value::Null);
            };
            if divisor == 0.0 {
                return Ok(Value::Null);
            }
            Ok(Value::from(dividend / divisor))
        }
        Operator::Eq => Ok(Value::Bool(values_equal(&values[0], &values[1]))),
        Operator::Ne => Ok(Value::Bool(!values_equal(&values[0], &values[1]))),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let ordering = canonical_cmp(&values[0], &values[1]);
            Ok(Value::Bool(match op {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Gte => ordering != Ordering::Less,
                Operator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }))
        }
        Operator::Cond | Operator::IfNull | Operator::And | Operator::Or => {
            Err(DataStatError::ExpressionError(format!(
                "{} short-circuits and cannot be applied to evaluated operands",
                op.name()
            )))
        }
    }
}

/// `None` for null; error for non-numeric values.
fn numeric_operand(op: Operator, value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        v => as_number(v).map(Some).ok_or_else(|| {
            DataStatError::ExpressionError(format!(
                "{} only supports numeric types, got {}",
                op.name(),
                v
            ))
        }),
    }
}

/// Left fold over operands, staying in integers while every operand is one.
fn arithmetic(
    op: Operator,
    values: &[Value],
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    let mut iter = values.iter();
    let Some(first) = iter.next() else {
        // Empty $add / $multiply
        return Ok(Value::from(if op == Operator::Multiply { 1 } else { 0 }));
    };

    let mut int_acc = first.as_i64();
    let Some(mut float_acc) = numeric_operand(op, first)? else {
        return Ok(Value::Null);
    };

    for value in iter {
        let Some(n) = numeric_operand(op, value)? else {
            return Ok(Value::Null);
        };
        float_acc = float_op(float_acc, n);
        int_acc = match (int_acc, value.as_i64()) {
            (Some(a), Some(b)) => int_op(a, b),
            _ => None,
        };
    }

    Ok(int_acc.map_or_else(|| Value::from(float_acc), Value::from))
}

/// Aggregation truthiness: `false`, `null` and `0` are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => true,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order across types (null < numbers < strings < objects < arrays < booleans)
pub fn canonical_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a)
            .partial_cmp(&as_number(b))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ if type_rank(a) == type_rank(b) => Ordering::Equal,
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
