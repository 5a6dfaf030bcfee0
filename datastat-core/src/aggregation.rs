// src/aggregation.rs
// Aggregation pipeline implementation

use crate::error::{DataStatError, Result};
use crate::expression::Expression;
use crate::filter::matches_filter;
use crate::value_utils::{
    as_number, compare_values_with_none, get_nested_value, set_nested_value,
};
use ahash::AHashMap;
use serde_json::{Map, Value};
use tracing::debug;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Parse a `$`-prefixed field path (e.g. "$fichiers" -> "fichiers")
fn parse_field_path(value: &Value, op_name: &str) -> Result<String> {
    match value.as_str() {
        Some(s) if s.starts_with('$') && s.len() > 1 => Ok(s[1..].to_string()),
        Some(_) => Err(DataStatError::AggregationError(format!(
            "{} field path must start with $",
            op_name
        ))),
        None => Err(DataStatError::AggregationError(format!(
            "{} must be a field path",
            op_name
        ))),
    }
}

/// Compute min or max of the numeric values an expression yields over a group
///
/// Non-numeric and null values are skipped; an all-null group yields null.
fn compute_extremum<F>(docs: &[Value], expr: &Expression, compare: F) -> Result<Value>
where
    F: Fn(f64, f64) -> f64,
{
    let mut result: Option<(f64, Value)> = None;

    for doc in docs {
        let value = expr.evaluate(doc)?;
        let Some(num) = as_number(&value) else {
            continue;
        };

        result = match result {
            Some((best, best_value)) => {
                let next = compare(best, num);
                // keep the original JSON number so integers stay integers
                if next == best {
                    Some((best, best_value))
                } else {
                    Some((next, value))
                }
            }
            None => Some((num, value)),
        };
    }

    Ok(result.map(|(_, v)| v).unwrap_or(Value::Null))
}

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Unwind(UnwindStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Count(CountStage),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    filter: Value,
}

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
    preserve_null_and_empty: bool,
    include_array_index: Option<String>,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone)]
pub enum ProjectField {
    Include,                // 1 / true
    Exclude,                // 0 / false
    Computed(Expression),   // "$field" or {"$op": ...}
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum GroupId {
    Null,                   // null (all documents in one group)
    Expr(Expression),       // "$metadonnees_techniques.type", {...}
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Push(Expression),
    Count,
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(String, SortDirection)>,
}

#[derive(Debug, Clone, Copy)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// $limit stage - limit number of documents
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

/// $skip stage - skip documents
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

/// $count stage - replace the stream by `{ <field>: n }`
#[derive(Debug, Clone)]
pub struct CountStage {
    field: String,
}

impl Pipeline {
    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let Value::Array(stages_array) = pipeline_json else {
            return Err(DataStatError::AggregationError(
                "Pipeline must be an array".to_string(),
            ));
        };

        if stages_array.is_empty() {
            return Err(DataStatError::AggregationError(
                "Pipeline cannot be empty".to_string(),
            ));
        }

        let stages = stages_array
            .iter()
            .map(Stage::from_json)
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline { stages })
    }

    /// Execute pipeline on documents
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in &self.stages {
            let input = docs.len();
            docs = stage.execute(docs)?;
            debug!(
                stage = stage.name(),
                input,
                output = docs.len(),
                "pipeline stage executed"
            );
        }
        Ok(docs)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let Value::Object(obj) = stage_json else {
            return Err(DataStatError::AggregationError(
                "Stage must be an object".to_string(),
            ));
        };

        // Each stage should have exactly one key
        let (stage_name, stage_spec) = match (obj.len(), obj.iter().next()) {
            (1, Some(entry)) => entry,
            _ => {
                return Err(DataStatError::AggregationError(
                    "Each stage must have exactly one operator".to_string(),
                ))
            }
        };

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
            "$limit" => Ok(Stage::Limit(LimitStage::from_json(stage_spec)?)),
            "$skip" => Ok(Stage::Skip(SkipStage::from_json(stage_spec)?)),
            "$count" => Ok(Stage::Count(CountStage::from_json(stage_spec)?)),
            _ => Err(DataStatError::AggregationError(format!(
                "Unknown pipeline stage: {}",
                stage_name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Project(_) => "$project",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Count(_) => "$count",
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Unwind(stage) => Ok(stage.execute(docs)),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => Ok(stage.execute(docs)),
            Stage::Limit(stage) => Ok(stage.execute(docs)),
            Stage::Skip(stage) => Ok(stage.execute(docs)),
            Stage::Count(stage) => Ok(stage.execute(docs)),
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if !spec.is_object() {
            return Err(DataStatError::AggregationError(
                "$match must be an object".to_string(),
            ));
        }
        Ok(MatchStage {
            filter: spec.clone(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            if matches_filter(&doc, &self.filter)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(_) => Ok(UnwindStage {
                path: parse_field_path(spec, "$unwind")?,
                preserve_null_and_empty: false,
                include_array_index: None,
            }),
            Value::Object(obj) => {
                let path = obj.get("path").ok_or_else(|| {
                    DataStatError::AggregationError("$unwind requires a path".to_string())
                })?;
                let preserve = match obj.get("preserveNullAndEmptyArrays") {
                    None => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => {
                        return Err(DataStatError::AggregationError(
                            "preserveNullAndEmptyArrays must be a boolean".to_string(),
                        ))
                    }
                };
                let include_array_index = match obj.get("includeArrayIndex") {
                    None => None,
                    Some(Value::String(s)) if !s.starts_with('$') => Some(s.clone()),
                    Some(_) => {
                        return Err(DataStatError::AggregationError(
                            "includeArrayIndex must be a field name".to_string(),
                        ))
                    }
                };
                Ok(UnwindStage {
                    path: parse_field_path(path, "$unwind")?,
                    preserve_null_and_empty: preserve,
                    include_array_index,
                })
            }
            _ => Err(DataStatError::AggregationError(
                "$unwind must be a field path or an object".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            // Only arrays unwind; like `$size`, any other value counts as empty
            let elements = match get_nested_value(&doc, &self.path) {
                Some(Value::Array(items)) if !items.is_empty() => items.clone(),
                _ => {
                    if self.preserve_null_and_empty {
                        let mut kept = doc;
                        if let Some(index_field) = &self.include_array_index {
                            set_nested_value(&mut kept, index_field, Value::Null);
                        }
                        results.push(kept);
                    }
                    continue;
                }
            };

            for (index, element) in elements.into_iter().enumerate() {
                let mut unwound = doc.clone();
                set_nested_value(&mut unwound, &self.path, element);
                if let Some(index_field) = &self.include_array_index {
                    set_nested_value(&mut unwound, index_field, Value::from(index as u64));
                }
                results.push(unwound);
            }
        }

        results
    }
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(DataStatError::AggregationError(
                "$project must be an object".to_string(),
            ));
        };

        if obj.is_empty() {
            return Err(DataStatError::AggregationError(
                "$project requires at least one field".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            let project_field = match value {
                Value::Bool(true) => ProjectField::Include,
                Value::Bool(false) => ProjectField::Exclude,
                Value::Number(n) => match n.as_i64() {
                    Some(1) => ProjectField::Include,
                    Some(0) => ProjectField::Exclude,
                    _ => {
                        return Err(DataStatError::AggregationError(format!(
                            "Invalid project value: {}",
                            n
                        )))
                    }
                },
                Value::String(s) if s.starts_with('$') => {
                    ProjectField::Computed(Expression::parse(value)?)
                }
                Value::Object(_) => ProjectField::Computed(Expression::parse(value)?),
                Value::String(s) => {
                    return Err(DataStatError::AggregationError(format!(
                        "Invalid project expression: {}",
                        s
                    )))
                }
                _ => {
                    return Err(DataStatError::AggregationError(
                        "Project field must be 0, 1, a field reference or an expression"
                            .to_string(),
                    ))
                }
            };
            fields.push((field.clone(), project_field));
        }

        let has_inclusions = fields
            .iter()
            .any(|(_, f)| !matches!(f, ProjectField::Exclude));
        let has_non_id_exclusions = fields
            .iter()
            .any(|(name, f)| matches!(f, ProjectField::Exclude) && name != "_id");

        // Excluding _id is the only exclusion allowed in include mode
        if has_inclusions && has_non_id_exclusions {
            return Err(DataStatError::AggregationError(
                "$project cannot mix inclusions and exclusions".to_string(),
            ));
        }

        Ok(ProjectStage { fields })
    }

    fn include_mode(&self) -> bool {
        self.fields
            .iter()
            .any(|(_, f)| !matches!(f, ProjectField::Exclude))
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter().map(|doc| self.project_document(doc)).collect()
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        if !self.include_mode() {
            // Exclude mode: everything except the excluded fields
            let mut result = doc.clone();
            for (field, _) in &self.fields {
                remove_nested(&mut result, field);
            }
            return Ok(result);
        }

        let mut result = Value::Object(Map::new());

        // _id is kept unless explicitly excluded
        let excludes_id = self
            .fields
            .iter()
            .any(|(name, f)| name == "_id" && matches!(f, ProjectField::Exclude));
        let mentions_id = self.fields.iter().any(|(name, _)| name == "_id");
        if !excludes_id && !mentions_id {
            if let Some(id) = doc.get("_id") {
                set_nested_value(&mut result, "_id", id.clone());
            }
        }

        for (field, action) in &self.fields {
            match action {
                ProjectField::Include => {
                    if let Some(value) = get_nested_value(doc, field) {
                        set_nested_value(&mut result, field, value.clone());
                    }
                }
                ProjectField::Computed(expr) => {
                    set_nested_value(&mut result, field, expr.evaluate(doc)?);
                }
                ProjectField::Exclude => {}
            }
        }

        Ok(result)
    }
}

fn remove_nested(doc: &mut Value, path: &str) {
    match path.rsplit_once('.') {
        None => {
            if let Value::Object(map) = doc {
                map.remove(path);
            }
        }
        Some((parent, leaf)) => {
            let mut current = doc;
            for part in parent.split('.') {
                match current {
                    Value::Object(map) => match map.get_mut(part) {
                        Some(next) => current = next,
                        None => return,
                    },
                    _ => return,
                }
            }
            if let Value::Object(map) = current {
                map.remove(leaf);
            }
        }
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(DataStatError::AggregationError(
                "$group must be an object".to_string(),
            ));
        };

        // Parse _id field
        let id = match obj.get("_id") {
            None => {
                return Err(DataStatError::AggregationError(
                    "Group stage must have _id field".to_string(),
                ))
            }
            Some(Value::Null) => GroupId::Null,
            Some(Value::String(s)) if !s.starts_with('$') => {
                return Err(DataStatError::AggregationError(
                    "Group _id field reference must start with $".to_string(),
                ))
            }
            Some(id_value @ (Value::String(_) | Value::Object(_))) => {
                GroupId::Expr(Expression::parse(id_value)?)
            }
            Some(_) => {
                return Err(DataStatError::AggregationError(
                    "Group _id must be null, a field reference or an expression".to_string(),
                ))
            }
        };

        // Parse accumulators
        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == "_id" {
                continue;
            }
            accumulators.push((field.clone(), Accumulator::from_json(value)?));
        }

        Ok(GroupStage { id, accumulators })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Step 1: Group documents by _id expression, in first-seen order
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();

        for doc in docs {
            let key_value = self.group_key(&doc)?;
            let key = serde_json::to_string(&key_value)?;
            match index.get(&key) {
                Some(&slot) => groups[slot].1.push(doc),
                None => {
                    index.insert(key, groups.len());
                    groups.push((key_value, vec![doc]));
                }
            }
        }

        // Step 2: Compute accumulators for each group
        let mut results = Vec::with_capacity(groups.len());
        for (key, group_docs) in groups {
            let mut result = Map::new();
            result.insert("_id".to_string(), key);

            for (field, accumulator) in &self.accumulators {
                result.insert(field.clone(), accumulator.compute(&group_docs)?);
            }

            results.push(Value::Object(result));
        }

        Ok(results)
    }

    /// Missing and null keys land in the same `null` group
    fn group_key(&self, doc: &Value) -> Result<Value> {
        match &self.id {
            GroupId::Null => Ok(Value::Null),
            GroupId::Expr(expr) => expr.evaluate(doc),
        }
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(DataStatError::AggregationError(
                "Accumulator must be an object".to_string(),
            ));
        };

        let (op, value) = match (obj.len(), obj.iter().next()) {
            (1, Some(entry)) => entry,
            _ => {
                return Err(DataStatError::AggregationError(
                    "Accumulator must have exactly one operator".to_string(),
                ))
            }
        };

        let operand = || -> Result<Expression> {
            match value {
                Value::String(s) if !s.starts_with('$') => Err(DataStatError::AggregationError(
                    format!("{} field reference must start with $", op),
                )),
                Value::String(_) | Value::Object(_) => Expression::parse(value),
                Value::Number(_) if op == "$sum" => Expression::parse(value),
                _ => Err(DataStatError::AggregationError(format!(
                    "{} must be a field reference or an expression",
                    op
                ))),
            }
        };

        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(operand()?)),
            "$avg" => Ok(Accumulator::Avg(operand()?)),
            "$min" => Ok(Accumulator::Min(operand()?)),
            "$max" => Ok(Accumulator::Max(operand()?)),
            "$first" => Ok(Accumulator::First(operand()?)),
            "$last" => Ok(Accumulator::Last(operand()?)),
            "$push" => Ok(Accumulator::Push(operand()?)),
            "$count" => Ok(Accumulator::Count),
            _ => Err(DataStatError::AggregationError(format!(
                "Unknown accumulator: {}",
                op
            ))),
        }
    }

    fn compute(&self, docs: &[Value]) -> Result<Value> {
        match self {
            Accumulator::Count => Ok(Value::from(docs.len() as u64)),

            Accumulator::Sum(expr) => {
                let mut sum_int: i64 = 0;
                let mut sum_float: f64 = 0.0;
                let mut has_float = false;

                for doc in docs {
                    let value = expr.evaluate(doc)?;
                    if let Some(n) = value.as_i64() {
                        sum_int = sum_int.saturating_add(n);
                    } else if let Some(f) = value.as_f64() {
                        sum_float += f;
                        has_float = true;
                    }
                }

                if has_float {
                    Ok(Value::from(sum_float + sum_int as f64))
                } else {
                    Ok(Value::from(sum_int))
                }
            }

            Accumulator::Avg(expr) => {
                let mut sum = 0.0;
                let mut count = 0usize;

                for doc in docs {
                    if let Some(n) = as_number(&expr.evaluate(doc)?) {
                        sum += n;
                        count += 1;
                    }
                }

                if count > 0 {
                    Ok(Value::from(sum / count as f64))
                } else {
                    Ok(Value::Null)
                }
            }

            Accumulator::Min(expr) => compute_extremum(docs, expr, f64::min),

            Accumulator::Max(expr) => compute_extremum(docs, expr, f64::max),

            Accumulator::First(expr) => match docs.first() {
                Some(doc) => expr.evaluate(doc),
                None => Ok(Value::Null),
            },

            Accumulator::Last(expr) => match docs.last() {
                Some(doc) => expr.evaluate(doc),
                None => Ok(Value::Null),
            },

            Accumulator::Push(expr) => Ok(Value::Array(
                docs.iter()
                    .map(|doc| expr.evaluate(doc))
                    .collect::<Result<_>>()?,
            )),
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(DataStatError::AggregationError(
                "$sort must be an object".to_string(),
            ));
        };

        let mut fields = Vec::new();
        for (field, value) in obj {
            let direction = match value.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => {
                    return Err(DataStatError::AggregationError(
                        "Sort direction must be 1 or -1".to_string(),
                    ))
                }
            };
            fields.push((field.clone(), direction));
        }

        Ok(SortStage { fields })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        docs.sort_by(|a, b| {
            for (field, direction) in &self.fields {
                let cmp = compare_values_with_none(
                    get_nested_value(a, field),
                    get_nested_value(b, field),
                );
                let cmp = match direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                };

                if cmp != std::cmp::Ordering::Equal {
                    return cmp;
                }
            }
            std::cmp::Ordering::Equal
        });

        docs
    }
}

impl LimitStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec.as_u64() {
            Some(n) if n > 0 => Ok(LimitStage { limit: n as usize }),
            _ => Err(DataStatError::AggregationError(
                "$limit must be a positive number".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter().take(self.limit).collect()
    }
}

impl SkipStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Some(n) = spec.as_u64() {
            Ok(SkipStage { skip: n as usize })
        } else {
            Err(DataStatError::AggregationError(
                "$skip must be a non-negative number".to_string(),
            ))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter().skip(self.skip).collect()
    }
}

impl CountStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec.as_str() {
            Some(s) if !s.is_empty() && !s.starts_with('$') && !s.contains('.') => {
                Ok(CountStage {
                    field: s.to_string(),
                })
            }
            _ => Err(DataStatError::AggregationError(
                "$count must be a non-empty field name".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        if docs.is_empty() {
            return Vec::new();
        }
        let mut result = Map::new();
        result.insert(self.field.clone(), Value::from(docs.len() as u64));
        vec![Value::Object(result)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn datasets() -> Vec<Value> {
        vec![
            json!({"id_jeu_de_donnees": 1, "fichiers": [
                {"taille_fichier_octets": 10, "metadonnees_techniques": {"type": "image"}},
                {"taille_fichier_octets": 20, "metadonnees_techniques": {"type": "image"}}
            ]}),
            json!({"id_jeu_de_donnees": 2, "fichiers": [
                {"taille_fichier_octets": 5, "metadonnees_techniques": {"type": "doc"}}
            ]}),
            json!({"id_jeu_de_donnees": 3, "fichiers": []}),
        ]
    }

    // ========== Pipeline tests ==========

    #[test]
    fn test_pipeline_not_array() {
        let result = Pipeline::from_json(&json!({"$match": {}}));
        assert!(result.unwrap_err().to_string().contains("must be an array"));
    }

    #[test]
    fn test_pipeline_empty() {
        let result = Pipeline::from_json(&json!([]));
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_stage_errors() {
        let err = Stage::from_json(&json!("invalid")).unwrap_err();
        assert!(err.to_string().contains("must be an object"));

        let err = Stage::from_json(&json!({"$match": {}, "$sort": {"a": 1}})).unwrap_err();
        assert!(err.to_string().contains("exactly one operator"));

        let err = Stage::from_json(&json!({"$lookup": {}})).unwrap_err();
        assert!(err.to_string().contains("Unknown pipeline stage"));
    }

    // ========== $unwind ==========

    #[test]
    fn test_unwind_drops_empty_arrays() {
        let stage = UnwindStage::from_json(&json!("$fichiers")).unwrap();
        let results = stage.execute(datasets());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["fichiers"]["taille_fichier_octets"], 10);
        assert_eq!(results[2]["id_jeu_de_donnees"], 2);
    }

    #[test]
    fn test_unwind_preserve_and_index() {
        let stage = UnwindStage::from_json(&json!({
            "path": "$fichiers",
            "preserveNullAndEmptyArrays": true,
            "includeArrayIndex": "rang"
        }))
        .unwrap();
        let mut docs = datasets();
        docs.push(json!({"id_jeu_de_donnees": 4}));
        let results = stage.execute(docs);

        assert_eq!(results.len(), 5);
        assert_eq!(results[1]["rang"], 1);
        assert!(results[3]["rang"].is_null());
        assert_eq!(results[4]["id_jeu_de_donnees"], 4);
    }

    #[test]
    fn test_unwind_non_array_is_empty() {
        let stage = UnwindStage::from_json(&json!("$tag")).unwrap();
        let docs = vec![json!({"tag": "x"}), json!({"tag": {"a": 1}}), json!({"tag": ["y"]})];
        assert_eq!(stage.execute(docs.clone()), vec![json!({"tag": "y"})]);

        let stage = UnwindStage::from_json(&json!({
            "path": "$tag",
            "preserveNullAndEmptyArrays": true
        }))
        .unwrap();
        assert_eq!(stage.execute(docs).len(), 3);
    }

    #[test]
    fn test_unwind_invalid() {
        assert!(UnwindStage::from_json(&json!("fichiers")).is_err());
        assert!(UnwindStage::from_json(&json!({"path": "$a", "preserveNullAndEmptyArrays": 1})).is_err());
        assert!(UnwindStage::from_json(&json!({})).is_err());
        assert!(UnwindStage::from_json(&json!(3)).is_err());
    }

    // ========== $project ==========

    #[test]
    fn test_project_size_keeps_id() {
        let stage =
            ProjectStage::from_json(&json!({"nb_fichiers": {"$size": "$fichiers"}})).unwrap();
        let results = stage
            .execute(vec![json!({"_id": 9, "fichiers": [1, 2], "x": 1})])
            .unwrap();
        assert_eq!(results[0], json!({"_id": 9, "nb_fichiers": 2}));
    }

    #[test]
    fn test_project_exclude() {
        let stage = ProjectStage::from_json(&json!({"secret": 0, "a.b": 0})).unwrap();
        let results = stage
            .execute(vec![json!({"name": "x", "secret": 1, "a": {"b": 1, "c": 2}})])
            .unwrap();
        assert_eq!(results[0], json!({"name": "x", "a": {"c": 2}}));
    }

    #[test]
    fn test_project_rename_and_exclude_id() {
        let stage = ProjectStage::from_json(&json!({"_id": 0, "kind": "$meta.type"})).unwrap();
        let results = stage
            .execute(vec![json!({"_id": 1, "meta": {"type": "pdf"}})])
            .unwrap();
        assert_eq!(results[0], json!({"kind": "pdf"}));
    }

    #[test]
    fn test_project_invalid() {
        let err = ProjectStage::from_json(&json!({"field": 5})).unwrap_err();
        assert!(err.to_string().contains("Invalid project value"));
        let err = ProjectStage::from_json(&json!({"field": "not_a_ref"})).unwrap_err();
        assert!(err.to_string().contains("Invalid project expression"));
        let err = ProjectStage::from_json(&json!({"a": 1, "b": 0})).unwrap_err();
        assert!(err.to_string().contains("cannot mix"));
        assert!(ProjectStage::from_json(&json!("invalid")).is_err());
        assert!(ProjectStage::from_json(&json!({})).is_err());
    }

    // ========== $group ==========

    #[test]
    fn test_group_by_nested_field_after_unwind() {
        let pipeline = Pipeline::from_json(&json!([
            {"$unwind": "$fichiers"},
            {"$group": {
                "_id": "$fichiers.metadonnees_techniques.type",
                "volume_total_octets": {"$sum": "$fichiers.taille_fichier_octets"},
                "nb_fichiers": {"$sum": 1}
            }}
        ]))
        .unwrap();

        let results = pipeline.execute(datasets()).unwrap();
        assert_eq!(
            results,
            vec![
                json!({"_id": "image", "volume_total_octets": 30, "nb_fichiers": 2}),
                json!({"_id": "doc", "volume_total_octets": 5, "nb_fichiers": 1}),
            ]
        );
    }

    #[test]
    fn test_group_missing_field_is_null_group() {
        let stage = GroupStage::from_json(&json!({"_id": "$city", "count": {"$sum": 1}})).unwrap();
        let results = stage
            .execute(vec![json!({"city": "Lyon"}), json!({}), json!({"city": null})])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[1]["_id"].is_null());
        assert_eq!(results[1]["count"], 2);
    }

    #[test]
    fn test_group_compound_key() {
        let stage = GroupStage::from_json(&json!({
            "_id": {"ds": "$id", "kind": "$type"},
            "n": {"$count": {}}
        }))
        .unwrap();
        let results = stage
            .execute(vec![
                json!({"id": 1, "type": "a"}),
                json!({"id": 1, "type": "a"}),
                json!({"id": 1, "type": "b"}),
            ])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["_id"], json!({"ds": 1, "kind": "a"}));
        assert_eq!(results[0]["n"], 2);
    }

    #[test]
    fn test_group_parse_errors() {
        let err = GroupStage::from_json(&json!({"count": {"$sum": 1}})).unwrap_err();
        assert!(err.to_string().contains("must have _id field"));
        let err = GroupStage::from_json(&json!({"_id": "notARef"})).unwrap_err();
        assert!(err.to_string().contains("must start with $"));
        let err = GroupStage::from_json(&json!({"_id": 123})).unwrap_err();
        assert!(err.to_string().contains("must be null"));
        assert!(GroupStage::from_json(&json!("invalid")).is_err());
    }

    // ========== Accumulators ==========

    #[test]
    fn test_accumulators_over_numbers() {
        let stage = GroupStage::from_json(&json!({
            "_id": null,
            "avg": {"$avg": "$value"},
            "min": {"$min": "$value"},
            "max": {"$max": "$value"},
            "sum": {"$sum": "$value"},
            "first": {"$first": "$value"},
            "last": {"$last": "$value"},
            "all": {"$push": "$value"}
        }))
        .unwrap();

        let results = stage
            .execute(vec![json!({"value": 30}), json!({"value": 10}), json!({"value": 20})])
            .unwrap();
        let r = &results[0];
        assert!(r["_id"].is_null());
        assert_eq!(r["avg"], 20.0);
        assert_eq!(r["min"], 10);
        assert_eq!(r["max"], 30);
        assert_eq!(r["sum"], 60);
        assert_eq!(r["first"], 30);
        assert_eq!(r["last"], 20);
        assert_eq!(r["all"], json!([30, 10, 20]));
    }

    #[test]
    fn test_accumulators_skip_nulls() {
        let stage = GroupStage::from_json(&json!({
            "_id": null,
            "avg": {"$avg": "$value"},
            "min": {"$min": "$value"},
            "max": {"$max": "$value"},
            "sum": {"$sum": "$value"}
        }))
        .unwrap();

        let results = stage.execute(vec![json!({}), json!({"value": "x"})]).unwrap();
        assert!(results[0]["avg"].is_null());
        assert!(results[0]["min"].is_null());
        assert!(results[0]["max"].is_null());
        assert_eq!(results[0]["sum"], 0);
    }

    #[test]
    fn test_accumulator_sum_float() {
        let stage = GroupStage::from_json(&json!({"_id": null, "sum": {"$sum": "$v"}})).unwrap();
        let results = stage.execute(vec![json!({"v": 1.5}), json!({"v": 2})]).unwrap();
        assert_eq!(results[0]["sum"], 3.5);
    }

    #[test]
    fn test_accumulator_conditional_sum() {
        let stage = GroupStage::from_json(&json!({
            "_id": null,
            "missing": {"$sum": {"$cond": [{"$eq": ["$w", null]}, 1, 0]}}
        }))
        .unwrap();
        let results = stage
            .execute(vec![json!({"w": 1}), json!({}), json!({"w": null})])
            .unwrap();
        assert_eq!(results[0]["missing"], 2);
    }

    #[test]
    fn test_accumulator_parse_errors() {
        assert!(Accumulator::from_json(&json!({"$sum": "notARef"})).is_err());
        assert!(Accumulator::from_json(&json!({"$sum": [1, 2]})).is_err());
        assert!(Accumulator::from_json(&json!({"$avg": 123})).is_err());
        assert!(Accumulator::from_json(&json!({"$min": "x"})).is_err());
        let err = Accumulator::from_json(&json!({"$stdDevPop": "$x"})).unwrap_err();
        assert!(err.to_string().contains("Unknown accumulator"));
        let err = Accumulator::from_json(&json!({"$sum": 1, "$avg": "$x"})).unwrap_err();
        assert!(err.to_string().contains("exactly one operator"));
        assert!(Accumulator::from_json(&json!("invalid")).is_err());
    }

    // ========== $match / $sort / $limit / $skip / $count ==========

    #[test]
    fn test_match_sort_limit_skip_count() {
        let docs = vec![
            json!({"n": 3, "k": "b"}),
            json!({"n": 1, "k": "a"}),
            json!({"n": 2, "k": "a"}),
            json!({"k": "c"}),
        ];

        let pipeline = Pipeline::from_json(&json!([
            {"$match": {"n": {"$gte": 1}}},
            {"$sort": {"k": 1, "n": -1}},
            {"$skip": 1},
            {"$limit": 1}
        ]))
        .unwrap();
        let results = pipeline.execute(docs.clone()).unwrap();
        assert_eq!(results, vec![json!({"n": 1, "k": "a"})]);

        let count = Pipeline::from_json(&json!([{"$count": "total"}])).unwrap();
        assert_eq!(count.execute(docs).unwrap(), vec![json!({"total": 4})]);
        assert!(count.execute(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_sort_missing_first() {
        let stage = SortStage::from_json(&json!({"n": 1})).unwrap();
        let results = stage.execute(vec![json!({"n": 2}), json!({})]);
        assert_eq!(results[0], json!({}));
    }

    #[test]
    fn test_stage_parameter_errors() {
        assert!(SortStage::from_json(&json!({"n": 2})).is_err());
        assert!(SortStage::from_json(&json!({"n": "asc"})).is_err());
        assert!(LimitStage::from_json(&json!(-1)).is_err());
        assert!(LimitStage::from_json(&json!(0)).is_err());
        assert!(SkipStage::from_json(&json!("x")).is_err());
        assert!(CountStage::from_json(&json!("$n")).is_err());
        assert!(MatchStage::from_json(&json!([])).is_err());
    }
}
