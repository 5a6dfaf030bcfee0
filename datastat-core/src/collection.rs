// src/collection.rs
//! Document sources
//!
//! The reports only need read access to one collection of dataset
//! documents. [`DocumentSource`] is that boundary: it hands out the raw
//! documents and runs aggregation pipelines over them. [`Collection`] is the
//! in-memory implementation, filled from JSON, JSON Lines or a mongo shell
//! `insertMany` script.

use std::fs;
use std::path::Path;

use ahash::AHashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::aggregation::Pipeline;
use crate::document::Dataset;
use crate::error::{DataStatError, Result};
use crate::filter::matches_filter;

/// Default collection name
pub const DEFAULT_COLLECTION: &str = "jeux_de_donnees";

/// Database name used in generated mongo shell scripts
pub const DEFAULT_DATABASE: &str = "tp2_mongodb";

/// Read-only access to a collection of dataset documents
pub trait DocumentSource {
    /// Collection name
    fn name(&self) -> &str;

    /// Every document in the collection
    fn documents(&self) -> Result<Vec<Value>>;

    /// Run an aggregation pipeline over the collection
    fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline)?;
        pipeline.execute(self.documents()?)
    }

    /// Documents decoded as [`Dataset`]s. Non-object documents are skipped.
    fn datasets(&self) -> Result<Vec<Dataset>> {
        let docs = self.documents()?;
        let mut datasets = Vec::with_capacity(docs.len());
        for (position, doc) in docs.iter().enumerate() {
            if !doc.is_object() {
                warn!(collection = self.name(), position, "skipping non-object document");
                continue;
            }
            datasets.push(Dataset::from_value(doc)?);
        }
        Ok(datasets)
    }
}

/// On-disk representation of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    /// Guess from the file extension
    Auto,
    /// A JSON array of documents, or `{ "<collection>": [documents] }`
    Json,
    /// One JSON document per line
    JsonLines,
    /// `db.<collection>.insertMany([...]);` mongo shell script
    MongoScript,
}

impl InputFormat {
    pub fn from_str(s: &str) -> Option<InputFormat> {
        match s.to_lowercase().as_str() {
            "auto" => Some(InputFormat::Auto),
            "json" => Some(InputFormat::Json),
            "jsonl" | "ndjson" | "json-lines" => Some(InputFormat::JsonLines),
            "js" | "mongo" | "mongo-script" => Some(InputFormat::MongoScript),
            _ => None,
        }
    }

    /// Resolve `Auto` using the path extension
    pub fn resolve(self, path: &Path) -> InputFormat {
        if self != InputFormat::Auto {
            return self;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => InputFormat::JsonLines,
            Some("js") => InputFormat::MongoScript,
            _ => InputFormat::Json,
        }
    }
}

/// In-memory collection
pub struct Collection {
    name: String,
    documents: RwLock<Vec<Value>>,
    /// Serialized `_id` of every stored document
    ids: RwLock<AHashSet<String>>,
    last_id: RwLock<u64>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Collection {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
            ids: RwLock::new(AHashSet::new()),
            last_id: RwLock::new(0),
        }
    }

    /// Build a collection from existing documents
    pub fn from_documents(name: impl Into<String>, docs: Vec<Value>) -> Result<Self> {
        let collection = Collection::new(name);
        collection.insert_many(docs)?;
        Ok(collection)
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Insert one document, assigning an auto-increment `_id` when absent.
    ///
    /// `_id`s are unique: an explicit id already in the collection is
    /// rejected, and auto-assigned ids skip any id already taken.
    pub fn insert_one(&self, doc: Value) -> Result<Value> {
        let Value::Object(mut map) = doc else {
            return Err(DataStatError::InvalidFormat(
                "Document must be an object".to_string(),
            ));
        };

        let mut ids = self.ids.write();
        let mut last_id = self.last_id.write();
        let id = match map.get("_id") {
            Some(existing) if !existing.is_null() => {
                let key = serde_json::to_string(existing)?;
                if ids.contains(&key) {
                    return Err(DataStatError::InvalidFormat(format!(
                        "Duplicate _id {} in collection {}",
                        existing, self.name
                    )));
                }
                if let Some(n) = existing.as_u64() {
                    *last_id = (*last_id).max(n);
                }
                ids.insert(key);
                existing.clone()
            }
            _ => {
                let id = loop {
                    *last_id += 1;
                    let id = Value::from(*last_id);
                    if ids.insert(serde_json::to_string(&id)?) {
                        break id;
                    }
                };
                map.insert("_id".to_string(), id.clone());
                id
            }
        };

        self.documents.write().push(Value::Object(map));
        Ok(id)
    }

    /// Insert many documents; returns the number inserted
    pub fn insert_many(&self, docs: Vec<Value>) -> Result<usize> {
        let count = docs.len();
        for doc in docs {
            self.insert_one(doc)?;
        }
        debug!(collection = %self.name, count, "inserted documents");
        Ok(count)
    }

    /// Documents matching a `$match`-style filter
    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        let docs = self.documents.read();
        let mut results = Vec::new();
        for doc in docs.iter() {
            if matches_filter(doc, filter)? {
                results.push(doc.clone());
            }
        }
        Ok(results)
    }

    /// Load a collection file
    pub fn load(path: &Path, format: InputFormat, name: &str) -> Result<Self> {
        let format = format.resolve(path);
        let content = fs::read_to_string(path)?;
        let docs = parse_documents(&content, format, name)?;
        info!(
            path = %path.display(),
            ?format,
            documents = docs.len(),
            "loaded collection"
        );
        Collection::from_documents(name, docs)
    }

    /// Write the collection in the given format
    pub fn export(&self, path: &Path, format: InputFormat) -> Result<()> {
        let format = format.resolve(path);
        let docs = self.documents.read();
        let content = render_documents(&docs, format, &self.name)?;
        fs::write(path, content)?;
        info!(path = %path.display(), ?format, documents = docs.len(), "exported collection");
        Ok(())
    }
}

impl DocumentSource for Collection {
    fn name(&self) -> &str {
        &self.name
    }

    fn documents(&self) -> Result<Vec<Value>> {
        Ok(self.documents.read().clone())
    }
}

/// Parse collection content in the given (resolved) format
pub fn parse_documents(content: &str, format: InputFormat, name: &str) -> Result<Vec<Value>> {
    match format {
        InputFormat::Json | InputFormat::Auto => parse_json(content, name),
        InputFormat::JsonLines => parse_json_lines(content),
        InputFormat::MongoScript => parse_mongo_script(content),
    }
}

fn parse_json(content: &str, name: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(docs) => Ok(docs),
        Value::Object(mut by_collection) => match by_collection.remove(name) {
            Some(Value::Array(docs)) => Ok(docs),
            Some(_) => Err(DataStatError::InvalidFormat(format!(
                "Collection '{}' must be an array",
                name
            ))),
            None => Err(DataStatError::InvalidFormat(format!(
                "No collection named '{}' in file",
                name
            ))),
        },
        _ => Err(DataStatError::InvalidFormat(
            "Expected an array of documents".to_string(),
        )),
    }
}

fn parse_json_lines(content: &str) -> Result<Vec<Value>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|e| {
                DataStatError::InvalidFormat(format!("line {}: {}", number + 1, e))
            })
        })
        .collect()
}

/// Extract the array literal passed to `insertMany(`
fn parse_mongo_script(content: &str) -> Result<Vec<Value>> {
    let start = content.find("insertMany(").ok_or_else(|| {
        DataStatError::InvalidFormat("Script has no insertMany( call".to_string())
    })? + "insertMany(".len();
    let end = content.rfind(')').filter(|&end| end >= start).ok_or_else(|| {
        DataStatError::InvalidFormat("Unterminated insertMany( call".to_string())
    })?;

    match serde_json::from_str::<Value>(content[start..end].trim())? {
        Value::Array(docs) => Ok(docs),
        _ => Err(DataStatError::InvalidFormat(
            "insertMany argument must be an array".to_string(),
        )),
    }
}

/// Serialise documents in the given (resolved) format
pub fn render_documents(docs: &[Value], format: InputFormat, name: &str) -> Result<String> {
    match format {
        InputFormat::Json | InputFormat::Auto => Ok(serde_json::to_string_pretty(docs)?),
        InputFormat::JsonLines => {
            let mut out = String::new();
            for doc in docs {
                out.push_str(&serde_json::to_string(doc)?);
                out.push('\n');
            }
            Ok(out)
        }
        InputFormat::MongoScript => {
            let mut out = String::new();
            out.push_str(&format!("db=connect(\"{}\");\n", DEFAULT_DATABASE));
            out.push_str(&format!("use(\"{}\");\n", DEFAULT_DATABASE));
            out.push_str(&format!("db.{}.deleteMany({{}});\n", name));
            out.push_str(&format!("db.{}.insertMany(\n", name));
            out.push_str(&serde_json::to_string_pretty(docs)?);
            out.push_str("\n);\n");
            Ok(out)
        }
    }
}
