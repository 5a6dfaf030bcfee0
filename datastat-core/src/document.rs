// src/document.rs
//! Dataset documents and their embedded files
//!
//! Field names follow the stored collection (`jeux_de_donnees`) verbatim.
//! Decoding is lenient: a missing, `null` or ill-typed field becomes `None`
//! instead of failing the whole document, because every report has to keep
//! going in the presence of incomplete files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timestamp::parse_timestamp;

/// Technical metadata `type` of image files.
pub const IMAGE_TYPE: &str = "image";

/// Top-level document: one dataset and the files it owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<Value>,

    #[serde(default, deserialize_with = "lenient::value")]
    pub id_jeu_de_donnees: Option<Value>,

    #[serde(
        default,
        deserialize_with = "lenient::object",
        skip_serializing_if = "Option::is_none"
    )]
    pub plan_de_gestion: Option<ManagementPlan>,

    #[serde(default, deserialize_with = "lenient::files")]
    pub fichiers: Vec<DataFile>,
}

/// Data management plan attached to a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagementPlan {
    #[serde(default, deserialize_with = "lenient::string")]
    pub nom_fichier: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub chemin_fichier: Option<String>,
    #[serde(default, deserialize_with = "lenient::size")]
    pub taille_fichier_octets: Option<u64>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub type_mime: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub version_pgd: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub modele_utilise: Option<String>,
}

/// One physical file, embedded in its parent [`Dataset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub nom_fichier: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub chemin_fichier: Option<String>,

    #[serde(default, deserialize_with = "lenient::size")]
    pub taille_fichier_octets: Option<u64>,

    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub type_mime: Option<String>,

    /// Raw acquisition timestamp; see [`DataFile::acquired_at`].
    #[serde(default, deserialize_with = "lenient::value")]
    pub date_acquisition: Option<Value>,

    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,

    #[serde(default, deserialize_with = "lenient::annotations")]
    pub annotations: Vec<Annotation>,

    #[serde(default, deserialize_with = "lenient::object")]
    pub metadonnees_techniques: Option<TechnicalMetadata>,
}

/// Reviewer note on a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, deserialize_with = "lenient::string")]
    pub auteur: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub commentaire: Option<String>,
}

/// Type-specific technical metadata.
///
/// Only `type` and the presence of the image dimensions are interpreted; everything else
/// (delimiter, sample rate, bounding box, ...) is carried in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMetadata {
    /// Raw `type`; see [`DataFile::file_type`].
    #[serde(rename = "type", default, deserialize_with = "lenient::value")]
    pub file_type: Option<Value>,

    /// Raw width. Any non-null value counts as present.
    #[serde(
        default,
        deserialize_with = "lenient::value",
        skip_serializing_if = "Option::is_none"
    )]
    pub largeur: Option<Value>,

    #[serde(
        default,
        deserialize_with = "lenient::value",
        skip_serializing_if = "Option::is_none"
    )]
    pub hauteur: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dataset {
    /// Decode a stored document. Never fails for JSON objects.
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Dataset::deserialize(value)
    }

    /// Number of embedded files (0 when `fichiers` is absent).
    #[inline]
    pub fn file_count(&self) -> usize {
        self.fichiers.len()
    }
}

impl DataFile {
    /// `metadonnees_techniques.type` when it is a string. Any other value
    /// leaves the file untyped.
    pub fn file_type(&self) -> Option<&str> {
        self.raw_type().and_then(Value::as_str)
    }

    /// A `type` of `"image"`, or an array holding `"image"` the way a
    /// `$match` on the field sees it.
    pub fn is_image(&self) -> bool {
        match self.raw_type() {
            Some(Value::String(s)) => s == IMAGE_TYPE,
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(IMAGE_TYPE)),
            _ => false,
        }
    }

    fn raw_type(&self) -> Option<&Value> {
        self.metadonnees_techniques
            .as_ref()
            .and_then(|m| m.file_type.as_ref())
    }

    /// Width or height absent/null. Only meaningful for images.
    pub fn has_missing_dimensions(&self) -> bool {
        match &self.metadonnees_techniques {
            Some(meta) => meta.largeur.is_none() || meta.hauteur.is_none(),
            None => true,
        }
    }

    /// Parsed acquisition time; `None` when missing or malformed.
    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.date_acquisition.as_ref().and_then(parse_timestamp)
    }
}

/// Field decoders that turn bad input into `None` instead of an error.
mod lenient {
    use super::{Annotation, DataFile};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn value<'de, D>(d: D) -> Result<Option<Value>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(d)?;
        Ok(if v.is_null() { None } else { Some(v) })
    }

    pub fn string<'de, D>(d: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn size<'de, D>(d: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(d)?;
        Ok(match v {
            Value::Number(n) => n.as_u64().or_else(|| {
                // 1.2e6 style sizes are accepted when they are whole and non-negative
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            _ => None,
        })
    }

    pub fn object<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let v = Value::deserialize(d)?;
        if !v.is_object() {
            return Ok(None);
        }
        Ok(serde_json::from_value(v).ok())
    }

    pub fn annotations<'de, D>(d: D) -> Result<Vec<Annotation>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Every array element is a file; a non-object entry is an empty one.
    pub fn files<'de, D>(d: D) -> Result<Vec<DataFile>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => serde_json::from_value(item).unwrap_or_default(),
                    _ => DataFile::default(),
                })
                .collect(),
            _ => Vec::new(),
        })
    }
}
