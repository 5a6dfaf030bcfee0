//! The four reports as aggregation pipelines
//!
//! Each `*_pipeline()` function returns the literal stage array, so it can
//! be printed, run against another store, or executed by
//! [`DocumentSource::aggregate`]. The `run_*` functions execute a pipeline
//! and decode its output into the typed report records.
//!
//! The span pipeline groups files back into datasets by `_id`, so every
//! stored dataset needs one. [`Collection`](crate::collection::Collection)
//! assigns them on insert.

use serde_json::{json, Value};
use tracing::debug;

use super::{AcquisitionSpan, FilesPerDataset, MissingDimensions, ReportKind, TypeVolume};
use crate::collection::DocumentSource;
use crate::error::{DataStatError, Result};
use crate::timestamp::MILLIS_PER_DAY;

pub fn volume_by_type_pipeline() -> Value {
    json!([
        {"$unwind": "$fichiers"},
        {"$group": {
            "_id": "$fichiers.metadonnees_techniques.type",
            "volume_total_octets": {"$sum": "$fichiers.taille_fichier_octets"},
            "nb_fichiers": {"$sum": 1}
        }},
        {"$sort": {"_id": 1}}
    ])
}

pub fn files_per_dataset_pipeline() -> Value {
    json!([
        {"$project": {"nb_fichiers": {"$size": "$fichiers"}}},
        {"$group": {
            "_id": null,
            "moyenne_fichiers_par_dataset": {"$avg": "$nb_fichiers"},
            "min_fichiers": {"$min": "$nb_fichiers"},
            "max_fichiers": {"$max": "$nb_fichiers"}
        }}
    ])
}

pub fn acquisition_span_pipeline() -> Value {
    json!([
        {"$unwind": "$fichiers"},
        {"$project": {"date": {"$toDate": "$fichiers.date_acquisition"}}},
        {"$group": {
            "_id": "$_id",
            "debut": {"$min": "$date"},
            "fin": {"$max": "$date"}
        }},
        {"$project": {
            "duree_jours": {"$divide": [{"$subtract": ["$fin", "$debut"]}, MILLIS_PER_DAY as i64]}
        }},
        {"$group": {
            "_id": null,
            "duree_moyenne_jours": {"$avg": "$duree_jours"},
            "duree_min_jours": {"$min": "$duree_jours"},
            "duree_max_jours": {"$max": "$duree_jours"}
        }}
    ])
}

pub fn missing_dimensions_pipeline() -> Value {
    json!([
        {"$unwind": "$fichiers"},
        {"$match": {"fichiers.metadonnees_techniques.type": "image"}},
        {"$group": {
            "_id": null,
            "total_images": {"$sum": 1},
            "images_dimensions_manquantes": {"$sum": {"$cond": [
                {"$or": [
                    {"$eq": ["$fichiers.metadonnees_techniques.largeur", null]},
                    {"$eq": ["$fichiers.metadonnees_techniques.hauteur", null]}
                ]},
                1,
                0
            ]}}
        }},
        {"$project": {
            "_id": 0,
            "total_images": 1,
            "images_dimensions_manquantes": 1,
            "taux_dimensions_manquantes": {"$cond": [
                {"$eq": ["$total_images", 0]},
                null,
                {"$multiply": [
                    {"$divide": ["$images_dimensions_manquantes", "$total_images"]},
                    100
                ]}
            ]}
        }}
    ])
}

/// Every report pipeline, in report order
pub fn all_pipelines() -> Vec<(ReportKind, Value)> {
    vec![
        (ReportKind::VolumeByType, volume_by_type_pipeline()),
        (ReportKind::FilesPerDataset, files_per_dataset_pipeline()),
        (ReportKind::AcquisitionSpan, acquisition_span_pipeline()),
        (ReportKind::MissingDimensions, missing_dimensions_pipeline()),
    ]
}

/// A non-string `_id` is an untyped group: rows the pipeline keeps apart
/// (null, numbers, objects) are merged under `None` and re-sorted.
pub fn run_volume_by_type<S: DocumentSource + ?Sized>(source: &S) -> Result<Vec<TypeVolume>> {
    let rows = run(source, ReportKind::VolumeByType, &volume_by_type_pipeline())?;
    let mut volumes: Vec<TypeVolume> = Vec::with_capacity(rows.len());
    for row in &rows {
        let file_type = match row.get("_id") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let volume = count_field(row, "volume_total_octets")?;
        let count = count_field(row, "nb_fichiers")?;

        match volumes.iter_mut().find(|v| v.file_type == file_type) {
            Some(existing) => {
                existing.volume_total_octets = existing.volume_total_octets.saturating_add(volume);
                existing.nb_fichiers += count;
            }
            None => volumes.push(TypeVolume {
                file_type,
                volume_total_octets: volume,
                nb_fichiers: count,
            }),
        }
    }
    volumes.sort_by(|a, b| a.file_type.cmp(&b.file_type));
    Ok(volumes)
}

pub fn run_files_per_dataset<S: DocumentSource + ?Sized>(
    source: &S,
) -> Result<Option<FilesPerDataset>> {
    let rows = run(source, ReportKind::FilesPerDataset, &files_per_dataset_pipeline())?;
    let Some(row) = single_row(&rows)? else {
        return Ok(None);
    };
    let Some(mean) = number_field(row, "moyenne_fichiers_par_dataset")? else {
        return Ok(None);
    };
    Ok(Some(FilesPerDataset {
        moyenne_fichiers_par_dataset: mean,
        min_fichiers: count_field(row, "min_fichiers")?,
        max_fichiers: count_field(row, "max_fichiers")?,
    }))
}

pub fn run_acquisition_span<S: DocumentSource + ?Sized>(
    source: &S,
) -> Result<Option<AcquisitionSpan>> {
    let rows = run(source, ReportKind::AcquisitionSpan, &acquisition_span_pipeline())?;
    let Some(row) = single_row(&rows)? else {
        return Ok(None);
    };
    let (Some(mean), Some(min), Some(max)) = (
        number_field(row, "duree_moyenne_jours")?,
        number_field(row, "duree_min_jours")?,
        number_field(row, "duree_max_jours")?,
    ) else {
        // every dataset had unparseable dates
        return Ok(None);
    };
    Ok(Some(AcquisitionSpan {
        duree_moyenne_jours: mean,
        duree_min_jours: min,
        duree_max_jours: max,
    }))
}

pub fn run_missing_dimensions<S: DocumentSource + ?Sized>(source: &S) -> Result<MissingDimensions> {
    let rows = run(source, ReportKind::MissingDimensions, &missing_dimensions_pipeline())?;
    let Some(row) = single_row(&rows)? else {
        // no image at all: nothing reaches the $group stage
        return Ok(MissingDimensions {
            total_images: 0,
            images_dimensions_manquantes: 0,
            taux_dimensions_manquantes: None,
        });
    };
    Ok(MissingDimensions {
        total_images: count_field(row, "total_images")?,
        images_dimensions_manquantes: count_field(row, "images_dimensions_manquantes")?,
        taux_dimensions_manquantes: number_field(row, "taux_dimensions_manquantes")?,
    })
}

fn run<S: DocumentSource + ?Sized>(
    source: &S,
    kind: ReportKind,
    pipeline: &Value,
) -> Result<Vec<Value>> {
    let rows = source.aggregate(pipeline)?;
    debug!(
        report = kind.as_str(),
        collection = source.name(),
        rows = rows.len(),
        "pipeline executed"
    );
    Ok(rows)
}

fn single_row(rows: &[Value]) -> Result<Option<&Value>> {
    match rows {
        [] => Ok(None),
        [row] => Ok(Some(row)),
        _ => Err(DataStatError::AggregationError(format!(
            "expected a single summary row, got {}",
            rows.len()
        ))),
    }
}

/// Non-negative integer field; missing or null reads as 0
fn count_field(row: &Value, key: &str) -> Result<u64> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .ok_or_else(|| {
                DataStatError::AggregationError(format!("'{}' is negative: {}", key, n))
            }),
        Some(other) => Err(DataStatError::AggregationError(format!(
            "'{}' is not a number: {}",
            key, other
        ))),
    }
}

fn number_field(row: &Value, key: &str) -> Result<Option<f64>> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(DataStatError::AggregationError(format!(
            "'{}' is not a number: {}",
            key, other
        ))),
    }
}
