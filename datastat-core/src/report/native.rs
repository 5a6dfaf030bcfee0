//! In-process folds over decoded datasets

use ahash::AHashMap;
use tracing::warn;

use super::{AcquisitionSpan, FilesPerDataset, MissingDimensions, TypeVolume};
use crate::document::Dataset;
use crate::timestamp::millis_to_days;

/// Running count/sum/min/max over a stream of numbers
#[derive(Debug, Clone, Copy)]
struct Summary {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Summary {
    fn of(values: impl IntoIterator<Item = f64>) -> Option<Summary> {
        values.into_iter().fold(None, |acc, v| {
            Some(match acc {
                None => Summary {
                    count: 1,
                    sum: v,
                    min: v,
                    max: v,
                },
                Some(s) => Summary {
                    count: s.count + 1,
                    sum: s.sum + v,
                    min: s.min.min(v),
                    max: s.max.max(v),
                },
            })
        })
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Total size and file count per file type, `None` type first then
/// ascending by type name.
///
/// Files with no size still count towards `nb_fichiers`.
pub fn volume_by_type(datasets: &[Dataset]) -> Vec<TypeVolume> {
    let mut groups: AHashMap<Option<&str>, (u64, u64)> = AHashMap::new();

    for file in datasets.iter().flat_map(|d| d.fichiers.iter()) {
        let entry = groups.entry(file.file_type()).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(file.taille_fichier_octets.unwrap_or(0));
        entry.1 += 1;
    }

    let mut volumes: Vec<TypeVolume> = groups
        .into_iter()
        .map(|(file_type, (volume, count))| TypeVolume {
            file_type: file_type.map(str::to_string),
            volume_total_octets: volume,
            nb_fichiers: count,
        })
        .collect();
    volumes.sort_by(|a, b| a.file_type.cmp(&b.file_type));
    volumes
}

/// Mean/min/max of `len(fichiers)` over every dataset, including those
/// with no files. `None` for an empty collection.
pub fn files_per_dataset(datasets: &[Dataset]) -> Option<FilesPerDataset> {
    let summary = Summary::of(datasets.iter().map(|d| d.file_count() as f64))?;
    Some(FilesPerDataset {
        moyenne_fichiers_par_dataset: summary.mean(),
        min_fichiers: summary.min as u64,
        max_fichiers: summary.max as u64,
    })
}

/// Days between the earliest and latest acquisition of one dataset.
///
/// `None` when no file carries a parseable `date_acquisition`.
pub fn dataset_span_days(dataset: &Dataset) -> Option<f64> {
    let (earliest, latest) = dataset
        .fichiers
        .iter()
        .filter_map(|f| {
            let acquired = f.acquired_at();
            if acquired.is_none() {
                if let Some(raw) = f.date_acquisition.as_ref().filter(|v| !v.is_null()) {
                    warn!(
                        dataset = ?dataset.id_jeu_de_donnees,
                        date_acquisition = %raw,
                        "skipping unparseable acquisition date"
                    );
                }
            }
            acquired
        })
        .map(|t| t.timestamp_millis())
        .fold(None, |acc: Option<(i64, i64)>, ms| match acc {
            None => Some((ms, ms)),
            Some((lo, hi)) => Some((lo.min(ms), hi.max(ms))),
        })?;
    Some(millis_to_days(latest - earliest))
}

/// Mean/min/max of [`dataset_span_days`] over datasets that have one.
pub fn acquisition_span(datasets: &[Dataset]) -> Option<AcquisitionSpan> {
    let summary = Summary::of(datasets.iter().filter_map(dataset_span_days))?;
    Some(AcquisitionSpan {
        duree_moyenne_jours: summary.mean(),
        duree_min_jours: summary.min,
        duree_max_jours: summary.max,
    })
}

/// Share of image files lacking `largeur` or `hauteur`.
pub fn missing_dimensions(datasets: &[Dataset]) -> MissingDimensions {
    let (total, missing) = datasets
        .iter()
        .flat_map(|d| d.fichiers.iter())
        .filter(|f| f.is_image())
        .fold((0u64, 0u64), |(total, missing), f| {
            (total + 1, missing + u64::from(f.has_missing_dimensions()))
        });

    MissingDimensions {
        total_images: total,
        images_dimensions_manquantes: missing,
        taux_dimensions_manquantes: (total > 0)
            .then(|| missing as f64 / total as f64 * 100.0),
    }
}
