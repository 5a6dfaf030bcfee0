//! Descriptive statistics over the dataset collection
//!
//! Four independent reports:
//!
//! | report              | record               |
//! |---------------------|----------------------|
//! | volume by file type | [`TypeVolume`]       |
//! | files per dataset   | [`FilesPerDataset`]  |
//! | acquisition span    | [`AcquisitionSpan`]  |
//! | missing dimensions  | [`MissingDimensions`]|
//!
//! Each can be computed in-process over decoded [`Dataset`]s
//! ([`ReportStrategy::Native`]) or by handing a literal aggregation pipeline
//! to the [`DocumentSource`] ([`ReportStrategy::Pipeline`]). Both give the
//! same records.
//!
//! [`Dataset`]: crate::document::Dataset

pub mod native;
pub mod pipelines;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collection::DocumentSource;
use crate::error::Result;

pub use native::{
    acquisition_span, dataset_span_days, files_per_dataset, missing_dimensions, volume_by_type,
};

/// Volume and file count for one `metadonnees_techniques.type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeVolume {
    /// `None` groups files whose type is missing or null
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub volume_total_octets: u64,
    pub nb_fichiers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesPerDataset {
    pub moyenne_fichiers_par_dataset: f64,
    pub min_fichiers: u64,
    pub max_fichiers: u64,
}

/// Per-dataset acquisition span statistics, in days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSpan {
    pub duree_moyenne_jours: f64,
    pub duree_min_jours: f64,
    pub duree_max_jours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingDimensions {
    pub total_images: u64,
    pub images_dimensions_manquantes: u64,
    /// Percentage in `[0, 100]`; `None` when there are no images
    pub taux_dimensions_manquantes: Option<f64>,
}

/// How a report is computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStrategy {
    /// Decode datasets and fold them in-process
    #[default]
    Native,
    /// Run the literal aggregation pipelines through the source
    Pipeline,
}

impl ReportStrategy {
    pub fn from_str(s: &str) -> Option<ReportStrategy> {
        match s.to_lowercase().as_str() {
            "native" => Some(ReportStrategy::Native),
            "pipeline" => Some(ReportStrategy::Pipeline),
            _ => None,
        }
    }
}

/// One of the four reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    VolumeByType,
    FilesPerDataset,
    AcquisitionSpan,
    MissingDimensions,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::VolumeByType,
        ReportKind::FilesPerDataset,
        ReportKind::AcquisitionSpan,
        ReportKind::MissingDimensions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::VolumeByType => "volume_by_type",
            ReportKind::FilesPerDataset => "files_per_dataset",
            ReportKind::AcquisitionSpan => "acquisition_span",
            ReportKind::MissingDimensions => "missing_dimensions",
        }
    }
}

/// Outcome of one report. A failed section never affects the others.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section<T> {
    Ready(T),
    Failed { error: String },
}

impl<T> Section<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Section::Ready(value) => Some(value),
            Section::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Section::Failed { .. })
    }
}

/// The four reports; sections not requested are `None`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub strategy: ReportStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_by_type: Option<Section<Vec<TypeVolume>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_per_dataset: Option<Section<Option<FilesPerDataset>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquisition_span: Option<Section<Option<AcquisitionSpan>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_dimensions: Option<Section<MissingDimensions>>,
}

fn section<T>(kind: ReportKind, result: Result<T>) -> Section<T> {
    record_section(kind, result.map_err(|e| e.to_string()))
}

/// Computes reports over a [`DocumentSource`]
pub struct ReportGenerator<'a, S: DocumentSource + ?Sized> {
    source: &'a S,
    strategy: ReportStrategy,
}

impl<'a, S: DocumentSource + ?Sized> ReportGenerator<'a, S> {
    pub fn new(source: &'a S, strategy: ReportStrategy) -> Self {
        ReportGenerator { source, strategy }
    }

    pub fn strategy(&self) -> ReportStrategy {
        self.strategy
    }

    pub fn volume_by_type(&self) -> Result<Vec<TypeVolume>> {
        match self.strategy {
            ReportStrategy::Native => Ok(volume_by_type(&self.source.datasets()?)),
            ReportStrategy::Pipeline => pipelines::run_volume_by_type(self.source),
        }
    }

    pub fn files_per_dataset(&self) -> Result<Option<FilesPerDataset>> {
        match self.strategy {
            ReportStrategy::Native => Ok(files_per_dataset(&self.source.datasets()?)),
            ReportStrategy::Pipeline => pipelines::run_files_per_dataset(self.source),
        }
    }

    pub fn acquisition_span(&self) -> Result<Option<AcquisitionSpan>> {
        match self.strategy {
            ReportStrategy::Native => Ok(acquisition_span(&self.source.datasets()?)),
            ReportStrategy::Pipeline => pipelines::run_acquisition_span(self.source),
        }
    }

    pub fn missing_dimensions(&self) -> Result<MissingDimensions> {
        match self.strategy {
            ReportStrategy::Native => Ok(missing_dimensions(&self.source.datasets()?)),
            ReportStrategy::Pipeline => pipelines::run_missing_dimensions(self.source),
        }
    }

    /// All four reports
    pub fn generate(&self) -> Report {
        self.generate_only(&ReportKind::ALL)
    }

    /// The requested reports only
    pub fn generate_only(&self, kinds: &[ReportKind]) -> Report {
        let wants = |kind: ReportKind| kinds.contains(&kind);

        let mut report = Report {
            strategy: self.strategy,
            volume_by_type: None,
            files_per_dataset: None,
            acquisition_span: None,
            missing_dimensions: None,
        };

        match self.strategy {
            ReportStrategy::Native => {
                // decode once, fold four times
                let datasets = self.source.datasets().map_err(|e| e.to_string());
                let with = |kind: ReportKind| {
                    wants(kind).then(|| datasets.as_deref().map_err(Clone::clone))
                };

                report.volume_by_type = with(ReportKind::VolumeByType)
                    .map(|d| record_section(ReportKind::VolumeByType, d.map(volume_by_type)));
                report.files_per_dataset = with(ReportKind::FilesPerDataset)
                    .map(|d| record_section(ReportKind::FilesPerDataset, d.map(files_per_dataset)));
                report.acquisition_span = with(ReportKind::AcquisitionSpan)
                    .map(|d| record_section(ReportKind::AcquisitionSpan, d.map(acquisition_span)));
                report.missing_dimensions = with(ReportKind::MissingDimensions).map(|d| {
                    record_section(ReportKind::MissingDimensions, d.map(missing_dimensions))
                });
            }
            ReportStrategy::Pipeline => {
                if wants(ReportKind::VolumeByType) {
                    report.volume_by_type =
                        Some(section(ReportKind::VolumeByType, self.volume_by_type()));
                }
                if wants(ReportKind::FilesPerDataset) {
                    report.files_per_dataset =
                        Some(section(ReportKind::FilesPerDataset, self.files_per_dataset()));
                }
                if wants(ReportKind::AcquisitionSpan) {
                    report.acquisition_span =
                        Some(section(ReportKind::AcquisitionSpan, self.acquisition_span()));
                }
                if wants(ReportKind::MissingDimensions) {
                    report.missing_dimensions =
                        Some(section(ReportKind::MissingDimensions, self.missing_dimensions()));
                }
            }
        }

        report
    }
}

fn record_section<T>(kind: ReportKind, result: std::result::Result<T, String>) -> Section<T> {
    match result {
        Ok(value) => {
            debug!(report = kind.as_str(), "report computed");
            Section::Ready(value)
        }
        Err(error) => {
            warn!(report = kind.as_str(), %error, "report failed");
            Section::Failed { error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::error::DataStatError;
    use serde_json::{json, Value};

    struct Broken;

    impl DocumentSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn documents(&self) -> Result<Vec<Value>> {
            Err(DataStatError::InvalidFormat("source unavailable".to_string()))
        }
    }

    /// Answers every pipeline except the one grouping by file type
    struct PartiallyBroken(Collection);

    impl DocumentSource for PartiallyBroken {
        fn name(&self) -> &str {
            "partial"
        }
        fn documents(&self) -> Result<Vec<Value>> {
            self.0.documents()
        }
        fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
            if pipeline == &pipelines::volume_by_type_pipeline() {
                return Err(DataStatError::AggregationError("boom".to_string()));
            }
            self.0.aggregate(pipeline)
        }
    }

    fn sample() -> Collection {
        Collection::from_documents(
            "jeux_de_donnees",
            vec![
                json!({"fichiers": [
                    {"taille_fichier_octets": 10, "date_acquisition": "2024-01-01",
                     "metadonnees_techniques": {"type": "image", "largeur": 10, "hauteur": 10}},
                    {"taille_fichier_octets": 20, "date_acquisition": "2024-01-04",
                     "metadonnees_techniques": {"type": "image"}}
                ]}),
                json!({"fichiers": [
                    {"taille_fichier_octets": 5, "date_acquisition": "2024-02-01",
                     "metadonnees_techniques": {"type": "doc"}}
                ]}),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_generate_native() {
        let coll = sample();
        let report = ReportGenerator::new(&coll, ReportStrategy::Native).generate();

        let volumes = report.volume_by_type.unwrap();
        assert_eq!(volumes.ready().unwrap().len(), 2);

        let files = report.files_per_dataset.unwrap();
        let files = files.ready().unwrap().as_ref().unwrap();
        assert_eq!(files.moyenne_fichiers_par_dataset, 1.5);

        let span = report.acquisition_span.unwrap();
        let span = span.ready().unwrap().as_ref().unwrap();
        assert_eq!(span.duree_max_jours, 3.0);
        assert_eq!(span.duree_min_jours, 0.0);

        let dims = report.missing_dimensions.unwrap();
        assert_eq!(dims.ready().unwrap().taux_dimensions_manquantes, Some(50.0));
    }

    #[test]
    fn test_strategies_agree_on_sample() {
        let coll = sample();
        let native = ReportGenerator::new(&coll, ReportStrategy::Native).generate();
        let pipeline = ReportGenerator::new(&coll, ReportStrategy::Pipeline).generate();
        assert_eq!(native.volume_by_type, pipeline.volume_by_type);
        assert_eq!(native.files_per_dataset, pipeline.files_per_dataset);
        assert_eq!(native.acquisition_span, pipeline.acquisition_span);
        assert_eq!(native.missing_dimensions, pipeline.missing_dimensions);
    }

    #[test]
    fn test_generate_only_subset() {
        let coll = sample();
        let report = ReportGenerator::new(&coll, ReportStrategy::Pipeline)
            .generate_only(&[ReportKind::MissingDimensions]);
        assert!(report.volume_by_type.is_none());
        assert!(report.files_per_dataset.is_none());
        assert!(report.acquisition_span.is_none());
        assert!(report.missing_dimensions.is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("volume_by_type").is_none());
        assert_eq!(json["strategy"], "pipeline");
    }

    #[test]
    fn test_failing_source_fails_every_section_without_panicking() {
        for strategy in [ReportStrategy::Native, ReportStrategy::Pipeline] {
            let report = ReportGenerator::new(&Broken, strategy).generate();
            assert!(report.volume_by_type.unwrap().is_failed());
            assert!(report.files_per_dataset.unwrap().is_failed());
            assert!(report.acquisition_span.unwrap().is_failed());
            assert!(report.missing_dimensions.unwrap().is_failed());
        }
    }

    #[test]
    fn test_one_failing_section_does_not_abort_the_others() {
        let source = PartiallyBroken(sample());
        let report = ReportGenerator::new(&source, ReportStrategy::Pipeline).generate();

        match report.volume_by_type.unwrap() {
            Section::Failed { error } => assert!(error.contains("boom")),
            Section::Ready(_) => panic!("expected a failed section"),
        }
        assert!(report.files_per_dataset.unwrap().ready().is_some());
        assert!(report.acquisition_span.unwrap().ready().is_some());
        assert!(report.missing_dimensions.unwrap().ready().is_some());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(ReportStrategy::from_str("Pipeline"), Some(ReportStrategy::Pipeline));
        assert_eq!(ReportStrategy::from_str("native"), Some(ReportStrategy::Native));
        assert_eq!(ReportStrategy::from_str("sql"), None);
    }
}
