//! Synthetic dataset generator
//!
//! Produces collections shaped like the research-data inventory the reports
//! were built for: each dataset has a data management plan and a handful of
//! csv / png / wav / geotiff / pdf files with kind-specific technical
//! metadata. Some image and geotiff files deliberately lack dimensions.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{DataStatError, Result};

const FILE_KINDS: [FileKind; 5] = [
    FileKind::Csv,
    FileKind::Png,
    FileKind::Wav,
    FileKind::Geotiff,
    FileKind::Pdf,
];

const PLAN_VERSIONS: [&str; 3] = ["1.0", "2.0", "2.1"];
const PLAN_MODELS: [&str; 2] = ["DMP OPIDoR v3", "Science Europe"];
const FILE_VERSIONS: [&str; 3] = ["1.0", "1.1", "2.0"];

const COMMENTS: [&str; 4] = [
    "Valeur aberrante à vérifier",
    "Donnée validée",
    "Nécessite un traitement complémentaire",
    "Anomalie détectée lors de l'acquisition",
];
const FIRST_NAMES: [&str; 8] = [
    "Camille", "Louis", "Chloé", "Hugo", "Léa", "Gabriel", "Manon", "Arthur",
];
const LAST_NAMES: [&str; 8] = [
    "Martin", "Bernard", "Dubois", "Thomas", "Robert", "Richard", "Petit", "Durand",
];

const CSV_LAYOUTS: [&[&str]; 3] = [
    &["timestamp", "pH", "temperature"],
    &["date", "nitrates", "phosphates", "temperature"],
    &["timestamp", "concentration_hcl", "conductivite"],
];
const IMAGE_SIZES: [i64; 4] = [512, 1024, 2048, 4096];
const GEOTIFF_SIZES: [i64; 3] = [1024, 2048, 4096];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Csv,
    Png,
    Wav,
    Geotiff,
    Pdf,
}

/// Generator parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub datasets: usize,
    pub min_files: usize,
    pub max_files: usize,
    /// Fixed seed for reproducible output; entropy when absent
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            datasets: 1000,
            min_files: 5,
            max_files: 10,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.datasets == 0 {
            return Err(DataStatError::InvalidParameter(
                "datasets must be at least 1".to_string(),
            ));
        }
        if self.min_files > self.max_files {
            return Err(DataStatError::InvalidParameter(format!(
                "min_files ({}) is greater than max_files ({})",
                self.min_files, self.max_files
            )));
        }
        Ok(())
    }
}

/// Seeded generator of dataset documents
pub struct DatasetGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    today: NaiveDate,
}

impl DatasetGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(DatasetGenerator {
            config,
            rng,
            today: Utc::now().date_naive(),
        })
    }

    /// Anchor acquisition windows on a fixed day instead of today.
    /// Together with a seed this makes the output fully reproducible.
    pub fn with_reference_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Generate the whole collection; ids run from 1 to `datasets`
    pub fn generate(&mut self) -> Vec<Value> {
        let docs: Vec<Value> = (1..=self.config.datasets as u64)
            .map(|id| self.dataset(id))
            .collect();

        info!(
            datasets = docs.len(),
            seed = ?self.config.seed,
            "generated synthetic collection"
        );
        docs
    }

    /// One dataset document
    pub fn dataset(&mut self, id: u64) -> Value {
        let start = self.date_between(
            self.today - Duration::days(3 * 365),
            self.today - Duration::days(365),
        );
        let end = self.date_between(start, self.today + Duration::days(365));
        let count = self.rng.gen_range(self.config.min_files..=self.config.max_files);

        let fichiers: Vec<Value> = (0..count).map(|_| self.file(id, start, end)).collect();

        json!({
            "id_jeu_de_donnees": id,
            "plan_de_gestion": self.management_plan(id),
            "fichiers": fichiers,
        })
    }

    fn management_plan(&mut self, id: u64) -> Value {
        let version = self.pick(&PLAN_VERSIONS);
        let name = format!("PGD_{}_v{}.pdf", id, version);
        json!({
            "nom_fichier": name,
            "chemin_fichier": format!("/data/{}/{}", id, name),
            "taille_fichier_octets": self.rng.gen_range(100_000..=2_000_000u64),
            "type_mime": "application/pdf",
            "version_pgd": version,
            "modele_utilise": self.pick(&PLAN_MODELS),
        })
    }

    fn file(&mut self, id: u64, start: NaiveDate, end: NaiveDate) -> Value {
        let kind = self.pick(&FILE_KINDS);
        let (name, mime, size, metadata) = match kind {
            FileKind::Csv => self.csv(),
            FileKind::Png => self.png(),
            FileKind::Wav => self.wav(),
            FileKind::Geotiff => self.geotiff(),
            FileKind::Pdf => self.pdf(),
        };

        let acquired = self.date_between(start, end);
        let annotations = if self.rng.gen_bool(0.7) {
            vec![]
        } else {
            vec![json!({
                "auteur": format!("{} {}", self.pick(&FIRST_NAMES), self.pick(&LAST_NAMES)),
                "date": self.date_between(acquired, end).to_string(),
                "commentaire": self.pick(&COMMENTS),
            })]
        };

        json!({
            "nom_fichier": name,
            "chemin_fichier": format!("/data/{}/{}", id, name),
            "taille_fichier_octets": size,
            "type_mime": mime,
            "date_acquisition": acquired.to_string(),
            "version": self.pick(&FILE_VERSIONS),
            "annotations": annotations,
            "metadonnees_techniques": metadata,
        })
    }

    fn csv(&mut self) -> (String, &'static str, u64, Value) {
        let decade_start =
            NaiveDate::from_ymd_opt(self.today.year() - self.today.year() % 10, 1, 1)
                .unwrap_or(self.today);
        let name = format!("mesures_{}.csv", self.date_between(decade_start, self.today));

        let columns = self.pick(&CSV_LAYOUTS);
        let units: serde_json::Map<String, Value> = columns
            .iter()
            .filter_map(|col| unit_for(col).map(|u| (col.to_string(), json!(u))))
            .collect();

        let metadata = json!({
            "type": "csv",
            "delimiteur": self.pick(&[",", ";", "\t"]),
            "encodage": "UTF-8",
            "colonnes": columns,
            "unites": units,
            "lieu_prelevement": {
                "type": "Point",
                "coordinates": [self.coordinate(180.0, 5), self.coordinate(90.0, 5)],
            },
            "methode_analyse": self.pick(&[
                "Chromatographie",
                "Spectrophotométrie",
                "ISO",
                "Mesure électrochimique",
            ]),
        });
        (name, "text/csv", self.rng.gen_range(2_000..=600_000), metadata)
    }

    fn png(&mut self) -> (String, &'static str, u64, Value) {
        let name = format!("radiographie_{:03}.png", self.rng.gen_range(1..=999));

        let width = self.pick(&[Some(512i64), Some(1024), Some(2048), Some(4096), None]);
        let height = match width {
            Some(w) => w,
            None => self.pick(&IMAGE_SIZES),
        };
        let letters: String = (0..3)
            .map(|_| char::from(b'A' + self.rng.gen_range(0..26u8)))
            .collect();

        let metadata = json!({
            "type": "image",
            "largeur": width,
            "hauteur": height,
            "resolution": self.pick(&["72dpi", "150dpi", "300dpi"]),
            "id_patient_pseudo": format!("P{:03}-{}", self.rng.gen_range(1..=999), letters),
            "type_examen": self.pick(&[
                "Radiographie Thoracique",
                "IRM Cérébrale",
                "Scanner Abdominal",
            ]),
        });
        (name, "image/png", self.rng.gen_range(50_000..=9_000_000), metadata)
    }

    fn wav(&mut self) -> (String, &'static str, u64, Value) {
        let name = format!("entretien_{:03}.wav", self.rng.gen_range(1..=300));
        let duration = self
            .rng
            .gen_bool(0.5)
            .then(|| self.rng.gen_range(30..=3600));

        let metadata = json!({
            "type": "audio",
            "duree_sec": duration,
            "frequence_echantillonnage_hz": self.pick(&[16000, 22050, 44100, 48000]),
            "canaux": self.pick(&[1, 2]),
            "langue": self.pick(&["fr", "en", "it"]),
            "statut_anonymisation": self.pick(&["full", "partial", "none"]),
        });
        (name, "audio/wav", self.rng.gen_range(500_000..=120_000_000), metadata)
    }

    fn geotiff(&mut self) -> (String, &'static str, u64, Value) {
        let name = format!("carte_{:03}.tiff", self.rng.gen_range(1..=500));
        let width = self.optional_size();
        let height = self.optional_size();

        let metadata = json!({
            "type": "geotiff",
            "largeur": width,
            "hauteur": height,
            "systeme_coordonnees": self.pick(&["EPSG:4326 - WGS 84", "EPSG:3857"]),
            "boite_englobante": [
                self.coordinate(180.0, 4),
                self.coordinate(90.0, 4),
                self.coordinate(180.0, 4),
                self.coordinate(90.0, 4),
            ],
            "resolution": self.pick(&["1m/pixel", "10m/pixel", "30m/pixel"]),
            "bandes": self.pick(&[1, 3, 4, 8]),
        });
        (name, "image/tiff", self.rng.gen_range(2_000_000..=400_000_000), metadata)
    }

    fn pdf(&mut self) -> (String, &'static str, u64, Value) {
        let name = format!("document_{:03}.pdf", self.rng.gen_range(1..=200));
        let metadata = json!({
            "type": "pdf",
            "type_document": "Plan de Gestion de Données",
            "version_pgd": self.pick(&["1.0", "2.1", "2.0"]),
            "modele_utilise": self.pick(&["Science Europe", "DMP OPIDoR v3"]),
        });
        (name, "application/pdf", self.rng.gen_range(80_000..=8_000_000), metadata)
    }

    /// One of the geotiff sizes, or null one time in four
    fn optional_size(&mut self) -> Option<i64> {
        if self.rng.gen_range(0..=GEOTIFF_SIZES.len()) == GEOTIFF_SIZES.len() {
            None
        } else {
            Some(self.pick(&GEOTIFF_SIZES))
        }
    }

    /// Uniform in `[-bound, bound]`, rounded to `decimals` places
    fn coordinate(&mut self, bound: f64, decimals: i32) -> f64 {
        let scale = 10f64.powi(decimals);
        (self.rng.gen_range(-bound..=bound) * scale).round() / scale
    }

    fn date_between(&mut self, start: NaiveDate, end: NaiveDate) -> NaiveDate {
        let days = (end - start).num_days();
        if days <= 0 {
            return start;
        }
        start + Duration::days(self.rng.gen_range(0..=days))
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.rng.gen_range(0..items.len())]
    }
}

fn unit_for(column: &str) -> Option<&'static str> {
    match column {
        "temperature" => Some("°C"),
        "nitrates" | "phosphates" => Some("mg/L"),
        "concentration_hcl" => Some("mol/L"),
        "conductivite" => Some("µS/cm"),
        _ => None,
    }
}
