// Report integration tests: worked examples, both strategies
use datastat_core::report::dataset_span_days;
use datastat_core::{
    Collection, DataStatError, Dataset, DatasetGenerator, DocumentSource, GeneratorConfig,
    ReportGenerator, ReportKind, ReportStrategy, Section, TypeVolume,
};
use chrono::NaiveDate;
use serde_json::{json, Value};

const STRATEGIES: [ReportStrategy; 2] = [ReportStrategy::Native, ReportStrategy::Pipeline];

// Helper to build a collection with assigned _ids
fn collection(docs: Vec<Value>) -> Collection {
    Collection::from_documents("jeux_de_donnees", docs).unwrap()
}

fn ready<T>(section: Option<Section<T>>) -> T {
    match section {
        Some(Section::Ready(value)) => value,
        Some(Section::Failed { error }) => panic!("section failed: {}", error),
        None => panic!("section missing"),
    }
}

#[test]
fn test_volume_and_files_example() {
    let coll = collection(vec![
        json!({"fichiers": [
            {"taille_fichier_octets": 10, "metadonnees_techniques": {"type": "image"}},
            {"taille_fichier_octets": 20, "metadonnees_techniques": {"type": "image"}}
        ]}),
        json!({"fichiers": [
            {"taille_fichier_octets": 5, "metadonnees_techniques": {"type": "doc"}}
        ]}),
    ]);

    for strategy in STRATEGIES {
        let generator = ReportGenerator::new(&coll, strategy);

        assert_eq!(
            generator.volume_by_type().unwrap(),
            vec![
                TypeVolume {
                    file_type: Some("doc".to_string()),
                    volume_total_octets: 5,
                    nb_fichiers: 1,
                },
                TypeVolume {
                    file_type: Some("image".to_string()),
                    volume_total_octets: 30,
                    nb_fichiers: 2,
                },
            ],
            "{:?}",
            strategy
        );

        let files = generator.files_per_dataset().unwrap().unwrap();
        assert_eq!(files.moyenne_fichiers_par_dataset, 1.5);
        assert_eq!(files.min_fichiers, 1);
        assert_eq!(files.max_fichiers, 2);
    }
}

#[test]
fn test_span_example_three_days() {
    let coll = collection(vec![json!({"fichiers": [
        {"date_acquisition": "2024-05-01"},
        {"date_acquisition": "2024-05-04"}
    ]})]);

    for strategy in STRATEGIES {
        let span = ReportGenerator::new(&coll, strategy)
            .acquisition_span()
            .unwrap()
            .unwrap();
        assert_eq!(span.duree_moyenne_jours, 3.0);
        assert_eq!(span.duree_min_jours, 3.0);
        assert_eq!(span.duree_max_jours, 3.0);
    }
}

#[test]
fn test_rate_example_one_in_four() {
    let coll = collection(vec![
        json!({"fichiers": [
            {"metadonnees_techniques": {"type": "image", "largeur": 512, "hauteur": 512}},
            {"metadonnees_techniques": {"type": "image", "hauteur": 512}}
        ]}),
        json!({"fichiers": [
            {"metadonnees_techniques": {"type": "image", "largeur": 1024, "hauteur": 1024}},
            {"metadonnees_techniques": {"type": "image", "largeur": 2048, "hauteur": 2048}},
            {"metadonnees_techniques": {"type": "geotiff", "largeur": null}}
        ]}),
    ]);

    for strategy in STRATEGIES {
        let dims = ReportGenerator::new(&coll, strategy).missing_dimensions().unwrap();
        assert_eq!(dims.total_images, 4);
        assert_eq!(dims.images_dimensions_manquantes, 1);
        assert_eq!(dims.taux_dimensions_manquantes, Some(25.0));
    }
}

#[test]
fn test_single_file_and_identical_timestamps_span_zero() {
    let docs = vec![
        json!({"fichiers": [{"date_acquisition": "2023-02-01T10:00:00Z"}]}),
        json!({"fichiers": [
            {"date_acquisition": "2023-02-01 10:00:00"},
            {"date_acquisition": "2023-02-01T10:00:00+00:00"}
        ]}),
    ];

    for doc in &docs {
        let dataset = Dataset::from_value(doc).unwrap();
        assert_eq!(dataset_span_days(&dataset), Some(0.0));
    }
}

#[test]
fn test_empty_collection_reports_no_data() {
    let coll = collection(vec![]);

    for strategy in STRATEGIES {
        let report = ReportGenerator::new(&coll, strategy).generate();
        assert!(ready(report.volume_by_type).is_empty());
        assert_eq!(ready(report.files_per_dataset), None);
        assert_eq!(ready(report.acquisition_span), None);

        let dims = ready(report.missing_dimensions);
        assert_eq!(dims.total_images, 0);
        assert_eq!(dims.taux_dimensions_manquantes, None);
    }
}

#[test]
fn test_missing_fields_do_not_abort() {
    let coll = collection(vec![
        json!({"id_jeu_de_donnees": 1}),
        json!({"fichiers": null}),
        json!({"fichiers": [
            {},
            {"taille_fichier_octets": "big", "date_acquisition": 17},
            {"metadonnees_techniques": {"type": "image", "largeur": 100, "hauteur": 100},
             "date_acquisition": "not a date"}
        ]}),
    ]);

    for strategy in STRATEGIES {
        let report = ReportGenerator::new(&coll, strategy).generate();

        let volumes = ready(report.volume_by_type);
        assert_eq!(volumes[0].file_type, None);
        assert_eq!(volumes[0].nb_fichiers, 2);
        assert_eq!(volumes[0].volume_total_octets, 0);

        let files = ready(report.files_per_dataset).unwrap();
        assert_eq!(files.min_fichiers, 0);
        assert_eq!(files.max_fichiers, 3);
        assert_eq!(files.moyenne_fichiers_par_dataset, 1.0);

        // only the epoch-millisecond date parses: one dataset, span 0
        let span = ready(report.acquisition_span).unwrap();
        assert_eq!(span.duree_max_jours, 0.0);

        let dims = ready(report.missing_dimensions);
        assert_eq!(dims.total_images, 1);
        assert_eq!(dims.taux_dimensions_manquantes, Some(0.0));
    }
}

#[test]
fn test_strategies_agree_on_generated_data() {
    let docs = DatasetGenerator::new(GeneratorConfig {
        datasets: 150,
        min_files: 0,
        max_files: 8,
        seed: Some(2024),
    })
    .unwrap()
    .with_reference_date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    .generate();
    let coll = collection(docs);

    let native = ReportGenerator::new(&coll, ReportStrategy::Native).generate();
    let pipeline = ReportGenerator::new(&coll, ReportStrategy::Pipeline).generate();

    assert_eq!(native.volume_by_type, pipeline.volume_by_type);
    assert_eq!(native.files_per_dataset, pipeline.files_per_dataset);
    assert_eq!(native.acquisition_span, pipeline.acquisition_span);
    assert_eq!(native.missing_dimensions, pipeline.missing_dimensions);

    let volumes = ready(native.volume_by_type);
    let types: Vec<&str> = volumes
        .iter()
        .filter_map(|v| v.file_type.as_deref())
        .collect();
    assert_eq!(types, vec!["audio", "csv", "geotiff", "image", "pdf"]);
}

#[test]
fn test_generate_only_requested_sections() {
    let coll = collection(vec![json!({"fichiers": [{}]})]);

    for strategy in STRATEGIES {
        let report = ReportGenerator::new(&coll, strategy)
            .generate_only(&[ReportKind::FilesPerDataset, ReportKind::AcquisitionSpan]);
        assert!(report.volume_by_type.is_none());
        assert!(report.missing_dimensions.is_none());
        assert_eq!(ready(report.acquisition_span), None);
        assert_eq!(ready(report.files_per_dataset).unwrap().max_fichiers, 1);
    }
}

#[test]
fn test_explicit_and_assigned_ids_keep_datasets_apart() {
    let first = json!({"fichiers": [
        {"date_acquisition": "2024-01-01"},
        {"date_acquisition": "2024-01-11"}
    ]});
    let second = json!({"_id": 1, "fichiers": [{"date_acquisition": "2024-06-01"}]});

    // the first dataset is assigned _id 1, which the second one claims again
    let clash =
        Collection::from_documents("jeux_de_donnees", vec![first.clone(), second.clone()]);
    assert!(matches!(clash, Err(DataStatError::InvalidFormat(_))));

    let coll = collection(vec![second, first, json!({"_id": "1", "fichiers": []})]);
    let ids: Vec<Value> = coll.documents().unwrap().iter().map(|d| d["_id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!("1")]);

    for strategy in STRATEGIES {
        let span = ReportGenerator::new(&coll, strategy)
            .acquisition_span()
            .unwrap()
            .unwrap();
        assert_eq!(span.duree_moyenne_jours, 5.0, "{:?}", strategy);
        assert_eq!(span.duree_min_jours, 0.0);
        assert_eq!(span.duree_max_jours, 10.0);
    }
}

#[test]
fn test_non_object_file_entries_are_untyped_files() {
    let coll = collection(vec![json!({"fichiers": [
        "oops",
        3,
        {"taille_fichier_octets": 10, "metadonnees_techniques": {"type": "pdf"}},
        {"taille_fichier_octets": 4, "metadonnees_techniques": {"type": {"kind": "pdf"}}}
    ]})]);

    for strategy in STRATEGIES {
        let generator = ReportGenerator::new(&coll, strategy);
        assert_eq!(
            generator.volume_by_type().unwrap(),
            vec![
                TypeVolume {
                    file_type: None,
                    volume_total_octets: 4,
                    nb_fichiers: 3,
                },
                TypeVolume {
                    file_type: Some("pdf".to_string()),
                    volume_total_octets: 10,
                    nb_fichiers: 1,
                },
            ],
            "{:?}",
            strategy
        );

        let files = generator.files_per_dataset().unwrap().unwrap();
        assert_eq!(files.moyenne_fichiers_par_dataset, 4.0);
        assert_eq!(files.max_fichiers, 4);
    }
}

#[test]
fn test_ill_typed_dimensions_are_not_missing() {
    let coll = collection(vec![json!({"fichiers": [
        {"metadonnees_techniques": {"type": "image", "largeur": "wide", "hauteur": 300}},
        {"metadonnees_techniques": {"type": "image", "largeur": 10.5, "hauteur": 300}},
        {"metadonnees_techniques": {"type": "image", "largeur": 512, "hauteur": null}},
        {"metadonnees_techniques": {"type": ["image"], "largeur": {}, "hauteur": 300}}
    ]})]);

    for strategy in STRATEGIES {
        let dims = ReportGenerator::new(&coll, strategy).missing_dimensions().unwrap();
        assert_eq!(dims.total_images, 4, "{:?}", strategy);
        assert_eq!(dims.images_dimensions_manquantes, 1);
        assert_eq!(dims.taux_dimensions_manquantes, Some(25.0));
    }
}
