// render.rs - human readable report output

use datastat_core::{
    AcquisitionSpan, FilesPerDataset, MissingDimensions, Report, Section, TypeVolume,
};

const NO_DATA: &str = "no data";

/// Byte count followed by a binary-unit rendering when it helps
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{} B ({:.2} {})", bytes, value, UNITS[unit])
}

fn number(value: f64) -> String {
    format!("{:.2}", value)
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| NO_DATA.to_string(), |v| format!("{:.2} %", v))
}

fn section<T>(title: &str, outcome: &Section<T>, body: impl FnOnce(&T) -> Vec<String>) -> String {
    let mut out = format!("== {} ==\n", title);
    let lines = match outcome {
        Section::Ready(value) => body(value),
        Section::Failed { error } => vec![format!("failed: {}", error)],
    };
    for line in lines {
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn volume_lines(volumes: &[TypeVolume]) -> Vec<String> {
    if volumes.is_empty() {
        return vec![NO_DATA.to_string()];
    }
    volumes
        .iter()
        .map(|v| {
            format!(
                "{:<10} {:>6} files  {}",
                v.file_type.as_deref().unwrap_or("(none)"),
                v.nb_fichiers,
                human_bytes(v.volume_total_octets)
            )
        })
        .collect()
}

fn files_lines(stats: &Option<FilesPerDataset>) -> Vec<String> {
    match stats {
        Some(s) => vec![
            format!("mean: {}", number(s.moyenne_fichiers_par_dataset)),
            format!("min:  {}", s.min_fichiers),
            format!("max:  {}", s.max_fichiers),
        ],
        None => vec![NO_DATA.to_string()],
    }
}

fn span_lines(span: &Option<AcquisitionSpan>) -> Vec<String> {
    match span {
        Some(s) => vec![
            format!("mean: {} days", number(s.duree_moyenne_jours)),
            format!("min:  {} days", number(s.duree_min_jours)),
            format!("max:  {} days", number(s.duree_max_jours)),
        ],
        None => vec![NO_DATA.to_string()],
    }
}

fn dimension_lines(dims: &MissingDimensions) -> Vec<String> {
    vec![
        format!("images:             {}", dims.total_images),
        format!("missing dimensions: {}", dims.images_dimensions_manquantes),
        format!("rate:               {}", percent(dims.taux_dimensions_manquantes)),
    ]
}

/// Plain text rendering of the sections present in `report`
pub fn render_text(report: &Report) -> String {
    let mut parts = Vec::new();

    if let Some(s) = &report.volume_by_type {
        parts.push(section("Volume by file type", s, |v| volume_lines(v)));
    }
    if let Some(s) = &report.files_per_dataset {
        parts.push(section("Files per dataset", s, files_lines));
    }
    if let Some(s) = &report.acquisition_span {
        parts.push(section("Acquisition span", s, span_lines));
    }
    if let Some(s) = &report.missing_dimensions {
        parts.push(section("Images with missing dimensions", s, dimension_lines));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastat_core::ReportStrategy;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1536 B (1.50 KiB)");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3145728 B (3.00 MiB)");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5368709120 B (5.00 GiB)");
    }

    #[test]
    fn test_render_undefined_values() {
        let report = Report {
            strategy: ReportStrategy::Native,
            volume_by_type: Some(Section::Ready(vec![])),
            files_per_dataset: Some(Section::Ready(None)),
            acquisition_span: None,
            missing_dimensions: Some(Section::Ready(MissingDimensions {
                total_images: 0,
                images_dimensions_manquantes: 0,
                taux_dimensions_manquantes: None,
            })),
        };

        let text = render_text(&report);
        assert!(text.contains("== Volume by file type ==\n  no data"));
        assert!(text.contains("== Files per dataset ==\n  no data"));
        assert!(!text.contains("Acquisition span"));
        assert!(text.contains("rate:               no data"));
    }

    #[test]
    fn test_render_values_and_failures() {
        let report = Report {
            strategy: ReportStrategy::Pipeline,
            volume_by_type: Some(Section::Ready(vec![TypeVolume {
                file_type: None,
                volume_total_octets: 2048,
                nb_fichiers: 2,
            }])),
            files_per_dataset: None,
            acquisition_span: Some(Section::Failed {
                error: "bad pipeline".to_string(),
            }),
            missing_dimensions: Some(Section::Ready(MissingDimensions {
                total_images: 3,
                images_dimensions_manquantes: 1,
                taux_dimensions_manquantes: Some(100.0 / 3.0),
            })),
        };

        let text = render_text(&report);
        assert!(text.contains("(none)"));
        assert!(text.contains("2048 B (2.00 KiB)"));
        assert!(text.contains("failed: bad pipeline"));
        assert!(text.contains("33.33 %"));
    }
}
