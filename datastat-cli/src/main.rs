mod logging;
mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use datastat_core::collection::render_documents;
use datastat_core::report::pipelines::all_pipelines;
use datastat_core::{
    AppConfig, Collection, DatasetGenerator, DocumentSource, InputFormat, OutputFormat,
    ReportGenerator, ReportKind, ReportStrategy,
};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use logging::LogLevel;

#[derive(Parser)]
#[command(name = "datastat")]
#[command(about = "datastat - descriptive statistics over a dataset collection")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $DATASTAT_CONFIG, then ./datastat.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// error, warn, info, debug or trace (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic dataset collection
    Generate {
        /// Output file
        #[arg(short, long, default_value = "mongo_insert.js")]
        output: PathBuf,
        /// Number of datasets
        #[arg(long)]
        datasets: Option<usize>,
        /// Minimum number of files per dataset
        #[arg(long)]
        min_files: Option<usize>,
        /// Maximum number of files per dataset
        #[arg(long)]
        max_files: Option<usize>,
        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
        /// json, jsonl or mongo-script (guessed from the extension by default)
        #[arg(long, value_parser = parse_input_format, default_value = "auto")]
        format: InputFormat,
    },
    /// Compute the dataset report
    Report {
        /// Collection file
        input: PathBuf,
        /// auto, json, jsonl or mongo-script
        #[arg(long, value_parser = parse_input_format, default_value = "auto")]
        input_format: InputFormat,
        /// native or pipeline
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<ReportStrategy>,
        /// text or json
        #[arg(long, value_parser = parse_output)]
        output: Option<OutputFormat>,
        /// Only these reports: volume, files, span, dimensions
        #[arg(long, value_parser = parse_report_kind, value_delimiter = ',', num_args = 1..)]
        only: Vec<ReportKind>,
    },
    /// Run an aggregation pipeline from a JSON file
    Aggregate {
        /// Collection file
        input: PathBuf,
        /// JSON file holding the stage array
        #[arg(long)]
        pipeline: PathBuf,
        /// auto, json, jsonl or mongo-script
        #[arg(long, value_parser = parse_input_format, default_value = "auto")]
        input_format: InputFormat,
    },
    /// Print the report pipelines
    Pipelines,
}

fn parse_input_format(s: &str) -> std::result::Result<InputFormat, String> {
    InputFormat::from_str(s).ok_or_else(|| format!("unknown input format '{}'", s))
}

fn parse_strategy(s: &str) -> std::result::Result<ReportStrategy, String> {
    ReportStrategy::from_str(s).ok_or_else(|| format!("unknown strategy '{}'", s))
}

fn parse_output(s: &str) -> std::result::Result<OutputFormat, String> {
    OutputFormat::from_str(s).ok_or_else(|| format!("unknown output format '{}'", s))
}

fn parse_report_kind(s: &str) -> std::result::Result<ReportKind, String> {
    match s.to_lowercase().as_str() {
        "volume" | "volume_by_type" => Ok(ReportKind::VolumeByType),
        "files" | "files_per_dataset" => Ok(ReportKind::FilesPerDataset),
        "span" | "acquisition_span" => Ok(ReportKind::AcquisitionSpan),
        "dimensions" | "missing_dimensions" => Ok(ReportKind::MissingDimensions),
        _ => Err(format!("unknown report '{}'", s)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) =
        AppConfig::load(cli.config.as_deref()).with_context(|| "Failed to load configuration")?;

    let level_name = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let Some(level) = LogLevel::from_str(level_name) else {
        bail!("Invalid log level: {}", level_name);
    };
    logging::init(level);

    if let Some(path) = &config_path {
        info!(path = %path.display(), "using configuration file");
    }

    match cli.command {
        Commands::Generate {
            output,
            datasets,
            min_files,
            max_files,
            seed,
            format,
        } => generate(&config, &output, format, datasets, min_files, max_files, seed),
        Commands::Report {
            input,
            input_format,
            strategy,
            output,
            only,
        } => report(&config, &input, input_format, strategy, output, &only),
        Commands::Aggregate {
            input,
            pipeline,
            input_format,
        } => aggregate(&config, &input, input_format, &pipeline),
        Commands::Pipelines => print_pipelines(),
    }
}

fn load_collection(config: &AppConfig, input: &Path, format: InputFormat) -> Result<Collection> {
    Collection::load(input, format, &config.collection)
        .with_context(|| format!("Failed to load collection from {}", input.display()))
}

fn generate(
    config: &AppConfig,
    output: &Path,
    format: InputFormat,
    datasets: Option<usize>,
    min_files: Option<usize>,
    max_files: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let mut params = config.generator.clone();
    params.datasets = datasets.unwrap_or(params.datasets);
    params.min_files = min_files.unwrap_or(params.min_files);
    params.max_files = max_files.unwrap_or(params.max_files);
    params.seed = seed.or(params.seed);

    let docs = DatasetGenerator::new(params)
        .with_context(|| "Invalid generator parameters")?
        .generate();

    let content = render_documents(&docs, format.resolve(output), &config.collection)
        .with_context(|| "Failed to serialize generated documents")?;
    fs::write(output, content)
        .with_context(|| format!("Failed to write to file: {}", output.display()))?;

    println!("Generated {} datasets in {}", docs.len(), output.display());
    Ok(())
}

fn report(
    config: &AppConfig,
    input: &Path,
    format: InputFormat,
    strategy: Option<ReportStrategy>,
    output: Option<OutputFormat>,
    only: &[ReportKind],
) -> Result<()> {
    let collection = load_collection(config, input, format)?;
    let strategy = strategy.unwrap_or(config.report.strategy);
    let output = output.unwrap_or(config.report.output);

    let generator = ReportGenerator::new(&collection, strategy);
    let report = if only.is_empty() {
        generator.generate()
    } else {
        generator.generate_only(only)
    };

    match output {
        OutputFormat::Text => {
            println!(
                "Collection '{}': {} datasets ({} strategy)\n",
                collection.name(),
                collection.len(),
                if strategy == ReportStrategy::Native { "native" } else { "pipeline" }
            );
            print!("{}", render::render_text(&report));
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .with_context(|| "Failed to serialize report")?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn aggregate(config: &AppConfig, input: &Path, format: InputFormat, pipeline: &Path) -> Result<()> {
    let collection = load_collection(config, input, format)?;

    let content = fs::read_to_string(pipeline)
        .with_context(|| format!("Failed to read file: {}", pipeline.display()))?;
    let stages: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", pipeline.display()))?;

    let results = collection
        .aggregate(&stages)
        .with_context(|| format!("Failed to run pipeline from {}", pipeline.display()))?;

    let json =
        serde_json::to_string_pretty(&results).with_context(|| "Failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

fn print_pipelines() -> Result<()> {
    let pipelines: Map<String, Value> = all_pipelines()
        .into_iter()
        .map(|(kind, pipeline)| (kind.as_str().to_string(), pipeline))
        .collect();

    let json = serde_json::to_string_pretty(&pipelines)
        .with_context(|| "Failed to serialize pipelines")?;
    println!("{}", json);
    Ok(())
}
