use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use labscan_core::{AnalysisOptions, AnalysisReport, LabCatalog, OverwritePolicy, Sex};
use labscan_extract::{analyze_with, UnitConverter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "labscan-cli",
    about = "Extract and interpret lab values from report text."
)]
struct Args {
    /// Report text file; reads stdin when omitted or `-`.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Patient sex used for reference ranges (male, female, other).
    #[arg(short, long, default_value = "other")]
    sex: String,

    /// JSON array of lab definitions replacing the builtin catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// JSON array of unit conversion rules replacing the builtin table.
    #[arg(long)]
    conversions: Option<PathBuf>,

    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,

    /// Keep the most confident match when a lab appears twice.
    #[arg(long)]
    strict: bool,

    /// Also split lines on semicolons.
    #[arg(long)]
    split_semicolons: bool,

    /// Read values below column titles in the first rows.
    #[arg(long)]
    header_scan: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let text = read_input(args.input.as_ref())?;

    let catalog = match &args.catalog {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read catalog {:?}", path))?;
            let catalog = LabCatalog::from_json_str(&json)?;
            info!(labs = catalog.len(), path = ?path, "custom catalog loaded");
            catalog
        }
        None => LabCatalog::builtin(),
    };
    let converter = match &args.conversions {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read conversions {:?}", path))?;
            let converter = UnitConverter::from_json_str(&json)?;
            info!(rules = converter.rules().len(), path = ?path, "conversion table loaded");
            converter
        }
        None => UnitConverter::default(),
    };

    let mut options = AnalysisOptions::for_sex(Sex::parse_lenient(&args.sex));
    options.config.split_on_semicolon = args.split_semicolons;
    options.config.header_scan = args.header_scan;
    if args.strict {
        options.config.overwrite = OverwritePolicy::KeepHighestConfidence;
    }

    let report = analyze_with(&catalog, &converter, &text, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report);
    }

    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Could not read file {:?}", path)),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Could not read stdin")?;
            Ok(text)
        }
    }
}

fn print_table(report: &AnalysisReport) {
    println!(
        "Generated at: {}\nSex: {}\nRecognized: {}  Unrecognized lines: {}",
        report.generated_at,
        report.sex,
        report.results.len(),
        report.unrecognized_lines
    );

    for result in report.results.values() {
        let value = match (&result.qualitative, result.display_value) {
            (Some(token), _) => token.clone(),
            (None, Some(value)) => value.to_string(),
            (None, None) => "-".to_string(),
        };
        let range = match (result.low, result.high) {
            (Some(low), Some(high)) => format!("{low}-{high}"),
            _ => String::new(),
        };
        println!(
            "{:<28} {:>10} {:<8} {} {}",
            result.display_name,
            value,
            result.unit,
            result.symbol(),
            range
        );
        if let Some(note) = &result.conversion_note {
            println!("{:<28} ({note})", "");
        }
    }

    for conflict in &report.conflicts {
        println!(
            "Conflict {}: kept line {}, discarded line {}",
            conflict.key, conflict.kept_line, conflict.discarded_line
        );
    }
}
