//! Daily snapshot of the entities a crawl persisted.
//!
//! Layout: `<root>/<JUR>_new_business/YYYY/MM/DD/` holding `companies.csv`,
//! `companies.ndjson`, `manifest.json` and `checksums.sha256`.

mod manifest;
mod writer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use regsweep_crawler::EntityRecord;
use serde::{Deserialize, Serialize};

pub use manifest::{sha256_file, write_checksums, Manifest, CHECKSUMS_FILE, MANIFEST_FILE};
pub use writer::{export_data, CsvTerminator, CsvWriterConfig, CSV_FILE, CSV_HEADER, NDJSON_FILE};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub csv: CsvWriterConfig,
    #[serde(default = "default_coverage_notes")]
    pub coverage_notes: String,
    #[serde(default = "default_generator")]
    pub generator: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("exports"),
            csv: CsvWriterConfig::default(),
            coverage_notes: "Entities first filed within the retention window".into(),
            generator: concat!("regsweep/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

fn default_root() -> PathBuf {
    ExportConfig::default().root
}

fn default_coverage_notes() -> String {
    ExportConfig::default().coverage_notes
}

fn default_generator() -> String {
    ExportConfig::default().generator
}

/// Creates and returns `<root>/<JUR>_new_business/YYYY/MM/DD`.
pub fn daily_folder(root: &Path, jurisdiction: &str, day: NaiveDate) -> Result<PathBuf> {
    let dir = root
        .join(format!("{jurisdiction}_new_business"))
        .join(day.format("%Y").to_string())
        .join(day.format("%m").to_string())
        .join(day.format("%d").to_string());
    fs_err::create_dir_all(&dir)?;
    Ok(dir)
}

/// Inputs of one daily export beyond the records themselves.
#[derive(Debug, Clone)]
pub struct ExportRun<'a> {
    pub jurisdiction: &'a str,
    pub day: NaiveDate,
    pub crawl_duration: Duration,
    pub crawl_errors: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutput {
    pub dir: PathBuf,
    pub data_files: Vec<PathBuf>,
    pub manifest: PathBuf,
    pub checksums: PathBuf,
}

/// Writes data files, then the manifest, then checksums over all three.
pub fn run_export(
    conf: &ExportConfig,
    run: &ExportRun<'_>,
    records: &[EntityRecord],
) -> Result<ExportOutput> {
    let dir = daily_folder(&conf.root, run.jurisdiction, run.day)?;
    let data_files = export_data(records, &dir, &conf.csv)?;

    let manifest = Manifest {
        date: run.day,
        timezone: "UTC".into(),
        source_state: run.jurisdiction.to_string(),
        entities_total: records.len(),
        previous_names_total: records.iter().map(|r| r.previous_names.len()).sum(),
        crawl_duration_seconds: run.crawl_duration.as_secs_f64(),
        crawl_errors_total: run.crawl_errors,
        coverage_notes: conf.coverage_notes.clone(),
        files: data_files
            .iter()
            .map(|p| manifest::file_name(p))
            .collect::<Result<_>>()?,
        generated_at: Utc::now(),
        generator: conf.generator.clone(),
    };
    let manifest_path = manifest.write(&dir)?;

    let mut hashed = data_files.clone();
    hashed.push(manifest_path.clone());
    let checksums = write_checksums(&dir, &hashed)?;

    log::info!(
        "Export for {} {} written to {} ({} errors during crawl)",
        run.jurisdiction,
        run.day,
        dir.display(),
        run.crawl_errors
    );
    Ok(ExportOutput {
        dir,
        data_files,
        manifest: manifest_path,
        checksums,
    })
}
