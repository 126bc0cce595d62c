use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regsweep_crawler::EntityRecord;
use serde::{Deserialize, Serialize};

pub const CSV_FILE: &str = "companies.csv";
pub const NDJSON_FILE: &str = "companies.ndjson";

pub const CSV_HEADER: [&str; 31] = [
    "source_state",
    "entity_number",
    "entity_name",
    "entity_type",
    "entity_subtype",
    "status",
    "registration_date",
    "last_filing_date",
    "expiration_date",
    "jurisdiction",
    "principal_street",
    "principal_city",
    "principal_state",
    "principal_postal_code",
    "principal_country",
    "mailing_street",
    "mailing_city",
    "mailing_state",
    "mailing_postal_code",
    "mailing_country",
    "agent_name",
    "agent_street",
    "agent_city",
    "agent_state",
    "agent_postal_code",
    "agent_country",
    "business_purpose",
    "incorporator_name",
    "previous_names",
    "source_detail_url",
    "source_last_seen_at",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvWriterConfig {
    #[serde(default = "default_csv_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub escape: Option<char>,
    #[serde(default = "default_csv_terminator")]
    pub terminator: CsvTerminator,
    /// Joins `previous_names` into a single cell.
    #[serde(default = "default_list_separator")]
    pub list_separator: String,
}

impl Default for CsvWriterConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            escape: None,
            terminator: CsvTerminator::Any('\n'),
            list_separator: ";".into(),
        }
    }
}

fn default_csv_delimiter() -> char {
    CsvWriterConfig::default().delimiter
}

fn default_csv_terminator() -> CsvTerminator {
    CsvWriterConfig::default().terminator
}

fn default_list_separator() -> String {
    CsvWriterConfig::default().list_separator
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CsvTerminator {
    CRLF,
    Any(char),
}

impl From<CsvTerminator> for csv::Terminator {
    fn from(source: CsvTerminator) -> Self {
        match source {
            CsvTerminator::CRLF => Self::CRLF,
            CsvTerminator::Any(c) => Self::Any(c as u8),
        }
    }
}

impl From<&CsvWriterConfig> for csv::WriterBuilder {
    fn from(c: &CsvWriterConfig) -> Self {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(c.delimiter as u8);
        builder.terminator(c.terminator.into());
        builder.has_headers(false);
        if let Some(escape) = c.escape {
            builder.double_quote(false);
            builder.escape(escape as u8);
        } else {
            builder.double_quote(true);
        }
        builder
    }
}

/// One CSV line, in [`CSV_HEADER`] order.
#[derive(Serialize)]
struct CsvRow<'a> {
    source_state: &'a str,
    entity_number: i64,
    entity_name: &'a str,
    entity_type: &'a str,
    entity_subtype: Option<&'a str>,
    status: &'a str,
    registration_date: Option<NaiveDate>,
    last_filing_date: Option<NaiveDate>,
    expiration_date: Option<NaiveDate>,
    jurisdiction: Option<&'a str>,
    principal_street: Option<&'a str>,
    principal_city: Option<&'a str>,
    principal_state: Option<&'a str>,
    principal_postal_code: Option<&'a str>,
    principal_country: Option<&'a str>,
    mailing_street: Option<&'a str>,
    mailing_city: Option<&'a str>,
    mailing_state: Option<&'a str>,
    mailing_postal_code: Option<&'a str>,
    mailing_country: Option<&'a str>,
    agent_name: Option<&'a str>,
    agent_street: Option<&'a str>,
    agent_city: Option<&'a str>,
    agent_state: Option<&'a str>,
    agent_postal_code: Option<&'a str>,
    agent_country: Option<&'a str>,
    business_purpose: Option<&'a str>,
    incorporator_name: Option<&'a str>,
    previous_names: String,
    source_detail_url: &'a str,
    source_last_seen_at: DateTime<Utc>,
}

impl<'a> CsvRow<'a> {
    fn new(r: &'a EntityRecord, list_separator: &str) -> Self {
        Self {
            source_state: &r.source_state,
            entity_number: r.entity_number,
            entity_name: &r.entity_name,
            entity_type: &r.entity_type,
            entity_subtype: r.entity_subtype.as_deref(),
            status: &r.status,
            registration_date: r.registration_date,
            last_filing_date: r.last_filing_date,
            expiration_date: r.expiration_date,
            jurisdiction: r.jurisdiction.as_deref(),
            principal_street: r.principal.street.as_deref(),
            principal_city: r.principal.city.as_deref(),
            principal_state: r.principal.region.as_deref(),
            principal_postal_code: r.principal.postal_code.as_deref(),
            principal_country: r.principal.country.as_deref(),
            mailing_street: r.mailing.street.as_deref(),
            mailing_city: r.mailing.city.as_deref(),
            mailing_state: r.mailing.region.as_deref(),
            mailing_postal_code: r.mailing.postal_code.as_deref(),
            mailing_country: r.mailing.country.as_deref(),
            agent_name: r.agent_name.as_deref(),
            agent_street: r.agent.street.as_deref(),
            agent_city: r.agent.city.as_deref(),
            agent_state: r.agent.region.as_deref(),
            agent_postal_code: r.agent.postal_code.as_deref(),
            agent_country: r.agent.country.as_deref(),
            business_purpose: r.business_purpose.as_deref(),
            incorporator_name: r.incorporator_name.as_deref(),
            previous_names: r.previous_names.join(list_separator),
            source_detail_url: &r.source_detail_url,
            source_last_seen_at: r.source_last_seen_at,
        }
    }
}

/// Writes `companies.csv` and `companies.ndjson` into `dir`. Both files are
/// written even when `records` is empty.
pub fn export_data(
    records: &[EntityRecord],
    dir: &Path,
    csv_conf: &CsvWriterConfig,
) -> Result<Vec<PathBuf>> {
    fs_err::create_dir_all(dir)?;

    let csv_path = dir.join(CSV_FILE);
    let mut wtr = csv::WriterBuilder::from(csv_conf).from_writer(fs_err::File::create(&csv_path)?);
    wtr.write_record(CSV_HEADER)?;
    for record in records {
        wtr.serialize(CsvRow::new(record, &csv_conf.list_separator))
            .with_context(|| format!("Couldn't write entity {} to CSV", record.entity_number))?;
    }
    wtr.flush()?;

    let ndjson_path = dir.join(NDJSON_FILE);
    let mut out = BufWriter::new(fs_err::File::create(&ndjson_path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    log::info!("Exported {} entities to {}", records.len(), dir.display());
    Ok(vec![csv_path, ndjson_path])
}
