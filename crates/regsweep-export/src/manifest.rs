use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHECKSUMS_FILE: &str = "checksums.sha256";

/// Summary of one daily export, written next to the data files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub date: NaiveDate,
    pub timezone: String,
    pub source_state: String,
    pub entities_total: usize,
    pub previous_names_total: usize,
    pub crawl_duration_seconds: f64,
    pub crawl_errors_total: u64,
    pub coverage_notes: String,
    pub files: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub generator: String,
}

impl Manifest {
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs_err::write(&path, content)?;
        Ok(path)
    }
}

/// Hex-encoded SHA-256 of the file content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs_err::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Couldn't hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Writes `checksums.sha256` in `sha256sum` format, one line per file.
pub fn write_checksums(dir: &Path, files: &[PathBuf]) -> Result<PathBuf> {
    let path = dir.join(CHECKSUMS_FILE);
    let mut out = fs_err::File::create(&path)?;
    for file in files {
        let name = file_name(file)?;
        writeln!(out, "{}  {name}", sha256_file(file)?)?;
    }
    Ok(path)
}

pub(crate) fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("No file name in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        fs_err::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn checksums_use_sha256sum_layout() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.ndjson");
        fs_err::write(&empty, "").unwrap();

        let path = write_checksums(dir.path(), &[empty]).unwrap();
        assert_eq!(
            fs_err::read_to_string(path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855  empty.ndjson\n"
        );
    }
}
