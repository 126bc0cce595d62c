use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use regsweep_crawler::{Address, EntityRecord};
use regsweep_export::{
    daily_folder, run_export, sha256_file, ExportConfig, ExportRun, Manifest, CSV_HEADER,
};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

fn record(entity_number: i64, name: &str, previous_names: &[&str]) -> EntityRecord {
    EntityRecord {
        source_state: "NY".into(),
        entity_number,
        entity_name: name.into(),
        entity_type: "DOMESTIC BUSINESS CORPORATION".into(),
        entity_subtype: None,
        status: "Active".into(),
        registration_date: Some(day()),
        last_filing_date: None,
        expiration_date: None,
        jurisdiction: None,
        principal: Address {
            street: Some("1 STATE ST".into()),
            city: Some("ALBANY".into()),
            region: Some("NY".into()),
            postal_code: Some("12207".into()),
            country: None,
        },
        mailing: Address::default(),
        agent_name: None,
        agent: Address::default(),
        business_purpose: None,
        incorporator_name: None,
        previous_names: previous_names.iter().map(|s| s.to_string()).collect(),
        source_detail_url: String::new(),
        source_last_seen_at: Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
    }
}

fn config(root: &std::path::Path) -> ExportConfig {
    ExportConfig {
        root: root.to_path_buf(),
        ..Default::default()
    }
}

fn run() -> ExportRun<'static> {
    ExportRun {
        jurisdiction: "NY",
        day: day(),
        crawl_duration: Duration::from_millis(90_500),
        crawl_errors: 3,
    }
}

#[test]
fn daily_folder_is_dated() {
    let root = tempfile::tempdir().unwrap();
    let dir = daily_folder(root.path(), "NY", day()).unwrap();
    assert_eq!(dir, root.path().join("NY_new_business/2024/06/10"));
    assert!(dir.is_dir());
}

#[test]
fn writes_data_manifest_and_checksums() {
    let root = tempfile::tempdir().unwrap();
    let records = vec![
        record(1, "ACME, INC", &["ACME CO", "ACME LTD"]),
        record(2, "WIDGETS LLC", &[]),
    ];

    let out = run_export(&config(root.path()), &run(), &records).unwrap();

    let mut csv = csv::Reader::from_path(&out.data_files[0]).unwrap();
    let header: Vec<String> = csv.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header, CSV_HEADER);
    let rows: Vec<csv::StringRecord> = csv.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][1], "1");
    assert_eq!(&rows[0][2], "ACME, INC");
    assert_eq!(&rows[0][11], "ALBANY");
    assert_eq!(&rows[0][28], "ACME CO;ACME LTD");
    assert_eq!(&rows[1][28], "");

    let ndjson = fs_err::read_to_string(&out.data_files[1]).unwrap();
    let lines: Vec<EntityRecord> = ndjson
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines, records);

    let manifest: Manifest =
        serde_json::from_str(&fs_err::read_to_string(&out.manifest).unwrap()).unwrap();
    assert_eq!(manifest.entities_total, 2);
    assert_eq!(manifest.previous_names_total, 2);
    assert_eq!(manifest.crawl_errors_total, 3);
    assert_eq!(manifest.crawl_duration_seconds, 90.5);
    assert_eq!(manifest.timezone, "UTC");
    assert_eq!(manifest.files, vec!["companies.csv", "companies.ndjson"]);

    let checksums = fs_err::read_to_string(&out.checksums).unwrap();
    let expected: Vec<String> = out
        .data_files
        .iter()
        .chain([&out.manifest])
        .map(|p| {
            let name = p.file_name().unwrap().to_string_lossy();
            format!("{}  {name}", sha256_file(p).unwrap())
        })
        .collect();
    assert_eq!(checksums.lines().collect::<Vec<_>>(), expected);
}

#[test]
fn empty_day_still_produces_files() {
    let root = tempfile::tempdir().unwrap();
    let out = run_export(&config(root.path()), &run(), &[]).unwrap();

    let csv = fs_err::read_to_string(&out.data_files[0]).unwrap();
    assert_eq!(csv.lines().count(), 1);
    assert!(csv.starts_with("source_state,entity_number,"));
    assert_eq!(fs_err::read_to_string(&out.data_files[1]).unwrap(), "");
    assert_eq!(
        fs_err::read_to_string(&out.checksums).unwrap().lines().count(),
        3
    );
}
