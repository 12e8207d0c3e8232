//! Test-data rows: `(field name, value, declared type)` triples grouped by row,
//! from CSV sheets or JSON fixtures.

use std::fs;
use std::path::Path;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::HarnessError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDataEntry {
    /// Catalog name, canonical path or DE number.
    pub field: String,
    pub value: String,
    #[serde(default, rename = "type")]
    pub declared_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRow {
    pub row_id: String,
    pub entries: Vec<TestDataEntry>,
    /// Recorded canonical response, used by the recorded oracle.
    #[serde(default)]
    pub canonical: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    row_id: String,
    field: String,
    value: String,
    #[serde(default, rename = "type")]
    declared_type: String,
}

/// `row_id,field,value,type` with a header line. Consecutive or not, records
/// sharing a `row_id` form one row; rows keep first-seen order.
pub fn read_rows_csv_str(body: &str) -> Result<Vec<TestRow>, HarnessError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows: Vec<TestRow> = Vec::new();
    for record in reader.deserialize::<CsvRecord>() {
        let record = record?;
        let row_id = record.row_id.trim();
        if row_id.is_empty() {
            return Err(HarnessError::FixtureFormat(
                "CSV record with empty row_id".to_owned(),
            ));
        }
        let entry = TestDataEntry {
            field: record.field.trim().to_owned(),
            value: record.value,
            declared_type: record.declared_type.trim().to_owned(),
        };
        match rows.iter_mut().find(|row| row.row_id == row_id) {
            Some(row) => row.entries.push(entry),
            None => rows.push(TestRow {
                row_id: row_id.to_owned(),
                entries: vec![entry],
                canonical: None,
            }),
        }
    }
    Ok(rows)
}

/// A single row object or an array of them.
pub fn read_rows_json_str(body: &str) -> Result<Vec<TestRow>, HarnessError> {
    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        _ => Err(HarnessError::FixtureFormat(
            "row fixture must be an object or an array of objects".to_owned(),
        )),
    }
}

/// Loads one `.json` / `.csv` file, or every such file in a directory in
/// file-name order.
pub fn load_rows(path: &Path) -> Result<Vec<TestRow>, HarnessError> {
    if !path.is_dir() {
        return load_rows_file(path);
    }

    let mut files = fs::read_dir(path)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    files.retain(|path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "json" | "csv"))
    });
    files.sort();

    let mut rows = Vec::new();
    for file in files {
        rows.extend(load_rows_file(&file)?);
    }
    Ok(rows)
}

fn load_rows_file(path: &Path) -> Result<Vec<TestRow>, HarnessError> {
    let body = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => read_rows_json_str(&body),
        Some("csv") => read_rows_csv_str(&body),
        _ => Err(HarnessError::FixtureFormat(format!(
            "unsupported row file {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_rows, read_rows_csv_str, read_rows_json_str};
    use crate::HarnessError;

    #[test]
    fn csv_records_group_by_row_in_first_seen_order() {
        let rows = read_rows_csv_str(
            "row_id,field,value,type\n\
             r2,mti,0100,n\n\
             r1,primaryAccountNumber,4111111111111111,n\n\
             r2,DE4,000000000500,\n\
             r1,amount,000000010000,n\n",
        )
        .expect("csv");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_id, "r2");
        assert_eq!(rows[0].entries.len(), 2);
        assert_eq!(rows[0].entries[1].declared_type, "");
        assert_eq!(rows[1].entries[1].field, "amount");
        assert!(rows[1].canonical.is_none());
    }

    #[test]
    fn json_fixture_accepts_single_row_or_array() {
        let single = read_rows_json_str(
            r#"{"row_id": "a", "entries": [{"field": "2", "value": "41", "type": "n"}],
                "canonical": {"card": {"pan": "41"}}}"#,
        )
        .expect("single");
        assert_eq!(single.len(), 1);
        assert!(single[0].canonical.is_some());

        let many = read_rows_json_str(r#"[{"row_id": "a", "entries": []}, {"row_id": "b", "entries": []}]"#)
            .expect("array");
        assert_eq!(many.len(), 2);

        assert!(matches!(
            read_rows_json_str("42"),
            Err(HarnessError::FixtureFormat(_))
        ));
    }

    #[test]
    fn directory_loading_reads_json_and_csv_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("b.csv"),
            "row_id,field,value,type\nfrom-csv,2,4111,n\n",
        )
        .expect("write csv");
        fs::write(
            dir.path().join("a.json"),
            r#"{"row_id": "from-json", "entries": []}"#,
        )
        .expect("write json");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");

        let rows = load_rows(dir.path()).expect("rows");
        let ids = rows.iter().map(|row| row.row_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["from-json", "from-csv"]);
    }

    #[test]
    fn unreadable_row_file_fails_the_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("a.json"),
            r#"{"row_id": "ok", "entries": []}"#,
        )
        .expect("write json");
        fs::create_dir(dir.path().join("b.json")).expect("create dir");

        assert!(matches!(load_rows(dir.path()), Err(HarnessError::Io(_))));
    }
}
