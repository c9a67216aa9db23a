//! CSV ingestion of API call records.
//!
//! Each file describes one source system (the file stem). Expected columns:
//!
//! | column            | required |
//! |-------------------|----------|
//! | `tool_name`       | yes      |
//! | `api_endpoint`    | yes      |
//! | `input_payload`   | yes      |
//! | `output_response` | yes      |
//! | `status_code`     | no       |
//! | `success`         | no       |
//! | `curl_command`    | no       |
//! | `timestamp`       | no       |
//!
//! Extra columns are ignored.

use apigraph_core::ApiRecord;
use csv::StringRecord;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REQUIRED_COLUMNS: [&str; 4] =
    ["tool_name", "api_endpoint", "input_payload", "output_response"];

pub const OPTIONAL_COLUMNS: [&str; 4] = ["status_code", "success", "curl_command", "timestamp"];

#[derive(Debug, Error)]
pub enum CsvIngestError {
    #[error("CSV file not found: {0}")]
    NotFound(PathBuf),

    #[error("malformed CSV in {source_system}: {source}")]
    Malformed {
        source_system: String,
        #[source]
        source: csv::Error,
    },

    #[error("missing required columns in {source_system}: {}", missing.join(", "))]
    MissingColumns {
        source_system: String,
        missing: Vec<String>,
    },
}

/// Parse one CSV file. The source system is the file stem.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<ApiRecord>, CsvIngestError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(CsvIngestError::NotFound(path.to_path_buf()));
    }
    let source_system = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvIngestError::Malformed {
            source_system: source_system.clone(),
            source,
        })?;
    let records = collect_records(reader, &source_system)?;

    tracing::info!(
        path = %path.display(),
        records = records.len(),
        "parsed API records"
    );
    Ok(records)
}

/// Parse records from any reader, tagging them with `source_system`.
pub fn read_records<R: Read>(
    reader: R,
    source_system: &str,
) -> Result<Vec<ApiRecord>, CsvIngestError> {
    let reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    collect_records(reader, source_system)
}

/// Parse several files, skipping (and logging) any that fail.
pub fn parse_multiple<P: AsRef<Path>>(paths: &[P]) -> Vec<ApiRecord> {
    let mut all = Vec::new();
    for path in paths {
        match parse_file(path) {
            Ok(records) => all.extend(records),
            Err(err) => {
                tracing::warn!(path = %path.as_ref().display(), error = %err, "skipping file");
            }
        }
    }
    tracing::info!(files = paths.len(), records = all.len(), "parsed API records");
    all
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord, source_system: &str) -> Result<Self, CsvIngestError> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();

        let mut missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !index.contains_key(**c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(CsvIngestError::MissingColumns {
                source_system: source_system.to_string(),
                missing,
            });
        }
        Ok(Self { index })
    }

    /// Cell text, or `None` when the column or cell is absent or blank.
    fn get<'r>(&self, row: &'r StringRecord, column: &str) -> Option<&'r str> {
        let value = row.get(*self.index.get(column)?)?;
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

fn collect_records<R: Read>(
    mut reader: csv::Reader<R>,
    source_system: &str,
) -> Result<Vec<ApiRecord>, CsvIngestError> {
    let malformed = |source: csv::Error| CsvIngestError::Malformed {
        source_system: source_system.to_string(),
        source,
    };

    let headers = reader.headers().map_err(malformed)?.clone();
    let columns = Columns::from_headers(&headers, source_system)?;

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(malformed)?;
        let Some(tool_name) = columns.get(&row, "tool_name") else {
            tracing::warn!(source_system, row = line + 1, "skipping row with empty tool_name");
            continue;
        };

        records.push(ApiRecord {
            tool_name: tool_name.trim().to_string(),
            api_endpoint: columns
                .get(&row, "api_endpoint")
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            source_system: source_system.to_string(),
            input_payload: columns
                .get(&row, "input_payload")
                .unwrap_or_default()
                .to_string(),
            output_response: columns
                .get(&row, "output_response")
                .unwrap_or_default()
                .to_string(),
            status_code: columns.get(&row, "status_code").and_then(parse_status),
            success: columns.get(&row, "success").and_then(parse_bool),
            curl_command: columns.get(&row, "curl_command").map(str::to_string),
            timestamp: columns.get(&row, "timestamp").map(str::to_string),
        });
    }
    Ok(records)
}

/// Accepts `200` and spreadsheet-style `200.0`.
fn parse_status(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(code) = text.parse::<i64>() {
        return Some(code);
    }
    match text.parse::<f64>() {
        Ok(code) if code.is_finite() && code.fract() == 0.0 => Some(code as i64),
        _ => {
            tracing::debug!(value = text, "unparseable status_code ignored");
            None
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "t" => Some(true),
        "false" | "0" | "no" | "n" | "f" => Some(false),
        other => {
            tracing::debug!(value = other, "unparseable success flag ignored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_accept_float_text() {
        assert_eq!(parse_status("200"), Some(200));
        assert_eq!(parse_status(" 404.0 "), Some(404));
        assert_eq!(parse_status("2.5"), None);
        assert_eq!(parse_status("ok"), None);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        for t in ["true", "True", "1", "yes", "Y"] {
            assert_eq!(parse_bool(t), Some(true), "{t}");
        }
        for f in ["false", "FALSE", "0", "no"] {
            assert_eq!(parse_bool(f), Some(false), "{f}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn reads_rows_from_memory() {
        let data = "tool_name,api_endpoint,input_payload,output_response,status_code,success\n\
                    get_user, /users ,\"{\"\"id\"\": 1}\",\"{\"\"email\"\": \"\"x\"\"}\",200,true\n";
        let records = read_records(data.as_bytes(), "crm").unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.tool_name, "get_user");
        assert_eq!(r.api_endpoint, "/users");
        assert_eq!(r.source_system, "crm");
        assert_eq!(r.input_payload, r#"{"id": 1}"#);
        assert_eq!(r.output_response, r#"{"email": "x"}"#);
        assert_eq!(r.status_code, Some(200));
        assert_eq!(r.success, Some(true));
        assert_eq!(r.curl_command, None);
    }

    #[test]
    fn missing_columns_are_listed_sorted() {
        let err = read_records("tool_name,output_response\nx,{}\n".as_bytes(), "crm").unwrap_err();
        match err {
            CsvIngestError::MissingColumns { missing, .. } => {
                assert_eq!(missing, vec!["api_endpoint", "input_payload"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
