use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const CSV_MIME: &str = "text/csv";
pub const JSON_MIME: &str = "application/json";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Row {index} is not a record with named fields")]
    NotARecord { index: usize },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A named file ready to be saved by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub mime: &'static str,
    pub contents: String,
}

impl Artifact {
    /// Save into `dir` under the artifact's own file name.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let path = dir.join(&self.filename);
        self.write_at(&path)?;
        Ok(path)
    }

    pub fn write_at(&self, path: &Path) -> Result<(), ExportError> {
        std::fs::write(path, &self.contents).map_err(|source| ExportError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), bytes = self.contents.len(), "export written");
        Ok(())
    }
}

fn as_record(value: Value, index: usize) -> Result<serde_json::Map<String, Value>, ExportError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ExportError::NotARecord { index }),
    }
}

/// Comma-separated export. The header is the first row's field names in
/// declaration order; every value is JSON-encoded so embedded commas, quotes
/// and newlines stay inside one cell. Missing or null values become `""`.
///
/// Returns `Ok(None)` for an empty collection: nothing to download.
pub fn rows_to_csv<T: Serialize>(rows: &[T], filename: &str) -> Result<Option<Artifact>, ExportError> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };
    let headers: Vec<String> = as_record(serde_json::to_value(first)?, 0)?
        .keys()
        .cloned()
        .collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(headers.join(","));
    let empty = Value::String(String::new());
    for (index, row) in rows.iter().enumerate() {
        let record = as_record(serde_json::to_value(row)?, index)?;
        let cells = headers
            .iter()
            .map(|h| {
                let value = match record.get(h) {
                    None | Some(Value::Null) => &empty,
                    Some(v) => v,
                };
                serde_json::to_string(value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        lines.push(cells.join(","));
    }

    Ok(Some(Artifact {
        filename: filename.to_string(),
        mime: CSV_MIME,
        contents: lines.join("\n"),
    }))
}

/// Pretty-printed JSON of the whole report, whatever its size.
pub fn report_to_json<T: Serialize>(report: &T, filename: &str) -> Result<Artifact, ExportError> {
    Ok(Artifact {
        filename: filename.to_string(),
        mime: JSON_MIME,
        contents: serde_json::to_string_pretty(report)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExplainResponse, PredictionRow, Scalar};
    use serde_json::json;

    #[test]
    fn empty_rows_produce_no_artifact() {
        let rows: Vec<PredictionRow> = Vec::new();
        assert!(rows_to_csv(&rows, "predictions.csv").unwrap().is_none());
    }

    #[test]
    fn header_follows_first_row_field_order() {
        let rows = vec![PredictionRow {
            row_id: "0".into(),
            transaction_id: Some(Scalar::Int(2987004)),
            proba: 0.25,
            pred_label: Scalar::Int(0),
        }];
        let artifact = rows_to_csv(&rows, "predictions.csv").unwrap().unwrap();
        assert_eq!(artifact.mime, CSV_MIME);
        assert_eq!(
            artifact.contents,
            "row_id,TransactionID,proba,pred_label\n\"0\",2987004,0.25,0"
        );
    }

    #[test]
    fn values_with_delimiters_are_escaped() {
        let rows = vec![
            json!({"row_id": "a", "note": "x, \"quoted\"\nline"}),
            json!({"row_id": "b", "note": null}),
            json!({"row_id": "c"}),
        ];
        let artifact = rows_to_csv(&rows, "out.csv").unwrap().unwrap();
        let lines: Vec<&str> = artifact.contents.split('\n').collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "row_id,note");
        assert_eq!(lines[1], r#""a","x, \"quoted\"\nline""#);
        assert_eq!(lines[2], r#""b","""#);
        assert_eq!(lines[3], r#""c","""#);
    }

    #[test]
    fn scalar_rows_are_rejected() {
        let err = rows_to_csv(&[1, 2, 3], "n.csv").unwrap_err();
        assert!(matches!(err, ExportError::NotARecord { index: 0 }));
    }

    #[test]
    fn report_export_is_pretty_and_complete() {
        let report = json!({"summary": {"rows": 3}, "warnings": ["high missingness"]});
        let artifact = report_to_json(&report, "analysis-report.json").unwrap();
        assert_eq!(artifact.mime, JSON_MIME);
        assert!(artifact.contents.contains("\n  \"summary\": {\n"));
        let back: Value = serde_json::from_str(&artifact.contents).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn explanations_export_keeps_every_row() {
        let response: ExplainResponse = serde_json::from_value(json!({"explanations": [
            {"row_id": "0", "proba": 0.91, "pred_label": 1,
             "positives": [{"feature": "card4", "value": 0.2}], "negatives": []},
            {"row_id": "17", "proba": 0.03, "pred_label": 0,
             "positives": [], "negatives": [{"feature": "TransactionAmt", "value": -0.4}]}
        ]}))
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = report_to_json(&response, "explanations.json")
            .unwrap()
            .write_to(dir.path())
            .unwrap();

        let saved: ExplainResponse =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved, response);
        assert_eq!(saved.for_row("17").unwrap().negatives[0].feature, "TransactionAmt");
    }

    #[test]
    fn artifact_is_written_under_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = report_to_json(&json!({"a": 1}), "r.json").unwrap();
        let path = artifact.write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("r.json"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), artifact.contents);
    }
}
