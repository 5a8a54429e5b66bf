//! Tabular upload handling
//!
//! A `LogTable` is the parsed CSV upload: header row plus string rows. It is
//! validated for the `source` / `log_message` columns, yields the ordered
//! batch of `LogRecord`s, and is written back out with the `target_label`
//! column appended.

use crate::log_record::LogRecord;
use std::path::Path;
use thiserror::Error;

pub const SOURCE_COLUMN: &str = "source";
pub const MESSAGE_COLUMN: &str = "log_message";
pub const LABEL_COLUMN: &str = "target_label";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("File must be a CSV.")]
    NotCsv(String),

    #[error("CSV must contain 'source' and 'log_message' columns. Missing: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Line {line} has an empty 'source' value")]
    EmptySource { line: u64 },

    #[error("Line {line} has {found} fields, expected at most {expected}")]
    RaggedRow { line: u64, expected: usize, found: usize },

    #[error("Label count {labels} does not match row count {rows}")]
    LabelCountMismatch { labels: usize, rows: usize },

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

impl TableError {
    /// Errors caused by the uploaded content rather than by the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TableError::NotCsv(_)
                | TableError::MissingColumns(_)
                | TableError::EmptySource { .. }
                | TableError::RaggedRow { .. }
                | TableError::Csv(_)
        )
    }
}

/// Reject anything whose name does not end in `.csv`
pub fn ensure_csv_filename(filename: &str) -> Result<(), TableError> {
    if filename.ends_with(".csv") {
        Ok(())
    } else {
        Err(TableError::NotCsv(filename.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// 1-based line each row starts on in the upload
    lines: Vec<u64>,
}

impl LogTable {
    /// Parse CSV bytes with a header row. Short rows are padded to the header
    /// width; rows with extra fields are rejected.
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches('\u{feff}').to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        let width = headers.len();
        let mut rows = Vec::new();
        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record
                .position()
                .map(|p| p.line())
                .unwrap_or(rows.len() as u64 + 2);
            if record.len() > width {
                return Err(TableError::RaggedRow {
                    line,
                    expected: width,
                    found: record.len(),
                });
            }
            let mut row: Vec<String> = record.iter().map(|v| v.to_string()).collect();
            row.resize(width, String::new());
            rows.push(row);
            lines.push(line);
        }

        Ok(Self { headers, rows, lines })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[index].as_str()).collect())
    }

    /// Check the required columns and build the ordered batch
    pub fn log_records(&self) -> Result<Vec<LogRecord>, TableError> {
        let missing: Vec<String> = [SOURCE_COLUMN, MESSAGE_COLUMN]
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TableError::MissingColumns(missing));
        }

        // Both indices exist, checked above
        let source_idx = self.column_index(SOURCE_COLUMN).unwrap_or_default();
        let message_idx = self.column_index(MESSAGE_COLUMN).unwrap_or_default();

        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let source = row[source_idx].trim();
                if source.is_empty() {
                    return Err(TableError::EmptySource { line: self.lines[i] });
                }
                Ok(LogRecord::new(source, row[message_idx].clone()))
            })
            .collect()
    }

    /// Append (or replace) a column. `values` must have one entry per row.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::LabelCountMismatch {
                labels: values.len(),
                rows: self.rows.len(),
            });
        }

        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Keep only rows for which `keep` returns true
    pub fn filter_rows<F>(&self, mut keep: F) -> LogTable
    where
        F: FnMut(&[String]) -> bool,
    {
        let (rows, lines) = self
            .rows
            .iter()
            .zip(&self.lines)
            .filter(|(r, _)| keep(r))
            .map(|(r, line)| (r.clone(), *line))
            .unzip();
        LogTable {
            headers: self.headers.clone(),
            rows,
            lines,
        }
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| TableError::Io(e.into_error()))
    }

    /// Write via a sibling temp file and rename, so readers never observe a
    /// partially written artifact
    pub async fn write_atomic(&self, path: &Path) -> Result<Vec<u8>, TableError> {
        let bytes = self.to_csv_bytes()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(bytes)
    }
}
