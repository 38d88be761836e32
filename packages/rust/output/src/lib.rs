//! Output sink for transformed batches.
//!
//! [`FileSink`] writes each batch to the configured destination in one of
//! the [`OutputFormat`]s and keeps two append-only companions beside it:
//! `transformation_report.txt` (one line per save/skip) and `error_log.txt`
//! (one line per failed save).

mod report;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sundew_shared::{OutputConfig, OutputFormat, ProcessedItem, Result, SundewError};
use tracing::{info, instrument, warn};

pub use report::{TransformationReport, timestamp};

const REPORT_FILE: &str = "transformation_report.txt";
const ERROR_LOG_FILE: &str = "error_log.txt";

/// Durable destination for processed batches.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Persist `batch`. An empty batch writes nothing but is still reported.
    async fn save(&self, batch: &[ProcessedItem]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// Sink writing to a local file.
#[derive(Debug, Clone)]
pub struct FileSink {
    format: OutputFormat,
    destination: PathBuf,
    report: TransformationReport,
    error_log: PathBuf,
}

impl FileSink {
    /// Create the sink, ensuring the destination directory exists.
    pub fn new(config: &OutputConfig) -> Result<Self> {
        let dir = parent_dir(&config.destination);
        std::fs::create_dir_all(&dir).map_err(|e| SundewError::io(&dir, e))?;

        info!(
            format = config.format.label(),
            destination = %config.destination.display(),
            "output sink initialized"
        );

        Ok(Self {
            format: config.format,
            destination: config.destination.clone(),
            report: TransformationReport::new(dir.join(REPORT_FILE)),
            error_log: dir.join(ERROR_LOG_FILE),
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn report(&self) -> &TransformationReport {
        &self.report
    }

    pub fn error_log_path(&self) -> &Path {
        &self.error_log
    }

    fn write_batch(&self, batch: &[ProcessedItem]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                self.write_json(batch)?;
                Ok(format!("Saved {} items in JSON format", batch.len()))
            }
            OutputFormat::Csv => {
                self.write_csv(batch)?;
                Ok(format!("Saved {} rows in CSV format", batch.len()))
            }
            OutputFormat::Text => {
                self.write_text(batch)?;
                Ok(format!("Saved {} lines in text format", batch.len()))
            }
        }
    }

    /// Merge into the JSON array at the destination via a temp file + rename.
    fn write_json(&self, batch: &[ProcessedItem]) -> Result<()> {
        let path = &self.destination;
        let mut existing: Vec<serde_json::Value> = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| SundewError::io(path, e))?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    SundewError::Output(format!(
                        "{} does not hold a JSON array: {e}",
                        path.display()
                    ))
                })?
            }
        } else {
            Vec::new()
        };

        for item in batch {
            existing.push(
                serde_json::to_value(item).map_err(|e| SundewError::Output(e.to_string()))?,
            );
        }

        let json = serde_json::to_string_pretty(&existing)
            .map_err(|e| SundewError::Output(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| SundewError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| SundewError::io(path, e))?;
        Ok(())
    }

    /// Append rows; the header row is written only when the file is new.
    fn write_csv(&self, batch: &[ProcessedItem]) -> Result<()> {
        let path = &self.destination;
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SundewError::io(path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for item in batch {
            writer
                .serialize(CsvRow::from(item))
                .map_err(|e| SundewError::Output(format!("CSV write failed: {e}")))?;
        }
        writer.flush().map_err(|e| SundewError::io(path, e))
    }

    fn write_text(&self, batch: &[ProcessedItem]) -> Result<()> {
        let mut out = String::new();
        for item in batch {
            let content = item
                .processed_content
                .as_deref()
                .unwrap_or(item.original_text.as_str());
            out.push_str(&format!(
                "[{}] {}: {}\n",
                item.created_at.to_rfc3339(),
                item.id,
                content.replace(['\r', '\n'], " ")
            ));
        }
        append(&self.destination, &out)
    }

    fn log_error(&self, message: &str) {
        let line = format!("[{}] ERROR: {message}\n", timestamp());
        if let Err(e) = append(&self.error_log, &line) {
            warn!(error = %e, "failed to append to error log");
        }
    }
}

#[async_trait]
impl OutputSink for FileSink {
    #[instrument(skip_all, fields(items = batch.len(), format = self.format.label()))]
    async fn save(&self, batch: &[ProcessedItem]) -> Result<()> {
        if batch.is_empty() {
            warn!("no data to save");
            self.report.record(&format!(
                "No data to save in {} format",
                self.format.label()
            ));
            return Ok(());
        }

        match self.write_batch(batch) {
            Ok(entry) => {
                self.report.record(&entry);
                info!(destination = %self.destination.display(), "data saved");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "error saving data");
                self.log_error(&e.to_string());
                Err(SundewError::Output(e.to_string()))
            }
        }
    }
}

/// Directory holding `path`, `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SundewError::io(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| SundewError::io(path, e))
}

/// One CSV row; field order defines the header.
#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    created_at: String,
    original_text: &'a str,
    processed_content: &'a str,
}

impl<'a> From<&'a ProcessedItem> for CsvRow<'a> {
    fn from(item: &'a ProcessedItem) -> Self {
        Self {
            id: item.id.as_str(),
            created_at: item.created_at.to_rfc3339(),
            original_text: &item.original_text,
            processed_content: item.processed_content.as_deref().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sundew_shared::ItemId;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sundew-output-{}", Uuid::now_v7()))
    }

    fn sink(dir: &Path, format: OutputFormat, file: &str) -> FileSink {
        FileSink::new(&OutputConfig {
            format,
            destination: dir.join(file),
        })
        .expect("create sink")
    }

    fn processed(id: u64, content: Option<&str>) -> ProcessedItem {
        ProcessedItem {
            id: ItemId::from(id),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            original_text: format!("post {id}"),
            processed_content: content.map(String::from),
        }
    }

    #[tokio::test]
    async fn json_saves_accumulate_in_one_array() {
        let dir = temp_dir();
        let sink = sink(&dir, OutputFormat::Json, "data.json");

        sink.save(&[processed(1, Some("one"))]).await.unwrap();
        sink.save(&[processed(2, Some("two")), processed(3, None)])
            .await
            .unwrap();

        let content = std::fs::read_to_string(sink.destination()).unwrap();
        let items: Vec<ProcessedItem> = serde_json::from_str(&content).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(items[2].processed_content, None);

        let entries = sink.report().entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("Saved 1 items in JSON format"));
        assert!(entries[1].ends_with("Saved 2 items in JSON format"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn csv_writes_header_once_and_quotes_fields() {
        let dir = temp_dir();
        let sink = sink(&dir, OutputFormat::Csv, "data.csv");

        sink.save(&[processed(1, Some("a, \"quoted\" summary"))])
            .await
            .unwrap();
        sink.save(&[processed(2, Some("plain"))]).await.unwrap();

        let content = std::fs::read_to_string(sink.destination()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "id,created_at,original_text,processed_content");
        assert!(lines[1].starts_with("1,2024-05-01T10:00:00+00:00,post 1,"));
        assert!(lines[1].ends_with(r#""a, ""quoted"" summary""#));
        assert!(lines[2].ends_with(",plain"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn text_appends_one_line_per_item() {
        let dir = temp_dir();
        let sink = sink(&dir, OutputFormat::Text, "data.txt");

        sink.save(&[processed(1, Some("multi\nline")), processed(2, None)])
            .await
            .unwrap();

        let content = std::fs::read_to_string(sink.destination()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("1: multi line"));
        // Falls back to the original text when the model returned nothing.
        assert!(lines[1].ends_with("2: post 2"));
        assert!(sink.report().entries().unwrap()[0].contains("Saved 2 lines in text format"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_batch_is_a_reported_noop() {
        let dir = temp_dir();
        let sink = sink(&dir, OutputFormat::Json, "data.json");

        sink.save(&[]).await.expect("empty save succeeds");

        assert!(!sink.destination().exists());
        let entries = sink.report().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("No data to save"));
        assert!(!sink.error_log_path().exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_save_appends_to_error_log() {
        let dir = temp_dir();
        let sink = sink(&dir, OutputFormat::Json, "data.json");
        // A directory where the output file should be makes every write fail.
        std::fs::create_dir_all(sink.destination()).unwrap();

        let result = sink.save(&[processed(1, Some("x"))]).await;
        assert!(matches!(result, Err(SundewError::Output(_))));

        let log = std::fs::read_to_string(sink.error_log_path()).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("ERROR:"));
        assert!(sink.report().entries().unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn csv_multiline_content_reads_back_as_one_record() {
        let dir = temp_dir();
        let sink = sink(&dir, OutputFormat::Csv, "data.csv");

        sink.save(&[processed(1, Some("line one\nline two")), processed(2, None)])
            .await
            .unwrap();

        let mut reader = csv::Reader::from_path(sink.destination()).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "line one\nline two");
        assert_eq!(&rows[1][0], "2");
        assert_eq!(&rows[1][3], "");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
