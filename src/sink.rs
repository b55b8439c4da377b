//! Per-item record stream written by the stages.
//!
//! The sink is a capability handed to the pipeline. Writes are best effort:
//! a sink that cannot write drops the record and the pipeline carries on.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// One item transition, as logged by a stage
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// 1-based stage number
    pub stage: usize,
    pub item_id: u64,
    pub value: f64,
    pub timestamp_ms: u64,
    /// End-to-end latency, only on records of items accepted by the filter
    pub latency_ms: Option<f64>,
}

impl LogRecord {
    /// Render as a CSV line (no trailing newline)
    pub fn to_csv(&self) -> String {
        let mut line = format!(
            "Stage{},{},{},{}",
            self.stage, self.item_id, self.value, self.timestamp_ms
        );
        if let Some(latency) = self.latency_ms {
            line.push_str(&format!(" (VALID, latency={latency}ms)"));
        }
        line
    }
}

pub const CSV_HEADER: &str = "Stage,ItemID,Value,Timestamp";

/// Title line written above the CSV header, followed by Unix seconds
pub const LOG_TITLE: &str = "Pipeline Log - Timestamp: ";

/// Destination for [`LogRecord`]s
pub trait LogSink: Send + Sync {
    /// Called once per run before any record
    fn write_header(&self) {}

    fn record(&self, record: &LogRecord);

    fn flush(&self) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn record(&self, _record: &LogRecord) {}
}

/// CSV file sink
#[derive(Debug)]
pub struct FileLogSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileLogSink {
    /// Create (or truncate) the file at `path`
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl LogSink for FileLogSink {
    fn write_header(&self) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{LOG_TITLE}{secs}");
        let _ = writeln!(writer, "{CSV_HEADER}");
    }

    fn record(&self, record: &LogRecord) {
        let _ = writeln!(self.writer.lock(), "{}", record.to_csv());
    }

    fn flush(&self) {
        let _ = self.writer.lock().flush();
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    headers: Mutex<usize>,
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Number of times the header was written
    pub fn header_count(&self) -> usize {
        *self.headers.lock()
    }
}

impl LogSink for MemorySink {
    fn write_header(&self) {
        *self.headers.lock() += 1;
    }

    fn record(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stage: usize, latency_ms: Option<f64>) -> LogRecord {
        LogRecord {
            stage,
            item_id: 7,
            value: 1.5,
            timestamp_ms: 120,
            latency_ms,
        }
    }

    #[test]
    fn test_csv_format() {
        assert_eq!(record(1, None).to_csv(), "Stage1,7,1.5,120");
        assert_eq!(
            record(3, Some(2.5)).to_csv(),
            "Stage3,7,1.5,120 (VALID, latency=2.5ms)"
        );
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline_log.txt");

        let sink = FileLogSink::create(&path).unwrap();
        sink.write_header();
        sink.record(&record(1, None));
        sink.record(&record(2, None));
        sink.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        let secs: u64 = lines[0]
            .strip_prefix(LOG_TITLE)
            .expect("title line")
            .parse()
            .unwrap();
        assert!(secs > 0);
        assert_eq!(
            lines[1..],
            [CSV_HEADER, "Stage1,7,1.5,120", "Stage2,7,1.5,120"]
        );
    }

    #[test]
    fn test_file_sink_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("log.txt");
        assert!(FileLogSink::create(path).is_err());
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        sink.write_header();
        sink.record(&record(1, None));
        assert_eq!(sink.header_count(), 1);
        assert_eq!(sink.records(), vec![record(1, None)]);
    }
}
