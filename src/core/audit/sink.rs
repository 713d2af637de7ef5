//! Destinations for audit records

use super::AuditRecord;
use crate::error::{GateError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives batches of audit records on the flush thread
///
/// Any `FnMut(&[AuditRecord]) -> Result<()>` closure is a sink.
pub trait AuditSink: Send + 'static {
    /// Append a batch; an error loses the whole batch
    fn append(&mut self, records: &[AuditRecord]) -> Result<()>;

    /// Called once when the emitter shuts down
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> AuditSink for F
where
    F: FnMut(&[AuditRecord]) -> Result<()> + Send + 'static,
{
    fn append(&mut self, records: &[AuditRecord]) -> Result<()> {
        self(records)
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write + Send + 'static> {
    writer: W,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Append to `path`, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(JsonLinesSink::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send + 'static> AuditSink for JsonLinesSink<W> {
    fn append(&mut self, records: &[AuditRecord]) -> Result<()> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink; clones share the same buffer
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail, simulating an unreachable sink
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemorySink {
    fn append(&mut self, records: &[AuditRecord]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GateError::AuditSinkUnavailable(
                "memory sink is offline".to_string(),
            ));
        }
        self.records.lock().extend_from_slice(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::{Decision, Request};
    use chrono::Utc;

    fn record(resource: &str) -> AuditRecord {
        let request = Request::new("arn:aws:iam::111122223333:role/Reader", "s3:GetObject", resource);
        AuditRecord::new(&request, &Decision::deny(None, None, Vec::new(), 1), Utc::now())
    }

    #[test]
    fn test_json_lines_format() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.append(&[record("bucket/a.pdf"), record("bucket/b.pdf")])
            .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.resource, "bucket/b.pdf");
    }

    #[test]
    fn test_memory_sink_shared_between_clones() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.append(&[record("bucket/a.pdf")]).unwrap();
        assert_eq!(sink.len(), 1);

        sink.set_failing(true);
        assert!(writer.append(&[record("bucket/b.pdf")]).is_err());
        assert_eq!(sink.records().len(), 1);
    }
}
