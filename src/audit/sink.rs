//! Audit export sinks.
//!
//! Audit rows live in the store like any other rows. A sink is an
//! optional extra destination the engine exports them to after the
//! owning transaction commits; exports never happen for rolled-back
//! transactions. The file sink is append-only with one JSON record
//! per line, synced before the append returns.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One exported decision audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Unique export record id.
    pub id: Uuid,

    /// Transaction that produced the audit row.
    pub tx_id: Uuid,

    /// Audit entity name.
    pub entity: String,

    /// Audit row id within its entity.
    pub row: i64,

    /// Full audit row payload, request and reason included.
    pub fields: serde_json::Value,
}

impl DecisionRecord {
    pub fn new(tx_id: Uuid, entity: &str, row: i64, fields: serde_json::Value) -> Self {
        DecisionRecord {
            id: Uuid::new_v4(),
            tx_id,
            entity: entity.to_string(),
            row,
            fields,
        }
    }

    /// Serialize to a single JSON line.
    pub fn to_json_line(&self) -> io::Result<String> {
        serde_json::to_string(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Append-only audit export destination.
pub trait AuditSink: Send + Sync {
    /// Append a record. The record MUST be visible after this call
    /// returns.
    fn append(&self, record: &DecisionRecord) -> io::Result<()>;

    /// Sync the sink to durable storage.
    fn sync(&self) -> io::Result<()>;
}

/// File-based sink: one JSON record per line, fsynced per append.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl FileAuditSink {
    /// Open or create the export file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileAuditSink {
            path,
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, record: &DecisionRecord) -> io::Result<()> {
        let json = record.to_json_line()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit sink poisoned"))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn sync(&self) -> io::Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit sink poisoned"))?;
        writer.get_ref().sync_all()
    }
}

/// In-memory sink for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<DecisionRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all exported records.
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &DecisionRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit sink poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample() -> DecisionRecord {
        DecisionRecord::new(
            Uuid::new_v4(),
            "supplier_choice",
            1,
            serde_json::json!({"reason": "Fallback: decision service unavailable, using min:unit_cost"}),
        )
    }

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemoryAuditSink::new();
        let a = sample();
        let b = sample();
        sink.append(&a).unwrap();
        sink.append(&b).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[0], a);
        assert_eq!(sink.records()[1], b);
    }

    #[test]
    fn test_file_sink_writes_one_json_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.log");
        let sink = FileAuditSink::open(&path).unwrap();

        sink.append(&sample()).unwrap();
        sink.append(&sample()).unwrap();
        sink.sync().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: DecisionRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.entity, "supplier_choice");
        }
    }
}
