//! Rank-cycle audit log
//!
//! Append-only record of every promotion, removal, forfeit, bonus,
//! redistribution, and rollback. Entries are hash-chained with BLAKE3 so a
//! rewritten or dropped entry breaks [`AuditLog::verify_chain`]. Entries are
//! fanned out to pluggable sinks (tracing console, JSON-lines file).

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::types::ids::{CycleId, WorkerId};

/// Hash of the (virtual) entry before the first one
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    PerformanceBonus,
    Promotion,
    Removal,
    Forfeit,
    Redistribution,
    CycleCommitted,
    CycleRolledBack,
    RewardDeferred,
}

impl AuditKind {
    /// Kinds that signal an operator-visible problem
    pub fn is_alert(self) -> bool {
        matches!(self, AuditKind::CycleRolledBack | AuditKind::RewardDeferred)
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditKind::PerformanceBonus => "BONUS",
            AuditKind::Promotion => "PROMOTE",
            AuditKind::Removal => "REMOVE",
            AuditKind::Forfeit => "FORFEIT",
            AuditKind::Redistribution => "REDISTRIBUTE",
            AuditKind::CycleCommitted => "COMMIT",
            AuditKind::CycleRolledBack => "ROLLBACK",
            AuditKind::RewardDeferred => "DEFER",
        };
        f.write_str(s)
    }
}

/// Unsealed entry content, built before it is appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub cycle_id: Option<CycleId>,
    pub worker_id: Option<WorkerId>,
    pub amount: Option<Decimal>,
    pub details: BTreeMap<String, String>,
}

impl AuditRecord {
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            cycle_id: None,
            worker_id: None,
            amount: None,
            details: BTreeMap::new(),
        }
    }

    pub fn with_cycle(mut self, cycle_id: &CycleId) -> Self {
        self.cycle_id = Some(cycle_id.clone());
        self
    }

    pub fn with_worker(mut self, worker_id: &WorkerId) -> Self {
        self.worker_id = Some(worker_id.clone());
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Sealed, chained audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub entry_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub record: AuditRecord,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    fn seal(sequence: u64, record: AuditRecord, prev_hash: &str) -> Self {
        let mut entry = Self {
            sequence,
            entry_id: uuid::Uuid::now_v7().to_string(),
            timestamp: crate::now_millis(),
            record,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// BLAKE3 over the previous hash and this entry's content
    pub fn compute_hash(&self) -> String {
        let content = serde_json::to_vec(&(
            self.sequence,
            &self.entry_id,
            self.timestamp,
            &self.record,
        ))
        .unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(&content);
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Audit log sink
pub trait AuditSink: Send + Sync {
    /// Write an audit entry
    fn write(&self, entry: &AuditEntry);

    /// Flush pending entries
    fn flush(&self);
}

/// Console sink (tracing)
pub struct ConsoleAuditSink;

impl AuditSink for ConsoleAuditSink {
    fn write(&self, entry: &AuditEntry) {
        let cycle = entry.record.cycle_id.as_ref().map(|c| c.to_string());
        let worker = entry.record.worker_id.as_ref().map(|w| w.to_string());
        let amount = entry.record.amount.map(|a| a.to_string());

        if entry.record.kind.is_alert() {
            warn!(
                seq = entry.sequence,
                kind = %entry.record.kind,
                cycle = cycle.as_deref().unwrap_or("-"),
                worker = worker.as_deref().unwrap_or("-"),
                amount = amount.as_deref().unwrap_or("-"),
                "audit"
            );
        } else {
            info!(
                seq = entry.sequence,
                kind = %entry.record.kind,
                cycle = cycle.as_deref().unwrap_or("-"),
                worker = worker.as_deref().unwrap_or("-"),
                amount = amount.as_deref().unwrap_or("-"),
                "audit"
            );
        }
    }

    fn flush(&self) {}
}

/// JSON-lines file sink
pub struct JsonLinesAuditSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesAuditSink {
    /// Open (or create) `path` in append mode
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn write(&self, entry: &AuditEntry) {
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", entry.to_json()) {
            error!(error = %e, seq = entry.sequence, "Failed to write audit entry");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            error!(error = %e, "Failed to flush audit file");
        }
    }
}

/// Append-only, hash-chained audit log
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl AuditLog {
    /// Log with the console sink
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sinks: vec![Box::new(ConsoleAuditSink)],
        }
    }

    /// Log with no sinks (entries kept in memory only)
    pub fn silent() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sinks: Vec::new(),
        }
    }

    /// Add a sink
    pub fn add_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    /// Append one record
    pub fn append(&self, record: AuditRecord) -> AuditEntry {
        let entry = Self::push(&mut self.entries.write(), record);
        self.dispatch(&entry);
        entry
    }

    /// Append records as one contiguous run of the chain
    pub fn append_all(&self, records: Vec<AuditRecord>) -> Vec<AuditEntry> {
        let sealed: Vec<AuditEntry> = {
            let mut entries = self.entries.write();
            records
                .into_iter()
                .map(|record| Self::push(&mut entries, record))
                .collect()
        };

        for entry in &sealed {
            self.dispatch(entry);
        }
        sealed
    }

    fn push(entries: &mut Vec<AuditEntry>, record: AuditRecord) -> AuditEntry {
        let prev = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let entry = AuditEntry::seal(entries.len() as u64, record, &prev);
        entries.push(entry.clone());
        entry
    }

    fn dispatch(&self, entry: &AuditEntry) {
        for sink in &self.sinks {
            sink.write(entry);
        }
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Entries for one ranking cycle
    pub fn for_cycle(&self, cycle_id: &CycleId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.record.cycle_id.as_ref() == Some(cycle_id))
            .cloned()
            .collect()
    }

    /// Recompute every hash and link
    pub fn verify_chain(&self) -> bool {
        let entries = self.entries.read();
        let mut prev = GENESIS_HASH.to_string();
        for (idx, entry) in entries.iter().enumerate() {
            if entry.sequence != idx as u64 || entry.prev_hash != prev {
                return false;
            }
            if entry.compute_hash() != entry.hash {
                return false;
            }
            prev = entry.hash.clone();
        }
        true
    }

    /// Hash of the newest entry
    pub fn head_hash(&self) -> String {
        self.entries
            .read()
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Flush all sinks
    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn promotion(cycle: &CycleId, worker: &str) -> AuditRecord {
        AuditRecord::new(AuditKind::Promotion)
            .with_cycle(cycle)
            .with_worker(&WorkerId::from(worker))
            .with_amount(dec!(100))
            .with_detail("from_tier", 5)
            .with_detail("to_tier", 4)
    }

    #[test]
    fn test_chain_links() {
        let log = AuditLog::silent();
        let cycle = CycleId::from("sprint-1");
        let first = log.append(promotion(&cycle, "w-1"));
        let second = log.append(promotion(&cycle, "w-2"));

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);
        assert!(log.verify_chain());
    }

    #[test]
    fn test_tamper_detected() {
        let log = AuditLog::silent();
        let cycle = CycleId::from("sprint-1");
        log.append(promotion(&cycle, "w-1"));
        log.append(promotion(&cycle, "w-2"));

        log.entries.write()[0].record.amount = Some(dec!(1_000_000));
        assert!(!log.verify_chain());
    }

    #[test]
    fn test_for_cycle_filter() {
        let log = AuditLog::silent();
        log.append(promotion(&CycleId::from("a"), "w-1"));
        log.append(promotion(&CycleId::from("b"), "w-2"));
        log.append(AuditRecord::new(AuditKind::CycleCommitted).with_cycle(&CycleId::from("a")));

        assert_eq!(log.for_cycle(&CycleId::from("a")).len(), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_json_lines_sink() {
        let path = std::env::temp_dir().join(format!("agora-audit-{}.jsonl", uuid::Uuid::now_v7()));
        {
            let mut log = AuditLog::silent();
            log.add_sink(Box::new(JsonLinesAuditSink::open(&path).unwrap()));
            log.append(promotion(&CycleId::from("c"), "w-9"));
            log.flush();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("w-9"));
        let _ = std::fs::remove_file(path);
    }
}
