use hotswap_core::{StatementKind, StatementObserver};
use std::sync::Mutex;

/// One `observe_statements` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRecord {
    pub service: String,
    pub method: String,
    pub kind: StatementKind,
    pub count: u64,
}

/// Observability sink that records everything for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    statements: Mutex<Vec<StatementRecord>>,
    changes: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statement_records(&self) -> Vec<StatementRecord> {
        self.statements.lock().unwrap().clone()
    }

    /// Group names for which a DSN change fired, in order.
    pub fn changes(&self) -> Vec<String> {
        self.changes.lock().unwrap().clone()
    }
}

impl StatementObserver for RecordingObserver {
    fn observe_statements(&self, service: &str, method: &str, kind: StatementKind, count: u64) {
        self.statements.lock().unwrap().push(StatementRecord {
            service: service.to_string(),
            method: method.to_string(),
            kind,
            count,
        });
    }

    fn dsn_changed(&self, group: &str) {
        self.changes.lock().unwrap().push(group.to_string());
    }
}
