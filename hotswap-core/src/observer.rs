/// Kind of statement reported to the observability sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Exec,
    Query,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Exec => "exec",
            StatementKind::Query => "query",
        }
    }
}

/// Sink for hotswap's observability events. Metric formatting and emission
/// live outside this crate; implement this trait to bridge to a backend.
pub trait StatementObserver: Send + Sync {
    /// Called on every transaction completion with the per-transaction
    /// statement count, keyed by the labels the caller attached to the
    /// transaction's scope (empty strings when none were attached).
    fn observe_statements(&self, service: &str, method: &str, kind: StatementKind, count: u64);

    /// Called once per effective DSN change of a connection group.
    fn dsn_changed(&self, group: &str) {
        let _ = group;
    }
}

/// Discards every observation.
pub struct NoopObserver;

impl StatementObserver for NoopObserver {
    fn observe_statements(&self, _: &str, _: &str, _: StatementKind, _: u64) {}
}
