use crate::{ManagedConn, Result, StatementKind};
use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

/// Underlying driver transaction.
#[async_trait]
pub trait Tx: Send {
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

/// Labels a caller attaches to a transaction scope for observability,
/// typically the calling service and method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecLabels {
    pub service: String,
    pub method: String,
}

impl ExecLabels {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }
}

/// Caller-side scope for cancellation-aware calls: a cancellation token plus
/// optional [`ExecLabels`]. The default context is never canceled and
/// carries no labels.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    cancel: CancellationToken,
    labels: Option<ExecLabels>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            labels: None,
        }
    }

    pub fn labeled(mut self, labels: ExecLabels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn labels(&self) -> Option<&ExecLabels> {
        self.labels.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Wraps an in-flight transaction. On completion it reports the owning
/// connection's statement counters to the observability sink and zeroes
/// them, so the next transaction on the same physical connection starts
/// clean. Cleanup runs whether or not the underlying commit/rollback
/// succeeded.
pub struct ManagedTx<'c> {
    tx: Box<dyn Tx>,
    conn: &'c ManagedConn,
    labels: ExecLabels,
}

impl std::fmt::Debug for ManagedTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTx")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl<'c> ManagedTx<'c> {
    pub(crate) fn new(tx: Box<dyn Tx>, conn: &'c ManagedConn, labels: ExecLabels) -> Self {
        Self { tx, conn, labels }
    }

    pub async fn commit(mut self) -> Result<()> {
        debug!("managed tx [{}]: commit", self.conn.redacted_dsn());
        let result = self.tx.commit().await;
        self.cleanup();
        result
    }

    pub async fn rollback(mut self) -> Result<()> {
        debug!("managed tx [{}]: rollback", self.conn.redacted_dsn());
        let result = self.tx.rollback().await;
        self.cleanup();
        result
    }

    fn cleanup(&self) {
        let observer = self.conn.observer();
        observer.observe_statements(
            &self.labels.service,
            &self.labels.method,
            StatementKind::Exec,
            self.conn.exec_statements(),
        );
        observer.observe_statements(
            &self.labels.service,
            &self.labels.method,
            StatementKind::Query,
            self.conn.query_statements(),
        );
        self.conn.reset_statement_counters();
    }
}
