use crate::{ExecResult, Result, Tx, Value};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Isolation requested through [`TxOptions`]. `Default` means "whatever the
/// underlying driver does when asked for nothing in particular" and is the
/// only level the plain-`begin` fallback accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

/// Pull-based row cursor returned by query-shaped statements.
#[async_trait]
pub trait Rows: Send {
    fn columns(&self) -> &[String];

    /// Next row, or `None` once the result set is exhausted.
    async fn next(&mut self) -> Result<Option<Vec<Value>>>;
}

impl std::fmt::Debug for dyn Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns())
            .finish_non_exhaustive()
    }
}

/// Prepared statement handle.
#[async_trait]
pub trait Stmt: Send {
    async fn exec(&mut self, args: &[Value]) -> Result<ExecResult>;
    async fn query(&mut self, args: &[Value]) -> Result<Box<dyn Rows>>;
    async fn close(&mut self) -> Result<()>;
}

/// A single physical connection produced by a [`crate::SqlDriver`].
///
/// Only `prepare`, `begin` and `close` are required. Everything else is an
/// optional capability the wrapping layer probes per call via the `as_*`
/// methods; the default `None` makes the wrapper fall back or report
/// [`crate::HotswapError::Unsupported`]. Implementations are expected to
/// handle their own interior synchronization: the lifecycle manager may call
/// `close` concurrently with an in-flight operation.
#[async_trait]
pub trait Conn: Send + Sync {
    async fn prepare(&self, query: &str) -> Result<Box<dyn Stmt>>;
    async fn begin(&self) -> Result<Box<dyn Tx>>;
    async fn close(&self) -> Result<()>;

    fn as_execer(&self) -> Option<&dyn Execer> {
        None
    }
    fn as_execer_ctx(&self) -> Option<&dyn ExecerCtx> {
        None
    }
    fn as_queryer(&self) -> Option<&dyn Queryer> {
        None
    }
    fn as_queryer_ctx(&self) -> Option<&dyn QueryerCtx> {
        None
    }
    fn as_begin_tx(&self) -> Option<&dyn ConnBeginTx> {
        None
    }
    fn as_session_resetter(&self) -> Option<&dyn SessionResetter> {
        None
    }
    fn as_validator(&self) -> Option<&dyn Validator> {
        None
    }
}

#[async_trait]
pub trait Execer: Send + Sync {
    async fn exec(&self, query: &str, args: &[Value]) -> Result<ExecResult>;
}

/// Cancellation-aware exec: the driver may propagate the token into the wire
/// protocol (e.g. a cancel request) when it fires.
#[async_trait]
pub trait ExecerCtx: Send + Sync {
    async fn exec_ctx(
        &self,
        scope: &CancellationToken,
        query: &str,
        args: &[Value],
    ) -> Result<ExecResult>;
}

#[async_trait]
pub trait Queryer: Send + Sync {
    async fn query(&self, query: &str, args: &[Value]) -> Result<Box<dyn Rows>>;
}

#[async_trait]
pub trait QueryerCtx: Send + Sync {
    async fn query_ctx(
        &self,
        scope: &CancellationToken,
        query: &str,
        args: &[Value],
    ) -> Result<Box<dyn Rows>>;
}

/// Transaction-options-aware begin.
#[async_trait]
pub trait ConnBeginTx: Send + Sync {
    async fn begin_tx(&self, scope: &CancellationToken, opts: TxOptions) -> Result<Box<dyn Tx>>;
}

#[async_trait]
pub trait SessionResetter: Send + Sync {
    async fn reset_session(&self) -> Result<()>;
}

pub trait Validator: Send + Sync {
    fn is_valid(&self) -> bool;
}
