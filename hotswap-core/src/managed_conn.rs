use crate::{
    Conn, ExecContext, ExecLabels, ExecResult, HotswapError, IsolationLevel, ManagedTx, Result,
    Rows, StatementObserver, Stmt, TxOptions, Value, redact_dsn,
};
use log::debug;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked after the underlying connection closes, with the
/// connection's id, so the owning generation can drop its reference.
pub type AfterClose = Box<dyn Fn(u64) + Send + Sync>;

/// Wraps one physical connection under a supervising cancellation scope.
///
/// Every SQL-shaped method first checks whether the scope has been canceled;
/// if so the connection closes itself and reports
/// [`HotswapError::BadConn`], which makes a standard pooling layer discard
/// it instead of reusing it. Cancellation-aware calls additionally race the
/// caller's own scope against the connection's, failing with whichever
/// fires first.
pub struct ManagedConn {
    id: u64,
    scope: CancellationToken,
    dsn: String,
    redact_dsn: String,
    conn: Box<dyn Conn>,
    observer: Arc<dyn StatementObserver>,
    after_close: Option<AfterClose>,
    reset: AtomicBool,
    killed: AtomicBool,
    closed: AtomicBool,
    exec_stmts: AtomicU64,
    query_stmts: AtomicU64,
}

impl std::fmt::Debug for ManagedConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConn")
            .field("id", &self.id)
            .field("dsn", &self.redact_dsn)
            .finish_non_exhaustive()
    }
}

impl ManagedConn {
    pub fn new(
        scope: CancellationToken,
        dsn: impl Into<String>,
        conn: Box<dyn Conn>,
        observer: Arc<dyn StatementObserver>,
        after_close: Option<AfterClose>,
    ) -> Self {
        let dsn = dsn.into();
        let redact_dsn = redact_dsn(&dsn);
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            scope,
            dsn,
            redact_dsn,
            conn,
            observer,
            after_close,
            reset: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            exec_stmts: AtomicU64::new(0),
            query_stmts: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn redacted_dsn(&self) -> &str {
        &self.redact_dsn
    }

    async fn ensure_alive(&self) -> Result<()> {
        if self.scope.is_cancelled() {
            debug!("managed conn [{}]: scope canceled, closing", self.redact_dsn);
            let _ = self.close().await;
            return Err(HotswapError::BadConn.into());
        }
        Ok(())
    }

    pub async fn prepare(&self, query: &str) -> Result<Box<dyn Stmt>> {
        self.ensure_alive().await?;
        self.conn.prepare(query).await
    }

    /// Begins a transaction with default options, wrapped as a
    /// [`ManagedTx`] carrying empty labels.
    pub async fn begin(&self) -> Result<ManagedTx<'_>> {
        self.ensure_alive().await?;
        let tx = self.conn.begin().await?;
        Ok(ManagedTx::new(tx, self, ExecLabels::default()))
    }

    /// Begins a transaction with the given options, carrying the caller's
    /// scope and labels into the resulting [`ManagedTx`].
    ///
    /// If the underlying driver lacks an options-aware begin, only default
    /// isolation and read-write transactions are acceptable; the call then
    /// falls back to the plain begin. If the caller's scope is already
    /// canceled by the time that fallback returns, the transaction is
    /// rolled back and the cancellation reported instead of a false
    /// success.
    pub async fn begin_tx(&self, ctx: &ExecContext, opts: TxOptions) -> Result<ManagedTx<'_>> {
        self.ensure_alive().await?;
        let labels = ctx.labels().cloned().unwrap_or_default();

        if let Some(conn) = self.conn.as_begin_tx() {
            let tx = conn.begin_tx(ctx.cancellation(), opts).await?;
            return Ok(ManagedTx::new(tx, self, labels));
        }

        if opts.isolation != IsolationLevel::Default {
            return Err(HotswapError::NonDefaultIsolation.into());
        }
        if opts.read_only {
            return Err(HotswapError::ReadOnly.into());
        }
        let mut tx = self.conn.begin().await?;
        if ctx.is_cancelled() {
            let _ = tx.rollback().await;
            return Err(HotswapError::Canceled.into());
        }
        Ok(ManagedTx::new(tx, self, labels))
    }

    /// Exec bound only to the connection's own scope. Prefers the
    /// cancellation-aware capability, falls back to the plain one, and
    /// reports [`HotswapError::Unsupported`] when the driver has neither.
    pub async fn exec(&self, query: &str, args: &[Value]) -> Result<ExecResult> {
        self.ensure_alive().await?;
        if let Some(conn) = self.conn.as_execer_ctx() {
            self.exec_stmts.fetch_add(1, Ordering::Relaxed);
            return conn.exec_ctx(&self.scope, query, args).await;
        }
        if let Some(conn) = self.conn.as_execer() {
            self.exec_stmts.fetch_add(1, Ordering::Relaxed);
            return conn.exec(query, args).await;
        }
        Err(HotswapError::Unsupported.into())
    }

    /// Exec racing the caller's scope against the connection's scope; the
    /// call fails with whichever cancellation fires first.
    pub async fn exec_ctx(
        &self,
        ctx: &ExecContext,
        query: &str,
        args: &[Value],
    ) -> Result<ExecResult> {
        self.ensure_alive().await?;
        let Some(conn) = self.conn.as_execer_ctx() else {
            return Err(HotswapError::Unsupported.into());
        };
        self.exec_stmts.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => {
                let _ = self.close().await;
                Err(HotswapError::BadConn.into())
            }
            _ = ctx.cancelled() => Err(HotswapError::Canceled.into()),
            result = conn.exec_ctx(ctx.cancellation(), query, args) => result,
        }
    }

    pub async fn query(&self, query: &str, args: &[Value]) -> Result<Box<dyn Rows>> {
        self.ensure_alive().await?;
        if let Some(conn) = self.conn.as_queryer_ctx() {
            self.query_stmts.fetch_add(1, Ordering::Relaxed);
            return conn.query_ctx(&self.scope, query, args).await;
        }
        if let Some(conn) = self.conn.as_queryer() {
            self.query_stmts.fetch_add(1, Ordering::Relaxed);
            return conn.query(query, args).await;
        }
        Err(HotswapError::Unsupported.into())
    }

    pub async fn query_ctx(
        &self,
        ctx: &ExecContext,
        query: &str,
        args: &[Value],
    ) -> Result<Box<dyn Rows>> {
        self.ensure_alive().await?;
        let Some(conn) = self.conn.as_queryer_ctx() else {
            return Err(HotswapError::Unsupported.into());
        };
        self.query_stmts.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => {
                let _ = self.close().await;
                Err(HotswapError::BadConn.into())
            }
            _ = ctx.cancelled() => Err(HotswapError::Canceled.into()),
            result = conn.query_ctx(ctx.cancellation(), query, args) => result,
        }
    }

    /// Reports [`HotswapError::BadConn`] once the connection is marked
    /// reset, so the pool drops it instead of recycling a superseded
    /// session. Drivers without the capability reset as a no-op success.
    pub async fn reset_session(&self) -> Result<()> {
        if self.get_reset() {
            debug!("managed conn [{}]: already reset", self.redact_dsn);
            return Err(HotswapError::BadConn.into());
        }
        match self.conn.as_session_resetter() {
            Some(resetter) => resetter.reset_session().await,
            None => Ok(()),
        }
    }

    pub async fn is_valid(&self) -> bool {
        if self.scope.is_cancelled() {
            debug!("managed conn [{}]: scope canceled, closing", self.redact_dsn);
            let _ = self.close().await;
            return false;
        }
        match self.conn.as_validator() {
            Some(validator) => validator.is_valid(),
            None => true,
        }
    }

    /// Closes the underlying connection at most once; a second close is a
    /// no-op success so concurrent pool teardown and forced teardown cannot
    /// collide. On success the connection is marked killed; the removal
    /// callback runs either way.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.conn.close().await;
        if result.is_ok() {
            self.killed.store(true, Ordering::Release);
        }
        if let Some(after_close) = &self.after_close {
            after_close(self.id);
        }
        debug!("managed conn [{}]: closed", self.redact_dsn);
        result
    }

    pub fn get_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }

    pub fn set_reset(&self, value: bool) {
        self.reset.store(value, Ordering::Release);
    }

    pub fn get_kill(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub(crate) fn observer(&self) -> &dyn StatementObserver {
        self.observer.as_ref()
    }

    pub(crate) fn exec_statements(&self) -> u64 {
        self.exec_stmts.load(Ordering::Relaxed)
    }

    pub(crate) fn query_statements(&self) -> u64 {
        self.query_stmts.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_statement_counters(&self) {
        self.exec_stmts.store(0, Ordering::Relaxed);
        self.query_stmts.store(0, Ordering::Relaxed);
    }
}
