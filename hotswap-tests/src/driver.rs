use async_trait::async_trait;
use hotswap_core::{
    Conn, ConnBeginTx, ExecResult, Execer, ExecerCtx, Queryer, QueryerCtx, Result, Rows,
    SessionResetter, SqlDriver, Stmt, Tx, TxOptions, Validator, Value,
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;

/// Which optional capabilities a [`MockConn`] advertises.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCaps {
    pub execer: bool,
    pub execer_ctx: bool,
    pub queryer: bool,
    pub queryer_ctx: bool,
    pub begin_tx: bool,
    pub session_resetter: bool,
    pub validator: bool,
}

impl MockCaps {
    /// Everything on, the common case for lifecycle tests.
    pub fn all() -> Self {
        Self {
            execer: true,
            execer_ctx: true,
            queryer: true,
            queryer_ctx: true,
            begin_tx: true,
            session_resetter: true,
            validator: true,
        }
    }
}

/// Shared, inspectable state behind one mock connection.
#[derive(Default)]
pub struct MockConnState {
    pub closed: AtomicBool,
    pub close_calls: AtomicU64,
    pub exec_calls: AtomicU64,
    pub query_calls: AtomicU64,
    pub begin_calls: AtomicU64,
    pub reset_session_calls: AtomicU64,
}

impl MockConnState {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> u64 {
        self.close_calls.load(Ordering::Acquire)
    }
}

pub struct MockConn {
    caps: MockCaps,
    state: Arc<MockConnState>,
}

impl MockConn {
    pub fn new(caps: MockCaps) -> Self {
        Self {
            caps,
            state: Arc::new(MockConnState::default()),
        }
    }

    pub fn state(&self) -> Arc<MockConnState> {
        self.state.clone()
    }
}

#[derive(Default)]
pub struct MockTx;

#[async_trait]
impl Tx for MockTx {
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct MockRows {
    columns: Vec<String>,
}

impl Default for MockRows {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
        }
    }
}

#[async_trait]
impl Rows for MockRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(None)
    }
}

pub struct MockStmt {
    state: Arc<MockConnState>,
}

#[async_trait]
impl Stmt for MockStmt {
    async fn exec(&mut self, _args: &[Value]) -> Result<ExecResult> {
        self.state.exec_calls.fetch_add(1, Ordering::Relaxed);
        Ok(ExecResult::default())
    }

    async fn query(&mut self, _args: &[Value]) -> Result<Box<dyn Rows>> {
        self.state.query_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockRows::default()))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Conn for MockConn {
    async fn prepare(&self, _query: &str) -> Result<Box<dyn Stmt>> {
        Ok(Box::new(MockStmt {
            state: self.state.clone(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Tx>> {
        self.state.begin_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockTx))
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::Release);
        self.state.close_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn as_execer(&self) -> Option<&dyn Execer> {
        self.caps.execer.then_some(self)
    }

    fn as_execer_ctx(&self) -> Option<&dyn ExecerCtx> {
        self.caps.execer_ctx.then_some(self)
    }

    fn as_queryer(&self) -> Option<&dyn Queryer> {
        self.caps.queryer.then_some(self)
    }

    fn as_queryer_ctx(&self) -> Option<&dyn QueryerCtx> {
        self.caps.queryer_ctx.then_some(self)
    }

    fn as_begin_tx(&self) -> Option<&dyn ConnBeginTx> {
        self.caps.begin_tx.then_some(self)
    }

    fn as_session_resetter(&self) -> Option<&dyn SessionResetter> {
        self.caps.session_resetter.then_some(self)
    }

    fn as_validator(&self) -> Option<&dyn Validator> {
        self.caps.validator.then_some(self)
    }
}

#[async_trait]
impl Execer for MockConn {
    async fn exec(&self, _query: &str, _args: &[Value]) -> Result<ExecResult> {
        self.state.exec_calls.fetch_add(1, Ordering::Relaxed);
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }
}

#[async_trait]
impl ExecerCtx for MockConn {
    async fn exec_ctx(
        &self,
        _scope: &CancellationToken,
        _query: &str,
        _args: &[Value],
    ) -> Result<ExecResult> {
        self.state.exec_calls.fetch_add(1, Ordering::Relaxed);
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }
}

#[async_trait]
impl Queryer for MockConn {
    async fn query(&self, _query: &str, _args: &[Value]) -> Result<Box<dyn Rows>> {
        self.state.query_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockRows::default()))
    }
}

#[async_trait]
impl QueryerCtx for MockConn {
    async fn query_ctx(
        &self,
        _scope: &CancellationToken,
        _query: &str,
        _args: &[Value],
    ) -> Result<Box<dyn Rows>> {
        self.state.query_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockRows::default()))
    }
}

#[async_trait]
impl ConnBeginTx for MockConn {
    async fn begin_tx(&self, _scope: &CancellationToken, _opts: TxOptions) -> Result<Box<dyn Tx>> {
        self.state.begin_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockTx))
    }
}

#[async_trait]
impl SessionResetter for MockConn {
    async fn reset_session(&self) -> Result<()> {
        self.state.reset_session_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Validator for MockConn {
    fn is_valid(&self) -> bool {
        true
    }
}

/// Driver that hands out [`MockConn`]s and records every DSN it was asked
/// to open, so tests can assert which generation a connection joined.
pub struct MockDriver {
    caps: MockCaps,
    fail_opens: AtomicBool,
    dsns: Mutex<Vec<String>>,
    conns: Mutex<Vec<Arc<MockConnState>>>,
}

impl MockDriver {
    pub fn new(caps: MockCaps) -> Self {
        Self {
            caps,
            fail_opens: AtomicBool::new(false),
            dsns: Mutex::new(Vec::new()),
            conns: Mutex::new(Vec::new()),
        }
    }

    /// Makes every subsequent open fail, for error pass-through tests.
    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::Release);
    }

    /// DSNs passed to `open`, in order.
    pub fn opened_dsns(&self) -> Vec<String> {
        self.dsns.lock().unwrap().clone()
    }

    /// State handles of every connection handed out, in open order.
    pub fn conn_states(&self) -> Vec<Arc<MockConnState>> {
        self.conns.lock().unwrap().clone()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new(MockCaps::all())
    }
}

#[async_trait]
impl SqlDriver for MockDriver {
    async fn open(&self, dsn: &str) -> Result<Box<dyn Conn>> {
        if self.fail_opens.load(Ordering::Acquire) {
            return Err(anyhow::anyhow!("mock driver: open refused"));
        }
        let conn = MockConn::new(self.caps);
        self.dsns.lock().unwrap().push(dsn.to_string());
        self.conns.lock().unwrap().push(conn.state());
        Ok(Box::new(conn))
    }
}
