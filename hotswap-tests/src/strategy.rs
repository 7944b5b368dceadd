use async_trait::async_trait;
use hotswap_core::{Result, Strategy};
use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Strategy scripted from the test body: hands out a fixed initial value
/// and lets the test push subsequent values to every open watch.
pub struct MockStrategy {
    initial: String,
    senders: Mutex<Vec<mpsc::Sender<String>>>,
    watches: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl MockStrategy {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
            senders: Mutex::new(Vec::new()),
            watches: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Delivers a value to every open watch, as a file change would.
    pub async fn push(&self, value: &str) {
        let senders = self.senders.lock().unwrap().clone();
        for sender in senders {
            let _ = sender.send(value.to_string()).await;
        }
    }

    /// (path, query) pairs seen by `watch`, in order.
    pub fn watches(&self) -> Vec<(String, String)> {
        self.watches.lock().unwrap().clone()
    }

    /// Whether `close` ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    async fn watch(
        &self,
        _scope: &CancellationToken,
        path: &str,
        query: &str,
    ) -> Result<(String, mpsc::Receiver<String>)> {
        let (tx, rx) = mpsc::channel(8);
        self.senders.lock().unwrap().push(tx);
        self.watches
            .lock()
            .unwrap()
            .push((path.to_string(), query.to_string()));
        Ok((self.initial.clone(), rx))
    }

    async fn close_watch(&self, _path: &str, _query: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.senders.lock().unwrap().clear();
        self.closed.store(true, Ordering::Release);
    }
}
