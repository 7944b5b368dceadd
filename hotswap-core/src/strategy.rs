use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pluggable change-notification source for DSN values.
///
/// A strategy resolves the `path` and `query` components of a hotswap
/// connection string into the current DSN plus a stream of subsequent
/// values. Multiple calls for the same path with different query strings are
/// independent logical watches that may share one underlying OS-level watch.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Returns the current value and a channel of subsequent values. The
    /// channel closes when the watch is torn down.
    async fn watch(
        &self,
        scope: &CancellationToken,
        path: &str,
        query: &str,
    ) -> Result<(String, mpsc::Receiver<String>)>;

    /// Releases one logical watch. Releasing the last watch on a path stops
    /// watching that path entirely.
    async fn close_watch(&self, path: &str, query: &str) -> Result<()>;

    /// Releases all resources and closes every update channel.
    async fn close(&self);
}
