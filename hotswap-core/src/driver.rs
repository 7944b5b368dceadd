use crate::{
    Conn, ConnGroup, HotswapError, ManagedConn, NoopObserver, Registry, Result, StatementObserver,
};
use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use std::{collections::BTreeMap, collections::HashMap, sync::Arc};
use url::Url;

pub(crate) const FORCE_KILL: &str = "forceKill";

/// The real database driver being wrapped.
#[async_trait]
pub trait SqlDriver: Send + Sync {
    async fn open(&self, dsn: &str) -> Result<Box<dyn Conn>>;
}

/// Top-level dispatcher. Resolves hotswap connection strings of the form
/// `<scheme>://<driver-name><path>[?query]` into a watch strategy (by
/// scheme) and a wrapped driver (by driver name), and maintains one
/// [`ConnGroup`] per distinct connection string.
///
/// ```no_run
/// # async fn example(registry: std::sync::Arc<hotswap_core::Registry>) -> hotswap_core::Result<()> {
/// let driver = hotswap_core::HotswapDriver::new(registry);
/// let conn = driver.open("fsnotify://postgres/etc/app/dsn.txt").await?;
/// # Ok(())
/// # }
/// ```
pub struct HotswapDriver {
    registry: Arc<Registry>,
    observer: Arc<dyn StatementObserver>,
    parent: tokio_util::sync::CancellationToken,
    groups: tokio::sync::Mutex<HashMap<String, Arc<ConnGroup>>>,
}

impl HotswapDriver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_observer(registry, Arc::new(NoopObserver))
    }

    pub fn with_observer(registry: Arc<Registry>, observer: Arc<dyn StatementObserver>) -> Self {
        Self {
            registry,
            observer,
            parent: tokio_util::sync::CancellationToken::new(),
            groups: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Opens a managed connection for the given hotswap connection string.
    /// The first open for a given string starts the watch and the group's
    /// background reconciliation task; later opens reuse the group.
    pub async fn open(&self, name: &str) -> Result<Arc<ManagedConn>> {
        let uri = Url::parse(name).map_err(|_| HotswapError::MalformedConnectionString)?;

        let mut groups = self.groups.lock().await;
        if let Some(group) = groups.get(name) {
            let group = group.clone();
            drop(groups);
            return group.open().await;
        }

        let strategy = self
            .registry
            .strategy(uri.scheme())
            .ok_or(HotswapError::UnsupportedStrategy)?;
        let (driver, options) = self
            .registry
            .sql_driver(uri.host_str().unwrap_or_default())
            .ok_or(HotswapError::UnknownDriver)?;
        let query = uri.query().unwrap_or_default();
        let (value, updates) = strategy.watch(&self.parent, uri.path(), query).await?;
        let force_kill = uri
            .query_pairs()
            .find(|(key, _)| key == FORCE_KILL)
            .is_some_and(|(_, value)| value == "true");

        let group = Arc::new(ConnGroup::new(
            name,
            value,
            self.parent.clone(),
            driver,
            options,
            force_kill,
            self.observer.clone(),
        ));
        debug!("hotswap: new conn group '{name}'");
        tokio::spawn(group.clone().run_loop(updates));
        groups.insert(name.to_string(), group.clone());
        drop(groups);

        group.open().await
    }

    /// Cancels the root scope: every group's generations, and through them
    /// every managed connection, observe the cancellation; the
    /// reconciliation tasks terminate.
    pub fn shutdown(&self) {
        self.parent.cancel();
    }
}

/// Merges group-wide static driver options into a DSN as extra query
/// parameters. A DSN that is not URL-shaped only errors when there are
/// options to merge.
pub(crate) fn merge_dsn_options(dsn: &str, options: &BTreeMap<String, String>) -> Result<String> {
    if options.is_empty() {
        return Ok(dsn.to_string());
    }
    let mut url = Url::parse(dsn)
        .context("unable to parse connection string when specifying extra driver options")?;
    let mut params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
    for (key, value) in options {
        params.insert(key.clone(), value.clone());
    }
    url.query_pairs_mut()
        .clear()
        .extend_pairs(params.iter())
        .finish();
    Ok(url.to_string())
}
