use async_trait::async_trait;
use hotswap_core::{Context, Result, Strategy, redact_dsn};
use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Buffered updates per logical watch; beyond this, updates for a slow
/// consumer are dropped (a later resync re-delivers the final value).
const UPDATE_BUFFER: usize = 30;

/// How often paths whose resync failed (e.g. momentarily missing files) are
/// retried.
const RESYNC_PERIOD: Duration = Duration::from_secs(2);

struct PathWatch {
    value: String,
    queries: HashMap<String, mpsc::Sender<String>>,
}

struct Inner {
    watcher: Option<RecommendedWatcher>,
    paths: HashMap<PathBuf, PathWatch>,
}

/// Watch strategy backed by OS file notifications.
///
/// One OS-level watch exists per distinct path; every (path, query) pair is
/// an independent logical watch with its own update channel. The watched
/// file's trimmed contents are the DSN value.
pub struct FsNotifyStrategy {
    inner: Arc<Mutex<Inner>>,
}

impl FsNotifyStrategy {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                watcher: None,
                paths: HashMap::new(),
            })),
        }
    }
}

impl Default for FsNotifyStrategy {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_config_file(path: &Path) -> Result<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    Ok(contents.trim().to_string())
}

/// Re-reads the file and re-arms its OS watch (events can be lost while the
/// file is replaced, so the watch is dropped and recreated). Returns `None`
/// when the path is no longer watched.
async fn resync(inner: &Mutex<Inner>, path: &Path) -> Result<Option<String>> {
    let mut guard = inner.lock().await;
    if !guard.paths.contains_key(path) {
        debug!("fsnotify: ignoring path not being watched: '{}'", path.display());
        return Ok(None);
    }
    if let Some(watcher) = guard.watcher.as_mut() {
        let _ = watcher.unwatch(path);
    }
    let value = read_config_file(path).await?;
    if let Some(watcher) = guard.watcher.as_mut() {
        watcher.watch(path, RecursiveMode::NonRecursive)?;
    }
    if let Some(path_watch) = guard.paths.get_mut(path) {
        path_watch.value = value.clone();
    }
    Ok(Some(value))
}

/// Delivers a new value to every logical watch on the path.
async fn fan_out(inner: &Mutex<Inner>, path: &Path, value: String) {
    let senders: Vec<(String, mpsc::Sender<String>)> = {
        let guard = inner.lock().await;
        match guard.paths.get(path) {
            Some(path_watch) => path_watch
                .queries
                .iter()
                .map(|(query, sender)| (query.clone(), sender.clone()))
                .collect(),
            None => return,
        }
    };
    let redacted = redact_dsn(&value);
    for (query, sender) in senders {
        match sender.try_send(value.clone()) {
            Ok(()) => debug!(
                "fsnotify [{}?{}]: sent update '{}'",
                path.display(),
                query,
                redacted
            ),
            Err(err) => warn!(
                "fsnotify [{}?{}]: dropping update '{}': {}",
                path.display(),
                query,
                redacted,
                err
            ),
        }
    }
}

async fn run_loop(
    inner: Arc<Mutex<Inner>>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    let mut failed: HashSet<PathBuf> = HashSet::new();
    let mut resync_tick = tokio::time::interval(RESYNC_PERIOD);
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("fsnotify: event channel closed, terminating");
                    return;
                };
                match event {
                    Ok(event)
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Remove(_)) =>
                    {
                        for path in event.paths {
                            match resync(&inner, &path).await {
                                Ok(Some(value)) => fan_out(&inner, &path, value).await,
                                Ok(None) => {}
                                Err(err) => {
                                    warn!("fsnotify: resync of '{}' failed: {err:#}", path.display());
                                    failed.insert(path);
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!("fsnotify: watch error: {err}"),
                }
            }
            _ = resync_tick.tick() => {
                for path in std::mem::take(&mut failed) {
                    match resync(&inner, &path).await {
                        Ok(Some(value)) => fan_out(&inner, &path, value).await,
                        Ok(None) => {}
                        Err(err) => {
                            warn!("fsnotify: resync of '{}' failed: {err:#}", path.display());
                            failed.insert(path);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Strategy for FsNotifyStrategy {
    async fn watch(
        &self,
        _scope: &CancellationToken,
        path: &str,
        query: &str,
    ) -> Result<(String, mpsc::Receiver<String>)> {
        let path = PathBuf::from(path);
        let query = query.trim().to_string();
        let mut inner = self.inner.lock().await;

        if inner.watcher.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            let watcher = notify::recommended_watcher(move |event| {
                let _ = tx.send(event);
            })?;
            inner.watcher = Some(watcher);
            tokio::spawn(run_loop(self.inner.clone(), rx));
        }

        let value = match inner.paths.get(&path) {
            Some(path_watch) => {
                debug!("fsnotify [{}]: path already being watched", path.display());
                path_watch.value.clone()
            }
            None => {
                debug!("fsnotify [{}]: new path to be watched", path.display());
                if let Some(watcher) = inner.watcher.as_mut() {
                    watcher.watch(&path, RecursiveMode::NonRecursive)?;
                }
                let value = match read_config_file(&path).await {
                    Ok(value) => value,
                    Err(err) => {
                        if let Some(watcher) = inner.watcher.as_mut() {
                            let _ = watcher.unwatch(&path);
                        }
                        return Err(err);
                    }
                };
                inner.paths.insert(
                    path.clone(),
                    PathWatch {
                        value: value.clone(),
                        queries: HashMap::new(),
                    },
                );
                value
            }
        };

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        if let Some(path_watch) = inner.paths.get_mut(&path) {
            if path_watch.queries.insert(query.clone(), tx).is_some() {
                // the previous receiver for this pair starves; the
                // dispatcher keys groups by the full connection string, so
                // this only happens when watch() is driven by hand
                warn!(
                    "fsnotify [{}?{}]: replacing existing watch for this query",
                    path.display(),
                    query
                );
            }
        }
        Ok((value, rx))
    }

    async fn close_watch(&self, path: &str, query: &str) -> Result<()> {
        let path = PathBuf::from(path);
        let query = query.trim();
        let mut inner = self.inner.lock().await;
        let Some(path_watch) = inner.paths.get_mut(&path) else {
            return Ok(());
        };
        if path_watch.queries.remove(query).is_some() {
            debug!("fsnotify [{}?{}]: closed watch", path.display(), query);
        }
        if path_watch.queries.is_empty() {
            inner.paths.remove(&path);
            if let Some(watcher) = inner.watcher.as_mut() {
                let _ = watcher.unwatch(&path);
            }
            debug!("fsnotify [{}]: stopped watching path", path.display());
        }
        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().await;
        // dropping the watcher drops the event sender, which terminates the
        // run loop; dropping the per-query senders closes the update streams
        inner.watcher = None;
        inner.paths.clear();
        debug!("fsnotify: closed");
    }
}
