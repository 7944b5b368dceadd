use crate::{
    ManagedConn, Result, SqlDriver, StatementObserver, driver::merge_dsn_options, redact_dsn,
};
use log::debug;
use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Yield between canceling a superseded generation's scope and force-closing
/// its connections, so in-flight operations get a chance to observe the
/// cancellation before the close. Tunable heuristic; it narrows a race
/// between "operation succeeded" and "operation reported killed" without
/// eliminating it.
const RESET_DELAY: Duration = Duration::from_millis(1);

/// One generation: the connections opened against one DSN value plus the
/// cancellation scope governing them. A connection's generation never
/// changes; the record travels from active through draining to teardown.
pub(crate) struct Generation {
    scope: CancellationToken,
    redact_val: String,
    conns: Mutex<HashMap<u64, Arc<ManagedConn>>>,
}

impl Generation {
    fn new(scope: CancellationToken, redact_val: String) -> Self {
        Self {
            scope,
            redact_val,
            conns: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, conn: Arc<ManagedConn>) {
        self.conns
            .lock()
            .expect("generation conns lock poisoned")
            .insert(conn.id(), conn);
    }

    fn remove(&self, id: u64) {
        self.conns
            .lock()
            .expect("generation conns lock poisoned")
            .remove(&id);
    }

    fn snapshot(&self) -> Vec<Arc<ManagedConn>> {
        self.conns
            .lock()
            .expect("generation conns lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.conns
            .lock()
            .expect("generation conns lock poisoned")
            .len()
    }
}

struct GroupState {
    value: String,
    redact_val: String,
    active: Arc<Generation>,
    draining: Option<Arc<Generation>>,
}

struct ShiftedGenerations {
    to_drain: Arc<Generation>,
    to_terminate: Option<Arc<Generation>>,
}

/// A hot-reloadable DSN and the generations of connections opened against
/// it. At most three generations exist at once: active (serves new opens),
/// draining (superseded, may finish in-flight work), and the one being torn
/// down, which only lives for the duration of a shift.
pub struct ConnGroup {
    name: String,
    parent: CancellationToken,
    driver: Arc<dyn SqlDriver>,
    options: BTreeMap<String, String>,
    force_kill: bool,
    observer: Arc<dyn StatementObserver>,
    state: Mutex<GroupState>,
}

impl ConnGroup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        initial_value: impl Into<String>,
        parent: CancellationToken,
        driver: Arc<dyn SqlDriver>,
        options: BTreeMap<String, String>,
        force_kill: bool,
        observer: Arc<dyn StatementObserver>,
    ) -> Self {
        let value = initial_value.into();
        let redact_val = redact_dsn(&value);
        let active = Arc::new(Generation::new(parent.child_token(), redact_val.clone()));
        Self {
            name: name.into(),
            parent,
            driver,
            options,
            force_kill,
            observer,
            state: Mutex::new(GroupState {
                value,
                redact_val,
                active,
                draining: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn force_kill(&self) -> bool {
        self.force_kill
    }

    /// Current DSN value.
    pub fn value(&self) -> String {
        self.state
            .lock()
            .expect("group state lock poisoned")
            .value
            .clone()
    }

    /// Number of connections in the currently active generation.
    pub fn active_conns(&self) -> usize {
        self.state
            .lock()
            .expect("group state lock poisoned")
            .active
            .len()
    }

    /// Background reconciliation task: applies each value from the update
    /// stream until the stream closes or the parent scope is canceled.
    /// Generation scopes are children of the parent, so parent cancellation
    /// already propagates to every connection; the loop only has to stop.
    pub async fn run_loop(self: Arc<Self>, mut updates: mpsc::Receiver<String>) {
        loop {
            tokio::select! {
                _ = self.parent.cancelled() => {
                    debug!("conn group [{}]: parent scope canceled, terminating", self.name);
                    return;
                }
                value = updates.recv() => match value {
                    Some(value) => self.process_new_value(value).await,
                    None => {
                        debug!("conn group [{}]: update channel closed, terminating", self.name);
                        return;
                    }
                },
            }
        }
    }

    /// Applies one DSN value as if it had arrived on the update stream.
    /// Re-delivering the current value is a no-op; anything else shifts the
    /// generations and tears down the oldest one per the forceKill policy.
    pub async fn process_new_value(&self, new_value: String) {
        let Some(shift) = self.shift_generations(new_value) else {
            return;
        };
        self.observer.dsn_changed(&self.name);

        // Cancel scopes only after the lock is released: a canceled
        // connection may close itself, and closing re-enters the generation
        // to remove the connection from its set.
        if self.force_kill {
            shift.to_drain.scope.cancel();
            debug!(
                "conn group [{}]: canceled scope for previous dsn '{}'",
                self.name, shift.to_drain.redact_val
            );
        } else if let Some(to_terminate) = &shift.to_terminate {
            to_terminate.scope.cancel();
            debug!(
                "conn group [{}]: canceled scope for previous-previous dsn '{}'",
                self.name, to_terminate.redact_val
            );
        }

        tokio::time::sleep(RESET_DELAY).await;

        if self.force_kill {
            debug!(
                "conn group [{}]: reset/close conns for previous dsn '{}'",
                self.name, shift.to_drain.redact_val
            );
            for conn in shift.to_drain.snapshot() {
                conn.set_reset(true);
                // best-effort teardown; the flags are the record of what
                // happened, not the close result
                let _ = conn.close().await;
            }
        } else {
            if let Some(to_terminate) = &shift.to_terminate {
                debug!(
                    "conn group [{}]: close conns for previous-previous dsn '{}'",
                    self.name, to_terminate.redact_val
                );
                for conn in to_terminate.snapshot() {
                    let _ = conn.close().await;
                }
            }
            debug!(
                "conn group [{}]: reset conns for previous dsn '{}'",
                self.name, shift.to_drain.redact_val
            );
            for conn in shift.to_drain.snapshot() {
                conn.set_reset(true);
            }
        }
    }

    /// The narrow critical section of a shift: swap the generation slots and
    /// the value, returning the superseded generations to act on after the
    /// lock is gone.
    fn shift_generations(&self, new_value: String) -> Option<ShiftedGenerations> {
        let mut state = self.state.lock().expect("group state lock poisoned");
        if state.value == new_value {
            debug!("conn group [{}]: dsn unchanged", self.name);
            return None;
        }
        let redact_val = redact_dsn(&new_value);
        debug!(
            "conn group [{}]: dsn changed from '{}' to '{}'",
            self.name, state.redact_val, redact_val
        );
        state.value = new_value;
        state.redact_val = redact_val.clone();
        let fresh = Arc::new(Generation::new(self.parent.child_token(), redact_val));
        let to_drain = mem::replace(&mut state.active, fresh);
        let to_terminate = state.draining.replace(to_drain.clone());
        Some(ShiftedGenerations {
            to_drain,
            to_terminate,
        })
    }

    /// Opens a physical connection against the current DSN and binds it to
    /// the generation that is active at call time. The driver I/O happens
    /// outside the group lock.
    pub async fn open(&self) -> Result<Arc<ManagedConn>> {
        let (dsn, generation) = {
            let state = self.state.lock().expect("group state lock poisoned");
            (
                merge_dsn_options(&state.value, &self.options)?,
                state.active.clone(),
            )
        };
        let conn = self.driver.open(&dsn).await?;
        let generation_ref = Arc::downgrade(&generation);
        let managed = Arc::new(ManagedConn::new(
            generation.scope.clone(),
            dsn,
            conn,
            self.observer.clone(),
            Some(Box::new(move |id| {
                if let Some(generation) = generation_ref.upgrade() {
                    generation.remove(id);
                }
            })),
        ));
        generation.insert(managed.clone());

        // A shift may have happened during the driver I/O. The connection
        // still belongs to the generation captured at call time, but that
        // generation's reset pass has already run, so mark it here.
        let lost_race = {
            let state = self.state.lock().expect("group state lock poisoned");
            !Arc::ptr_eq(&state.active, &generation)
        };
        if lost_race {
            debug!(
                "conn group [{}]: open raced a dsn change, conn '{}' starts reset",
                self.name,
                managed.redacted_dsn()
            );
            managed.set_reset(true);
        }

        debug!(
            "conn group [{}]: opened managed conn '{}'",
            self.name,
            managed.redacted_dsn()
        );
        Ok(managed)
    }
}
