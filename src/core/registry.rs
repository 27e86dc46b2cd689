//! Session registry
//!
//! Keyed mapping from session identifier to live session, with a capacity
//! limit and a periodic idle-eviction sweep.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::session::{LaunchSpec, Session, SessionError, SessionInfo};

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;
/// Default idle timeout before a session is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// How often the sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("maximum number of sessions ({0}) reached")]
    Capacity(usize),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Owner of all live sessions.
///
/// The guard covers only the map; session operations run outside it so one
/// slow session never serializes the rest.
pub struct Registry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

fn lock(map: &Mutex<HashMap<String, Arc<Session>>>) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    pub fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        info!(max_sessions, ?idle_timeout, "session registry created");
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            idle_timeout,
        }
    }

    /// Launch a new session and insert it, enforcing the capacity limit.
    pub fn create(
        &self,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<Arc<Session>> {
        let mut sessions = lock(&self.sessions);
        if sessions.len() >= self.max_sessions {
            error!(
                current = sessions.len(),
                max = self.max_sessions,
                "session capacity reached"
            );
            return Err(RegistryError::Capacity(self.max_sessions));
        }

        let session = Session::launch(LaunchSpec { command, args, env })?;
        sessions.insert(session.id().to_string(), Arc::clone(&session));
        info!(
            session_id = %session.id(),
            total = sessions.len(),
            "session registered"
        );
        Ok(session)
    }

    /// Look up a session and refresh its idle clock.
    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        let session = lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Close a session and delete its entry.
    pub fn remove(&self, id: &str) -> Result<()> {
        let session = lock(&self.sessions)
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        session.close();
        info!(session_id = %id, "session removed");
        Ok(())
    }

    /// Snapshot of all session info records.
    pub fn list(&self) -> Vec<SessionInfo> {
        lock(&self.sessions).values().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Close and remove every session idle longer than the timeout.
    pub fn sweep(&self) {
        let now = Utc::now();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = lock(&self.sessions);
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| {
                    let idle = (now - session.last_active())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    idle > self.idle_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id))
                .collect()
        };

        if expired.is_empty() {
            return;
        }
        for session in &expired {
            session.close();
            info!(session_id = %session.id(), "idle session evicted");
        }
        info!(evicted = expired.len(), remaining = self.len(), "idle sweep completed");
    }

    /// Start the periodic sweeper. Dropping the returned handle stops it.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        info!(?interval, "starting idle sweeper");
        let registry = Arc::clone(self);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    debug!("running idle sweep");
                    registry.sweep();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        });
        SweeperHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let sessions: Vec<Arc<Session>> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
    }
}

/// Owns the sweeper thread; dropping it signals shutdown and joins.
pub struct SweeperHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("sweeper thread panicked");
            }
        }
    }
}
