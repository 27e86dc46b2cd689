//! Session management
//!
//! A session pairs one PTY channel with one terminal, runs the background
//! reader that pumps child output through the VT parser, and exposes the
//! synchronous operations the controller needs.

use std::collections::HashMap;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::keymap::map_keys;
use super::pty::{PtyChannel, PtyError, READ_CHUNK};
use super::term::{RenderFormat, Terminal, DEFAULT_COLS, DEFAULT_ROWS};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is not active")]
    NotActive,

    #[error(transparent)]
    Pty(#[from] PtyError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Stopped,
    Error,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }
}

/// How a session's child is launched. Immutable for the session's lifetime.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Snapshot of session metadata for `list_sessions` and `info`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub created: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub state: String,
}

struct Inner {
    pty: Arc<PtyChannel>,
    state: SessionState,
    last_active: DateTime<Utc>,
    reader: Option<JoinHandle<()>>,
}

/// One child process, its PTY, and its screen model.
pub struct Session {
    id: String,
    spec: LaunchSpec,
    created: DateTime<Utc>,
    term: Arc<Terminal>,
    inner: RwLock<Inner>,
}

impl Session {
    /// Spawn the child, construct the terminal, and start the reader task.
    pub fn launch(spec: LaunchSpec) -> Result<Arc<Self>> {
        let id = Uuid::new_v4().to_string();
        debug!(session_id = %id, command = %spec.command, "creating session");

        let pty = Arc::new(PtyChannel::spawn(
            &spec.command,
            &spec.args,
            &spec.env,
            DEFAULT_ROWS as u16,
            DEFAULT_COLS as u16,
        )?);

        let now = Utc::now();
        let session = Arc::new(Session {
            id: id.clone(),
            spec,
            created: now,
            term: Arc::new(Terminal::new(DEFAULT_COLS, DEFAULT_ROWS)),
            inner: RwLock::new(Inner {
                pty: Arc::clone(&pty),
                state: SessionState::Active,
                last_active: now,
                reader: None,
            }),
        });

        let handle = Self::spawn_reader(&session, pty);
        session.write_inner().reader = Some(handle);

        info!(session_id = %id, "session created");
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn state(&self) -> SessionState {
        self.read_inner().state
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.read_inner().last_active
    }

    /// Refresh the idle clock.
    pub fn touch(&self) {
        self.write_inner().last_active = Utc::now();
    }

    /// Map the keys string and write the resulting bytes to the child.
    pub fn send_keys(&self, keys: &str) -> Result<()> {
        let pty = {
            let inner = self.read_inner();
            if inner.state != SessionState::Active {
                debug!(session_id = %self.id, state = inner.state.label(), "send_keys on inactive session");
                return Err(SessionError::NotActive);
            }
            Arc::clone(&inner.pty)
        };

        let mapped = map_keys(keys);
        pty.write(mapped.as_bytes())?;
        debug!(session_id = %self.id, bytes = mapped.len(), "keys sent");
        Ok(())
    }

    /// Render the screen in the requested format, with cursor coordinates.
    /// Works in any state; a dead session's last screen stays inspectable.
    pub fn snapshot(&self, format: RenderFormat) -> (String, (usize, usize)) {
        (self.term.render(format), self.term.cursor())
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.term.cursor()
    }

    pub fn size(&self) -> (usize, usize) {
        self.term.size()
    }

    /// Resize the PTY, then the screen grid. Child output produced in
    /// between may still be parsed against the old geometry.
    pub fn resize(&self, width: usize, height: usize) -> Result<()> {
        let pty = {
            let inner = self.read_inner();
            if inner.state != SessionState::Active {
                return Err(SessionError::NotActive);
            }
            Arc::clone(&inner.pty)
        };

        pty.resize(height as u16, width as u16)?;
        self.term.resize(width, height);
        info!(session_id = %self.id, width, height, "session resized");
        Ok(())
    }

    /// Tear down the child, rebuild the PTY from the original launch spec,
    /// clear the screen including scrollback, and restart the reader.
    pub fn restart(self: &Arc<Self>) -> Result<()> {
        info!(session_id = %self.id, "restarting session");

        let (pty, reader) = {
            let mut inner = self.write_inner();
            inner.state = SessionState::Stopped;
            (Arc::clone(&inner.pty), inner.reader.take())
        };
        pty.stop();
        if let Some(handle) = reader {
            let _ = handle.join();
        }

        self.term.reset();

        let pty = match PtyChannel::spawn(
            &self.spec.command,
            &self.spec.args,
            &self.spec.env,
            DEFAULT_ROWS as u16,
            DEFAULT_COLS as u16,
        ) {
            Ok(pty) => Arc::new(pty),
            Err(err) => {
                error!(session_id = %self.id, %err, "respawn failed during restart");
                self.write_inner().state = SessionState::Error;
                return Err(err.into());
            }
        };

        {
            let mut inner = self.write_inner();
            inner.pty = Arc::clone(&pty);
            inner.state = SessionState::Active;
            inner.last_active = Utc::now();
        }
        let handle = Self::spawn_reader(self, pty);
        self.write_inner().reader = Some(handle);

        info!(session_id = %self.id, "session restarted");
        Ok(())
    }

    /// Stop the child and the reader. Idempotent; the session stays
    /// inspectable afterwards.
    pub fn close(&self) {
        let (pty, reader) = {
            let mut inner = self.write_inner();
            inner.state = SessionState::Stopped;
            (Arc::clone(&inner.pty), inner.reader.take())
        };
        pty.stop();
        if let Some(handle) = reader {
            let _ = handle.join();
        }
        info!(session_id = %self.id, "session closed");
    }

    pub fn info(&self) -> SessionInfo {
        let inner = self.read_inner();
        SessionInfo {
            id: self.id.clone(),
            command: self.spec.command.clone(),
            args: self.spec.args.clone(),
            created: self.created,
            last_active: inner.last_active,
            state: inner.state.label().to_string(),
        }
    }

    /// The reader task: drains the PTY into the terminal in arrival order.
    ///
    /// It is the sole writer to the terminal. Any exit - EOF, I/O error, or
    /// a panic below it - moves an `Active` session to `Error`; a session
    /// already stopped by `close()`/`restart()` keeps its state.
    fn spawn_reader(session: &Arc<Self>, pty: Arc<PtyChannel>) -> JoinHandle<()> {
        let session = Arc::clone(session);
        thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| session.read_loop(pty)));
            if outcome.is_err() {
                error!(session_id = %session.id, "reader task panicked");
            }
            let mut inner = session.write_inner();
            if inner.state == SessionState::Active {
                inner.state = SessionState::Error;
            }
        })
    }

    fn read_loop(&self, pty: Arc<PtyChannel>) {
        let Some(mut reader) = pty.take_reader() else {
            error!(session_id = %self.id, "pty read half already taken");
            return;
        };
        debug!(session_id = %self.id, "reader task started");

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(session_id = %self.id, "reader task ended (eof)");
                    return;
                }
                Ok(n) => self.term.write(&buf[..n]),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // EIO on a closed master is the Unix spelling of EOF.
                    if err.raw_os_error() != Some(5) {
                        error!(session_id = %self.id, %err, "reader task failed");
                    } else {
                        debug!(session_id = %self.id, "reader task ended (pty closed)");
                    }
                    return;
                }
            }
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Belt and braces: the registry closes sessions it removes, but a
        // session dropped any other way must still release its child.
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        inner.pty.stop();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn launch_sh(script: &str) -> Arc<Session> {
        Session::launch(LaunchSpec {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
        })
        .expect("launch should succeed")
    }

    /// Poll a snapshot until `predicate` passes or the deadline expires.
    fn wait_for<F: Fn(&str) -> bool>(
        session: &Arc<Session>,
        format: RenderFormat,
        predicate: F,
    ) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let (content, _) = session.snapshot(format);
            if predicate(&content) {
                return content;
            }
            if Instant::now() > deadline {
                panic!("timed out waiting for screen content, last: {content:?}");
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn wait_for_state(session: &Arc<Session>, state: SessionState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.state() != state {
            if Instant::now() > deadline {
                panic!("timed out waiting for {state:?}, got {:?}", session.state());
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn child_output_reaches_the_screen() {
        let session = launch_sh("printf 'hello from child'; sleep 2");
        let content = wait_for(&session, RenderFormat::Plain, |c| {
            c.contains("hello from child")
        });
        assert!(content.starts_with("hello from child"));
        session.close();
    }

    #[test]
    fn session_starts_active_with_default_geometry() {
        let session = launch_sh("sleep 2");
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.size(), (80, 24));
        assert_eq!(session.info().state, "active");
        session.close();
    }

    #[test]
    fn eof_moves_the_session_to_error() {
        let session = launch_sh("printf done");
        wait_for_state(&session, SessionState::Error);
        // The last screen stays inspectable.
        let (content, _) = session.snapshot(RenderFormat::Plain);
        assert!(content.contains("done"));
    }

    #[test]
    fn close_wins_over_reader_eof() {
        let session = launch_sh("sleep 30");
        session.close();
        assert_eq!(session.state(), SessionState::Stopped);
        // The reader has exited by now; the state must not decay to Error.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn operations_on_a_closed_session_fail_not_active() {
        let session = launch_sh("sleep 30");
        session.close();
        assert!(matches!(
            session.send_keys("x"),
            Err(SessionError::NotActive)
        ));
        assert!(matches!(session.resize(40, 12), Err(SessionError::NotActive)));
        // Snapshot still works.
        let _ = session.snapshot(RenderFormat::Ansi);
    }

    #[test]
    fn send_keys_maps_symbolic_names() {
        let session = launch_sh("read line; printf \"got:%s\" \"$line\"; sleep 2");
        session.send_keys("ping").expect("send text");
        session.send_keys("Enter").expect("send enter");
        wait_for(&session, RenderFormat::Plain, |c| c.contains("got:ping"));
        session.close();
    }

    #[test]
    fn resize_updates_screen_geometry() {
        let session = launch_sh("sleep 5");
        session.resize(100, 30).expect("resize");
        assert_eq!(session.size(), (100, 30));
        session.close();
    }

    #[test]
    fn restart_clears_screen_and_returns_to_active() {
        let session = launch_sh("printf first-run; sleep 5");
        wait_for(&session, RenderFormat::Plain, |c| c.contains("first-run"));

        session.restart().expect("restart");
        assert_eq!(session.state(), SessionState::Active);
        wait_for(&session, RenderFormat::Plain, |c| c.contains("first-run"));
        session.close();
    }

    #[test]
    fn restart_recovers_an_errored_session() {
        let session = launch_sh("printf gone");
        wait_for_state(&session, SessionState::Error);
        session.restart().expect("restart from error");
        assert_eq!(session.state(), SessionState::Active);
        session.close();
    }

    #[test]
    fn passthrough_preserves_exact_child_bytes() {
        let session = launch_sh("printf '\\033[1;32mOK\\033[0m'; sleep 2");
        let content = wait_for(&session, RenderFormat::Passthrough, |c| {
            c.ends_with("\x1b[0m")
        });
        assert_eq!(content, "\x1b[1;32mOK\x1b[0m");
        session.close();
    }

    #[test]
    fn info_reports_spec_and_timestamps() {
        let session = launch_sh("sleep 2");
        let info = session.info();
        assert_eq!(info.command, "sh");
        assert_eq!(info.args[0], "-c");
        assert!(info.created <= Utc::now());
        assert_eq!(info.id, session.id());
        session.close();
    }
}
