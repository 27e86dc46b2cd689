//! PTY channel
//!
//! Owns a child process and its controlling pseudo-terminal: spawn with an
//! initial window size, bidirectional byte I/O, window-size changes, and
//! graceful termination.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use thiserror::Error;
use tracing::{debug, warn};

/// Size of a single PTY read.
pub const READ_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to allocate pty: {0}")]
    Allocate(String),

    #[error("failed to spawn child process: {0}")]
    Spawn(String),

    #[error("pty write failed: {0}")]
    Write(#[source] io::Error),

    #[error("pty channel is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// A child process attached to a pseudo-terminal.
///
/// Resize requests go through a bounded channel of capacity 1 drained by a
/// dedicated thread that owns the PTY master; a full channel means the
/// pending request already carries the newest size, so new ones are dropped.
/// Stopping closes the channel, which ends the thread and releases the
/// master.
pub struct PtyChannel {
    child: Mutex<Box<dyn Child + Send + Sync>>,
    writer: Mutex<Box<dyn Write + Send>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    resize_tx: Mutex<Option<SyncSender<PtySize>>>,
    resize_thread: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PtyChannel {
    /// Allocate a PTY of the requested size and start the child on it.
    ///
    /// The child's environment is the current process environment with the
    /// given overrides applied on top.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        rows: u16,
        cols: u16,
    ) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Allocate(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        // Release our copy of the slave so EOF propagates once the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Allocate(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Allocate(e.to_string()))?;

        let (resize_tx, resize_rx) = mpsc::sync_channel::<PtySize>(1);
        let master = pair.master;
        let resize_thread = thread::spawn(move || {
            for size in resize_rx {
                if let Err(err) = master.resize(size) {
                    warn!(rows = size.rows, cols = size.cols, %err, "pty resize failed");
                } else {
                    debug!(rows = size.rows, cols = size.cols, "pty resized");
                }
            }
        });

        debug!(command, rows, cols, "pty started");

        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            resize_tx: Mutex::new(Some(resize_tx)),
            resize_thread: Mutex::new(Some(resize_thread)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Take the read half of the PTY. The caller (the session's reader task)
    /// owns it for the lifetime of the channel; reads block until data is
    /// available and return 0 at end-of-file, which signals child exit.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        lock(&self.reader).take()
    }

    /// Write all bytes to the PTY master, flushing before return.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(data).map_err(PtyError::Write)?;
        writer.flush().map_err(PtyError::Write)
    }

    /// Request a window-size change. The request is queued for the resize
    /// thread; if one is already pending it carries the newest desired size,
    /// so this one is dropped and the call still succeeds.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        match lock(&self.resize_tx).as_ref() {
            None => Err(PtyError::Stopped),
            Some(tx) => match tx.try_send(size) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    debug!(rows, cols, "resize coalesced: request already pending");
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(PtyError::Stopped),
            },
        }
    }

    /// Terminate the child and release the PTY. Idempotent.
    ///
    /// Kills the child (permission errors mean it is already gone), reaps
    /// its exit status, closes the resize channel, and joins the resize
    /// thread, which drops the master and closes the PTY.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut child = lock(&self.child);
            if let Err(err) = child.kill() {
                if err.kind() != io::ErrorKind::PermissionDenied {
                    warn!(%err, "failed to kill child process");
                }
            }
            let _ = child.wait();
        }

        lock(&self.resize_tx).take();
        if let Some(handle) = lock(&self.resize_thread).take() {
            let _ = handle.join();
        }

        debug!("pty stopped");
    }

    /// Non-blocking liveness probe for the child.
    pub fn is_running(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        matches!(lock(&self.child).try_wait(), Ok(None))
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn spawn_sh(script: &str) -> PtyChannel {
        PtyChannel::spawn(
            "sh",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            24,
            80,
        )
        .expect("spawn should succeed")
    }

    fn read_all(pty: &PtyChannel, deadline: Duration) -> Vec<u8> {
        let mut reader = pty.take_reader().expect("reader available");
        let mut out = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        let start = Instant::now();
        while start.elapsed() < deadline {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        out
    }

    #[test]
    fn spawn_captures_child_output() {
        let pty = spawn_sh("printf hello-pty");
        let output = read_all(&pty, Duration::from_secs(5));
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("hello-pty"), "missing output in {text:?}");
        pty.stop();
    }

    #[test]
    fn env_overrides_reach_the_child() {
        let mut env = HashMap::new();
        env.insert("PTY_TEST_MARKER".to_string(), "marker-value".to_string());
        let pty = PtyChannel::spawn(
            "sh",
            &["-c".to_string(), "printf \"%s\" \"$PTY_TEST_MARKER\"".to_string()],
            &env,
            24,
            80,
        )
        .expect("spawn should succeed");
        let output = read_all(&pty, Duration::from_secs(5));
        assert!(String::from_utf8_lossy(&output).contains("marker-value"));
        pty.stop();
    }

    #[test]
    fn write_reaches_child_stdin() {
        let pty = spawn_sh("read line; printf \"got:%s\" \"$line\"");
        pty.write(b"ping\r").expect("write");
        let output = read_all(&pty, Duration::from_secs(5));
        assert!(String::from_utf8_lossy(&output).contains("got:ping"));
        pty.stop();
    }

    #[test]
    fn spawn_failure_is_reported() {
        // Some platforms only surface the exec failure through the PTY, so a
        // clean spawn is tolerated; an error must be a spawn error.
        if let Err(err) =
            PtyChannel::spawn("/definitely/not/a/real/binary", &[], &HashMap::new(), 24, 80)
        {
            assert!(matches!(err, PtyError::Spawn(_)));
        }
    }

    #[test]
    fn stop_is_idempotent_and_kills_the_child() {
        let pty = spawn_sh("sleep 30");
        assert!(pty.is_running());
        pty.stop();
        pty.stop();
        assert!(!pty.is_running());
    }

    #[test]
    fn resize_never_blocks_and_coalesces() {
        let pty = spawn_sh("sleep 5");
        for i in 0..100u16 {
            pty.resize(24 + i % 10, 80 + i % 10).expect("resize accepted");
        }
        pty.stop();
        assert!(matches!(pty.resize(24, 80), Err(PtyError::Stopped)));
    }
}
