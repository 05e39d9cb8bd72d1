use std::io::{Read as IoRead, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use thiserror::Error;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// How often the reader thread polls for the exit status once output hits EOF.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Profile and events
// ---------------------------------------------------------------------------

/// Everything needed to start one process inside a PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnProfile {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

/// Exit status reported once the child is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: u32,
    pub signal: Option<String>,
}

/// Items of a process's output stream. `Exit` is always the last item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(Vec<u8>),
    Exit(ExitInfo),
}

// ---------------------------------------------------------------------------
// Process / Spawner traits
// ---------------------------------------------------------------------------

/// A running child process attached to a terminal.
pub trait Process: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Queue bytes for the child's stdin. Returns `false` (and logs) instead
    /// of failing when the child is already gone.
    fn write(&self, data: &[u8]) -> bool;

    fn resize(&self, cols: u16, rows: u16) -> Result<()>;

    /// Fire-and-forget kill; the exit event arrives asynchronously.
    fn kill(&self);

    fn is_alive(&self) -> bool;
}

/// A freshly started process and the single receiver for its output stream.
pub struct Spawned {
    pub process: Box<dyn Process>,
    pub events: flume::Receiver<ProcessEvent>,
}

/// Starts processes. [`PtySpawner`] is the real implementation;
/// [`crate::in_process::InProcessSpawner`] stands in for it in tests.
pub trait Spawner: Send + Sync + 'static {
    fn spawn(&self, profile: &SpawnProfile) -> Result<Spawned>;
}

/// Pick the working directory: explicit path, then named-project path, then
/// the scratch directory (created on demand).
pub fn resolve_working_dir(
    explicit: Option<&Path>,
    project: Option<&Path>,
    scratch: &Path,
) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = project {
        return Ok(dir.to_path_buf());
    }
    std::fs::create_dir_all(scratch)?;
    Ok(scratch.to_path_buf())
}

// ---------------------------------------------------------------------------
// PtyProcess
// ---------------------------------------------------------------------------

/// A process running under a real pseudo-terminal.
pub struct PtyProcess {
    pid: Option<u32>,
    writer: flume::Sender<Vec<u8>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    master: Mutex<Box<dyn portable_pty::MasterPty + Send>>,
    killed: Arc<AtomicBool>,
}

impl PtyProcess {
    fn child(&self) -> std::sync::MutexGuard<'_, Box<dyn portable_pty::Child + Send + Sync>> {
        self.child.lock().unwrap_or_else(|e| {
            warn!("child lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl Process for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> bool {
        if self.killed.load(Ordering::Acquire) || !self.is_alive() {
            warn!(pid = ?self.pid, bytes = data.len(), "write to exited process dropped");
            return false;
        }
        match self.writer.send(data.to_vec()) {
            Ok(()) => true,
            Err(_) => {
                warn!(pid = ?self.pid, "writer channel closed, input dropped");
                false
            }
        }
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock().unwrap_or_else(|e| {
            warn!("master lock was poisoned, recovering");
            e.into_inner()
        });
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Internal(format!("resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    fn kill(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.child().kill() {
            debug!(pid = ?self.pid, "kill after exit: {e}");
        }
    }

    fn is_alive(&self) -> bool {
        match self.child().try_wait() {
            Ok(Some(_status)) => false,
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PtySpawner
// ---------------------------------------------------------------------------

/// Spawns processes on the native PTY system.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl Spawner for PtySpawner {
    fn spawn(&self, profile: &SpawnProfile) -> Result<Spawned> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: profile.rows,
                cols: profile.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut command = CommandBuilder::new(&profile.program);
        for arg in &profile.args {
            command.arg(arg);
        }
        command.cwd(&profile.cwd);
        for (k, v) in &profile.env {
            command.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| PtyError::SpawnFailed(format!("{}: {e}", profile.program)))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        info!(program = %profile.program, ?pid, cwd = %profile.cwd.display(), "spawned PTY process");

        let child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>> =
            Arc::new(Mutex::new(child));

        // -- stdout reader thread --
        let (event_tx, event_rx) = flume::unbounded::<ProcessEvent>();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let exit_child = child.clone();
        let killed = Arc::new(AtomicBool::new(false));
        let exit_killed = killed.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if event_tx.send(ProcessEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is expected on Linux once the child exits.
                        debug!("pty reader finished: {e}");
                        break;
                    }
                }
            }
            let exit = wait_for_exit(&exit_child, &exit_killed);
            debug!(?pid, code = exit.code, signal = ?exit.signal, "PTY process exited");
            let _ = event_tx.send(ProcessEvent::Exit(exit));
        });

        // -- stdin writer thread --
        let (write_tx, write_rx) = flume::unbounded::<Vec<u8>>();
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        std::thread::spawn(move || {
            while let Ok(data) = write_rx.recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        Ok(Spawned {
            process: Box::new(PtyProcess {
                pid,
                writer: write_tx,
                child,
                master: Mutex::new(pair.master),
                killed,
            }),
            events: event_rx,
        })
    }
}

/// Block until the child is reaped. `portable_pty` only reports an exit code,
/// so a failed exit after our own kill is attributed to SIGKILL.
fn wait_for_exit(
    child: &Mutex<Box<dyn portable_pty::Child + Send + Sync>>,
    killed: &AtomicBool,
) -> ExitInfo {
    loop {
        let status = {
            let mut guard = child.lock().unwrap_or_else(|e| e.into_inner());
            guard.try_wait()
        };
        match status {
            Ok(Some(status)) => {
                let signal = (killed.load(Ordering::Acquire) && !status.success())
                    .then(|| "SIGKILL".to_string());
                return ExitInfo {
                    code: status.exit_code(),
                    signal,
                };
            }
            Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
            Err(e) => {
                warn!("failed to collect exit status: {e}");
                return ExitInfo {
                    code: 1,
                    signal: None,
                };
            }
        }
    }
}
