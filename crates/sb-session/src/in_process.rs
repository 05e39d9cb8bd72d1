use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::pty::{ExitInfo, Process, ProcessEvent, PtyError, Result, SpawnProfile, Spawned, Spawner};

// ---------------------------------------------------------------------------
// InProcessSpawner
// ---------------------------------------------------------------------------

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

#[derive(Default)]
struct SpawnerState {
    spawned: Vec<FakeHandle>,
    fail_next: Option<String>,
}

/// A [`Spawner`] whose processes live entirely in memory.
///
/// Every spawned process is exposed as a [`FakeHandle`] so tests can emit
/// output, end the process, and inspect what was written to it.
#[derive(Clone, Default)]
pub struct InProcessSpawner {
    state: Arc<Mutex<SpawnerState>>,
    echo: bool,
}

impl InProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes echo every write back as output, like a tty in cooked mode.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Make the next `spawn` fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    pub fn spawned(&self) -> Vec<FakeHandle> {
        self.lock().spawned.clone()
    }

    pub fn last(&self) -> Option<FakeHandle> {
        self.lock().spawned.last().cloned()
    }

    pub fn count(&self) -> usize {
        self.lock().spawned.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpawnerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Spawner for InProcessSpawner {
    fn spawn(&self, profile: &SpawnProfile) -> Result<Spawned> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(PtyError::SpawnFailed(message));
        }
        let (events_tx, events_rx) = flume::unbounded();
        let shared = Arc::new(FakeShared {
            profile: profile.clone(),
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            events: events_tx,
            input: Mutex::new(Vec::new()),
            size: Mutex::new((profile.cols, profile.rows)),
            alive: AtomicBool::new(true),
            exited: AtomicBool::new(false),
            echo: self.echo,
        });
        state.spawned.push(FakeHandle {
            shared: shared.clone(),
        });
        Ok(Spawned {
            process: Box::new(InProcessProcess { shared }),
            events: events_rx,
        })
    }
}

struct FakeShared {
    profile: SpawnProfile,
    pid: u32,
    events: flume::Sender<ProcessEvent>,
    input: Mutex<Vec<u8>>,
    size: Mutex<(u16, u16)>,
    alive: AtomicBool,
    exited: AtomicBool,
    echo: bool,
}

impl FakeShared {
    fn finish(&self, exit: ExitInfo) {
        self.alive.store(false, Ordering::Release);
        if !self.exited.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(ProcessEvent::Exit(exit));
        }
    }
}

/// Test-side controller for one in-memory process.
#[derive(Clone)]
pub struct FakeHandle {
    shared: Arc<FakeShared>,
}

impl FakeHandle {
    pub fn profile(&self) -> &SpawnProfile {
        &self.shared.profile
    }

    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Push output as if the process had printed it.
    pub fn emit(&self, data: impl AsRef<[u8]>) {
        let _ = self
            .shared
            .events
            .send(ProcessEvent::Output(data.as_ref().to_vec()));
    }

    /// End the process and deliver its exit event.
    pub fn exit(&self, code: u32) {
        self.shared.finish(ExitInfo { code, signal: None });
    }

    /// Mark the process dead without delivering the exit event yet, the
    /// window between a child dying and its exit being observed.
    pub fn mark_dead(&self) {
        self.shared.alive.store(false, Ordering::Release);
    }

    /// Everything written to the process so far.
    pub fn input(&self) -> Vec<u8> {
        self.shared
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn input_string(&self) -> String {
        String::from_utf8_lossy(&self.input()).into_owned()
    }

    pub fn clear_input(&self) {
        self.shared
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn size(&self) -> (u16, u16) {
        *self.shared.size.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }
}

/// The [`Process`] half of an in-memory process.
pub struct InProcessProcess {
    shared: Arc<FakeShared>,
}

impl Process for InProcessProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.shared.pid)
    }

    fn write(&self, data: &[u8]) -> bool {
        if !self.is_alive() {
            warn!(pid = self.shared.pid, bytes = data.len(), "write to exited process dropped");
            return false;
        }
        self.shared
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(data);
        if self.shared.echo {
            let _ = self.shared.events.send(ProcessEvent::Output(data.to_vec()));
        }
        true
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if !self.is_alive() {
            return Err(PtyError::Internal("resize on exited process".into()));
        }
        *self.shared.size.lock().unwrap_or_else(|e| e.into_inner()) = (cols, rows);
        Ok(())
    }

    fn kill(&self) {
        self.shared.finish(ExitInfo {
            code: 1,
            signal: Some("SIGKILL".into()),
        });
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }
}
