use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::arena::SessionId;

/// Default idle window before a session is reclaimed (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct IdleTimer {
    deadline: Arc<Mutex<Instant>>,
    task: AbortHandle,
}

/// Per-session inactivity timers.
///
/// Each tracked session has one timer task sleeping until its deadline.
/// [`touch`](Self::touch) only moves the deadline; the task notices and goes
/// back to sleep. When a deadline passes untouched the session id is sent
/// on the expiry channel returned by [`EvictionManager::new`]; the receiver
/// decides whether to destroy it (see [`is_expired`](Self::is_expired)).
pub struct EvictionManager {
    idle: Duration,
    timers: AHashMap<SessionId, IdleTimer>,
    expired_tx: flume::Sender<SessionId>,
}

impl EvictionManager {
    /// Must be called inside a Tokio runtime; timers are Tokio tasks.
    pub fn new(idle: Duration) -> (Self, flume::Receiver<SessionId>) {
        let (expired_tx, expired_rx) = flume::unbounded();
        (
            Self {
                idle,
                timers: AHashMap::new(),
                expired_tx,
            },
            expired_rx,
        )
    }

    /// Reset the session's idle deadline to a full window from now, arming a
    /// timer if none is running.
    pub fn touch(&mut self, id: SessionId) {
        let deadline = Instant::now() + self.idle;
        match self.timers.get_mut(&id) {
            Some(timer) => {
                *lock(&timer.deadline) = deadline;
                if timer.task.is_finished() {
                    timer.task = spawn_timer(id, timer.deadline.clone(), self.expired_tx.clone());
                }
            }
            None => {
                let deadline = Arc::new(Mutex::new(deadline));
                let task = spawn_timer(id, deadline.clone(), self.expired_tx.clone());
                self.timers.insert(id, IdleTimer { deadline, task });
            }
        }
    }

    /// Re-arm a timer whose expiry turned out to be stale (touched after the
    /// task fired). The deadline is left as is.
    pub fn rearm(&mut self, id: SessionId) {
        if let Some(timer) = self.timers.get_mut(&id) {
            if timer.task.is_finished() {
                timer.task = spawn_timer(id, timer.deadline.clone(), self.expired_tx.clone());
            }
        }
    }

    /// Stop tracking a session. Returns whether a timer existed.
    pub fn cancel(&mut self, id: SessionId) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => {
                timer.task.abort();
                debug!(session_id = %id, "idle timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn deadline(&self, id: SessionId) -> Option<Instant> {
        self.timers.get(&id).map(|t| *lock(&t.deadline))
    }

    /// Whether the session is tracked and its deadline has passed.
    pub fn is_expired(&self, id: SessionId) -> bool {
        self.deadline(id).is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_tracked(&self, id: SessionId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for EvictionManager {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.task.abort();
        }
    }
}

fn lock(deadline: &Mutex<Instant>) -> std::sync::MutexGuard<'_, Instant> {
    deadline.lock().unwrap_or_else(|e| {
        warn!("idle deadline lock was poisoned, recovering");
        e.into_inner()
    })
}

fn spawn_timer(
    id: SessionId,
    deadline: Arc<Mutex<Instant>>,
    expired_tx: flume::Sender<SessionId>,
) -> AbortHandle {
    tokio::spawn(async move {
        loop {
            let at = *lock(&deadline);
            if Instant::now() >= at {
                let _ = expired_tx.send(id);
                return;
            }
            tokio::time::sleep_until(at).await;
        }
    })
    .abort_handle()
}
