use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use sb_core::config::{AgentsConfig, Config};
use sb_core::types::{ClientId, LaunchKind};
use tracing::{debug, info, warn};

use crate::arena::SessionId;
use crate::error::{Result, SessionError};
use crate::eviction::EvictionManager;
use crate::handoff::{
    banner, HandoffContext, HandoffReason, HandoffResult, HandoffTracker, QueuedHandoff, Transition,
};
use crate::launch::{adapter_for, LaunchRequest};
use crate::output_log::{OutputEntry, OutputLog};
use crate::pty::{resolve_working_dir, ExitInfo, ProcessEvent, Spawner};
use crate::registry::SessionRegistry;
use crate::scanner::HandoffScanner;
use crate::session::{Session, SessionSnapshot};
use crate::utf8::Utf8Decoder;

// ---------------------------------------------------------------------------
// Settings and requests
// ---------------------------------------------------------------------------

/// The slice of [`Config`] the session layer needs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub output_log_capacity: usize,
    pub default_cols: u16,
    pub default_rows: u16,
    pub scan_handoffs: bool,
    pub scratch_dir: PathBuf,
    pub agents: AgentsConfig,
    pub projects: BTreeMap<String, PathBuf>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let sessions = &config.sessions;
        Self {
            max_sessions: sessions.max_sessions,
            idle_timeout: Duration::from_secs(sessions.idle_timeout_secs),
            output_log_capacity: sessions.output_log_capacity,
            default_cols: sessions.default_cols,
            default_rows: sessions.default_rows,
            scan_handoffs: sessions.scan_handoffs,
            scratch_dir: sessions.scratch_path(),
            agents: config.agents.clone(),
            projects: config
                .projects
                .iter()
                .map(|(name, path)| (name.clone(), PathBuf::from(path)))
                .collect(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Parameters for [`SessionManager::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: Option<String>,
    pub kind: LaunchKind,
    pub directory: Option<PathBuf>,
    pub project: Option<String>,
    pub mcp_servers: Vec<String>,
    pub owner: Option<ClientId>,
    pub hidden: bool,
    pub control: bool,
    /// Overrides the configured default for this session only.
    pub scan_handoffs: Option<bool>,
    pub size: Option<(u16, u16)>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: LaunchKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn owner(mut self, owner: ClientId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn mcp_servers(mut self, servers: Vec<String>) -> Self {
        self.mcp_servers = servers;
        self
    }

    pub fn scan_handoffs(mut self, enabled: bool) -> Self {
        self.scan_handoffs = Some(enabled);
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.size = Some((cols, rows));
        self
    }
}

/// Result of a successful [`SessionManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: SessionId,
    pub name: String,
    /// Startup banner from the launch adapter, if it has one.
    pub banner: Option<String>,
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Where a session's output should go. Copied out of the registry so the
/// observer runs without the registry lock held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoute {
    pub id: SessionId,
    pub name: String,
    pub owner: Option<ClientId>,
    pub hidden: bool,
    pub control: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Exited { code: u32, signal: Option<String> },
    Evicted,
}

/// Receives session output and closures. The gateway implements this to
/// stream output to clients.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_output(&self, route: &OutputRoute, data: &[u8]);
    fn on_closed(&self, route: &OutputRoute, reason: &CloseReason);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_output(&self, _route: &OutputRoute, _data: &[u8]) {}
    fn on_closed(&self, _route: &OutputRoute, _reason: &CloseReason) {}
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

struct State {
    registry: SessionRegistry,
    eviction: EvictionManager,
    handoffs: HandoffTracker,
}

struct Inner {
    state: Mutex<State>,
    settings: SessionSettings,
    spawner: Arc<dyn Spawner>,
    observer: Arc<dyn SessionObserver>,
    seq: AtomicU64,
}

/// Owns every live session: registry, idle eviction and handoff history.
///
/// Cheap to clone. All bookkeeping sits behind one mutex that is never held
/// across an `.await`; each session's output is consumed by its own pump
/// task, so chunks from one process are handled strictly in order. Tasks
/// only keep a [`Weak`] reference, so dropping the last handle stops them.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Must be called inside a Tokio runtime (starts the reaper task).
    pub fn new(
        settings: SessionSettings,
        spawner: Arc<dyn Spawner>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (eviction, expired) = EvictionManager::new(settings.idle_timeout);
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                registry: SessionRegistry::new(settings.max_sessions),
                eviction,
                handoffs: HandoffTracker::new(),
            }),
            settings,
            spawner,
            observer,
            seq: AtomicU64::new(0),
        });
        tokio::spawn(reap(Arc::downgrade(&inner), expired));
        Self { inner }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn max_sessions(&self) -> usize {
        self.inner.settings.max_sessions
    }

    pub fn len(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| {
            warn!("session state lock was poisoned, recovering");
            e.into_inner()
        })
    }

    // -- lifecycle ----------------------------------------------------------

    /// Spawn a process and register it. Fails without side effects when the
    /// registry is full or the process cannot start.
    pub fn create(&self, req: CreateRequest) -> Result<Created> {
        let settings = &self.inner.settings;
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let name = req
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{seq}", req.kind));
        let (cols, rows) = req
            .size
            .unwrap_or((settings.default_cols, settings.default_rows));

        let adapter = adapter_for(req.kind, &settings.agents);
        let project = req.project.as_deref().and_then(|p| settings.projects.get(p));
        if let (Some(p), None) = (&req.project, project) {
            warn!(project = %p, "unknown project, falling back to scratch directory");
        }

        // The lock is held across the spawn so two concurrent creates cannot
        // both pass the capacity check.
        let mut state = self.lock();
        state.registry.ensure_capacity()?;
        let cwd = resolve_working_dir(
            req.directory.as_deref(),
            project.map(PathBuf::as_path),
            &settings.scratch_dir,
        )
        .map_err(SessionError::Spawn)?;
        let profile = adapter.profile(&LaunchRequest {
            name: &name,
            cwd: cwd.clone(),
            cols,
            rows,
            mcp_servers: &req.mcp_servers,
        });
        let spawned = self
            .inner
            .spawner
            .spawn(&profile)
            .map_err(SessionError::Spawn)?;

        let now = Utc::now();
        let id = state.registry.insert_with(|id| Session {
            id,
            seq,
            name: name.clone(),
            kind: req.kind,
            created_at: now,
            last_activity: now,
            owner: req.owner,
            hidden: req.hidden,
            control: req.control,
            cols,
            rows,
            cwd,
            scan_handoffs: req.scan_handoffs.unwrap_or(settings.scan_handoffs),
            process: spawned.process,
            output: OutputLog::new(settings.output_log_capacity),
            scanner: HandoffScanner::new(),
            decoder: Utf8Decoder::new(),
        })?;
        state.eviction.touch(id);
        let total = state.registry.len();
        drop(state);

        tokio::spawn(pump(Arc::downgrade(&self.inner), id, spawned.events));
        info!(session_id = %id, %name, kind = %req.kind, total, "session created");
        Ok(Created {
            id,
            name: name.clone(),
            banner: adapter.banner(&name),
        })
    }

    /// Kill the process and forget the session. Does not wait for the exit.
    pub fn destroy(&self, id: SessionId) -> Result<()> {
        let session = {
            let mut state = self.lock();
            let session = state
                .registry
                .remove(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            state.eviction.cancel(id);
            state.handoffs.remove(id);
            session
        };
        session.process.kill();
        info!(session_id = %id, name = %session.name, "session destroyed");
        Ok(())
    }

    /// [`destroy`](Self::destroy) by id or name.
    pub fn destroy_by_key(&self, key: &str) -> Result<SessionId> {
        let id = self.resolve(key)?;
        self.destroy(id)?;
        Ok(id)
    }

    /// Kill every session. Used on shutdown.
    pub fn shutdown(&self) -> usize {
        let sessions = {
            let mut state = self.lock();
            let sessions = state.registry.drain();
            for session in &sessions {
                state.eviction.cancel(session.id);
                state.handoffs.remove(session.id);
            }
            sessions
        };
        for session in &sessions {
            session.process.kill();
        }
        info!(count = sessions.len(), "all sessions shut down");
        sessions.len()
    }

    // -- lookup -------------------------------------------------------------

    /// Exact id, then exact name (oldest session with that name).
    pub fn resolve(&self, key: &str) -> Result<SessionId> {
        self.lock()
            .registry
            .resolve(key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))
    }

    pub fn lookup(&self, key: &str) -> Result<SessionSnapshot> {
        let state = self.lock();
        let id = state
            .registry
            .resolve(key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        snapshot_of(&state, id)
    }

    pub fn get(&self, id: SessionId) -> Result<SessionSnapshot> {
        snapshot_of(&self.lock(), id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().registry.contains(id)
    }

    /// Substring match over ids and names, oldest first.
    pub fn search(&self, fragment: &str) -> Vec<SessionSnapshot> {
        let state = self.lock();
        state
            .registry
            .search(fragment)
            .into_iter()
            .filter_map(|id| snapshot_of(&state, id).ok())
            .collect()
    }

    /// Every session, oldest first.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let state = self.lock();
        state
            .registry
            .iter()
            .map(|s| s.snapshot(&state.handoffs))
            .collect()
    }

    /// The most recently created session of `kind`.
    pub fn newest_of_kind(&self, kind: LaunchKind) -> Option<SessionId> {
        let state = self.lock();
        let found = state
            .registry
            .iter()
            .filter(|s| s.kind == kind && !s.control)
            .max_by_key(|s| s.seq)
            .map(|s| s.id);
        found
    }

    /// The control session called `name`, if one is alive.
    pub fn find_control(&self, name: &str) -> Option<SessionId> {
        let state = self.lock();
        let found = state
            .registry
            .iter()
            .find(|s| s.control && s.name == name && s.process.is_alive())
            .map(|s| s.id);
        found
    }

    // -- I/O ----------------------------------------------------------------

    /// Write to the process. `Ok(false)` when the process already exited;
    /// that is logged, not an error.
    pub fn write(&self, id: SessionId, data: &[u8]) -> Result<bool> {
        let mut state = self.lock();
        let State {
            registry, eviction, ..
        } = &mut *state;
        let session = registry
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let ok = session.process.write(data);
        if ok {
            session.touch_activity();
            eviction.touch(id);
        }
        Ok(ok)
    }

    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .registry
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session
            .process
            .resize(cols, rows)
            .map_err(SessionError::Process)?;
        session.cols = cols;
        session.rows = rows;
        debug!(session_id = %id, cols, rows, "session resized");
        Ok(())
    }

    /// Reset the idle timer without any I/O.
    pub fn touch(&self, id: SessionId) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .registry
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.touch_activity();
        state.eviction.touch(id);
        Ok(())
    }

    /// Write `data` to every session (optionally skipping control sessions).
    /// Returns how many writes were accepted; dead processes are skipped.
    pub fn broadcast_input(&self, data: &[u8], skip_control: bool) -> usize {
        let mut state = self.lock();
        let State {
            registry, eviction, ..
        } = &mut *state;
        let mut delivered = 0;
        for session in registry.iter_mut() {
            if skip_control && session.control {
                continue;
            }
            if session.process.write(data) {
                session.touch_activity();
                eviction.touch(session.id);
                delivered += 1;
            }
        }
        debug!(delivered, bytes = data.len(), "broadcast input");
        delivered
    }

    /// Last `limit` output entries, oldest first.
    pub fn logs(&self, id: SessionId, limit: usize) -> Result<Vec<OutputEntry>> {
        let state = self.lock();
        let session = state
            .registry
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(session.output.tail(limit))
    }

    // -- ownership ----------------------------------------------------------

    /// Point the session's owner reference at `client`.
    pub fn adopt(&self, id: SessionId, client: ClientId) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .registry
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.owner = Some(client);
        Ok(())
    }

    /// Clear the owner reference of every session owned by `client`.
    /// Sessions keep running; returns how many were released.
    pub fn release_client(&self, client: ClientId) -> usize {
        let mut state = self.lock();
        let mut released = 0;
        for session in state.registry.iter_mut() {
            if session.owner == Some(client) {
                session.owner = None;
                released += 1;
            }
        }
        if released > 0 {
            debug!(%client, released, "released client sessions");
        }
        released
    }

    // -- handoffs -----------------------------------------------------------

    /// Record a handoff and announce it in the session's output stream.
    pub fn handoff(
        &self,
        id: SessionId,
        to: &str,
        reason: HandoffReason,
        context: HandoffContext,
    ) -> Result<HandoffResult> {
        let (result, text) = {
            let mut state = self.lock();
            let State {
                registry, handoffs, ..
            } = &mut *state;
            let session = registry
                .get(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            let text = banner(
                handoffs.current_agent(id).unwrap_or(session.name.as_str()),
                to,
                &context,
            );
            let result = handoffs.record(id, &session.name, to, reason, context);
            (result, text)
        };
        info!(
            session_id = %id,
            from = %result.from,
            to = %result.to,
            %reason,
            count = result.transition_count,
            "handoff recorded"
        );
        self.emit(id, text.as_bytes());
        Ok(result)
    }

    pub fn history(&self, id: SessionId) -> Result<Vec<Transition>> {
        let state = self.lock();
        if !state.registry.contains(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(state.handoffs.history(id))
    }

    pub fn current_agent(&self, id: SessionId) -> Result<String> {
        let state = self.lock();
        let session = state
            .registry
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(state
            .handoffs
            .current_agent(id)
            .unwrap_or(session.name.as_str())
            .to_string())
    }

    /// All transitions across sessions, oldest first.
    pub fn handoff_queue(&self) -> Vec<QueuedHandoff> {
        self.lock().handoffs.queue()
    }

    // -- event handling -----------------------------------------------------

    /// Put text into a session's output stream without it coming from the
    /// process (banners, echoed directives). Not scanned for handoffs.
    pub fn emit(&self, id: SessionId, data: &[u8]) {
        let route = {
            let mut state = self.lock();
            let Some(session) = state.registry.get_mut(id) else {
                return;
            };
            session.output.push(data);
            route_of(session)
        };
        self.inner.observer.on_output(&route, data);
    }

    fn record_output(&self, id: SessionId, data: &[u8]) {
        let (route, requests, text) = {
            let mut state = self.lock();
            let State {
                registry, eviction, ..
            } = &mut *state;
            // Destroyed while the chunk was in flight.
            let Some(session) = registry.get_mut(id) else {
                return;
            };
            session.touch_activity();
            eviction.touch(id);
            let text = session.decoder.decode(data);
            // Only part of a character so far.
            if text.is_empty() {
                return;
            }
            session.output.push(text.as_bytes());
            let requests = if session.scan_handoffs {
                session.scanner.feed(text.as_bytes())
            } else {
                Vec::new()
            };
            (route_of(session), requests, text)
        };
        self.inner.observer.on_output(&route, text.as_bytes());

        for req in requests {
            let context = HandoffContext {
                message: req.message,
                from_session: Some(id.to_string()),
            };
            if let Err(e) = self.handoff(id, &req.target, HandoffReason::OutputRequest, context) {
                warn!(session_id = %id, target = %req.target, "output-requested handoff failed: {e}");
            }
        }
    }

    fn process_exited(&self, id: SessionId, exit: ExitInfo) {
        let mut session = {
            let mut state = self.lock();
            let Some(session) = state.registry.remove(id) else {
                debug!(session_id = %id, "exit for removed session ignored");
                return;
            };
            state.eviction.cancel(id);
            state.handoffs.remove(id);
            session
        };
        let route = route_of(&session);
        if let Some(tail) = session.decoder.finish() {
            self.inner.observer.on_output(&route, tail.as_bytes());
        }
        info!(session_id = %id, name = %session.name, code = exit.code, signal = ?exit.signal, "session process exited");
        self.inner.observer.on_closed(
            &route,
            &CloseReason::Exited {
                code: exit.code,
                signal: exit.signal,
            },
        );
    }

    /// Destroy `id` if its idle deadline really passed. Returns whether it
    /// was evicted.
    fn evict(&self, id: SessionId) -> bool {
        let session = {
            let mut state = self.lock();
            if !state.eviction.is_tracked(id) {
                return false;
            }
            if !state.eviction.is_expired(id) {
                // Touched after the timer fired.
                state.eviction.rearm(id);
                return false;
            }
            let Some(session) = state.registry.remove(id) else {
                state.eviction.cancel(id);
                return false;
            };
            state.eviction.cancel(id);
            state.handoffs.remove(id);
            session
        };
        session.process.kill();
        info!(session_id = %id, name = %session.name, "idle session evicted");
        self.inner
            .observer
            .on_closed(&route_of(&session), &CloseReason::Evicted);
        true
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .field("max_sessions", &self.max_sessions())
            .finish()
    }
}

fn route_of(session: &Session) -> OutputRoute {
    OutputRoute {
        id: session.id,
        name: session.name.clone(),
        owner: session.owner,
        hidden: session.hidden,
        control: session.control,
    }
}

fn snapshot_of(state: &State, id: SessionId) -> Result<SessionSnapshot> {
    state
        .registry
        .get(id)
        .map(|s| s.snapshot(&state.handoffs))
        .ok_or_else(|| SessionError::NotFound(id.to_string()))
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Consumes one session's event stream until the exit event.
async fn pump(inner: Weak<Inner>, id: SessionId, events: flume::Receiver<ProcessEvent>) {
    while let Ok(event) = events.recv_async().await {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        let manager = SessionManager { inner: strong };
        match event {
            ProcessEvent::Output(data) => manager.record_output(id, &data),
            ProcessEvent::Exit(exit) => {
                manager.process_exited(id, exit);
                break;
            }
        }
    }
    debug!(session_id = %id, "output pump finished");
}

/// Destroys sessions whose idle timers expired.
async fn reap(inner: Weak<Inner>, expired: flume::Receiver<SessionId>) {
    while let Ok(id) = expired.recv_async().await {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        SessionManager { inner: strong }.evict(id);
    }
}
