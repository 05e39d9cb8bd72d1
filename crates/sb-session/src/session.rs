use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sb_core::types::{ClientId, LaunchKind};
use serde::Serialize;

use crate::arena::SessionId;
use crate::handoff::HandoffTracker;
use crate::output_log::OutputLog;
use crate::pty::Process;
use crate::scanner::HandoffScanner;
use crate::utf8::Utf8Decoder;

/// Derived from whether the process is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Inactive,
}

/// One live PTY process plus its bookkeeping. Owned by the registry.
pub struct Session {
    pub(crate) id: SessionId,
    /// Creation order; breaks ties between equal timestamps.
    pub(crate) seq: u64,
    pub(crate) name: String,
    pub(crate) kind: LaunchKind,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
    pub(crate) owner: Option<ClientId>,
    pub(crate) hidden: bool,
    pub(crate) control: bool,
    pub(crate) cols: u16,
    pub(crate) rows: u16,
    pub(crate) cwd: PathBuf,
    pub(crate) scan_handoffs: bool,
    pub(crate) process: Box<dyn Process>,
    pub(crate) output: OutputLog,
    pub(crate) scanner: HandoffScanner,
    pub(crate) decoder: Utf8Decoder,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LaunchKind {
        self.kind
    }

    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }

    pub fn status(&self) -> SessionStatus {
        if self.process.is_alive() {
            SessionStatus::Active
        } else {
            SessionStatus::Inactive
        }
    }

    pub(crate) fn touch_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    pub(crate) fn snapshot(&self, handoffs: &HandoffTracker) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            agent: handoffs
                .current_agent(self.id)
                .unwrap_or(self.name.as_str())
                .to_string(),
            status: self.status(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            owner: self.owner,
            hidden: self.hidden,
            control: self.control,
            cols: self.cols,
            rows: self.rows,
            cwd: self.cwd.display().to_string(),
            pid: self.process.pid(),
            handoffs: handoffs.count(self.id),
            buffered: self.output.len(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a session, safe to hand to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    pub kind: LaunchKind,
    /// Current agent after handoffs; the session name if there were none.
    pub agent: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub owner: Option<ClientId>,
    pub hidden: bool,
    pub control: bool,
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub pid: Option<u32>,
    pub handoffs: usize,
    pub buffered: usize,
}
