use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arena::SessionId;

/// Message recorded when a handoff carries no free text.
pub const NO_CONTEXT: &str = "no context provided";

/// What triggered a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandoffReason {
    /// A client issued the `handoff` directive.
    Directive,
    /// The session's own output contained `handoff-to:<agent>`.
    OutputRequest,
    /// Programmatic call.
    Api,
}

impl std::fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffReason::Directive => write!(f, "directive"),
            HandoffReason::OutputRequest => write!(f, "output-request"),
            HandoffReason::Api => write!(f, "api"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffContext {
    pub message: String,
    /// Session that asked for the handoff, when it was not the target itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_session: Option<String>,
}

impl HandoffContext {
    /// Wrap free text, substituting [`NO_CONTEXT`] when it is blank.
    pub fn message(text: impl Into<String>) -> Self {
        let text = text.into();
        let message = if text.trim().is_empty() {
            NO_CONTEXT.to_string()
        } else {
            text.trim().to_string()
        };
        Self {
            message,
            from_session: None,
        }
    }
}

impl Default for HandoffContext {
    fn default() -> Self {
        Self::message("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: HandoffReason,
    pub context: HandoffContext,
}

/// Agent history of one session. Created on its first handoff.
#[derive(Debug, Clone)]
pub struct HandoffRecord {
    current_agent: String,
    transitions: Vec<Transition>,
}

impl HandoffRecord {
    pub fn current_agent(&self) -> &str {
        &self.current_agent
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffResult {
    pub session: SessionId,
    pub from: String,
    pub to: String,
    pub transition_count: usize,
}

/// A transition together with the session it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedHandoff {
    pub session: SessionId,
    #[serde(flatten)]
    pub transition: Transition,
}

/// Append-only agent-transition history for every session.
///
/// The tracker does not know which sessions exist; callers check that before
/// recording and call [`remove`](Self::remove) when a session goes away.
#[derive(Debug, Default)]
pub struct HandoffTracker {
    records: AHashMap<SessionId, HandoffRecord>,
}

impl HandoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transition to `to`. `original_agent` seeds the record the
    /// first time a session is handed off.
    pub fn record(
        &mut self,
        id: SessionId,
        original_agent: &str,
        to: &str,
        reason: HandoffReason,
        context: HandoffContext,
    ) -> HandoffResult {
        let record = self.records.entry(id).or_insert_with(|| HandoffRecord {
            current_agent: original_agent.to_string(),
            transitions: Vec::new(),
        });
        let from = std::mem::replace(&mut record.current_agent, to.to_string());
        record.transitions.push(Transition {
            at: Utc::now(),
            from: from.clone(),
            to: to.to_string(),
            reason,
            context,
        });
        HandoffResult {
            session: id,
            from,
            to: to.to_string(),
            transition_count: record.transitions.len(),
        }
    }

    /// Current agent, or `None` when the session was never handed off.
    pub fn current_agent(&self, id: SessionId) -> Option<&str> {
        self.records.get(&id).map(|r| r.current_agent())
    }

    /// Ordered transitions; empty when there were none.
    pub fn history(&self, id: SessionId) -> Vec<Transition> {
        self.records
            .get(&id)
            .map(|r| r.transitions.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, id: SessionId) -> usize {
        self.records.get(&id).map_or(0, |r| r.transitions.len())
    }

    pub fn remove(&mut self, id: SessionId) -> Option<HandoffRecord> {
        self.records.remove(&id)
    }

    /// Every transition across all sessions, oldest first.
    pub fn queue(&self) -> Vec<QueuedHandoff> {
        let mut all: Vec<QueuedHandoff> = self
            .records
            .iter()
            .flat_map(|(id, r)| {
                r.transitions.iter().map(|t| QueuedHandoff {
                    session: *id,
                    transition: t.clone(),
                })
            })
            .collect();
        all.sort_by(|a, b| a.transition.at.cmp(&b.transition.at));
        all
    }
}

/// The line written into a session's terminal stream to announce a handoff.
pub fn banner(from: &str, to: &str, context: &HandoffContext) -> String {
    format!(
        "\r\n\x1b[1;35m[handoff]\x1b[0m {from} -> {to}: {}\r\n",
        context.message
    )
}
