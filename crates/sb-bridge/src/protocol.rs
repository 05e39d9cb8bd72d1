//! Wire messages exchanged with gateway clients.
//!
//! Every frame is a JSON object tagged by a kebab-case `type`; field names
//! are camelCase. Client messages are decoded per type by the handler that
//! owns the type, so the gateway itself only needs the tag.

use sb_core::types::ClientId;
use sb_session::output_log::OutputEntry;
use sb_session::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client -> gateway
// ---------------------------------------------------------------------------

pub mod kind {
    pub const TERMINAL_CREATE: &str = "terminal-create";
    pub const TERMINAL_INPUT: &str = "terminal-input";
    pub const TERMINAL_RESIZE: &str = "terminal-resize";
    pub const TERMINAL_COMMAND: &str = "terminal-command";
    pub const TERMINAL_DESTROY: &str = "terminal-destroy";
    pub const TERMINAL_LIST: &str = "terminal-list";
    pub const TERMINAL_LOGS: &str = "terminal-logs";
    pub const ORCHESTRATOR_INIT: &str = "orchestrator-init";
    pub const ORCHESTRATOR_COMMAND: &str = "orchestrator-command";
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCreate {
    /// Request id, echoed back untouched.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub is_orchestrator: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInput {
    pub terminal_id: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResize {
    pub terminal_id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCommand {
    #[serde(default)]
    pub id: Option<Value>,
    pub terminal_id: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalDestroy {
    #[serde(default)]
    pub id: Option<Value>,
    pub terminal_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalLogs {
    #[serde(default)]
    pub id: Option<Value>,
    pub terminal_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Either a complete directive (`command`) or raw keystrokes for the
/// interceptor (`subtype: "terminal-input"` with `data`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorCommand {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

// ---------------------------------------------------------------------------
// Gateway -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    ConnectionEstablished {
        client_id: ClientId,
        capabilities: Vec<String>,
        max_terminals: usize,
    },
    TerminalCreated {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TerminalOutput {
        terminal_id: String,
        data: String,
    },
    TerminalExit {
        terminal_id: String,
        /// `None` when the session was reclaimed for inactivity.
        exit_code: Option<u32>,
        signal: Option<String>,
    },
    AgentOutput {
        agent_id: String,
        data: String,
    },
    CommandExecuted {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        terminal_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TerminalDestroyed {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        terminal_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TerminalList {
        terminals: Vec<SessionSnapshot>,
    },
    TerminalLogs {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        terminal_id: String,
        success: bool,
        entries: Vec<OutputEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        /// Always `false`; lets clients treat every reply the same way.
        success: bool,
        code: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_type: Option<String>,
    },
}

impl ServerMessage {
    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionEstablished { .. } => "connection-established",
            ServerMessage::TerminalCreated { .. } => "terminal-created",
            ServerMessage::TerminalOutput { .. } => "terminal-output",
            ServerMessage::TerminalExit { .. } => "terminal-exit",
            ServerMessage::AgentOutput { .. } => "agent-output",
            ServerMessage::CommandExecuted { .. } => "command-executed",
            ServerMessage::TerminalDestroyed { .. } => "terminal-destroyed",
            ServerMessage::TerminalList { .. } => "terminal-list",
            ServerMessage::TerminalLogs { .. } => "terminal-logs",
            ServerMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
