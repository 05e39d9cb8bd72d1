use sb_session::{CloseReason, OutputRoute, SessionObserver};
use tracing::trace;

use crate::connection::Connections;
use crate::protocol::ServerMessage;

/// Streams session output to the owning connection.
///
/// Control sessions go out as `agent-output`, everything else as
/// `terminal-output`. Hidden sessions and sessions without a live owner are
/// skipped; their output is still in the session's log.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    connections: Connections,
}

impl OutputRouter {
    pub fn new(connections: Connections) -> Self {
        Self { connections }
    }
}

impl SessionObserver for OutputRouter {
    fn on_output(&self, route: &OutputRoute, data: &[u8]) {
        if route.hidden {
            return;
        }
        let Some(owner) = route.owner else {
            return;
        };
        let data = String::from_utf8_lossy(data).into_owned();
        let msg = if route.control {
            ServerMessage::AgentOutput {
                agent_id: route.id.to_string(),
                data,
            }
        } else {
            ServerMessage::TerminalOutput {
                terminal_id: route.id.to_string(),
                data,
            }
        };
        if !self.connections.send_to(owner, msg) {
            trace!(session_id = %route.id, client_id = %owner, "owner gone, output not delivered");
        }
    }

    fn on_closed(&self, route: &OutputRoute, reason: &CloseReason) {
        if route.hidden {
            return;
        }
        let Some(owner) = route.owner else {
            return;
        };
        let (exit_code, signal) = match reason {
            CloseReason::Exited { code, signal } => (Some(*code), signal.clone()),
            CloseReason::Evicted => (None, None),
        };
        self.connections.send_to(
            owner,
            ServerMessage::TerminalExit {
                terminal_id: route.id.to_string(),
                exit_code,
                signal,
            },
        );
    }
}
