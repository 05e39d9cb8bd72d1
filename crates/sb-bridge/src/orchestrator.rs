use std::fmt::Write as _;

use dashmap::DashMap;
use sb_core::types::{ClientId, LaunchKind};
use sb_session::handoff::{HandoffContext, HandoffReason};
use sb_session::session::SessionStatus;
use sb_session::{CreateRequest, SessionId, SessionManager};
use tracing::{debug, info, warn};

use crate::directives::{self, Directive, DirectiveLine, DIRECTIVES};
use crate::error::{GatewayError, Result};
use crate::interceptor::{InterceptAction, Interceptor};

/// Name of the shared control session created by `orchestrator-init`.
pub const CONTROL_SESSION_NAME: &str = "orchestrator";

const PROMPT: &str = "\x1b[1;36mswitchboard>\x1b[0m ";
const DEFAULT_LOG_LINES: usize = 20;

/// Executes directives and owns the per-connection keystroke interceptors.
pub struct Orchestrator {
    manager: SessionManager,
    interceptors: DashMap<ClientId, Interceptor>,
    /// The control session each connection types into.
    controls: DashMap<ClientId, SessionId>,
}

impl Orchestrator {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            interceptors: DashMap::new(),
            controls: DashMap::new(),
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Attach `client` to the control session, creating it on first use.
    pub fn init(&self, client: ClientId) -> Result<SessionId> {
        let (id, greeting) = match self.manager.find_control(CONTROL_SESSION_NAME) {
            Some(id) => {
                self.manager.adopt(id, client)?;
                info!(session_id = %id, %client, "re-attached control session");
                (id, "re-attached to orchestrator session")
            }
            None => {
                let created = self.manager.create(
                    CreateRequest::new(CONTROL_SESSION_NAME)
                        .control(true)
                        .owner(client)
                        .scan_handoffs(false),
                )?;
                (created.id, "orchestrator ready")
            }
        };
        self.bind_control(client, id);
        let text = format!(
            "\x1b[1;36m[switchboard]\x1b[0m {greeting}. Type 'ohelp' for directives.\r\n{PROMPT}"
        );
        self.manager.emit(id, text.as_bytes());
        Ok(id)
    }

    pub fn bind_control(&self, client: ClientId, id: SessionId) {
        self.controls.insert(client, id);
    }

    /// The live control session bound to `client`.
    pub fn control_for(&self, client: ClientId) -> Option<SessionId> {
        let id = *self.controls.get(&client)?;
        if self.manager.contains(id) {
            Some(id)
        } else {
            self.controls.remove(&client);
            None
        }
    }

    /// Feed keystrokes typed into `control` through the client's interceptor.
    pub fn intercept(&self, client: ClientId, control: SessionId, data: &str) -> Result<()> {
        // The map guard must not be held while directives run.
        let actions = self.interceptors.entry(client).or_default().feed(data);
        for action in actions {
            match action {
                InterceptAction::Forward(bytes) => {
                    self.manager.write(control, bytes.as_bytes())?;
                }
                InterceptAction::Directive(line) => self.run_in_stream(client, control, &line),
            }
        }
        Ok(())
    }

    /// Run a directive and print the exchange into `stream`'s output.
    pub fn run_in_stream(&self, client: ClientId, stream: SessionId, line: &str) {
        self.manager
            .emit(stream, format!("\r\n\x1b[2m> {line}\x1b[0m\r\n").as_bytes());
        let text = match self.execute(client, Some(stream), line) {
            Ok(text) => text,
            Err(e) => {
                debug!(%client, %line, "directive failed: {e}");
                format!("error: {e}\n")
            }
        };
        let mut out = crlf(&text);
        if !out.ends_with("\r\n") {
            out.push_str("\r\n");
        }
        out.push_str(PROMPT);
        self.manager.emit(stream, out.as_bytes());
    }

    /// Execute one directive line and return its report.
    pub fn execute(&self, client: ClientId, origin: Option<SessionId>, line: &str) -> Result<String> {
        let parsed = directives::classify(line)
            .ok_or_else(|| GatewayError::Directive(format!("not a directive: {line}")))?;
        debug!(%client, directive = parsed.name, "executing directive");
        match parsed.directive {
            Directive::Spawn => self.spawn(client, &parsed, Some(LaunchKind::Shell), false),
            Directive::SpawnClaude => self.spawn(client, &parsed, Some(LaunchKind::Claude), false),
            Directive::SpawnHidden => self.spawn(client, &parsed, None, true),
            Directive::Status => Ok(self.status()),
            Directive::Send => self.send(&parsed),
            Directive::Broadcast => self.broadcast(&parsed),
            Directive::Logs => self.logs(&parsed),
            Directive::Handoff => self.handoff(&parsed, origin),
            Directive::Queue => Ok(self.queue()),
            Directive::Help => Ok(directives::help_text()),
            Directive::Claude => self.agent(client, LaunchKind::Claude, parsed.args),
            Directive::Gordon => self.agent(client, LaunchKind::Gordon, parsed.args),
        }
    }

    /// Forget a closed connection. Its sessions keep running unowned.
    pub fn on_disconnect(&self, client: ClientId) {
        self.interceptors.remove(&client);
        self.controls.remove(&client);
        self.manager.release_client(client);
    }

    // -- directives ---------------------------------------------------------

    fn spawn(
        &self,
        client: ClientId,
        line: &DirectiveLine<'_>,
        kind: Option<LaunchKind>,
        hidden: bool,
    ) -> Result<String> {
        let (name, rest) = split_token(line.args);
        if name.is_empty() {
            return Err(usage(line.name));
        }
        let kind = match kind {
            Some(kind) => kind,
            None => rest.parse::<LaunchKind>().map_err(GatewayError::Directive)?,
        };
        let created = self.manager.create(
            CreateRequest::new(name)
                .kind(kind)
                .owner(client)
                .hidden(hidden),
        )?;
        let mut text = format!("spawned {kind} session '{}' ({})", created.name, created.id);
        if hidden {
            text.push_str(", output hidden");
        }
        Ok(text)
    }

    fn status(&self) -> String {
        let sessions = self.manager.list();
        if sessions.is_empty() {
            return "no sessions".to_string();
        }
        let mut out = format!(
            "{:<14} {:<16} {:<7} {:<16} {:<9} {}\n",
            "ID", "NAME", "KIND", "AGENT", "STATUS", "HANDOFFS"
        );
        for s in &sessions {
            let status = match s.status {
                SessionStatus::Active => "active",
                SessionStatus::Inactive => "inactive",
            };
            let mut name = s.name.clone();
            if s.control {
                name.push('*');
            } else if s.hidden {
                name.push('~');
            }
            let _ = writeln!(
                out,
                "{:<14} {:<16} {:<7} {:<16} {:<9} {}",
                s.id.to_string(),
                name,
                s.kind.as_str(),
                s.agent,
                status,
                s.handoffs
            );
        }
        let _ = write!(
            out,
            "{} of {} sessions",
            sessions.len(),
            self.manager.max_sessions()
        );
        out
    }

    fn send(&self, line: &DirectiveLine<'_>) -> Result<String> {
        let (target, text) = split_token(line.args);
        if target.is_empty() || text.is_empty() {
            return Err(usage(line.name));
        }
        let id = self.manager.resolve(target)?;
        if self.manager.write(id, format!("{text}\r").as_bytes())? {
            Ok(format!("sent to {target}"))
        } else {
            Ok(format!("session '{target}' has exited"))
        }
    }

    fn broadcast(&self, line: &DirectiveLine<'_>) -> Result<String> {
        if line.args.is_empty() {
            return Err(usage(line.name));
        }
        let delivered = self
            .manager
            .broadcast_input(format!("{}\r", line.args).as_bytes(), true);
        Ok(format!("broadcast to {delivered} session(s)"))
    }

    fn logs(&self, line: &DirectiveLine<'_>) -> Result<String> {
        let (target, rest) = split_token(line.args);
        if target.is_empty() {
            return Err(usage(line.name));
        }
        let limit = match rest {
            "" => DEFAULT_LOG_LINES,
            n => n.parse().map_err(|_| usage(line.name))?,
        };
        let id = self.manager.resolve(target)?;
        let entries = self.manager.logs(id, limit)?;
        if entries.is_empty() {
            return Ok(format!("no output from {target}"));
        }
        let mut out = format!("--- last {} entries of {target} ---\n", entries.len());
        for entry in entries {
            out.push_str(&entry.data);
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---");
        Ok(out)
    }

    fn handoff(&self, line: &DirectiveLine<'_>, origin: Option<SessionId>) -> Result<String> {
        let (target, rest) = split_token(line.args);
        let (agent, context) = split_token(rest);
        if target.is_empty() || agent.is_empty() {
            return Err(usage(line.name));
        }
        let id = self.manager.resolve(target)?;
        let context = HandoffContext {
            from_session: origin.map(|o| o.to_string()),
            ..HandoffContext::message(context)
        };
        let result = self
            .manager
            .handoff(id, agent, HandoffReason::Directive, context)?;
        Ok(format!(
            "handoff {target}: {} -> {} ({} transition(s))",
            result.from, result.to, result.transition_count
        ))
    }

    fn queue(&self) -> String {
        let queue = self.manager.handoff_queue();
        if queue.is_empty() {
            return "handoff queue is empty".to_string();
        }
        let mut out = String::new();
        for item in queue {
            let t = &item.transition;
            let _ = writeln!(
                out,
                "{} {} {} -> {} [{}] {}",
                t.at.format("%H:%M:%S"),
                item.session,
                t.from,
                t.to,
                t.reason,
                t.context.message
            );
        }
        out
    }

    /// Send `text` to the newest session of `kind`, starting `<kind>-<n>`
    /// when there is none.
    fn agent(&self, client: ClientId, kind: LaunchKind, text: &str) -> Result<String> {
        let (id, mut report) = match self.manager.newest_of_kind(kind) {
            Some(id) => (id, String::new()),
            None => {
                let name = (1..)
                    .map(|n| format!("{kind}-{n}"))
                    .find(|name| self.manager.resolve(name).is_err())
                    .unwrap_or_else(|| kind.to_string());
                let created = self
                    .manager
                    .create(CreateRequest::new(name).kind(kind).owner(client))?;
                (created.id, format!("started {} ({})", created.name, created.id))
            }
        };
        if !text.is_empty() {
            let sent = self.manager.write(id, format!("{text}\r").as_bytes())?;
            if !report.is_empty() {
                report.push('\n');
            }
            if sent {
                let _ = write!(report, "sent to {kind} ({id})");
            } else {
                warn!(session_id = %id, "agent session exited before input");
                let _ = write!(report, "{kind} session {id} has exited");
            }
        }
        if report.is_empty() {
            report = format!("{kind} session {id} is running");
        }
        Ok(report)
    }
}

fn usage(name: &str) -> GatewayError {
    let usage = DIRECTIVES
        .iter()
        .find(|d| d.name == name)
        .map_or(name, |d| d.usage);
    GatewayError::Directive(format!("usage: {usage}"))
}

/// First whitespace-delimited token and the trimmed remainder.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

/// Bare `\n` to `\r\n`, leaving existing `\r\n` alone.
fn crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    out
}
