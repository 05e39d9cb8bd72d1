//! The one table of orchestrator directives.
//!
//! Both the keystroke interceptor and the `terminal-command` /
//! `orchestrator-command` handlers classify through [`classify`], so they
//! cannot disagree about what counts as a directive.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Spawn,
    SpawnClaude,
    SpawnHidden,
    Status,
    Send,
    Broadcast,
    Logs,
    Handoff,
    Queue,
    Help,
    Claude,
    Gordon,
}

#[derive(Debug, Clone, Copy)]
pub struct DirectiveSpec {
    pub name: &'static str,
    pub directive: Directive,
    pub usage: &'static str,
    pub description: &'static str,
}

pub const DIRECTIVES: &[DirectiveSpec] = &[
    DirectiveSpec {
        name: "spawn",
        directive: Directive::Spawn,
        usage: "spawn <name>",
        description: "start a shell session",
    },
    DirectiveSpec {
        name: "spawn-claude",
        directive: Directive::SpawnClaude,
        usage: "spawn-claude <name>",
        description: "start a Claude agent session",
    },
    DirectiveSpec {
        name: "spawn-hidden",
        directive: Directive::SpawnHidden,
        usage: "spawn-hidden <name> [shell|claude|gordon]",
        description: "start a session whose output is not streamed",
    },
    DirectiveSpec {
        name: "status",
        directive: Directive::Status,
        usage: "status",
        description: "list sessions",
    },
    DirectiveSpec {
        name: "send",
        directive: Directive::Send,
        usage: "send <target> <text>",
        description: "type a line into a session",
    },
    DirectiveSpec {
        name: "broadcast",
        directive: Directive::Broadcast,
        usage: "broadcast <text>",
        description: "type a line into every session",
    },
    DirectiveSpec {
        name: "logs",
        directive: Directive::Logs,
        usage: "logs <target> [n]",
        description: "show recent output (default 20 entries)",
    },
    DirectiveSpec {
        name: "handoff",
        directive: Directive::Handoff,
        usage: "handoff <target> <agent> [context...]",
        description: "hand a session to another agent",
    },
    DirectiveSpec {
        name: "queue",
        directive: Directive::Queue,
        usage: "queue",
        description: "show all recorded handoffs",
    },
    DirectiveSpec {
        name: "ohelp",
        directive: Directive::Help,
        usage: "ohelp",
        description: "show this help",
    },
    DirectiveSpec {
        name: "help",
        directive: Directive::Help,
        usage: "help",
        description: "show this help",
    },
    DirectiveSpec {
        name: "claude",
        directive: Directive::Claude,
        usage: "claude [text]",
        description: "talk to the newest Claude session, starting one if needed",
    },
    DirectiveSpec {
        name: "gordon",
        directive: Directive::Gordon,
        usage: "gordon [text]",
        description: "talk to the newest Gordon session, starting one if needed",
    },
];

/// A classified directive line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectiveLine<'a> {
    pub directive: Directive,
    pub name: &'static str,
    /// Everything after the first token, trimmed.
    pub args: &'a str,
}

/// Match the first whitespace-delimited token, case-insensitively.
/// Blank lines are never directives.
pub fn classify(line: &str) -> Option<DirectiveLine<'_>> {
    let line = line.trim();
    let (token, args) = match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (line, ""),
    };
    if token.is_empty() {
        return None;
    }
    let token = token.to_ascii_lowercase();
    DIRECTIVES
        .iter()
        .find(|spec| spec.name == token)
        .map(|spec| DirectiveLine {
            directive: spec.directive,
            name: spec.name,
            args,
        })
}

pub fn is_directive(line: &str) -> bool {
    classify(line).is_some()
}

pub fn help_text() -> String {
    let width = DIRECTIVES.iter().map(|d| d.usage.len()).max().unwrap_or(0);
    let mut out = String::from("orchestrator directives:\n");
    for spec in DIRECTIVES {
        let _ = writeln!(out, "  {:<width$}  {}", spec.usage, spec.description);
    }
    out
}
