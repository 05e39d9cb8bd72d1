use std::sync::LazyLock;

use regex::Regex;

use crate::handoff::NO_CONTEXT;

/// Longest partial line carried between chunks. Anything longer is dropped
/// up to the next newline; a handoff request never needs that much text.
const MAX_PENDING: usize = 4096;

static HANDOFF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"handoff-to:([A-Za-z0-9_.\-]+)(?:[ \t]+([^\r\n]*))?")
        .expect("handoff pattern is valid")
});

/// CSI, OSC and two-byte escape sequences.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ansi pattern is valid")
});

/// A `handoff-to:<agent> [message]` request found in session output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
    pub target: String,
    pub message: String,
}

/// Remove terminal escape sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Parse one already-stripped line.
pub fn parse_line(line: &str) -> Option<HandoffRequest> {
    let caps = HANDOFF_RE.captures(line)?;
    let target = caps.get(1)?.as_str().to_string();
    let message = caps
        .get(2)
        .map(|m| m.as_str().trim())
        .filter(|m| !m.is_empty())
        .unwrap_or(NO_CONTEXT)
        .to_string();
    Some(HandoffRequest { target, message })
}

/// Line-oriented scanner over a session's raw output stream.
///
/// Only complete lines are examined so a request split across two reads is
/// still seen once, and a line is never examined twice.
#[derive(Debug, Default)]
pub struct HandoffScanner {
    pending: Vec<u8>,
    overflowed: bool,
}

impl HandoffScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<HandoffRequest> {
        let mut found = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            rest = &tail[1..];
            if self.overflowed {
                self.overflowed = false;
                self.pending.clear();
                continue;
            }
            self.pending.extend_from_slice(line);
            let text = String::from_utf8_lossy(&self.pending);
            if let Some(req) = parse_line(&strip_ansi(&text)) {
                found.push(req);
            }
            self.pending.clear();
        }
        if !self.overflowed {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > MAX_PENDING {
                self.pending.clear();
                self.overflowed = true;
            }
        }
        found
    }
}
