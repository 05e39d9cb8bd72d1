use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// Identifies one gateway connection.
///
/// Sessions only ever hold a `ClientId` as a weak owner reference; the
/// gateway owns the connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// LaunchKind
// ---------------------------------------------------------------------------

/// Which program a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchKind {
    /// A plain interactive shell.
    #[default]
    Shell,
    /// The `claude` coding-agent CLI.
    Claude,
    /// Docker's `docker ai` agent.
    Gordon,
}

impl LaunchKind {
    /// Interactive-agent sessions (as opposed to plain shells).
    pub fn is_agent(&self) -> bool {
        !matches!(self, LaunchKind::Shell)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchKind::Shell => "shell",
            LaunchKind::Claude => "claude",
            LaunchKind::Gordon => "gordon",
        }
    }
}

impl std::fmt::Display for LaunchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LaunchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "shell" | "bash" | "terminal" => Ok(LaunchKind::Shell),
            "claude" => Ok(LaunchKind::Claude),
            "gordon" => Ok(LaunchKind::Gordon),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}
