use std::path::PathBuf;

use sb_core::config::AgentsConfig;
use sb_core::types::LaunchKind;

use crate::pty::SpawnProfile;

// ---------------------------------------------------------------------------
// LaunchRequest
// ---------------------------------------------------------------------------

/// Per-session inputs a launch adapter turns into a [`SpawnProfile`].
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub name: &'a str,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub mcp_servers: &'a [String],
}

// ---------------------------------------------------------------------------
// LaunchAdapter trait
// ---------------------------------------------------------------------------

/// Knows how to launch one kind of session: which binary, which default
/// arguments, what environment, and what banner to show first.
pub trait LaunchAdapter: Send + Sync {
    fn kind(&self) -> LaunchKind;

    /// The binary name / path to execute.
    fn binary_name(&self) -> &str;

    /// Arguments that are always passed.
    fn default_args(&self) -> Vec<String>;

    /// Text shown to the client when the session starts.
    fn banner(&self, name: &str) -> Option<String>;

    fn profile(&self, req: &LaunchRequest<'_>) -> SpawnProfile {
        let mut env = vec![
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("SWITCHBOARD_AGENT_NAME".to_string(), req.name.to_string()),
            (
                "SWITCHBOARD_SESSION_KIND".to_string(),
                self.kind().as_str().to_string(),
            ),
        ];
        if self.kind().is_agent() && !req.mcp_servers.is_empty() {
            env.push((
                "SWITCHBOARD_MCP_SERVERS".to_string(),
                req.mcp_servers.join(","),
            ));
        }
        SpawnProfile {
            program: self.binary_name().to_string(),
            args: self.default_args(),
            cwd: req.cwd.clone(),
            env,
            cols: req.cols,
            rows: req.rows,
        }
    }
}

// ---------------------------------------------------------------------------
// Shell adapter
// ---------------------------------------------------------------------------

pub struct ShellAdapter {
    shell: String,
}

impl ShellAdapter {
    /// Use the configured shell, then `$SHELL`, then the platform default.
    pub fn new(configured: Option<&str>) -> Self {
        let shell = configured
            .map(str::to_string)
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| {
                if cfg!(target_os = "macos") {
                    "/bin/zsh".to_string()
                } else {
                    "/bin/bash".to_string()
                }
            });
        Self { shell }
    }
}

impl LaunchAdapter for ShellAdapter {
    fn kind(&self) -> LaunchKind {
        LaunchKind::Shell
    }

    fn binary_name(&self) -> &str {
        &self.shell
    }

    fn default_args(&self) -> Vec<String> {
        vec![]
    }

    fn banner(&self, _name: &str) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// Claude adapter
// ---------------------------------------------------------------------------

pub struct ClaudeAdapter {
    binary: String,
    args: Vec<String>,
}

impl LaunchAdapter for ClaudeAdapter {
    fn kind(&self) -> LaunchKind {
        LaunchKind::Claude
    }

    fn binary_name(&self) -> &str {
        &self.binary
    }

    fn default_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn banner(&self, name: &str) -> Option<String> {
        Some(format!(
            "\x1b[1;36m[switchboard]\x1b[0m starting Claude agent '{name}'\r\n"
        ))
    }
}

// ---------------------------------------------------------------------------
// Gordon adapter
// ---------------------------------------------------------------------------

pub struct GordonAdapter {
    binary: String,
    args: Vec<String>,
}

impl LaunchAdapter for GordonAdapter {
    fn kind(&self) -> LaunchKind {
        LaunchKind::Gordon
    }

    fn binary_name(&self) -> &str {
        &self.binary
    }

    fn default_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn banner(&self, name: &str) -> Option<String> {
        Some(format!(
            "\x1b[1;34m[switchboard]\x1b[0m starting Gordon agent '{name}'\r\n"
        ))
    }
}

// ---------------------------------------------------------------------------
// Factory helper
// ---------------------------------------------------------------------------

/// Create the appropriate adapter for a launch kind.
pub fn adapter_for(kind: LaunchKind, agents: &AgentsConfig) -> Box<dyn LaunchAdapter> {
    match kind {
        LaunchKind::Shell => Box::new(ShellAdapter::new(agents.shell.as_deref())),
        LaunchKind::Claude => Box::new(ClaudeAdapter {
            binary: agents.claude_binary.clone(),
            args: agents.claude_args.clone(),
        }),
        LaunchKind::Gordon => Box::new(GordonAdapter {
            binary: agents.gordon_binary.clone(),
            args: agents.gordon_args.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(mcp: &'a [String]) -> LaunchRequest<'a> {
        LaunchRequest {
            name: "worker",
            cwd: PathBuf::from("/tmp"),
            cols: 100,
            rows: 30,
            mcp_servers: mcp,
        }
    }

    #[test]
    fn shell_profile_uses_configured_shell() {
        let adapter = adapter_for(
            LaunchKind::Shell,
            &AgentsConfig {
                shell: Some("/bin/sh".into()),
                ..AgentsConfig::default()
            },
        );
        let profile = adapter.profile(&request(&[]));
        assert_eq!(profile.program, "/bin/sh");
        assert!(profile.args.is_empty());
        assert_eq!((profile.cols, profile.rows), (100, 30));
        assert!(profile
            .env
            .contains(&("TERM".to_string(), "xterm-256color".to_string())));
        assert!(adapter.banner("worker").is_none());
    }

    #[test]
    fn gordon_runs_docker_ai() {
        let adapter = adapter_for(LaunchKind::Gordon, &AgentsConfig::default());
        let profile = adapter.profile(&request(&[]));
        assert_eq!(profile.program, "docker");
        assert_eq!(profile.args, vec!["ai".to_string()]);
        assert!(adapter.banner("g").unwrap().contains("Gordon"));
    }

    #[test]
    fn agent_profile_exports_mcp_servers() {
        let mcp = vec!["filesystem".to_string(), "github".to_string()];
        let adapter = adapter_for(LaunchKind::Claude, &AgentsConfig::default());
        let profile = adapter.profile(&request(&mcp));
        assert_eq!(profile.program, "claude");
        assert!(profile.env.contains(&(
            "SWITCHBOARD_MCP_SERVERS".to_string(),
            "filesystem,github".to_string()
        )));
        assert!(profile
            .env
            .contains(&("SWITCHBOARD_SESSION_KIND".to_string(), "claude".to_string())));
    }

    #[test]
    fn shell_ignores_mcp_servers() {
        let mcp = vec!["filesystem".to_string()];
        let adapter = adapter_for(LaunchKind::Shell, &AgentsConfig::default());
        let profile = adapter.profile(&request(&mcp));
        assert!(!profile.env.iter().any(|(k, _)| k == "SWITCHBOARD_MCP_SERVERS"));
    }
}
