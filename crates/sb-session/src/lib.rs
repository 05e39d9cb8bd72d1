//! PTY session orchestration for switchboard.
//!
//! Owns every process the gateway hands out: spawning under a pseudo-terminal,
//! the registry that names them, idle eviction, and the agent handoff history.
//!
//! Key components:
//! - [`pty`]: the `Spawner`/`Process` seam and the real `portable-pty` backend
//! - [`launch`]: shell and agent launch profiles
//! - [`registry`] and [`arena`]: generation-checked session storage
//! - [`eviction`]: per-session idle timers
//! - [`handoff`] and [`scanner`]: agent transitions, including ones requested
//!   from a session's own output
//! - [`utf8`]: output decoding that survives characters split across reads
//! - [`manager`]: the `SessionManager` handle tying it together

pub mod arena;
pub mod error;
pub mod eviction;
pub mod handoff;
pub mod in_process;
pub mod launch;
pub mod manager;
pub mod output_log;
pub mod pty;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod utf8;

pub use arena::SessionId;
pub use error::SessionError;
pub use manager::{
    CloseReason, CreateRequest, Created, NullObserver, OutputRoute, SessionManager,
    SessionObserver, SessionSettings,
};
