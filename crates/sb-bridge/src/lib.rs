//! Client-facing side of switchboard.
//!
//! Clients connect over a WebSocket and exchange JSON envelopes with the
//! [`gateway::Gateway`], which runs each message through middleware and the
//! handler registered for its `type`. Output from sessions flows back through
//! [`router::OutputRouter`].
//!
//! Key modules:
//! - [`protocol`]: wire messages
//! - [`gateway`]: handler registry, middleware chain, connections
//! - [`directives`] and [`interceptor`]: orchestrator directives typed into
//!   the control session
//! - [`orchestrator`]: what each directive does
//! - [`server`]: axum routes, heartbeat, startup

pub mod connection;
pub mod directives;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod interceptor;
pub mod middleware;
pub mod orchestrator;
pub mod protocol;
pub mod router;
pub mod server;

pub use error::GatewayError;
pub use gateway::Gateway;
pub use server::AppState;
