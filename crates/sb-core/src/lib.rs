//! Shared configuration and identifiers for switchboard.
//!
//! - [`config`]: typed TOML configuration with environment overrides
//! - [`types`]: identifiers shared between the session engine and the gateway

pub mod config;
pub mod types;
