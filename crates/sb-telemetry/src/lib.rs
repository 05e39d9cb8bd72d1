//! Logging setup for switchboard binaries and tests.
//!
//! All crates log through `tracing`; this crate only owns subscriber
//! installation, in a human-readable or a JSON flavour.

pub mod logging;
