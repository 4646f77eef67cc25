//! Shared types for the session-linker workspace: configuration, the common
//! error type, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
