//! HTTP gateway for device-linking sessions.
//!
//! Owns the [`sl_sessions::SessionRegistry`] and exposes it over axum:
//! session creation and status for callers, listing and statistics for
//! operators.  Transport and credential storage are wired in
//! [`bootstrap`].

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
