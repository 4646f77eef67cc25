//! `sl-bridge`: WebSocket transport to the messaging bridge sidecar.
//!
//! The messaging network itself is spoken by an external bridge process.
//! This crate implements the session core's transport seam on top of it:
//! every linking attempt opens its own WebSocket, so dropping a transport
//! is as simple as closing that socket.
//!
//! # Connection flow
//!
//! 1. Connect WS (with `token=<SL_BRIDGE_TOKEN>` and `session_key` query params)
//! 2. Send `link_start { session_key, method, phone?, credential? }`
//! 3. Wait for `link_started { registered }` or `link_failed { error }`
//! 4. Main loop:
//!    - `link_event` → [`TransportEvent`](sl_sessions::TransportEvent)
//!    - `response` → resolves the pending request with the same `request_id`
//!    - `ping` → `pong`; emit periodic `ping`
//! 5. `terminate()` sends `link_stop` and closes the socket

pub mod builder;
pub mod client;
pub mod factory;

pub use builder::BridgeTransportBuilder;
pub use client::BridgeClient;
pub use factory::BridgeTransportFactory;
