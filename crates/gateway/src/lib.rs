//! Gateway: wires the stores, caches, session registry and webhook engine
//! together and serves the operational HTTP surface.
//!
//! Lifecycle:
//! 1. Open the SQLite pool and create schemas
//! 2. Build stores, auth caches, the webhook engine and the registry
//! 3. Reconcile persisted sessions in the background
//! 4. Serve `/health` (and `/metrics` with the `prometheus` feature)
//! 5. On Ctrl-C or SIGTERM stop serving, close sessions, drain the engine
//!
//! The protocol transport is supplied by the embedder as a
//! [`switchboard_sessions::ClientFactory`].

pub mod bridge;
pub mod db;
pub mod server;
pub mod state;

pub use {
    bridge::WebhookBridge,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
