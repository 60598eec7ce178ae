//! WebSocket fan-out gateway.
//!
//! Broadcasts every observable state change to all connected observers and
//! dispatches observer commands back into the pipeline. Delivery is
//! best-effort: a slow or gone observer is skipped, never waited on.

pub mod broadcast;
pub mod methods;
pub mod server;
pub mod sink;
pub mod state;
pub mod ws;

pub use {
    server::{build_app, serve},
    sink::GatewaySessionSink,
    state::{ConnectedClient, GatewayState},
};
