//! Connection supervision for the single link to the external messaging
//! network.
//!
//! The transport's callback-flavored world is wrapped behind a typed event
//! seam ([`transport`]); the [`supervisor`] consumes those events, maintains
//! the connection state machine (pairing, reconnect, terminal logout), and
//! feeds normalized messages into the store, the auto-reply engine, and the
//! fan-out sink. [`sidecar`] is the one concrete transport: a JSON/WebSocket
//! bridge to the external protocol sidecar process.

pub mod sidecar;
pub mod supervisor;
pub mod transport;

pub use {
    sidecar::SidecarTransport,
    supervisor::{
        ConnectionState, SessionEvent, SessionEventSink, Supervisor, SupervisorHandle,
        SupervisorOptions,
    },
    transport::{DisconnectReason, RawMedia, RawMessage, Transport, TransportEvent, TransportHandle},
};
