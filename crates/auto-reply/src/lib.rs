//! Debounced auto-reply engine — the glue between inbound messages and the
//! generative backend.
//!
//! Flow: inbound non-self message → arm (or restart) the conversation's
//! countdown → on expiry, claim the timer, invoke the backend, deliver the
//! reply via the outbound seam. Cancels (typing signal, manual send) clear
//! the countdown before it fires.

pub mod engine;

pub use engine::{DEFAULT_DEBOUNCE, FALLBACK_REPLY, ReplyEngine, ReplyOutbound};
