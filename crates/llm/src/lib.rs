//! Generative text backend seam.
//!
//! The orchestrator and gateway consume [`ReplyProvider`]; the only bundled
//! implementation speaks the local Ollama generate API.

pub mod model;
pub mod ollama;

pub use {
    model::{ReplyProvider, StreamEvent, collect_stream},
    ollama::OllamaProvider,
};
