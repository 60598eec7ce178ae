use std::{future::Future, pin::Pin};

use {async_trait::async_trait, futures::StreamExt, tokio_stream::Stream};

// ── Stream events ───────────────────────────────────────────────────────────

/// Events emitted during a streaming generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of text to append, in order.
    Delta(String),
    /// Generation completed.
    Done,
    /// The backend failed; no further events follow.
    Error(String),
}

/// Prompt-in / text-out generative backend.
#[async_trait]
pub trait ReplyProvider: Send + Sync {
    /// Backend label for logs (e.g. "ollama").
    fn name(&self) -> &str;

    /// Model identifier the backend generates with.
    fn model(&self) -> &str;

    /// Blocking generation: the full reply text, or an error.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;

    /// Streaming generation, yielding delta/done/error events in order.
    fn stream(&self, prompt: String) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>>;
}

/// Drain a generation stream, awaiting `on_delta` for each chunk as it
/// arrives, and return the aggregated text. A mid-stream error aborts with
/// the backend's message.
pub async fn collect_stream<S, F, Fut>(mut stream: S, mut on_delta: F) -> anyhow::Result<String>
where
    S: Stream<Item = StreamEvent> + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut full = String::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Delta(delta) => {
                full.push_str(&delta);
                on_delta(delta).await;
            },
            StreamEvent::Done => return Ok(full),
            StreamEvent::Error(message) => anyhow::bail!("generation stream failed: {message}"),
        }
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_aggregates_chunks_in_order() {
        let stream = tokio_stream::iter(vec![
            StreamEvent::Delta("Hel".into()),
            StreamEvent::Delta("lo".into()),
            StreamEvent::Done,
        ]);
        let mut chunks = Vec::new();
        let full = collect_stream(stream, |d| {
            chunks.push(d);
            std::future::ready(())
        })
        .await;
        assert_eq!(full.ok().as_deref(), Some("Hello"));
        assert_eq!(chunks, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn collect_stops_on_error_event() {
        let stream = tokio_stream::iter(vec![
            StreamEvent::Delta("partial".into()),
            StreamEvent::Error("backend gone".into()),
        ]);
        let result = collect_stream(stream, |_| std::future::ready(())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn collect_tolerates_streams_without_done_marker() {
        let stream = tokio_stream::iter(vec![StreamEvent::Delta("x".into())]);
        let full = collect_stream(stream, |_| std::future::ready(())).await;
        assert_eq!(full.ok().as_deref(), Some("x"));
    }
}
