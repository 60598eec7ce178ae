use std::pin::Pin;

use {
    async_trait::async_trait,
    futures::StreamExt,
    tokio_stream::Stream,
    tracing::{debug, warn},
};

use crate::model::{ReplyProvider, StreamEvent};

/// Local Ollama backend speaking the NDJSON `/api/generate` endpoint.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
        })
    }
}

#[async_trait]
impl ReplyProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        debug!(model = %self.model, "ollama generate request");

        let resp = self
            .client
            .post(self.generate_url())
            .json(&self.request_body(prompt, false))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "ollama API error");
            anyhow::bail!("ollama API error HTTP {status}: {body}");
        }

        let value = resp.json::<serde_json::Value>().await?;
        value["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("malformed ollama response: missing response field"))
    }

    fn stream(&self, prompt: String) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        let url = self.generate_url();
        let body = self.request_body(&prompt, true);
        let client = self.client.clone();

        Box::pin(async_stream::stream! {
            let resp = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamEvent::Error(format!("request failed: {e}"));
                    return;
                },
            };
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                yield StreamEvent::Error(format!("HTTP {status}: {body}"));
                return;
            }

            let mut bytes = resp.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield StreamEvent::Error(format!("stream read failed: {e}"));
                        return;
                    },
                };
                buf.extend_from_slice(&chunk);

                // The endpoint emits one JSON object per line.
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let value: serde_json::Value = match serde_json::from_str(line) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed ollama stream line");
                            continue;
                        },
                    };
                    if let Some(delta) = value["response"].as_str()
                        && !delta.is_empty()
                    {
                        yield StreamEvent::Delta(delta.to_string());
                    }
                    if value["done"].as_bool() == Some(true) {
                        yield StreamEvent::Done;
                        return;
                    }
                }
            }
            yield StreamEvent::Done;
        })
    }
}
