use std::sync::Arc;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    tracing::debug,
};

use crate::{Error, Result, fetch::MediaFetcher};

/// A media reference as delivered by the transport: where to fetch it and
/// what it claims to be.
#[derive(Debug, Clone)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
}

/// Turns a [`MediaRef`] into an inline, directly renderable `data:` URL.
///
/// One attempt per call, no retries. Callers keep the message visible and
/// flag it failed when this returns an error.
pub struct Materializer {
    fetcher: Arc<dyn MediaFetcher>,
}

impl Materializer {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn materialize(&self, media: &MediaRef) -> Result<String> {
        if media.url.is_empty() {
            return Err(Error::invalid_reference("empty media url"));
        }
        if media.mime_type.is_empty() {
            return Err(Error::invalid_reference("missing mime type"));
        }

        let bytes = self.fetcher.fetch(&media.url).await?;
        debug!(url = %media.url, bytes = bytes.len(), "materialized media payload");
        Ok(format!(
            "data:{};base64,{}",
            media.mime_type,
            BASE64.encode(&bytes)
        ))
    }
}
