use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Seam over the raw byte fetch so materialization can be exercised without
/// a network.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher with a hard per-request timeout. Expired download keys show
/// up as 4xx here and degrade like any other failure.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url.to_string(), e))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| Error::fetch(url.to_string(), e))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::fetch(url.to_string(), e))?;
        Ok(bytes.to_vec())
    }
}
