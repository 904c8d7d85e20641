//! HTTP client for the upstream speech synthesis engine

use crate::error::Result;
use artifact_cache::{CacheError, Synthesizer};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    language: &'a str,
}

/// Posts `{text, language}` to the engine and takes the response body as audio
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> artifact_cache::Result<Vec<u8>> {
        debug!(url = %self.url, language, chars = text.chars().count(), "Requesting synthesis");

        let response = self
            .client
            .post(&self.url)
            .json(&SynthesisRequest { text, language })
            .send()
            .await
            .map_err(|e| CacheError::Synthesis(format!("engine unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %self.url, "Synthesis engine rejected request");
            return Err(CacheError::Synthesis(format!(
                "engine returned status {}",
                status
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| CacheError::Synthesis(format!("failed to read engine response: {}", e)))?;

        debug!(size = audio.len(), "Received synthesized audio");
        Ok(audio.to_vec())
    }
}
