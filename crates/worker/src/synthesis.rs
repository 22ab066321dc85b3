//! HTTP client for the external synthesis service.
//!
//! One POST per unit with the unit coordinates as JSON; the service replies
//! `{ "location": "<where the asset was stored>" }`.

use std::time::Duration;

use async_trait::async_trait;
use batchforge_core::job::UnitTask;
use batchforge_core::ports::{SynthesisError, SynthesizedArtifact, Synthesizer};
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    location: String,
}

/// [`Synthesizer`] backed by a JSON-over-HTTP service.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Whether a non-success status is worth retrying.
///
/// Server errors, timeouts and throttling are transient; every other
/// client error means the unit itself was refused.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, task: &UnitTask) -> Result<SynthesizedArtifact, SynthesisError> {
        let response = self
            .client
            .post(&self.url)
            .json(task)
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
            return Err(if is_transient_status(status) {
                SynthesisError::Transient(message)
            } else {
                SynthesisError::Rejected(message)
            });
        }

        let parsed: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::Transient(format!("Invalid synthesis response: {e}")))?;

        if parsed.location.trim().is_empty() {
            return Err(SynthesisError::Rejected(
                "Synthesis response has an empty location".to_string(),
            ));
        }
        Ok(SynthesizedArtifact {
            location: parsed.location,
        })
    }
}
