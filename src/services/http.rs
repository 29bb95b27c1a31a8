use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use super::{Artifact, ContentGenerator, GenerationInput};
use crate::kernel::error::CollaboratorError;

/// Remote content generator speaking JSON over HTTP.
///
/// `POST {base}/generate` with the tagged `GenerationInput`; the response body
/// is an `Artifact`.
#[derive(Clone)]
pub struct HttpGenerator {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(flatten)]
    input: &'a GenerationInput,
    /// Single-shot: the dispatcher owns retries.
    stream: bool,
}

impl HttpGenerator {
    /// Fails when `base_url` is not an absolute URL or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Url::parse(base_url)
            .map_err(|err| CollaboratorError::Unavailable(format!("generator url {base_url:?}: {err}")))?;
        let client = Client::builder()
            .timeout(timeout) // hard timeout at the network level
            .build()
            .map_err(|err| CollaboratorError::Unavailable(format!("generator client: {err}")))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Maps a non-success status onto the collaborator taxonomy.
pub fn classify_status(status: StatusCode) -> CollaboratorError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorError::AuthRequired,
        StatusCode::TOO_MANY_REQUESTS => CollaboratorError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CollaboratorError::Timeout,
        s => CollaboratorError::Unavailable(format!("generator returned {s}")),
    }
}

fn classify_transport(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else {
        CollaboratorError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<Artifact, CollaboratorError> {
        let body = GenerateRequest { input, stream: false };

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "content generator refused request");
            return Err(classify_status(status));
        }

        response.json::<Artifact>().await.map_err(classify_transport)
    }
}
