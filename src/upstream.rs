use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use async_openai::config::OpenAIConfig;
use async_openai::types::CreateChatCompletionRequest;
use async_openai::Client;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::config::AppConfig;

/// One turn's failure taxonomy. Nothing here is fatal to the process; every
/// variant scopes to a single request and maps to one user-facing message.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream rate limit hit")]
    RateLimited,
    #[error("upstream credits exhausted")]
    InsufficientCredits,
    #[error("upstream request failed with status {0}")]
    UpstreamStatus(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("a response is already streaming for this conversation")]
    TurnInProgress,
}

impl RelayError {
    /// The single notification string surfaced to the user for this turn.
    pub fn user_message(&self) -> &'static str {
        match self {
            RelayError::RateLimited => {
                "The advisor is receiving too many requests right now. Please try again in a moment."
            }
            RelayError::InsufficientCredits => {
                "The advisor is out of credits and cannot answer right now."
            }
            RelayError::TurnInProgress => {
                "A response is still being generated. Stop it before sending another message."
            }
            _ => "Something went wrong while contacting the advisor. Please try again.",
        }
    }
}

impl actix_web::ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            RelayError::TurnInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.user_message() }))
    }
}

/// Maps a non-2xx upstream status into the turn error taxonomy.
pub fn map_upstream_status(status: u16) -> RelayError {
    match status {
        429 => RelayError::RateLimited,
        402 => RelayError::InsufficientCredits,
        other => RelayError::UpstreamStatus(other),
    }
}

/// Typed client for non-streaming upstream calls (conversation autorename).
pub fn advisor_client(config: &AppConfig) -> Client<OpenAIConfig> {
    Client::with_config(
        OpenAIConfig::new()
            .with_api_key(config.upstream_api_key.clone())
            .with_api_base(config.upstream_base_url.clone()),
    )
}

/// Opens the upstream completion stream. The server's own key is attached
/// here; whatever credential the client sent never reaches the upstream.
/// Returns the raw response so callers can relay or parse its byte stream.
pub async fn open_stream(
    http_client: &reqwest::Client,
    config: &AppConfig,
    request: &CreateChatCompletionRequest,
) -> Result<reqwest::Response, RelayError> {
    let url = format!("{}/chat/completions", config.upstream_base_url);

    let response = http_client
        .post(&url)
        .bearer_auth(&config.upstream_api_key)
        .json(request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        error!("Upstream returned status {} for {}", status, url);
        return Err(map_upstream_status(status.as_u16()));
    }

    Ok(response)
}
