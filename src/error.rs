use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::api::ApiResponse;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Transaction generation failed: {0}")]
    TransactionGenerationFailed(String),

    #[error("Malformed pending transaction: {0}")]
    MalformedPendingTransaction(String),

    #[error("Command execution failed: {0}")]
    CommandExecutionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::UpstreamUnavailable(err.to_string())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_)
            | RelayError::InvalidAmount(_)
            | RelayError::MalformedPendingTransaction(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            RelayError::TransactionGenerationFailed(_)
            | RelayError::CommandExecutionFailed(_)
            | RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::failure(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_message_is_passed_through_verbatim() {
        let err = RelayError::InvalidInput("Invalid wallet address format".to_string());
        assert_eq!(err.to_string(), "Invalid wallet address format");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_and_generation_errors_map_to_server_statuses() {
        assert_eq!(
            RelayError::UpstreamUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::TransactionGenerationFailed("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
