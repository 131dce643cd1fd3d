//! JSON error responses and their status codes.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use trade_core::{ChatError, GuardError, TransitionError};
use trade_auth::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error code
	pub error: String,
	pub message: String,
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub response: ErrorResponse,
}

impl ApiError {
	fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
		Self {
			status,
			response: ErrorResponse {
				error: error.to_string(),
				message: message.into(),
				details: None,
				retry_after: None,
			},
		}
	}

	fn retry_after(mut self, seconds: u64) -> Self {
		self.response.retry_after = Some(seconds);
		self
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
	}
}

impl From<TransitionError> for ApiError {
	fn from(e: TransitionError) -> Self {
		let message = e.to_string();
		match e {
			TransitionError::NotAuthenticated | TransitionError::InvalidToken => {
				Self::new(StatusCode::UNAUTHORIZED, "SESSION_REFRESH_REQUIRED", message)
			},
			TransitionError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
			TransitionError::Unauthorized(_) => {
				Self::new(StatusCode::FORBIDDEN, "UNAUTHORIZED", message)
			},
			TransitionError::InvalidTransition(_) => {
				Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
			},
			TransitionError::AlreadyExists(_) => {
				Self::new(StatusCode::CONFLICT, "ALREADY_EXISTS", message)
			},
			TransitionError::NotDeployedOnChain(_) => Self::new(
				StatusCode::INTERNAL_SERVER_ERROR,
				"NOT_DEPLOYED_ON_CHAIN",
				message,
			),
			TransitionError::SignerUnavailable(_) => {
				Self::new(StatusCode::SERVICE_UNAVAILABLE, "SIGNER_UNAVAILABLE", message)
			},
			TransitionError::ChainCallFailed(_) => {
				Self::new(StatusCode::BAD_GATEWAY, "CHAIN_CALL_FAILED", message)
			},
			TransitionError::Validation(_) => Self::bad_request(message),
			TransitionError::Storage(_) => {
				Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", message)
					.retry_after(5)
			},
			TransitionError::Internal(_) => {
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
			},
		}
	}
}

impl From<ChatError> for ApiError {
	fn from(e: ChatError) -> Self {
		match e {
			ChatError::EmptyBody | ChatError::BodyTooLong => Self::bad_request(e.to_string()),
			ChatError::Auth(e) => TransitionError::from(e).into(),
			ChatError::Guard(e) => TransitionError::from(e).into(),
			ChatError::Storage(msg) => TransitionError::Storage(msg).into(),
		}
	}
}

impl From<AuthError> for ApiError {
	fn from(e: AuthError) -> Self {
		TransitionError::from(e).into()
	}
}

impl From<GuardError> for ApiError {
	fn from(e: GuardError) -> Self {
		TransitionError::from(e).into()
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(self.response)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_mapping() {
		let cases = [
			(TransitionError::NotAuthenticated, StatusCode::UNAUTHORIZED, "SESSION_REFRESH_REQUIRED"),
			(TransitionError::InvalidToken, StatusCode::UNAUTHORIZED, "SESSION_REFRESH_REQUIRED"),
			(TransitionError::NotFound("order 1".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
			(TransitionError::Unauthorized("1".into()), StatusCode::FORBIDDEN, "UNAUTHORIZED"),
			(
				TransitionError::InvalidTransition("open".into()),
				StatusCode::CONFLICT,
				"INVALID_TRANSITION",
			),
			(
				TransitionError::NotDeployedOnChain(5),
				StatusCode::INTERNAL_SERVER_ERROR,
				"NOT_DEPLOYED_ON_CHAIN",
			),
			(
				TransitionError::SignerUnavailable("0x1".into()),
				StatusCode::SERVICE_UNAVAILABLE,
				"SIGNER_UNAVAILABLE",
			),
			(
				TransitionError::ChainCallFailed("reverted".into()),
				StatusCode::BAD_GATEWAY,
				"CHAIN_CALL_FAILED",
			),
			(TransitionError::Validation("x".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
		];

		for (error, status, code) in cases {
			let api = ApiError::from(error);
			assert_eq!(api.status, status);
			assert_eq!(api.response.error, code);
		}
	}

	#[test]
	fn test_chain_failure_message_is_verbatim() {
		let api = ApiError::from(TransitionError::ChainCallFailed("execution reverted: NotParty".into()));
		assert!(api.response.message.contains("execution reverted: NotParty"));
	}

	#[test]
	fn test_storage_errors_suggest_retry() {
		let api = ApiError::from(ChatError::Storage("down".into()));
		assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
		assert_eq!(api.response.retry_after, Some(5));
	}
}
