//! Order chat endpoints.

use super::{bearer_token, error::ApiError};
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::{HeaderMap, StatusCode},
	response::Json,
};
use serde::Deserialize;
use trade_types::ChatMessage;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
	pub body: String,
}

/// GET /api/orders/{id}/messages
pub async fn list_messages(
	State(state): State<AppState>,
	Path(order_id): Path<String>,
	headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
	let token = bearer_token(&headers);
	let messages = state
		.engine
		.chat()
		.list_messages(token.as_ref(), &order_id)
		.await?;
	Ok(Json(messages))
}

/// POST /api/orders/{id}/messages
pub async fn post_message(
	State(state): State<AppState>,
	Path(order_id): Path<String>,
	headers: HeaderMap,
	payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
	let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
	let token = bearer_token(&headers);
	let message = state
		.engine
		.chat()
		.post_message(token.as_ref(), &order_id, &request.body)
		.await?;
	Ok((StatusCode::CREATED, Json(message)))
}
