//! Order endpoints: read, record an opened order, and the three escrow
//! transitions.

use super::{bearer_token, error::ApiError};
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::{HeaderMap, StatusCode},
	response::{IntoResponse, Json, Response},
};
use trade_core::{MirrorStatus, TransitionOutcome};
use trade_types::{EscrowOperation, NewOrder, Order};

/// GET /api/orders/{id}
pub async fn get_order(
	State(state): State<AppState>,
	Path(order_id): Path<String>,
	headers: HeaderMap,
) -> Result<Json<Order>, ApiError> {
	let token = bearer_token(&headers);
	let order = state
		.engine
		.orders()
		.get_order(token.as_ref(), &order_id)
		.await?;
	Ok(Json(order))
}

/// POST /api/orders
pub async fn record_order(
	State(state): State<AppState>,
	headers: HeaderMap,
	payload: Result<Json<NewOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
	let Json(new_order) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
	let token = bearer_token(&headers);
	let order = state
		.engine
		.orders()
		.record_opened_order(token.as_ref(), new_order)
		.await?;
	Ok((StatusCode::CREATED, Json(order)))
}

/// POST /api/orders/{id}/cancel
pub async fn request_cancel(
	state: State<AppState>,
	path: Path<String>,
	headers: HeaderMap,
) -> Result<Response, ApiError> {
	transition(state, path, headers, EscrowOperation::RequestCancel).await
}

/// POST /api/orders/{id}/payment-sent
pub async fn mark_payment_sent(
	state: State<AppState>,
	path: Path<String>,
	headers: HeaderMap,
) -> Result<Response, ApiError> {
	transition(state, path, headers, EscrowOperation::MarkPaymentSent).await
}

/// POST /api/orders/{id}/release
pub async fn confirm_and_release(
	state: State<AppState>,
	path: Path<String>,
	headers: HeaderMap,
) -> Result<Response, ApiError> {
	transition(state, path, headers, EscrowOperation::ConfirmPaymentAndRelease).await
}

async fn transition(
	State(state): State<AppState>,
	Path(order_id): Path<String>,
	headers: HeaderMap,
	operation: EscrowOperation,
) -> Result<Response, ApiError> {
	let token = bearer_token(&headers);
	let transitions = state.engine.transitions();
	let outcome = match operation {
		EscrowOperation::RequestCancel => {
			transitions.request_cancel(token.as_ref(), &order_id).await
		},
		EscrowOperation::MarkPaymentSent => {
			transitions
				.mark_payment_sent(token.as_ref(), &order_id)
				.await
		},
		EscrowOperation::ConfirmPaymentAndRelease => {
			transitions
				.confirm_and_release(token.as_ref(), &order_id)
				.await
		},
	}?;
	Ok(outcome_response(outcome))
}

/// 200 once mirrored, 202 while the mirror is pending reconciliation.
fn outcome_response(outcome: TransitionOutcome) -> Response {
	let status = match outcome.mirror {
		MirrorStatus::Mirrored => StatusCode::OK,
		MirrorStatus::Pending => StatusCode::ACCEPTED,
	};
	(status, Json(outcome)).into_response()
}
