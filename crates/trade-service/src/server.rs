//! HTTP server for the trade API.

use crate::apis::{events, messages, orders};
use axum::{
	extract::DefaultBodyLimit,
	http::{HeaderName, HeaderValue, Method},
	routing::{get, post},
	Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer},
	timeout::TimeoutLayer,
	trace::TraceLayer,
};
use trade_config::{ApiConfig, CorsConfig};
use trade_core::TradeEngine;

#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<TradeEngine>,
}

pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<TradeEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(&api_config, AppState { engine });

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Trade API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

pub fn router(api_config: &ApiConfig, state: AppState) -> Router {
	let timed = Router::new()
		.route("/health", get(health))
		.route("/orders", post(orders::record_order))
		.route("/orders/{id}", get(orders::get_order))
		.route(
			"/orders/{id}/messages",
			get(messages::list_messages).post(messages::post_message),
		)
		.route("/orders/{id}/events", get(events::order_events))
		.layer(TimeoutLayer::new(Duration::from_secs(api_config.timeout_seconds)));

	// Escrow transitions answer on their own deadline with a pending outcome
	// once submitted, so they must not be cut off here.
	let transitions = Router::new()
		.route("/orders/{id}/cancel", post(orders::request_cancel))
		.route("/orders/{id}/payment-sent", post(orders::mark_payment_sent))
		.route("/orders/{id}/release", post(orders::confirm_and_release));

	Router::new()
		.nest("/api", timed.merge(transitions))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(api_config.cors.as_ref()))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(state)
}

async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

/// Permissive unless origins, headers or methods are configured.
fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let origins = if cors.allowed_origins.iter().any(|o| o == "*") {
		AllowOrigin::from(Any)
	} else {
		AllowOrigin::list(
			cors.allowed_origins
				.iter()
				.filter_map(|o| HeaderValue::from_str(o).ok()),
		)
	};
	let headers = if cors.allowed_headers.is_empty() || cors.allowed_headers.iter().any(|h| h == "*") {
		AllowHeaders::from(Any)
	} else {
		AllowHeaders::list(
			cors.allowed_headers
				.iter()
				.filter_map(|h| h.parse::<HeaderName>().ok()),
		)
	};
	let methods = if cors.allowed_methods.is_empty() || cors.allowed_methods.iter().any(|m| m == "*") {
		AllowMethods::from(Any)
	} else {
		AllowMethods::list(
			cors.allowed_methods
				.iter()
				.filter_map(|m| m.parse::<Method>().ok()),
		)
	};

	CorsLayer::new()
		.allow_origin(origins)
		.allow_headers(headers)
		.allow_methods(methods)
}
