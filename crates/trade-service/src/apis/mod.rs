//! HTTP handlers, one module per resource.

pub mod error;
pub mod events;
pub mod messages;
pub mod orders;

use axum::http::{header, HeaderMap};
use trade_types::SecretString;

/// The bearer token of the request, if it carries one.
pub fn bearer_token(headers: &HeaderMap) -> Option<SecretString> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let (scheme, token) = value.trim().split_once(' ')?;
	if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
		return None;
	}
	Some(SecretString::from(token.trim()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;

	fn headers(value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
		headers
	}

	#[test]
	fn test_bearer_token() {
		let token = bearer_token(&headers("Bearer abc")).unwrap();
		assert_eq!(token.expose_secret(), "abc");
		assert!(bearer_token(&headers("bearer  abc ")).is_some());
		assert!(bearer_token(&headers("Basic abc")).is_none());
		assert!(bearer_token(&headers("Bearer ")).is_none());
		assert!(bearer_token(&HeaderMap::new()).is_none());
	}
}
