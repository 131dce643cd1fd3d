//! Authentication provider seam.
//!
//! Turns a bearer token into a verified [`Identity`]. Tokens are verified on
//! every call; nothing here caches a successful verification.

use async_trait::async_trait;
use thiserror::Error;
use trade_types::{ConfigSchema, Identity, ImplementationRegistry, SecretString};

pub mod implementations {
	pub mod static_tokens;
}

/// Authentication failures. Both mean "refresh the session", not a fatal error.
#[derive(Debug, Error)]
pub enum AuthError {
	#[error("Not authenticated")]
	NotAuthenticated,
	#[error("Invalid token")]
	InvalidToken,
	#[error("Implementation error: {0}")]
	Implementation(String),
}

#[async_trait]
pub trait IdentityInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Resolves a non-empty token to the identity it was issued to.
	async fn verify(&self, token: &SecretString) -> Result<Identity, AuthError>;
}

pub type AuthFactory = fn(&toml::Value) -> Result<Box<dyn IdentityInterface>, AuthError>;

pub trait AuthRegistry: ImplementationRegistry<Factory = AuthFactory> {}

pub fn get_all_implementations() -> Vec<(&'static str, AuthFactory)> {
	use implementations::static_tokens;

	vec![(static_tokens::Registry::NAME, static_tokens::Registry::factory())]
}

pub struct AuthService {
	implementation: Box<dyn IdentityInterface>,
}

impl AuthService {
	pub fn new(implementation: Box<dyn IdentityInterface>) -> Self {
		Self { implementation }
	}

	/// Verifies a token. A missing or blank token is `NotAuthenticated`.
	pub async fn authenticate(&self, token: Option<&SecretString>) -> Result<Identity, AuthError> {
		let token = match token {
			Some(token) if !token.expose_secret().trim().is_empty() => token,
			_ => return Err(AuthError::NotAuthenticated),
		};
		self.implementation.verify(token).await
	}
}
