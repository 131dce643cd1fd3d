//! Fixed token table from configuration.
//!
//! Suitable for development and for deployments where an upstream gateway
//! has already exchanged credentials for opaque tokens.

use crate::{AuthError, AuthFactory, AuthRegistry, IdentityInterface};
use async_trait::async_trait;
use std::collections::HashMap;
use trade_types::{
	ConfigSchema, Field, FieldType, Identity, ImplementationRegistry, Schema, SecretString,
	ValidationError,
};

pub struct StaticTokens {
	/// Token to subject.
	tokens: HashMap<String, String>,
}

impl StaticTokens {
	pub fn new(tokens: HashMap<String, String>) -> Self {
		Self { tokens }
	}
}

#[async_trait]
impl IdentityInterface for StaticTokens {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(StaticTokensSchema)
	}

	async fn verify(&self, token: &SecretString) -> Result<Identity, AuthError> {
		match token.with_exposed(|t| self.tokens.get(t.trim()).cloned()) {
			Some(subject) => Ok(Identity::new(subject)),
			None => {
				tracing::debug!(component = "auth", "Rejected unknown token");
				Err(AuthError::InvalidToken)
			},
		}
	}
}

pub struct StaticTokensSchema;

impl ConfigSchema for StaticTokensSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new(
				"tokens",
				FieldType::Table(Schema::new(vec![], vec![])),
			)
			.with_validator(|value| {
				let table = value.as_table().ok_or("tokens must be a table")?;
				for (token, subject) in table {
					match subject.as_str() {
						Some(s) if !s.trim().is_empty() => {},
						_ => {
							return Err(format!(
								"subject for token '{}..' must be a non-empty string",
								token.chars().take(4).collect::<String>()
							))
						},
					}
				}
				Ok(())
			})],
			vec![],
		)
		.validate(config)
	}
}

/// Configuration: `tokens = { "<token>" = "<subject>", ... }`.
pub fn create_auth(config: &toml::Value) -> Result<Box<dyn IdentityInterface>, AuthError> {
	StaticTokensSchema
		.validate(config)
		.map_err(|e| AuthError::Implementation(format!("Invalid configuration: {}", e)))?;

	let tokens = config
		.get("tokens")
		.and_then(|v| v.as_table())
		.map(|table| {
			table
				.iter()
				.filter_map(|(token, subject)| {
					subject.as_str().map(|s| (token.clone(), s.to_string()))
				})
				.collect()
		})
		.unwrap_or_default();

	Ok(Box::new(StaticTokens::new(tokens)))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "static";
	type Factory = AuthFactory;

	fn factory() -> Self::Factory {
		create_auth
	}
}

impl AuthRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::AuthService;

	fn service() -> AuthService {
		let config: toml::Value =
			toml::from_str("tokens = { \"tok-maker\" = \"maker-subject\" }").unwrap();
		AuthService::new(create_auth(&config).unwrap())
	}

	#[tokio::test]
	async fn test_known_token_resolves_subject() {
		let identity = service()
			.authenticate(Some(&SecretString::from("tok-maker")))
			.await
			.unwrap();
		assert_eq!(identity.subject, "maker-subject");
	}

	#[tokio::test]
	async fn test_missing_and_unknown_tokens() {
		let service = service();
		assert!(matches!(
			service.authenticate(None).await,
			Err(AuthError::NotAuthenticated)
		));
		assert!(matches!(
			service.authenticate(Some(&SecretString::from("  "))).await,
			Err(AuthError::NotAuthenticated)
		));
		assert!(matches!(
			service
				.authenticate(Some(&SecretString::from("tok-stale")))
				.await,
			Err(AuthError::InvalidToken)
		));
	}

	#[test]
	fn test_blank_subject_rejected() {
		let config: toml::Value = toml::from_str("tokens = { \"t\" = \"\" }").unwrap();
		assert!(create_auth(&config).is_err());
	}
}
