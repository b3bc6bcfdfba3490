//! Builder for [`ClientConfig`] values, validated on [`ClientConfigBuilder::build`].

// self
use crate::{_prelude::*, config::ClientConfig, error::ConfigError, store::StorageKeys};

/// Builder for [`ClientConfig`] values.
#[derive(Debug)]
pub struct ClientConfigBuilder {
	/// Base address for every request.
	pub base_url: Url,
	/// Request deadline.
	pub timeout: Duration,
	/// Refresh-call deadline.
	pub refresh_timeout: Duration,
	/// Login path.
	pub login_path: String,
	/// Registration path.
	pub register_path: String,
	/// Refresh path.
	pub refresh_path: String,
	/// Logout path.
	pub logout_path: String,
	/// Extra excluded paths beyond login + refresh.
	pub excluded_endpoints: Vec<String>,
	/// Storage key layout.
	pub storage_keys: StorageKeys,
}
impl ClientConfigBuilder {
	/// Creates a new builder seeded with defaults.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			timeout: ClientConfig::DEFAULT_TIMEOUT,
			refresh_timeout: ClientConfig::DEFAULT_TIMEOUT,
			login_path: ClientConfig::DEFAULT_LOGIN_PATH.into(),
			register_path: ClientConfig::DEFAULT_REGISTER_PATH.into(),
			refresh_path: ClientConfig::DEFAULT_REFRESH_PATH.into(),
			logout_path: ClientConfig::DEFAULT_LOGOUT_PATH.into(),
			excluded_endpoints: Vec::new(),
			storage_keys: StorageKeys::default(),
		}
	}

	/// Overrides the request deadline.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the refresh-call deadline.
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout = timeout;

		self
	}

	/// Overrides the login path.
	pub fn login_path(mut self, path: impl Into<String>) -> Self {
		self.login_path = path.into();

		self
	}

	/// Overrides the registration path.
	pub fn register_path(mut self, path: impl Into<String>) -> Self {
		self.register_path = path.into();

		self
	}

	/// Overrides the refresh path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the logout path.
	pub fn logout_path(mut self, path: impl Into<String>) -> Self {
		self.logout_path = path.into();

		self
	}

	/// Adds one excluded path.
	pub fn exclude(mut self, path: impl Into<String>) -> Self {
		self.excluded_endpoints.push(path.into());

		self
	}

	/// Adds multiple excluded paths.
	pub fn exclude_all<I>(mut self, paths: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<String>,
	{
		self.excluded_endpoints.extend(paths.into_iter().map(Into::into));

		self
	}

	/// Overrides the storage key layout.
	pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
		self.storage_keys = keys;

		self
	}

	/// Validates the builder and produces a [`ClientConfig`].
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https")
			|| self.base_url.cannot_be_a_base()
			|| self.base_url.query().is_some()
		{
			return Err(ConfigError::UnsupportedBaseUrl { url: self.base_url.to_string() });
		}

		for (endpoint, path) in [
			("login", &self.login_path),
			("register", &self.register_path),
			("refresh", &self.refresh_path),
			("logout", &self.logout_path),
		] {
			validate_path(endpoint, path)?;
		}
		for path in &self.excluded_endpoints {
			validate_path("excluded", path)?;
		}

		if !self.timeout.is_positive() {
			return Err(ConfigError::NonPositiveTimeout { which: "request" });
		}
		if !self.refresh_timeout.is_positive() {
			return Err(ConfigError::NonPositiveTimeout { which: "refresh" });
		}
		if !self.storage_keys.is_valid() {
			return Err(ConfigError::InvalidStorageKeys);
		}

		let mut excluded_endpoints = vec![self.login_path.clone(), self.refresh_path.clone()];

		for path in self.excluded_endpoints {
			if !excluded_endpoints.contains(&path) {
				excluded_endpoints.push(path);
			}
		}

		Ok(ClientConfig {
			base_url: self.base_url,
			timeout: self.timeout,
			refresh_timeout: self.refresh_timeout,
			login_path: self.login_path,
			register_path: self.register_path,
			refresh_path: self.refresh_path,
			logout_path: self.logout_path,
			excluded_endpoints,
			storage_keys: self.storage_keys,
		})
	}
}
impl From<ClientConfig> for ClientConfigBuilder {
	fn from(config: ClientConfig) -> Self {
		Self {
			base_url: config.base_url,
			timeout: config.timeout,
			refresh_timeout: config.refresh_timeout,
			login_path: config.login_path,
			register_path: config.register_path,
			refresh_path: config.refresh_path,
			logout_path: config.logout_path,
			excluded_endpoints: config.excluded_endpoints,
			storage_keys: config.storage_keys,
		}
	}
}

fn validate_path(endpoint: &'static str, path: &str) -> Result<(), ConfigError> {
	if path.starts_with('/') && !path.contains(char::is_whitespace) {
		Ok(())
	} else {
		Err(ConfigError::InvalidPath { endpoint, path: path.to_owned() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Failed to parse base URL fixture.")
	}

	#[test]
	fn builder_rejects_bad_base_urls() {
		let err = ClientConfig::builder(url("ftp://example.com/api"))
			.build()
			.expect_err("Non-HTTP schemes must be rejected.");

		assert!(matches!(err, ConfigError::UnsupportedBaseUrl { .. }));

		let err = ClientConfig::builder(url("mailto:ops@example.com"))
			.build()
			.expect_err("Cannot-be-a-base URLs must be rejected.");

		assert!(matches!(err, ConfigError::UnsupportedBaseUrl { .. }));
	}

	#[test]
	fn builder_rejects_relative_paths_and_timeouts() {
		let err = ClientConfig::builder(url("https://example.com/api"))
			.refresh_path("auth/refresh")
			.build()
			.expect_err("Unrooted paths must be rejected.");

		assert!(matches!(err, ConfigError::InvalidPath { endpoint: "refresh", .. }));

		let err = ClientConfig::builder(url("https://example.com/api"))
			.refresh_timeout(Duration::ZERO)
			.build()
			.expect_err("Zero refresh timeout must be rejected.");

		assert!(matches!(err, ConfigError::NonPositiveTimeout { which: "refresh" }));
	}

	#[test]
	fn custom_paths_flow_into_exclusions() {
		let config = ClientConfig::builder(url("https://example.com/api"))
			.login_path("/v2/session")
			.refresh_path("/v2/session/refresh")
			.exclude("/public/recipes")
			.exclude("/v2/session")
			.build()
			.expect("Custom configuration should build.");

		assert_eq!(
			config.excluded_endpoints,
			vec!["/v2/session", "/v2/session/refresh", "/public/recipes"],
		);
		assert!(!config.is_excluded("/users/login"));
	}
}
