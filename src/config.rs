//! Client configuration: backend address, timeouts, endpoint paths, and storage layout.

pub mod builder;

pub use builder::*;

// self
use crate::{_prelude::*, error::ConfigError, store::StorageKeys};

/// Validated configuration for one [`Client`](crate::client::Client) instance.
///
/// Instances are independent; two clients built from different configurations share no
/// state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Base address every request path is appended to.
	pub base_url: Url,
	/// Deadline applied to every request.
	pub timeout: Duration,
	/// Deadline applied to the refresh call; expiry counts as a refresh failure.
	pub refresh_timeout: Duration,
	/// Credential-issuing login path.
	pub login_path: String,
	/// Registration path.
	pub register_path: String,
	/// Refresh path.
	pub refresh_path: String,
	/// Logout path.
	pub logout_path: String,
	/// Paths that never enter the refresh path; always includes login + refresh.
	pub excluded_endpoints: Vec<String>,
	/// Keys used by the credential store.
	pub storage_keys: StorageKeys,
}
impl ClientConfig {
	/// Default request deadline.
	pub const DEFAULT_TIMEOUT: Duration = Duration::seconds(10);
	/// Default login path.
	pub const DEFAULT_LOGIN_PATH: &'static str = "/users/login";
	/// Default registration path.
	pub const DEFAULT_REGISTER_PATH: &'static str = "/users/register";
	/// Default refresh path.
	pub const DEFAULT_REFRESH_PATH: &'static str = "/auth/refresh-token";
	/// Default logout path.
	pub const DEFAULT_LOGOUT_PATH: &'static str = "/auth/logout";

	/// Returns a builder seeded with defaults for `base_url`.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses `base_url` and returns a builder seeded with defaults.
	pub fn builder_from_str(base_url: &str) -> Result<ClientConfigBuilder, ConfigError> {
		let url = Url::parse(base_url).map_err(|source| ConfigError::InvalidBaseUrl { source })?;

		Ok(ClientConfigBuilder::new(url))
	}

	/// Returns `true` when `path` must never be routed through the refresh coordinator.
	pub fn is_excluded(&self, path: &str) -> bool {
		let path = normalize_path(path);

		self.excluded_endpoints.iter().any(|excluded| normalize_path(excluded) == path)
	}

	/// Resolves `path` (optionally carrying a query string) against the base address.
	pub fn endpoint_url(&self, path: &str) -> Result<Url, url::ParseError> {
		let base = self.base_url.as_str().trim_end_matches('/');
		let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };

		Url::parse(&format!("{base}{path}"))
	}

	/// Re-runs validation, e.g. after deserializing a configuration file.
	pub fn validate(self) -> Result<Self, ConfigError> {
		ClientConfigBuilder::from(self).build()
	}

	pub(crate) fn timeout_std(&self) -> std::time::Duration {
		to_std(self.timeout)
	}

	pub(crate) fn refresh_timeout_std(&self) -> std::time::Duration {
		to_std(self.refresh_timeout)
	}
}

pub(crate) fn to_std(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

fn normalize_path(path: &str) -> &str {
	let path = path.split(['?', '#']).next().unwrap_or_default();
	let trimmed = path.trim_end_matches('/');

	if trimmed.is_empty() { "/" } else { trimmed }
}
