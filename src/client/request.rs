//! Request descriptors, per-call options, and the caller-facing response type.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::{ClientConfig, to_std},
	error::{ClassifiedError, ErrorKind},
	http::{TransportRequest, TransportResponse},
};

/// Which dispatch of a request is being classified.
///
/// Only [`Attempt::Initial`] may enter the refresh path; a replay is never recovered again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
	/// First dispatch.
	Initial,
	/// The single replay after a refresh.
	Replay,
}

/// Optional per-call settings.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
	/// Extra headers sent with the request.
	pub headers: HeaderMap,
	/// Query pairs appended to the URL.
	pub query: Vec<(String, String)>,
	/// Overrides the configured request deadline.
	pub timeout: Option<Duration>,
}
impl RequestOptions {
	/// Adds one header.
	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Adds one query pair.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Overrides the request deadline.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}
}

/// Captured request that can be dispatched and, after a refresh, replayed verbatim.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// Client-unique request identity.
	pub id: u64,
	/// HTTP method.
	pub method: Method,
	/// Path relative to the base address.
	pub path: String,
	/// Caller-supplied headers (never the `Authorization` header the client attaches).
	pub headers: HeaderMap,
	/// Encoded body.
	pub body: Option<Vec<u8>>,
	/// Query pairs.
	pub query: Vec<(String, String)>,
	/// Per-call deadline override.
	pub timeout: Option<Duration>,
}
impl RequestDescriptor {
	/// Captures a request from its parts.
	pub fn new(
		id: u64,
		method: Method,
		path: impl Into<String>,
		body: Option<serde_json::Value>,
		options: RequestOptions,
	) -> Result<Self, ClassifiedError> {
		let mut headers = options.headers;
		let body = match body {
			Some(value) => {
				let bytes = serde_json::to_vec(&value).map_err(|e| {
					ClassifiedError::new(
						ErrorKind::Client,
						format!("Request body could not be serialized: {e}."),
					)
					.with_code("INVALID_BODY")
				})?;

				headers
					.entry(header::CONTENT_TYPE)
					.or_insert(HeaderValue::from_static("application/json"));

				Some(bytes)
			},
			None => None,
		};

		Ok(Self {
			id,
			method,
			path: path.into(),
			headers,
			body,
			query: options.query,
			timeout: options.timeout,
		})
	}

	/// Resolves the descriptor into a transport request carrying `token` as a bearer
	/// credential, or no `Authorization` header at all when `token` is `None`.
	pub fn to_transport(
		&self,
		config: &ClientConfig,
		token: Option<&TokenSecret>,
	) -> Result<TransportRequest, ClassifiedError> {
		let mut url = config.endpoint_url(&self.path).map_err(|e| {
			ClassifiedError::new(ErrorKind::Client, format!("Request path is invalid: {e}."))
				.with_code("INVALID_PATH")
		})?;

		if !self.query.is_empty() {
			url.query_pairs_mut().extend_pairs(self.query.iter());
		}

		let mut headers = self.headers.clone();

		headers.remove(header::AUTHORIZATION);

		if let Some(value) = token.and_then(TokenSecret::bearer_header) {
			headers.insert(header::AUTHORIZATION, value);
		}

		Ok(TransportRequest {
			method: self.method.clone(),
			url,
			headers,
			body: self.body.clone(),
			timeout: Some(self.timeout.map(to_std).unwrap_or_else(|| config.timeout_std())),
		})
	}
}

/// Successful (2xx) response handed back to callers.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Decodes the body as JSON.
	pub fn json<T>(&self) -> Result<T, ClassifiedError>
	where
		T: DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut de).map_err(|e| {
			ClassifiedError::new(
				ErrorKind::Server,
				format!("Response body could not be decoded at `{}`: {}.", e.path(), e.inner()),
			)
			.with_status(self.status.as_u16())
			.with_code("INVALID_RESPONSE_BODY")
		})
	}

	/// Returns the body as UTF-8 text, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}
impl From<TransportResponse> for ApiResponse {
	fn from(response: TransportResponse) -> Self {
		Self { status: response.status, headers: response.headers, body: response.body }
	}
}
