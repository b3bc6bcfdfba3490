//! Transport primitives every pipeline stage wraps.
//!
//! [`Transport`] is the client's only dependency on an HTTP stack. The request pipeline hands
//! it fully resolved [`TransportRequest`] values (absolute URL, final headers, encoded body)
//! and receives either a [`TransportResponse`] for any HTTP status or a [`TransportError`]
//! when no response arrived. Status interpretation lives in the classifier, never here.

// std
use std::ops::Deref;
// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing one request.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by every
/// clone of a client and by concurrent replays. A response with any status code is a success
/// at this layer; only the absence of a response is an error.
pub trait Transport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request`, honoring its timeout when one is set.
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// Fully resolved outbound request.
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL.
	pub url: Url,
	/// Final header set, including any `Authorization` header.
	pub headers: HeaderMap,
	/// Encoded body.
	pub body: Option<Vec<u8>>,
	/// Per-request deadline.
	pub timeout: Option<std::time::Duration>,
}
impl TransportRequest {
	/// Returns the bearer token carried by the request, if any.
	pub fn bearer_token(&self) -> Option<&str> {
		self.headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
	}
}

/// Raw response captured from the backend.
#[derive(Clone, Debug)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Response body.
	pub body: Vec<u8>,
}
impl TransportResponse {
	/// Builds a response with an empty header set.
	pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: HeaderMap::new(), body: body.into() }
	}

	/// Builds a JSON response.
	pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
		let mut response = Self::new(status, value.to_string());

		response
			.headers
			.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

		response
	}

	/// Returns the Retry-After hint, expressed as a relative duration.
	pub fn retry_after(&self) -> Option<Duration> {
		parse_retry_after(&self.headers)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl Transport for ReqwestTransport {
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let TransportRequest { method, url, headers, body, timeout } = request;
			let mut builder = self.0.request(method, url).headers(headers);

			if let Some(body) = body {
				builder = builder.body(body);
			}
			if let Some(timeout) = timeout {
				builder = builder.timeout(timeout);
			}

			let response = builder.send().await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await?.to_vec();

			Ok(TransportResponse { status, headers, body })
		})
	}
}
impl Debug for ReqwestTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestTransport(..)")
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(header::RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return i64::try_from(secs).ok().map(Duration::seconds);
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
