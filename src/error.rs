//! Client-level error taxonomy shared by the request pipeline, the refresh coordinator, and
//! the session layer.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// A request failed and was classified.
	#[error(transparent)]
	Api(#[from] ClassifiedError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
impl Error {
	/// Returns the classification of an API failure, if this is one.
	pub fn kind(&self) -> Option<ErrorKind> {
		match self {
			Self::Api(e) => Some(e.kind),
			Self::Config(_) => None,
		}
	}

	/// Returns `true` when the caller's logout policy should run.
	pub fn is_terminal_auth(&self) -> bool {
		self.kind() == Some(ErrorKind::AuthTerminal)
	}

	/// Returns the classified failure, if this is one.
	pub fn as_classified(&self) -> Option<&ClassifiedError> {
		match self {
			Self::Api(e) => Some(e),
			Self::Config(_) => None,
		}
	}
}

/// Failure categories recognized by the response classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
	/// No response was received (DNS, connection, timeout).
	Network,
	/// 401 on a non-excluded endpoint; eligible for the refresh path.
	AuthRecoverable,
	/// Authentication failed for good; the caller should log the user out.
	AuthTerminal,
	/// Any 4xx other than 401.
	Client,
	/// Any 5xx.
	Server,
}
impl ErrorKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Network => "network",
			ErrorKind::AuthRecoverable => "auth_recoverable",
			ErrorKind::AuthTerminal => "auth_terminal",
			ErrorKind::Client => "client",
			ErrorKind::Server => "server",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Normalized failure produced from any transport error or non-2xx response.
///
/// The value is `Clone` so a single refresh failure can be handed to every queued waiter
/// unchanged.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct ClassifiedError {
	/// Failure category.
	pub kind: ErrorKind,
	/// HTTP status code, when a response was received.
	pub status: Option<u16>,
	/// Machine-readable code reported by the backend or assigned by the client.
	pub code: Option<String>,
	/// Human-readable message.
	pub message: String,
	/// Retry-After hint from upstream, if supplied.
	pub retry_after: Option<Duration>,
}
impl ClassifiedError {
	/// Code assigned when no refresh token is stored.
	pub const MISSING_REFRESH_TOKEN: &'static str = "MISSING_REFRESH_TOKEN";
	/// Code assigned when the refresh endpoint rejects or garbles the exchange.
	pub const REFRESH_FAILED: &'static str = "REFRESH_FAILED";
	/// Code assigned when the replayed request is rejected again.
	pub const RETRY_REJECTED: &'static str = "RETRY_REJECTED";
	/// Code assigned to waiters rejected by client teardown.
	pub const CLIENT_CLOSED: &'static str = "CLIENT_CLOSED";

	/// Creates a new error with no status, code, or retry hint.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, status: None, code: None, message: message.into(), retry_after: None }
	}

	/// Attaches an HTTP status code.
	pub fn with_status(mut self, status: u16) -> Self {
		self.status = Some(status);

		self
	}

	/// Attaches a machine-readable code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());

		self
	}

	/// Attaches a Retry-After hint.
	pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
		self.retry_after = retry_after;

		self
	}

	/// Re-labels the failure as terminal authentication while keeping status and message.
	pub fn into_terminal(mut self) -> Self {
		self.kind = ErrorKind::AuthTerminal;

		self
	}

	/// Terminal error raised when recovery is impossible because no refresh token exists.
	pub fn missing_refresh_token() -> Self {
		Self::new(ErrorKind::AuthTerminal, "No refresh token is available.")
			.with_status(401)
			.with_code(Self::MISSING_REFRESH_TOKEN)
	}

	/// Terminal error delivered to waiters when the client is torn down mid-refresh.
	pub fn client_closed() -> Self {
		Self::new(ErrorKind::AuthTerminal, "Client was closed before the refresh completed.")
			.with_code(Self::CLIENT_CLOSED)
	}
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base URL cannot be parsed.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL uses a scheme other than HTTP(S) or cannot carry paths.
	#[error("Base URL must be an http or https URL that can carry paths: {url}.")]
	UnsupportedBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// A configured endpoint path is empty or not rooted.
	#[error("The {endpoint} path must start with `/`: `{path}`.")]
	InvalidPath {
		/// Which path failed validation.
		endpoint: &'static str,
		/// Path value that failed validation.
		path: String,
	},
	/// A timeout is zero or negative.
	#[error("The {which} timeout must be positive.")]
	NonPositiveTimeout {
		/// Which timeout failed validation.
		which: &'static str,
	},
	/// Two storage keys collide.
	#[error("Storage keys must be distinct and non-empty.")]
	InvalidStorageKeys,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (no usable response).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The request did not complete before its deadline.
	#[error("Request timed out.")]
	Timeout,
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request could not be assembled (bad URL, header, or body).
	#[error("Request could not be built.")]
	Build {
		/// Transport-specific builder error.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific request construction error.
	pub fn build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Build { source: Box::new(src) }
	}

	/// Converts the failure into a [`ClassifiedError`] of kind [`ErrorKind::Network`].
	pub fn classify(&self) -> ClassifiedError {
		let code = match self {
			Self::Timeout => "TIMEOUT",
			Self::Network { .. } => "NETWORK_ERROR",
			Self::Build { .. } => "REQUEST_BUILD_ERROR",
		};

		ClassifiedError::new(ErrorKind::Network, self.to_string()).with_code(code)
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() {
			Self::Timeout
		} else if e.is_builder() {
			Self::build(e)
		} else {
			Self::network(e)
		}
	}
}
