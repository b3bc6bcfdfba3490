//! Post-response hook normalizing outcomes and deciding refresh eligibility.
//!
//! Rules apply in order:
//!
//! 1. 2xx passes through untouched.
//! 2. Excluded endpoints (login, refresh, and any configured extras) never enter the refresh path;
//!    a 401 there is terminal.
//! 3. A 401 on the first dispatch of any other request is recoverable.
//! 4. Everything else (other statuses, no response, a 401 on the replay) surfaces as is.

// self
use crate::{
	_prelude::*,
	client::request::Attempt,
	config::ClientConfig,
	error::{ClassifiedError, ErrorKind, TransportError},
	http::TransportResponse,
	obs,
};

/// Result of classifying one dispatch.
#[derive(Debug)]
pub enum Classification {
	/// 2xx response.
	Success(TransportResponse),
	/// 401 eligible for the refresh path.
	Recoverable(ClassifiedError),
	/// Failure to surface directly.
	Failed(ClassifiedError),
}

/// Classifier bound to one client configuration.
#[derive(Clone, Copy, Debug)]
pub struct ResponseClassifier<'a> {
	config: &'a ClientConfig,
}
impl<'a> ResponseClassifier<'a> {
	/// Binds the classifier to the configuration holding the excluded-endpoint list.
	pub fn new(config: &'a ClientConfig) -> Self {
		Self { config }
	}

	/// Classifies the outcome of dispatching `path`, logging every failure exactly once.
	pub fn classify(
		&self,
		path: &str,
		attempt: Attempt,
		outcome: Result<TransportResponse, TransportError>,
	) -> Classification {
		let classification = self.classify_quietly(path, attempt, outcome);

		match &classification {
			Classification::Success(_) => {},
			Classification::Recoverable(e) | Classification::Failed(e) => {
				obs::warn!(
					path,
					status = e.status,
					kind = e.kind.as_str(),
					replay = attempt == Attempt::Replay,
					"request failed"
				);
			},
		}

		classification
	}

	fn classify_quietly(
		&self,
		path: &str,
		attempt: Attempt,
		outcome: Result<TransportResponse, TransportError>,
	) -> Classification {
		let response = match outcome {
			Ok(response) => response,
			Err(e) => return Classification::Failed(e.classify()),
		};

		if response.status.is_success() {
			return Classification::Success(response);
		}

		let error = classify_response(&response);

		if response.status != StatusCode::UNAUTHORIZED {
			return Classification::Failed(error);
		}
		if self.config.is_excluded(path) {
			return Classification::Failed(error.into_terminal());
		}

		match attempt {
			Attempt::Initial => Classification::Recoverable(error),
			Attempt::Replay =>
				Classification::Failed(error.into_terminal().with_code(ClassifiedError::RETRY_REJECTED)),
		}
	}
}

/// Normalizes a non-2xx response into a [`ClassifiedError`].
///
/// The backend's JSON error body (`message`/`error` and `code`) is preferred; otherwise the
/// canonical status reason is used.
pub fn classify_response(response: &TransportResponse) -> ClassifiedError {
	let status = response.status;
	let kind = match status.as_u16() {
		401 => ErrorKind::AuthRecoverable,
		500..=599 => ErrorKind::Server,
		_ => ErrorKind::Client,
	};
	let body = serde_json::from_slice::<ErrorBody>(&response.body).ok();
	let message = body
		.as_ref()
		.and_then(|b| b.message.clone().or_else(|| b.error.clone()))
		.filter(|m| !m.is_empty())
		.unwrap_or_else(|| {
			format!(
				"Request failed with status {} {}",
				status.as_u16(),
				status.canonical_reason().unwrap_or("Unknown")
			)
		});
	let mut error = ClassifiedError::new(kind, message)
		.with_status(status.as_u16())
		.with_retry_after(response.retry_after());

	if let Some(code) = body.and_then(|b| b.code) {
		error = error.with_code(code);
	}

	error
}

#[derive(Deserialize)]
struct ErrorBody {
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default, deserialize_with = "code_as_string")]
	code: Option<String>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
		Some(serde_json::Value::String(s)) => Some(s),
		Some(serde_json::Value::Number(n)) => Some(n.to_string()),
		_ => None,
	})
}
