//! Single replay of a recovered request.

// self
use crate::{
	auth::TokenSecret,
	client::{
		classifier::{Classification, ResponseClassifier},
		request::{ApiResponse, Attempt, RequestDescriptor},
	},
	config::ClientConfig,
	error::ClassifiedError,
	http::Transport,
	obs::{self, CallOutcome, CallSpan, Stage},
};

/// Resubmits a captured request once with a freshly obtained token.
///
/// The replay is classified as [`Attempt::Replay`], so it can never re-enter the refresh path;
/// a 401 on the replay is terminal.
pub struct RetryDispatcher<'a, T>
where
	T: ?Sized + Transport,
{
	config: &'a ClientConfig,
	transport: &'a T,
}
impl<'a, T> RetryDispatcher<'a, T>
where
	T: ?Sized + Transport,
{
	/// Binds the dispatcher to a configuration and transport.
	pub fn new(config: &'a ClientConfig, transport: &'a T) -> Self {
		Self { config, transport }
	}

	/// Replays `descriptor` carrying `token`.
	pub async fn replay(
		&self,
		descriptor: &RequestDescriptor,
		token: &TokenSecret,
	) -> Result<ApiResponse, ClassifiedError> {
		const STAGE: Stage = Stage::Replay;

		let span = CallSpan::new(STAGE, &descriptor.path);

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);

		let result = span
			.instrument(async {
				let request = descriptor.to_transport(self.config, Some(token))?;
				let outcome = self.transport.execute(request).await;

				match ResponseClassifier::new(self.config).classify(
					&descriptor.path,
					Attempt::Replay,
					outcome,
				) {
					Classification::Success(response) => Ok(ApiResponse::from(response)),
					Classification::Recoverable(e) | Classification::Failed(e) => Err(e),
				}
			})
			.await;

		obs::record_call_outcome(
			STAGE,
			if result.is_ok() { CallOutcome::Success } else { CallOutcome::Failure },
		);

		result
	}
}
