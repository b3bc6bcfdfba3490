//! Caller-facing client wiring the authenticator, classifier, refresh coordinator, and replay
//! dispatcher around one [`Transport`].

pub mod authenticator;
pub mod classifier;
pub mod request;
pub mod retry;

pub use authenticator::*;
pub use classifier::*;
pub use request::*;
pub use retry::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	config::ClientConfig,
	error::{ClassifiedError, ConfigError, ErrorKind},
	http::{ReqwestTransport, Transport},
	obs::{self, CallOutcome, CallSpan, Stage},
	refresh::{RefreshCoordinator, RefreshMetrics, RefreshState},
	store::CredentialStore,
};

/// Authenticated HTTP client.
///
/// Every request carries the stored access token. A 401 on a non-excluded endpoint is
/// recovered through the client's [`RefreshCoordinator`] and replayed exactly once. Clones
/// share the transport, store, and coordinator, so they also share the single-flight
/// guarantee; separately constructed clients are fully independent.
pub struct Client<T = ReqwestTransport>
where
	T: ?Sized + Transport,
{
	config: Arc<ClientConfig>,
	store: CredentialStore,
	transport: Arc<T>,
	coordinator: Arc<RefreshCoordinator<T>>,
	next_id: Arc<AtomicU64>,
}
impl<T> Client<T>
where
	T: ?Sized + Transport,
{
	/// Creates a client that dispatches through the caller-provided transport.
	///
	/// `config` is used as is; configurations that did not come out of
	/// [`ClientConfigBuilder::build`](crate::config::ClientConfigBuilder::build) should pass
	/// through [`ClientConfig::validate`] first.
	pub fn with_transport(
		config: ClientConfig,
		store: CredentialStore,
		transport: impl Into<Arc<T>>,
	) -> Self {
		let config = Arc::new(config);
		let transport = transport.into();
		let coordinator =
			Arc::new(RefreshCoordinator::new(config.clone(), store.clone(), transport.clone()));

		Self { config, store, transport, coordinator, next_id: Default::default() }
	}

	/// Returns the configuration this client was built with.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Returns the credential store shared with the refresh coordinator.
	pub fn store(&self) -> &CredentialStore {
		&self.store
	}

	/// Returns the transport requests are dispatched through.
	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Returns the refresh coordinator owned by this client.
	pub fn coordinator(&self) -> &RefreshCoordinator<T> {
		&self.coordinator
	}

	/// Returns the refresh counters.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		self.coordinator.metrics()
	}

	/// Returns whether a refresh call is currently in flight.
	pub fn refresh_state(&self) -> RefreshState {
		self.coordinator.state()
	}

	/// Tears the client down: every request waiting on a refresh is rejected with a terminal
	/// [`ClassifiedError::CLIENT_CLOSED`] error and no later request is recovered.
	pub fn close(&self) {
		self.coordinator.close();
	}

	/// Sends `method path` with an optional JSON body.
	pub async fn request(
		&self,
		method: Method,
		path: impl Into<String>,
		body: Option<serde_json::Value>,
		options: RequestOptions,
	) -> Result<ApiResponse> {
		let descriptor = RequestDescriptor::new(self.next_request_id(), method, path, body, options)?;

		self.send(descriptor).await
	}

	/// Sends `GET path`.
	pub async fn get(&self, path: impl Into<String>) -> Result<ApiResponse> {
		self.request(Method::GET, path, None, RequestOptions::default()).await
	}

	/// Sends `DELETE path`.
	pub async fn delete(&self, path: impl Into<String>) -> Result<ApiResponse> {
		self.request(Method::DELETE, path, None, RequestOptions::default()).await
	}

	/// Sends `POST path` with `body` encoded as JSON.
	pub async fn post<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.request(Method::POST, path, Some(encode_body(body)?), RequestOptions::default()).await
	}

	/// Sends `PUT path` with `body` encoded as JSON.
	pub async fn put<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.request(Method::PUT, path, Some(encode_body(body)?), RequestOptions::default()).await
	}

	/// Sends `PATCH path` with `body` encoded as JSON.
	pub async fn patch<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.request(Method::PATCH, path, Some(encode_body(body)?), RequestOptions::default())
			.await
	}

	/// Dispatches a captured request through the full pipeline.
	pub async fn send(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
		const STAGE: Stage = Stage::Request;

		let span = CallSpan::new(STAGE, &descriptor.path);

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);

		let result = span.instrument(self.dispatch(&descriptor)).await;

		obs::record_call_outcome(
			STAGE,
			if result.is_ok() { CallOutcome::Success } else { CallOutcome::Failure },
		);

		result.map_err(Error::from)
	}

	/// Allocates the identity of the next captured request.
	pub fn next_request_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed) + 1
	}

	async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, ClassifiedError> {
		let (request, sent_with) =
			RequestAuthenticator::new(&self.store).authenticate(descriptor, &self.config)?;
		let outcome = self.transport.execute(request).await;

		match ResponseClassifier::new(&self.config).classify(
			&descriptor.path,
			Attempt::Initial,
			outcome,
		) {
			Classification::Success(response) => Ok(ApiResponse::from(response)),
			Classification::Failed(e) => Err(e),
			Classification::Recoverable(_) => {
				let token = self.coordinator.recover(descriptor.id, sent_with.as_ref()).await?;
				let response = RetryDispatcher::new(&self.config, &*self.transport)
					.replay(descriptor, &token)
					.await?;

				obs::info!(
					path = %descriptor.path,
					request_id = descriptor.id,
					"request recovered after token refresh"
				);

				Ok(response)
			},
		}
	}
}
impl Client<ReqwestTransport> {
	/// Creates a client backed by a freshly built reqwest transport.
	pub fn new(config: ClientConfig, store: CredentialStore) -> Result<Self> {
		let client = ReqwestClient::builder().build().map_err(ConfigError::from)?;

		Ok(Self::with_transport(config, store, ReqwestTransport::with_client(client)))
	}
}
impl<T> Clone for Client<T>
where
	T: ?Sized + Transport,
{
	fn clone(&self) -> Self {
		Self {
			config: self.config.clone(),
			store: self.store.clone(),
			transport: self.transport.clone(),
			coordinator: self.coordinator.clone(),
			next_id: self.next_id.clone(),
		}
	}
}
impl<T> Debug for Client<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("base_url", &self.config.base_url.as_str())
			.field("store", &self.store)
			.field("coordinator", &self.coordinator)
			.finish()
	}
}

fn encode_body<B>(body: &B) -> Result<serde_json::Value, ClassifiedError>
where
	B: ?Sized + Serialize,
{
	serde_json::to_value(body).map_err(|e| {
		ClassifiedError::new(ErrorKind::Client, format!("Request body could not be serialized: {e}."))
			.with_code("INVALID_BODY")
	})
}
