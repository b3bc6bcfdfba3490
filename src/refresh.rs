//! Single-flight refresh coordination.
//!
//! [`RefreshCoordinator::recover`] is entered by every request whose first dispatch came back
//! 401. The first caller to find the coordinator idle becomes the leader and issues the only
//! refresh call; everyone arriving while that call is in flight is queued as a waiter on a
//! one-shot channel. When the call settles, the new pair is persisted, the queue is drained in
//! FIFO order with the same outcome, and the state returns to idle inside the same critical
//! section, so no waiter can be stranded and no second refresh can start for the same
//! expired credential.
//!
//! A leader whose future is dropped mid-refresh hands leadership to the oldest live waiter,
//! which re-issues the refresh with the same refresh token. Only an empty queue returns the
//! coordinator to idle.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{TokenGrant, TokenSecret},
	client::classifier::classify_response,
	config::ClientConfig,
	error::{ClassifiedError, ErrorKind},
	http::{Transport, TransportRequest},
	obs::{self, CallOutcome, CallSpan, Stage},
	store::CredentialStore,
};

type RefreshResult = Result<TokenSecret, ClassifiedError>;

/// Whether a refresh call is currently in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
	/// No refresh call in flight.
	Idle,
	/// A leader is talking to the refresh endpoint.
	Refreshing,
}

/// Owns the refresh state machine and waiter queue of one client instance.
pub struct RefreshCoordinator<T>
where
	T: ?Sized + Transport,
{
	config: Arc<ClientConfig>,
	store: CredentialStore,
	transport: Arc<T>,
	inner: Mutex<Inner>,
	metrics: RefreshMetrics,
}
impl<T> RefreshCoordinator<T>
where
	T: ?Sized + Transport,
{
	/// Creates an idle coordinator sharing the client's configuration, store, and transport.
	pub fn new(config: Arc<ClientConfig>, store: CredentialStore, transport: Arc<T>) -> Self {
		Self {
			config,
			store,
			transport,
			inner: Mutex::new(Inner {
				state: RefreshState::Idle,
				queue: VecDeque::new(),
				last_failure: None,
				closed: false,
			}),
			metrics: RefreshMetrics::default(),
		}
	}

	/// Returns the current state.
	pub fn state(&self) -> RefreshState {
		self.inner.lock().state
	}

	/// Returns the number of queued waiters.
	pub fn pending_waiters(&self) -> usize {
		self.inner.lock().queue.len()
	}

	/// Returns `true` once [`close`](Self::close) has run.
	pub fn is_closed(&self) -> bool {
		self.inner.lock().closed
	}

	/// Returns the refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Obtains a fresh access token for the request identified by `request_id`.
	///
	/// `sent_with` is the access token the failed dispatch carried. When the stored token
	/// already differs from it, a refresh finished in the meantime and the stored token is
	/// returned without another refresh call.
	pub async fn recover(&self, request_id: u64, sent_with: Option<&TokenSecret>) -> RefreshResult {
		match self.enter(request_id, sent_with) {
			Entry::Ready(result) => result,
			Entry::Wait(receiver) => {
				let mut waiting = Waiting { coordinator: self, receiver };

				match (&mut waiting.receiver).await {
					Ok(Signal::Settled(result)) => result,
					Ok(Signal::Lead(refresh_token)) => {
						obs::debug!(request_id, "promoted to refresh leader");

						self.lead(refresh_token).await
					},
					Err(_) => Err(ClassifiedError::client_closed()),
				}
			},
			Entry::Lead(refresh_token) => self.lead(refresh_token).await,
		}
	}

	/// Rejects every queued waiter and refuses all later recoveries.
	///
	/// A refresh call already in flight still completes and its leader still receives the
	/// outcome.
	pub fn close(&self) {
		let mut inner = self.inner.lock();

		inner.closed = true;

		let rejected = inner.drain(&Err(ClassifiedError::client_closed()));

		obs::debug!(rejected, "refresh coordinator closed");
	}

	fn enter(&self, request_id: u64, sent_with: Option<&TokenSecret>) -> Entry {
		let mut inner = self.inner.lock();

		if inner.closed {
			return Entry::Ready(Err(ClassifiedError::client_closed()));
		}

		let (access_token, refresh_token) = self.store.tokens();

		let rotated = access_token
			.filter(|current| inner.state == RefreshState::Idle && Some(current) != sent_with);

		if let Some(current) = rotated {
			self.metrics.record_short_circuit();
			obs::debug!(request_id, "access token already rotated; skipping refresh");

			return Entry::Ready(Ok(current));
		}

		let Some(refresh_token) = refresh_token else {
			obs::warn!(request_id, "no refresh token stored; recovery impossible");

			return Entry::Ready(Err(ClassifiedError::missing_refresh_token()));
		};

		match inner.state {
			RefreshState::Refreshing => {
				let (resolve, receiver) = oneshot::channel();

				inner.queue.push_back(Waiter { request_id, resolve });
				self.metrics.record_waiter();
				obs::debug!(request_id, queued = inner.queue.len(), "waiting on in-flight refresh");

				Entry::Wait(receiver)
			},
			RefreshState::Idle => {
				let rejected =
					inner.last_failure.as_ref().filter(|failed| failed.refresh_token == refresh_token);

				if let Some(failed) = rejected {
					obs::debug!(request_id, "refresh token already rejected; not retrying");

					return Entry::Ready(Err(failed.error.clone()));
				}

				inner.state = RefreshState::Refreshing;

				Entry::Lead(refresh_token)
			},
		}
	}

	async fn lead(&self, refresh_token: TokenSecret) -> RefreshResult {
		let guard = LeadGuard { coordinator: self, refresh_token, armed: true };
		let result = self.exchange(&guard.refresh_token).await;

		guard.complete(result)
	}

	// Passes leadership to the oldest waiter still listening; idles once the queue is empty.
	fn hand_off(&self, refresh_token: &TokenSecret) {
		let mut inner = self.inner.lock();

		while let Some(waiter) = inner.queue.pop_front() {
			if waiter.resolve.send(Signal::Lead(refresh_token.clone())).is_ok() {
				self.metrics.record_handoff();
				obs::debug!(request_id = waiter.request_id, "refresh leadership handed off");

				return;
			}
		}

		inner.state = RefreshState::Idle;
		obs::debug!("refresh abandoned with no waiters left");
	}

	async fn exchange(&self, refresh_token: &TokenSecret) -> RefreshResult {
		const STAGE: Stage = Stage::Refresh;

		let span = CallSpan::new(STAGE, &self.config.refresh_path);

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.call_refresh_endpoint(refresh_token)).await;

		match &result {
			Ok(_) => {
				self.metrics.record_success();
				obs::record_call_outcome(STAGE, CallOutcome::Success);
				obs::info!(path = %self.config.refresh_path, "access token refreshed");
			},
			Err(e) => {
				self.metrics.record_failure();
				obs::record_call_outcome(STAGE, CallOutcome::Failure);
				obs::warn!(
					path = %self.config.refresh_path,
					status = e.status,
					message = %e.message,
					"token refresh failed"
				);
			},
		}

		result
	}

	async fn call_refresh_endpoint(&self, refresh_token: &TokenSecret) -> RefreshResult {
		let request = self.refresh_request(refresh_token)?;
		let response =
			self.transport.execute(request).await.map_err(|e| refresh_failure(e.classify()))?;

		if !response.status.is_success() {
			return Err(refresh_failure(classify_response(&response)));
		}

		let grant = TokenGrant::from_slice(&response.body).map_err(|e| {
			refresh_failure(
				ClassifiedError::new(ErrorKind::AuthTerminal, e.to_string())
					.with_status(response.status.as_u16()),
			)
		})?;

		if !self.store.store_pair(&grant.pair()) {
			obs::warn!("refreshed credentials could not be persisted; continuing in memory");
		}

		Ok(grant.access_token)
	}

	fn refresh_request(&self, refresh_token: &TokenSecret) -> Result<TransportRequest, ClassifiedError> {
		let url = self.config.endpoint_url(&self.config.refresh_path).map_err(|e| {
			refresh_failure(ClassifiedError::new(
				ErrorKind::AuthTerminal,
				format!("Refresh path is invalid: {e}."),
			))
		})?;
		let body = serde_json::to_vec(&RefreshBody { refresh_token: refresh_token.expose() })
			.map_err(|e| {
				refresh_failure(ClassifiedError::new(
					ErrorKind::AuthTerminal,
					format!("Refresh body could not be serialized: {e}."),
				))
			})?;
		let mut headers = HeaderMap::new();

		headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(TransportRequest {
			method: Method::POST,
			url,
			headers,
			body: Some(body),
			timeout: Some(self.config.refresh_timeout_std()),
		})
	}
}
impl<T> Debug for RefreshCoordinator<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let inner = self.inner.lock();

		f.debug_struct("RefreshCoordinator")
			.field("state", &inner.state)
			.field("pending_waiters", &inner.queue.len())
			.field("closed", &inner.closed)
			.finish()
	}
}

struct Inner {
	state: RefreshState,
	queue: VecDeque<Waiter>,
	last_failure: Option<FailedRefresh>,
	closed: bool,
}
impl Inner {
	fn drain(&mut self, result: &RefreshResult) -> usize {
		let drained = self.queue.len();

		for waiter in self.queue.drain(..) {
			// The receiver is gone when its caller was dropped; nothing to deliver then.
			if waiter.resolve.send(Signal::Settled(result.clone())).is_err() {
				obs::debug!(request_id = waiter.request_id, "waiter abandoned before refresh settled");
			}
		}

		drained
	}
}

struct Waiter {
	request_id: u64,
	resolve: oneshot::Sender<Signal>,
}

enum Signal {
	Settled(RefreshResult),
	Lead(TokenSecret),
}

// Re-delivers a leadership hand-off that arrived after the waiting future stopped being polled.
struct Waiting<'a, T>
where
	T: ?Sized + Transport,
{
	coordinator: &'a RefreshCoordinator<T>,
	receiver: oneshot::Receiver<Signal>,
}
impl<T> Drop for Waiting<'_, T>
where
	T: ?Sized + Transport,
{
	fn drop(&mut self) {
		if let Ok(Signal::Lead(refresh_token)) = self.receiver.try_recv() {
			self.coordinator.hand_off(&refresh_token);
		}
	}
}

struct FailedRefresh {
	refresh_token: TokenSecret,
	error: ClassifiedError,
}

enum Entry {
	Ready(RefreshResult),
	Wait(oneshot::Receiver<Signal>),
	Lead(TokenSecret),
}

// Keeps the queue moving even when the leader's future is dropped mid-refresh.
struct LeadGuard<'a, T>
where
	T: ?Sized + Transport,
{
	coordinator: &'a RefreshCoordinator<T>,
	refresh_token: TokenSecret,
	armed: bool,
}
impl<T> LeadGuard<'_, T>
where
	T: ?Sized + Transport,
{
	fn complete(mut self, result: RefreshResult) -> RefreshResult {
		self.armed = false;

		let mut inner = self.coordinator.inner.lock();

		inner.last_failure = match &result {
			Ok(_) => None,
			Err(error) =>
				Some(FailedRefresh { refresh_token: self.refresh_token.clone(), error: error.clone() }),
		};

		let served = inner.drain(&result);

		inner.state = RefreshState::Idle;
		obs::debug!(served, ok = result.is_ok(), "refresh settled");

		result
	}
}
impl<T> Drop for LeadGuard<'_, T>
where
	T: ?Sized + Transport,
{
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		obs::warn!("refresh leader dropped before the refresh settled");
		self.coordinator.hand_off(&self.refresh_token);
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
	refresh_token: &'a str,
}

fn refresh_failure(error: ClassifiedError) -> ClassifiedError {
	error.into_terminal().with_code(ClassifiedError::REFRESH_FAILED)
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use tokio::sync::Notify;
	// self
	use super::*;
	use crate::{
		auth::CredentialPair,
		error::TransportError,
		http::{TransportFuture, TransportResponse},
	};

	struct GatedRefreshTransport {
		gate: Notify,
		calls: AtomicUsize,
		status: StatusCode,
	}
	impl GatedRefreshTransport {
		fn new(status: StatusCode) -> Arc<Self> {
			Arc::new(Self { gate: Notify::new(), calls: AtomicUsize::new(0), status })
		}
	}
	impl Transport for GatedRefreshTransport {
		fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				assert!(
					request.headers.get(header::AUTHORIZATION).is_none(),
					"Refresh calls must never carry an access token."
				);
				self.calls.fetch_add(1, Ordering::SeqCst);
				self.gate.notified().await;

				if self.status.is_success() {
					Ok(TransportResponse::json(
						self.status,
						&serde_json::json!({ "accessToken": "a2", "refreshToken": "r2" }),
					))
				} else if self.status == StatusCode::GATEWAY_TIMEOUT {
					Err(TransportError::Timeout)
				} else {
					Ok(TransportResponse::new(self.status, r#"{"message":"Refresh token expired"}"#))
				}
			})
		}
	}

	fn coordinator(
		transport: Arc<GatedRefreshTransport>,
		pair: Option<CredentialPair>,
	) -> (Arc<RefreshCoordinator<GatedRefreshTransport>>, CredentialStore) {
		let config = ClientConfig::builder_from_str("http://localhost:3000/api")
			.expect("Base URL fixture should parse.")
			.build()
			.expect("Default configuration should build.");
		let store = CredentialStore::in_memory();

		if let Some(pair) = pair {
			store.store_pair(&pair);
		}

		(Arc::new(RefreshCoordinator::new(Arc::new(config), store.clone(), transport)), store)
	}

	async fn wait_until(mut condition: impl FnMut() -> bool) {
		for _ in 0..500 {
			if condition() {
				return;
			}

			tokio::time::sleep(std::time::Duration::from_millis(2)).await;
		}

		panic!("Condition was not reached in time.");
	}

	#[tokio::test]
	async fn missing_refresh_token_fails_without_network() {
		let transport = GatedRefreshTransport::new(StatusCode::OK);
		let (coordinator, _) = coordinator(transport.clone(), None);
		let err = coordinator
			.recover(1, None)
			.await
			.expect_err("Recovery without a refresh token must fail.");

		assert_eq!(err.kind, ErrorKind::AuthTerminal);
		assert_eq!(err.code.as_deref(), Some(ClassifiedError::MISSING_REFRESH_TOKEN));
		assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
		assert_eq!(coordinator.state(), RefreshState::Idle);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn waiters_share_leader_outcome_in_fifo_order() {
		let transport = GatedRefreshTransport::new(StatusCode::OK);
		let stale = TokenSecret::new("a1");
		let (coordinator, store) =
			coordinator(transport.clone(), Some(CredentialPair::new("a1", Some("r1"))));
		let resumed = Arc::new(Mutex::new(Vec::new()));
		let leader = {
			let coordinator = coordinator.clone();
			let stale = stale.clone();

			tokio::spawn(async move { coordinator.recover(1, Some(&stale)).await })
		};

		wait_until(|| coordinator.state() == RefreshState::Refreshing).await;

		let mut waiters = Vec::new();

		for id in 2..=4_u64 {
			let waiter = coordinator.clone();
			let stale = stale.clone();
			let resumed = resumed.clone();

			waiters.push(tokio::spawn(async move {
				let result = waiter.recover(id, Some(&stale)).await;

				resumed.lock().push(id);

				result
			}));
			wait_until(|| coordinator.pending_waiters() == (id - 1) as usize).await;
		}

		transport.gate.notify_one();

		let leader = leader.await.expect("Leader task should not panic.");

		assert_eq!(leader.as_ref().map(TokenSecret::expose), Ok("a2"));

		for waiter in waiters {
			let token = waiter.await.expect("Waiter task should not panic.");

			assert_eq!(token.as_ref().map(TokenSecret::expose), Ok("a2"));
		}

		assert_eq!(*resumed.lock(), [2, 3, 4], "Waiters must resume in arrival order.");
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
		assert_eq!(coordinator.metrics().waiters(), 3);
		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert_eq!(coordinator.pending_waiters(), 0);
		assert_eq!(
			store.pair(),
			Some(CredentialPair::new("a2", Some("r2"))),
			"Rotated pair must be persisted before waiters resume."
		);
	}

	#[tokio::test]
	async fn failed_refresh_is_remembered_until_credentials_change() {
		let transport = GatedRefreshTransport::new(StatusCode::UNAUTHORIZED);
		let stale = TokenSecret::new("a1");
		let (coordinator, store) =
			coordinator(transport.clone(), Some(CredentialPair::new("a1", Some("r1"))));

		transport.gate.notify_one();

		let first = coordinator
			.recover(1, Some(&stale))
			.await
			.expect_err("Refresh rejected with 401 must fail.");

		assert_eq!(first.kind, ErrorKind::AuthTerminal);
		assert_eq!(first.status, Some(401));
		assert_eq!(first.code.as_deref(), Some(ClassifiedError::REFRESH_FAILED));
		assert_eq!(first.message, "Refresh token expired");

		let second = coordinator
			.recover(2, Some(&stale))
			.await
			.expect_err("The same rejected refresh token must not be retried.");

		assert_eq!(second, first);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

		store.store_pair(&CredentialPair::new("a1", Some("r-new")));
		transport.gate.notify_one();

		let _ = coordinator.recover(3, Some(&stale)).await;

		assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn refresh_timeout_counts_as_terminal_failure() {
		let transport = GatedRefreshTransport::new(StatusCode::GATEWAY_TIMEOUT);
		let (coordinator, _) =
			coordinator(transport.clone(), Some(CredentialPair::new("a1", Some("r1"))));

		transport.gate.notify_one();

		let err = coordinator
			.recover(1, Some(&TokenSecret::new("a1")))
			.await
			.expect_err("Timed out refresh must fail.");

		assert_eq!(err.kind, ErrorKind::AuthTerminal);
		assert_eq!(err.status, None);
		assert_eq!(coordinator.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn rotated_token_short_circuits_late_failures() {
		let transport = GatedRefreshTransport::new(StatusCode::OK);
		let (coordinator, _) =
			coordinator(transport.clone(), Some(CredentialPair::new("a2", Some("r2"))));
		let token = coordinator
			.recover(7, Some(&TokenSecret::new("a1")))
			.await
			.expect("A newer stored token must be reused.");

		assert_eq!(token.expose(), "a2");
		assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
		assert_eq!(coordinator.metrics().short_circuits(), 1);
	}

	#[tokio::test]
	async fn close_rejects_queued_waiters() {
		let transport = GatedRefreshTransport::new(StatusCode::OK);
		let stale = TokenSecret::new("a1");
		let (coordinator, _) =
			coordinator(transport.clone(), Some(CredentialPair::new("a1", Some("r1"))));
		let leader = {
			let coordinator = coordinator.clone();
			let stale = stale.clone();

			tokio::spawn(async move { coordinator.recover(1, Some(&stale)).await })
		};

		wait_until(|| coordinator.state() == RefreshState::Refreshing).await;

		let waiter = {
			let coordinator = coordinator.clone();
			let stale = stale.clone();

			tokio::spawn(async move { coordinator.recover(2, Some(&stale)).await })
		};

		wait_until(|| coordinator.pending_waiters() == 1).await;
		coordinator.close();

		let err = waiter
			.await
			.expect("Waiter task should not panic.")
			.expect_err("Closing must reject queued waiters.");

		assert_eq!(err.code.as_deref(), Some(ClassifiedError::CLIENT_CLOSED));

		transport.gate.notify_one();

		let leader = leader.await.expect("Leader task should not panic.");

		assert!(leader.is_ok(), "The in-flight leader still receives its outcome.");

		let err = coordinator
			.recover(3, Some(&TokenSecret::new("a2")))
			.await
			.expect_err("A closed coordinator refuses recoveries.");

		assert_eq!(err.code.as_deref(), Some(ClassifiedError::CLIENT_CLOSED));
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn dropped_leader_hands_refresh_to_oldest_waiter() {
		let transport = GatedRefreshTransport::new(StatusCode::OK);
		let stale = TokenSecret::new("a1");
		let (coordinator, store) =
			coordinator(transport.clone(), Some(CredentialPair::new("a1", Some("r1"))));
		let leader = {
			let coordinator = coordinator.clone();
			let stale = stale.clone();

			tokio::spawn(async move {
				tokio::time::timeout(
					std::time::Duration::from_millis(50),
					coordinator.recover(1, Some(&stale)),
				)
				.await
			})
		};

		wait_until(|| coordinator.state() == RefreshState::Refreshing).await;

		let mut waiters = Vec::new();

		for id in 2..=3_u64 {
			let waiter = coordinator.clone();
			let stale = stale.clone();

			waiters.push(tokio::spawn(async move { waiter.recover(id, Some(&stale)).await }));
			wait_until(|| coordinator.pending_waiters() == (id - 1) as usize).await;
		}

		assert!(
			leader.await.expect("Leader task should not panic.").is_err(),
			"The leader's caller gives up before the refresh settles."
		);

		wait_until(|| transport.calls.load(Ordering::SeqCst) == 2).await;

		assert_eq!(coordinator.state(), RefreshState::Refreshing);
		assert_eq!(coordinator.pending_waiters(), 1);

		transport.gate.notify_one();

		for waiter in waiters {
			let token = waiter.await.expect("Waiter task should not panic.");

			assert_eq!(token.as_ref().map(TokenSecret::expose), Ok("a2"));
		}

		assert_eq!(coordinator.metrics().handoffs(), 1);
		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert_eq!(store.pair(), Some(CredentialPair::new("a2", Some("r2"))));
	}

	#[tokio::test]
	async fn dropped_leader_skips_waiters_that_left() {
		let transport = GatedRefreshTransport::new(StatusCode::OK);
		let stale = TokenSecret::new("a1");
		let (coordinator, _) =
			coordinator(transport.clone(), Some(CredentialPair::new("a1", Some("r1"))));
		let leader = {
			let coordinator = coordinator.clone();
			let stale = stale.clone();

			tokio::spawn(async move { coordinator.recover(1, Some(&stale)).await })
		};

		wait_until(|| coordinator.state() == RefreshState::Refreshing).await;

		let gone = {
			let coordinator = coordinator.clone();
			let stale = stale.clone();

			tokio::spawn(async move { coordinator.recover(2, Some(&stale)).await })
		};

		wait_until(|| coordinator.pending_waiters() == 1).await;
		gone.abort();

		let _ = gone.await;

		leader.abort();

		let _ = leader.await;

		assert_eq!(coordinator.state(), RefreshState::Idle, "No live waiter is left to lead.");
		assert_eq!(coordinator.metrics().handoffs(), 0);

		transport.gate.notify_one();

		let token = coordinator
			.recover(3, Some(&stale))
			.await
			.expect("A later recovery starts a fresh refresh.");

		assert_eq!(token.expose(), "a2");
		assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
	}
}
