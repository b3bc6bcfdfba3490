//! Session helpers layered over [`Client`]: login, registration, logout, authentication
//! status, and the caller's policy for terminal authentication failures.

// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, TokenGrant},
	client::{ApiResponse, Client},
	error::{ClassifiedError, ErrorKind},
	http::{ReqwestTransport, Transport},
	obs::{self, CallOutcome, CallSpan, Stage},
	store::CredentialStore,
};

/// Role label granting administrative access.
pub const ADMIN_ROLE: &str = "ADMIN";

/// Policy run by the caller after a terminal authentication failure.
///
/// The request pipeline never invokes it on its own; [`Session::guard`] does when asked to.
pub trait LogoutHandler
where
	Self: Send + Sync,
{
	/// Tears the local session down.
	fn handle_logout(&self);
}
impl<F> LogoutHandler for F
where
	F: Fn() + Send + Sync,
{
	fn handle_logout(&self) {
		self()
	}
}

/// Default [`LogoutHandler`] that wipes every stored credential.
#[derive(Clone, Debug)]
pub struct ClearCredentials(pub CredentialStore);
impl LogoutHandler for ClearCredentials {
	fn handle_logout(&self) {
		if !self.0.clear_all() {
			obs::warn!("credentials could not be cleared after terminal authentication failure");
		}
	}
}

/// Login request body.
#[derive(Clone, Debug, Serialize)]
struct LoginBody<'a> {
	email: &'a str,
	password: &'a str,
}

/// Authentication session bound to one [`Client`].
pub struct Session<T = ReqwestTransport>
where
	T: ?Sized + Transport,
{
	client: Client<T>,
	logout_handler: Arc<dyn LogoutHandler>,
}
impl<T> Session<T>
where
	T: ?Sized + Transport,
{
	/// Creates a session whose logout policy clears the client's credential store.
	pub fn new(client: Client<T>) -> Self {
		let logout_handler = Arc::new(ClearCredentials(client.store().clone()));

		Self { client, logout_handler }
	}

	/// Replaces the logout policy, e.g. to also redirect the user interface.
	pub fn with_logout_handler(mut self, handler: impl 'static + LogoutHandler) -> Self {
		self.logout_handler = Arc::new(handler);

		self
	}

	/// Returns the underlying client.
	pub fn client(&self) -> &Client<T> {
		&self.client
	}

	/// Signs in and stores the issued credentials and user record.
	///
	/// The login endpoint is excluded from recovery, so bad credentials surface as a terminal
	/// authentication error without touching the refresh path.
	pub async fn login(&self, email: &str, password: &str) -> Result<TokenGrant> {
		let path = self.client.config().login_path.clone();

		self.observe(&path, async {
			let response = self.client.post(path.as_str(), &LoginBody { email, password }).await?;
			let grant = parse_grant(&response)?;

			self.store_credentials(&grant.pair(), grant.user.as_ref());
			obs::info!(path = %path, "signed in");

			Ok::<_, Error>(grant)
		})
		.await
	}

	/// Registers a new account. Nothing is stored; the account must be verified and signed in
	/// separately.
	pub async fn register<B>(&self, payload: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		let path = self.client.config().register_path.clone();

		self.observe(&path, self.client.post(path.as_str(), payload)).await
	}

	/// Signs out: notifies the backend when an access token is stored, then always clears the
	/// local credentials. A failed backend call is logged and otherwise ignored.
	pub async fn logout(&self) {
		let path = self.client.config().logout_path.clone();

		if self.client.store().access_token().is_some() {
			let notified =
				self.observe(&path, self.client.post(path.as_str(), &serde_json::json!({}))).await;

			if let Err(e) = notified {
				obs::warn!(path = %path, error = %e, "backend logout failed; clearing locally");
			}
		}

		if !self.client.store().clear_all() {
			obs::warn!("credentials could not be cleared on logout");
		}
	}

	/// Returns `true` when both an access token and a user record are stored.
	pub fn is_authenticated(&self) -> bool {
		let store = self.client.store();

		store.access_token().is_some() && store.current_user().is_some()
	}

	/// Checks the stored session, clearing a half-written one (token without user record).
	pub fn validate_session(&self) -> bool {
		let store = self.client.store();

		if store.access_token().is_none() {
			return false;
		}
		if store.current_user().is_none() {
			store.clear_all();

			return false;
		}

		true
	}

	/// Returns the stored user record.
	pub fn current_user(&self) -> Option<serde_json::Value> {
		self.client.store().current_user()
	}

	/// Returns `true` when the stored user's `role` matches `role`, ignoring ASCII case.
	pub fn has_role(&self, role: &str) -> bool {
		self.current_user()
			.as_ref()
			.and_then(|user| user.get("role"))
			.and_then(serde_json::Value::as_str)
			.is_some_and(|stored| stored.eq_ignore_ascii_case(role))
	}

	/// Returns `true` for administrators.
	pub fn is_admin(&self) -> bool {
		self.has_role(ADMIN_ROLE)
	}

	/// Stores a credential pair and, when given, the user record.
	///
	/// A pair without a refresh token removes any previously stored one in the same write, so a
	/// new session never inherits another session's refresh credential.
	pub fn store_credentials(&self, pair: &CredentialPair, user: Option<&serde_json::Value>) -> bool {
		let store = self.client.store();
		let mut stored = store.replace_pair(pair);

		if let Some(user) = user {
			stored &= store.set_current_user(user);
		}

		stored
	}

	/// Runs the logout policy when `result` is a terminal authentication failure, then hands
	/// the result back unchanged.
	pub fn guard<R>(&self, result: Result<R>) -> Result<R> {
		if let Some(e) = result.as_ref().err().filter(|e| e.is_terminal_auth()) {
			obs::info!(error = %e, "terminal authentication failure; running logout policy");
			self.logout_handler.handle_logout();
		}

		result
	}

	/// Awaits `fut` and passes its result through [`guard`](Self::guard).
	pub async fn guarded<F, R>(&self, fut: F) -> Result<R>
	where
		F: Future<Output = Result<R>>,
	{
		self.guard(fut.await)
	}

	async fn observe<F, R>(&self, path: &str, fut: F) -> Result<R>
	where
		F: Future<Output = Result<R>>,
	{
		const STAGE: Stage = Stage::Session;

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);

		let result = CallSpan::new(STAGE, path).instrument(fut).await;

		obs::record_call_outcome(
			STAGE,
			if result.is_ok() { CallOutcome::Success } else { CallOutcome::Failure },
		);

		result
	}
}
impl<T> Debug for Session<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session").field("client", &self.client).finish()
	}
}

fn parse_grant(response: &ApiResponse) -> Result<TokenGrant, ClassifiedError> {
	TokenGrant::from_slice(&response.body).map_err(|e| {
		ClassifiedError::new(ErrorKind::Server, e.to_string())
			.with_status(response.status.as_u16())
			.with_code("INVALID_LOGIN_RESPONSE")
	})
}
