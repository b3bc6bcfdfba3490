//! Drives a [`Session`] against an in-process backend to show recovery from an expired token.
//!
//! 1. Implement [`Transport`] so requests never leave the process.
//! 2. Sign in; the backend issues an access token it already considers expired.
//! 3. Fetch the profile; the client refreshes once and replays the request.
//! 4. Hit an endpoint that rejects even the fresh token; [`Session::guarded`] runs the logout
//!    policy.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use color_eyre::Result;
use serde_json::json;
// self
use bearer_broker::{
	client::Client,
	config::ClientConfig,
	http::{Transport, TransportFuture, TransportRequest, TransportResponse},
	reqwest::StatusCode,
	session::Session,
	store::CredentialStore,
};

#[derive(Default)]
struct InProcessBackend {
	refreshes: AtomicUsize,
}
impl Transport for InProcessBackend {
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let response = match (request.url.path(), request.bearer_token()) {
				("/api/users/login", _) => TransportResponse::json(
					StatusCode::OK,
					&json!({
						"success": true,
						"data": {
							"user": { "email": "cook@example.com", "role": "USER" },
							"accessToken": "a1",
							"refreshToken": "r1"
						}
					}),
				),
				("/api/auth/refresh-token", _) => {
					self.refreshes.fetch_add(1, Ordering::SeqCst);

					TransportResponse::json(
						StatusCode::OK,
						&json!({ "accessToken": "a2", "refreshToken": "r2" }),
					)
				},
				("/api/profile", Some("a2")) =>
					TransportResponse::json(StatusCode::OK, &json!({ "email": "cook@example.com" })),
				_ => TransportResponse::new(StatusCode::UNAUTHORIZED, r#"{"message":"Unauthorized"}"#),
			};

			Ok(response)
		})
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let backend = Arc::new(InProcessBackend::default());
	let config = ClientConfig::builder_from_str("http://localhost:3000/api")?.build()?;
	let client: Client<InProcessBackend> =
		Client::with_transport(config, CredentialStore::in_memory(), backend.clone());
	let session = Session::new(client);

	session.login("cook@example.com", "s3cret").await?;

	let profile: serde_json::Value = session.client().get("/profile").await?.json()?;

	println!("Profile: {profile}.");
	println!("Refresh calls: {}.", backend.refreshes.load(Ordering::SeqCst));

	if let Err(e) = session.guarded(session.client().get("/admin/reports")).await {
		println!("Admin reports denied: {e}.");
	}

	println!("Still authenticated: {}.", session.is_authenticated());

	Ok(())
}
