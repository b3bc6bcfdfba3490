//! Pre-send hook attaching the stored access token to outbound requests.

// self
use crate::{
	auth::TokenSecret,
	client::request::RequestDescriptor,
	config::ClientConfig,
	error::ClassifiedError,
	http::TransportRequest,
	obs,
	store::CredentialStore,
};

/// Reads the current access token for each dispatch.
///
/// Store failures are not fatal: the request goes out without an `Authorization` header and
/// the backend's 401 routes it into the refresh path.
#[derive(Clone, Copy, Debug)]
pub struct RequestAuthenticator<'a> {
	store: &'a CredentialStore,
}
impl<'a> RequestAuthenticator<'a> {
	/// Binds the authenticator to a credential store.
	pub fn new(store: &'a CredentialStore) -> Self {
		Self { store }
	}

	/// Returns the token the next dispatch should carry, if any.
	pub fn current_token(&self) -> Option<TokenSecret> {
		let token = self.store.access_token();

		if token.is_none() {
			obs::debug!("no access token stored; sending request unauthenticated");
		}

		token
	}

	/// Resolves `descriptor` into a transport request carrying the current access token.
	///
	/// Returns the token that was attached so a later 401 can be matched against the
	/// credential it was actually sent with.
	pub fn authenticate(
		&self,
		descriptor: &RequestDescriptor,
		config: &ClientConfig,
	) -> Result<(TransportRequest, Option<TokenSecret>), ClassifiedError> {
		let token = self.current_token();
		let request = descriptor.to_transport(config, token.as_ref())?;

		Ok((request, token))
	}
}
