//! Access/refresh token pair owned by the credential store.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access token plus the optional refresh token that can mint its successor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
	/// Short-lived bearer credential.
	pub access_token: TokenSecret,
	/// Longer-lived credential used only against the refresh endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
}
impl CredentialPair {
	/// Builds a pair from raw token strings.
	pub fn new(access_token: impl Into<String>, refresh_token: Option<impl Into<String>>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: refresh_token.map(TokenSecret::new),
		}
	}
}
