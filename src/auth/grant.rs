//! Token payloads returned by the login and refresh endpoints.
//!
//! The backend answers either with a flat body (`{"accessToken": .., "refreshToken": ..}`) or
//! wrapped in an envelope (`{"success": true, "data": {..}}`). Both shapes are accepted; a
//! body without an access token is rejected.

// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, TokenSecret},
};

/// Errors raised while decoding a token-issuing response body.
#[derive(Debug, ThisError)]
pub enum GrantParseError {
	/// The body was not valid JSON for the expected shape.
	#[error("Token response is malformed.")]
	Malformed(#[from] serde_path_to_error::Error<serde_json::Error>),
	/// The body parsed but did not contain an access token.
	#[error("Token response is missing accessToken.")]
	MissingAccessToken,
	/// The envelope explicitly reported failure.
	#[error("Token response reported failure: {message}.")]
	Rejected {
		/// Message carried by the envelope, if any.
		message: String,
	},
}

/// Credentials minted by the login or refresh endpoint, plus the user record when present.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the backend returned one.
	pub refresh_token: Option<TokenSecret>,
	/// User record carried by login responses.
	pub user: Option<serde_json::Value>,
}
impl TokenGrant {
	/// Decodes a refresh or login response body.
	pub fn from_slice(body: &[u8]) -> Result<Self, GrantParseError> {
		let mut de = serde_json::Deserializer::from_slice(body);
		let raw: RawEnvelope = serde_path_to_error::deserialize(&mut de)?;

		if raw.success == Some(false) {
			return Err(GrantParseError::Rejected {
				message: raw.message.unwrap_or_else(|| "unspecified".into()),
			});
		}

		let payload = match raw.data {
			Some(data) => data,
			None => raw.flat,
		};
		let access_token = payload
			.access_token
			.or(payload.token)
			.filter(|token| !token.is_empty())
			.ok_or(GrantParseError::MissingAccessToken)?;

		Ok(Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: payload.refresh_token.filter(|t| !t.is_empty()).map(TokenSecret::new),
			user: payload.user,
		})
	}

	/// Returns the token pair carried by the grant.
	pub fn pair(&self) -> CredentialPair {
		CredentialPair {
			access_token: self.access_token.clone(),
			refresh_token: self.refresh_token.clone(),
		}
	}
}

#[derive(Deserialize)]
struct RawEnvelope {
	#[serde(default)]
	success: Option<bool>,
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	data: Option<RawGrant>,
	#[serde(flatten)]
	flat: RawGrant,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGrant {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	user: Option<serde_json::Value>,
}
