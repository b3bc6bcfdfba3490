//! Credential models: redacted secrets, token pairs, and issued-grant payloads.

pub mod grant;
pub mod pair;
pub mod secret;

pub use grant::*;
pub use pair::*;
pub use secret::*;
