//! Credential persistence: the key-value medium contract, built-in media, and the degrading
//! [`CredentialStore`] facade used by the request pipeline.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, TokenSecret},
	obs,
};

/// Persistent key-value medium holding credential strings.
///
/// Multi-key operations must be atomic with respect to each other so a reader never observes
/// half of a rotated pair.
pub trait KeyValueStore
where
	Self: Send + Sync,
{
	/// Reads the values for `keys`, in order, under one consistent view.
	fn read_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

	/// Writes every entry in one atomic step.
	fn write_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError>;

	/// Removes every key in one atomic step; missing keys are ignored.
	fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError>;

	/// Writes `entries` and removes `removed` in one atomic step.
	fn replace_many(&self, entries: &[(&str, &str)], removed: &[&str]) -> Result<(), StoreError>;
}

/// Error type produced by [`KeyValueStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Stored data could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The medium itself is unavailable or failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Keys under which credentials and the current user are persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
	/// Key holding the access token.
	pub access_token: String,
	/// Key holding the refresh token.
	pub refresh_token: String,
	/// Key holding the JSON-encoded current-user record.
	pub user: String,
}
impl StorageKeys {
	/// Returns every key managed by the client.
	pub fn all(&self) -> [&str; 3] {
		[self.access_token.as_str(), self.refresh_token.as_str(), self.user.as_str()]
	}

	pub(crate) fn is_valid(&self) -> bool {
		let [a, r, u] = self.all();

		!a.is_empty() && !r.is_empty() && !u.is_empty() && a != r && a != u && r != u
	}
}
impl Default for StorageKeys {
	fn default() -> Self {
		Self {
			access_token: "lifebff_access_token".into(),
			refresh_token: "lifebff_refresh_token".into(),
			user: "lifebff_user".into(),
		}
	}
}

/// Degrading facade over a [`KeyValueStore`].
///
/// Read failures surface as "absent" and write failures as `false`; neither ever propagates
/// to the request pipeline.
#[derive(Clone)]
pub struct CredentialStore {
	medium: Arc<dyn KeyValueStore>,
	keys: StorageKeys,
}
impl CredentialStore {
	/// Wraps a medium with the provided key layout.
	pub fn new(medium: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
		Self { medium, keys }
	}

	/// Wraps a fresh [`MemoryStore`] with the default key layout.
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryStore::default()), StorageKeys::default())
	}

	/// Returns the key layout.
	pub fn keys(&self) -> &StorageKeys {
		&self.keys
	}

	/// Reads one key, returning `None` when the key is missing or the medium fails.
	pub fn get(&self, key: &str) -> Option<String> {
		match self.medium.read_many(&[key]) {
			Ok(mut values) => values.pop().flatten(),
			Err(e) => {
				obs::warn!(key, error = %e, "credential store read failed");

				None
			},
		}
	}

	/// Writes one key, returning `false` when the medium fails.
	pub fn set(&self, key: &str, value: &str) -> bool {
		self.write(&[(key, value)])
	}

	/// Removes the provided keys, returning `false` when the medium fails.
	pub fn clear(&self, keys: &[&str]) -> bool {
		match self.medium.remove_many(keys) {
			Ok(()) => true,
			Err(e) => {
				obs::warn!(error = %e, "credential store clear failed");

				false
			},
		}
	}

	/// Removes every key managed by the client.
	pub fn clear_all(&self) -> bool {
		self.clear(&self.keys.all())
	}

	/// Returns the stored access token.
	pub fn access_token(&self) -> Option<TokenSecret> {
		self.get(&self.keys.access_token).filter(|v| !v.is_empty()).map(TokenSecret::new)
	}

	/// Returns the stored refresh token.
	pub fn refresh_token(&self) -> Option<TokenSecret> {
		self.get(&self.keys.refresh_token).filter(|v| !v.is_empty()).map(TokenSecret::new)
	}

	/// Returns the stored access and refresh tokens, read under one consistent view.
	pub fn tokens(&self) -> (Option<TokenSecret>, Option<TokenSecret>) {
		let keys = [self.keys.access_token.as_str(), self.keys.refresh_token.as_str()];
		let values = match self.medium.read_many(&keys) {
			Ok(values) => values,
			Err(e) => {
				obs::warn!(error = %e, "credential store read failed");

				return (None, None);
			},
		};
		let mut values =
			values.into_iter().map(|v| v.filter(|v| !v.is_empty()).map(TokenSecret::new));
		let access = values.next().flatten();
		let refresh = values.next().flatten();

		(access, refresh)
	}

	/// Returns the stored pair, or `None` when no access token is stored.
	pub fn pair(&self) -> Option<CredentialPair> {
		let (access_token, refresh_token) = self.tokens();

		Some(CredentialPair { access_token: access_token?, refresh_token })
	}

	/// Persists the pair atomically. A pair without a refresh token keeps the stored one.
	pub fn store_pair(&self, pair: &CredentialPair) -> bool {
		match &pair.refresh_token {
			Some(refresh) => self.write(&[
				(self.keys.access_token.as_str(), pair.access_token.expose()),
				(self.keys.refresh_token.as_str(), refresh.expose()),
			]),
			None => self.write(&[(self.keys.access_token.as_str(), pair.access_token.expose())]),
		}
	}

	/// Replaces the stored pair atomically. A pair without a refresh token removes the stored
	/// one in the same step, so no reader sees the new access token next to an old refresh token.
	pub fn replace_pair(&self, pair: &CredentialPair) -> bool {
		let access = (self.keys.access_token.as_str(), pair.access_token.expose());
		let refresh_key = self.keys.refresh_token.as_str();
		let result = match &pair.refresh_token {
			Some(refresh) => self.medium.replace_many(&[access, (refresh_key, refresh.expose())], &[]),
			None => self.medium.replace_many(&[access], &[refresh_key]),
		};

		match result {
			Ok(()) => true,
			Err(e) => {
				obs::warn!(error = %e, "credential store replace failed");

				false
			},
		}
	}

	/// Returns the stored current-user record.
	pub fn current_user(&self) -> Option<serde_json::Value> {
		let raw = self.get(&self.keys.user)?;

		match serde_json::from_str(&raw) {
			Ok(value) => Some(value),
			Err(e) => {
				obs::warn!(error = %e, "stored user record is corrupt");

				None
			},
		}
	}

	/// Persists the current-user record as JSON.
	pub fn set_current_user(&self, user: &serde_json::Value) -> bool {
		self.set(&self.keys.user, &user.to_string())
	}

	fn write(&self, entries: &[(&str, &str)]) -> bool {
		match self.medium.write_many(entries) {
			Ok(()) => true,
			Err(e) => {
				obs::warn!(error = %e, "credential store write failed");

				false
			},
		}
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialStore").field("keys", &self.keys).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct BrokenMedium;
	impl KeyValueStore for BrokenMedium {
		fn read_many(&self, _keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
			Err(StoreError::Backend { message: "medium unavailable".into() })
		}

		fn write_many(&self, _entries: &[(&str, &str)]) -> Result<(), StoreError> {
			Err(StoreError::Backend { message: "quota exceeded".into() })
		}

		fn remove_many(&self, _keys: &[&str]) -> Result<(), StoreError> {
			Err(StoreError::Backend { message: "medium unavailable".into() })
		}

		fn replace_many(&self, _entries: &[(&str, &str)], _removed: &[&str]) -> Result<(), StoreError> {
			Err(StoreError::Backend { message: "medium unavailable".into() })
		}
	}

	// Counts mutating calls made against an in-memory medium.
	#[derive(Default)]
	struct CountingMedium {
		memory: MemoryStore,
		mutations: std::sync::atomic::AtomicUsize,
	}
	impl CountingMedium {
		fn mutated(&self) {
			self.mutations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
		}
	}
	impl KeyValueStore for CountingMedium {
		fn read_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
			self.memory.read_many(keys)
		}

		fn write_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
			self.mutated();
			self.memory.write_many(entries)
		}

		fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
			self.mutated();
			self.memory.remove_many(keys)
		}

		fn replace_many(&self, entries: &[(&str, &str)], removed: &[&str]) -> Result<(), StoreError> {
			self.mutated();
			self.memory.replace_many(entries, removed)
		}
	}

	#[test]
	fn broken_medium_degrades_to_absent_and_false() {
		let store = CredentialStore::new(Arc::new(BrokenMedium), StorageKeys::default());

		assert!(store.access_token().is_none());
		assert!(store.pair().is_none());
		assert!(store.current_user().is_none());
		assert!(!store.set("k", "v"));
		assert!(!store.store_pair(&CredentialPair::new("a", Some("r"))));
		assert!(!store.replace_pair(&CredentialPair::new("a", None::<String>)));
		assert!(!store.clear_all());
	}

	#[test]
	fn pair_without_refresh_keeps_stored_refresh_token() {
		let store = CredentialStore::in_memory();

		assert!(store.store_pair(&CredentialPair::new("a1", Some("r1"))));
		assert!(store.store_pair(&CredentialPair::new("a2", None::<String>)));

		let pair = store.pair().expect("Pair should be stored.");

		assert_eq!(pair.access_token.expose(), "a2");
		assert_eq!(pair.refresh_token.as_ref().map(TokenSecret::expose), Some("r1"));
	}

	#[test]
	fn replace_pair_drops_old_refresh_token_in_one_step() {
		let medium = Arc::new(CountingMedium::default());
		let store = CredentialStore::new(medium.clone(), StorageKeys::default());

		assert!(store.store_pair(&CredentialPair::new("a1", Some("r1"))));
		assert!(store.replace_pair(&CredentialPair::new("a2", None::<String>)));
		assert_eq!(medium.mutations.load(std::sync::atomic::Ordering::SeqCst), 2);
		assert_eq!(store.tokens(), (Some(TokenSecret::new("a2")), None));

		assert!(store.replace_pair(&CredentialPair::new("a3", Some("r3"))));
		assert_eq!(store.pair(), Some(CredentialPair::new("a3", Some("r3"))));
	}

	#[test]
	fn corrupt_user_record_reads_as_absent() {
		let store = CredentialStore::in_memory();

		assert!(store.set(&store.keys().user.clone(), "{not json"));
		assert!(store.current_user().is_none());
		assert!(store.set_current_user(&serde_json::json!({ "role": "USER" })));
		assert_eq!(store.current_user(), Some(serde_json::json!({ "role": "USER" })));
	}

	#[test]
	fn storage_keys_reject_collisions() {
		let keys = StorageKeys { user: "lifebff_access_token".into(), ..StorageKeys::default() };

		assert!(StorageKeys::default().is_valid());
		assert!(!keys.is_valid());
	}
}
