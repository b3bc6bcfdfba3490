//! Thread-safe in-memory [`KeyValueStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	store::{KeyValueStore, StoreError},
};

type StoreMap = Arc<RwLock<HashMap<String, String>>>;

/// Thread-safe medium that keeps credentials in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Returns a copy of the raw value stored under `key`.
	pub fn raw(&self, key: &str) -> Option<String> {
		self.0.read().get(key).cloned()
	}

	/// Returns the number of stored keys.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl KeyValueStore for MemoryStore {
	fn read_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
		let guard = self.0.read();

		Ok(keys.iter().map(|key| guard.get(*key).cloned()).collect())
	}

	fn write_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
		let mut guard = self.0.write();

		for (key, value) in entries {
			guard.insert((*key).to_owned(), (*value).to_owned());
		}

		Ok(())
	}

	fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
		self.replace_many(&[], keys)
	}

	fn replace_many(&self, entries: &[(&str, &str)], removed: &[&str]) -> Result<(), StoreError> {
		let mut guard = self.0.write();

		for key in removed {
			guard.remove(*key);
		}
		for (key, value) in entries {
			guard.insert((*key).to_owned(), (*value).to_owned());
		}

		Ok(())
	}
}
