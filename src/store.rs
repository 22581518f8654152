//! Storage contracts and the built-in in-memory credential store.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::Credential, auth::Identity};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for credentials, keyed by identity.
///
/// The courier core consumes this contract; backends (SQLite, files, in-memory) live with the
/// embedding application. Implementations must be safe for concurrent use: the refresher saves
/// from inside its singleflight critical section while other tasks read snapshots.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches the credential stored for the identity, if present.
	fn get<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<Credential>>;

	/// Persists or replaces the credential for its identity.
	fn save(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Removes any credential stored for the identity; removing a missing identity is not an
	/// error.
	fn delete<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures (e.g., serde) surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::Error;

	#[test]
	fn store_error_converts_into_courier_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let courier_error: Error = store_error.clone().into();

		assert!(matches!(courier_error, Error::Storage(_)));
		assert!(courier_error.to_string().contains("database unreachable"));

		let source = StdError::source(&courier_error)
			.expect("Courier error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
