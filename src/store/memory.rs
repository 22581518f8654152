//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{Credential, Identity},
	store::{CredentialStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<Identity, Credential>>>;

/// Thread-safe storage backend that keeps credentials in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	fn get_now(map: StoreMap, identity: Identity) -> Option<Credential> {
		map.read().get(&identity).cloned()
	}

	fn save_now(map: StoreMap, credential: Credential) -> Result<(), StoreError> {
		map.write().insert(credential.identity.clone(), credential);

		Ok(())
	}

	fn delete_now(map: StoreMap, identity: Identity) -> Result<(), StoreError> {
		map.write().remove(&identity);

		Ok(())
	}
}
impl CredentialStore for MemoryStore {
	fn get<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<Credential>> {
		let map = self.0.clone();
		let identity = identity.to_owned();

		Box::pin(async move { Ok(Self::get_now(map, identity)) })
	}

	fn save(&self, credential: Credential) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, credential) })
	}

	fn delete<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let identity = identity.to_owned();

		Box::pin(async move { Self::delete_now(map, identity) })
	}
}
