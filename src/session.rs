//! Session lifecycle: validity-checked credential access, singleflight-guarded refresh, and
//! plain login.

// self
use crate::{
	_prelude::*,
	auth::{Credential, Identity},
	error::AuthError,
	flight::SingleFlight,
	limit::RateLimiter,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	shutdown::CancelToken,
	store::{CredentialStore, StoreError},
	upstream::AuthTransport,
};

/// Hook invoked after every refresh or login that minted a new credential.
///
/// Observers run inline on the refreshing task; keep them cheap. The `persisted` argument reports
/// whether the new credential reached the store, so embedders can schedule their own retry when
/// persistence failed while the in-memory credential is already live.
pub trait SessionObserver
where
	Self: Send + Sync,
{
	/// Called with the freshly minted credential and the outcome of persisting it.
	fn credential_refreshed(&self, credential: &Credential, persisted: Result<(), &StoreError>);
}

/// Keeps stored credentials usable: hands back valid ones as-is and refreshes expired ones,
/// collapsing concurrent refreshes for the same identity into a single upstream call.
pub struct SessionRefresher {
	store: Arc<dyn CredentialStore>,
	transport: Arc<dyn AuthTransport>,
	limiter: Arc<RateLimiter>,
	flights: SingleFlight<Identity, Credential>,
	observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}
impl SessionRefresher {
	/// Creates a refresher over the given store, upstream transport, and upstream limiter.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		transport: Arc<dyn AuthTransport>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self { store, transport, limiter, flights: SingleFlight::new(), observers: RwLock::new(Vec::new()) }
	}

	/// Registers an observer notified after every minted credential.
	pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
		self.observers.write().push(observer);
	}

	/// Returns a credential guaranteed valid at the time of the check.
	///
	/// A stored valid credential is returned without touching the upstream. An expired one is
	/// refreshed through the singleflight coordinator, so any number of concurrent callers for
	/// the same identity cost exactly one upstream refresh and all receive the identical result.
	pub async fn ensure_valid(
		&self,
		identity: &Identity,
		cancel: &CancelToken,
	) -> Result<Credential> {
		let span = OpSpan::new(OpKind::Refresh, "ensure_valid");

		record_op_outcome(OpKind::Refresh, OpOutcome::Attempt);

		let result = span.instrument(self.ensure_valid_inner(identity, cancel)).await;

		match &result {
			Ok(_) => record_op_outcome(OpKind::Refresh, OpOutcome::Success),
			Err(_) => record_op_outcome(OpKind::Refresh, OpOutcome::Failure),
		}

		result
	}

	async fn ensure_valid_inner(
		&self,
		identity: &Identity,
		cancel: &CancelToken,
	) -> Result<Credential> {
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let current = self
			.store
			.get(identity)
			.await?
			.ok_or_else(|| AuthError::UnknownIdentity { identity: identity.to_string() })?;

		if current.is_valid() {
			return Ok(current);
		}

		let refresh = self.flights.run(identity.clone(), async {
			// An overlapping flight may have rotated the tokens between this caller's snapshot
			// and its turn at the slot; work from the stored credential, not the snapshot, so a
			// dead refresh token is never replayed against the upstream.
			let current = match self.store.get(identity).await? {
				Some(stored) if stored.is_valid() => return Ok(stored),
				Some(stored) => stored,
				None => current,
			};

			self.limiter.acquire(cancel).await?;

			let grant = self.transport.refresh(current.refresh_token.expose()).await?;
			let refreshed = Credential::new(
				identity.clone(),
				grant.access_token,
				grant.refresh_token,
				grant.access_expiration,
			);
			let persisted = self.store.save(refreshed.clone()).await;

			#[cfg(feature = "tracing")]
			if let Err(e) = &persisted {
				tracing::warn!(
					identity = %refreshed.identity,
					error = %e,
					"Refreshed credential could not be persisted; continuing with the in-memory copy.",
				);
			}

			self.notify_observers(&refreshed, &persisted);

			Ok(refreshed)
		});
		let (outcome, _adopted) = tokio::select! {
			() = cancel.cancelled() => return Err(Error::Cancelled),
			outcome = refresh => outcome,
		};

		outcome.map_err(|e| Error::shared(&e))
	}

	/// Exchanges an identity + secret for a fresh credential and persists it.
	///
	/// When the upstream explicitly rejects the credentials, any stored credential for the
	/// identity is deleted before the error propagates, since its refresh token is dead weight.
	pub async fn login(
		&self,
		identity: &Identity,
		secret: &str,
		cancel: &CancelToken,
	) -> Result<Credential> {
		let span = OpSpan::new(OpKind::Login, "login");

		record_op_outcome(OpKind::Login, OpOutcome::Attempt);

		let result = span.instrument(self.login_inner(identity, secret, cancel)).await;

		match &result {
			Ok(_) => record_op_outcome(OpKind::Login, OpOutcome::Success),
			Err(_) => record_op_outcome(OpKind::Login, OpOutcome::Failure),
		}

		result
	}

	async fn login_inner(
		&self,
		identity: &Identity,
		secret: &str,
		cancel: &CancelToken,
	) -> Result<Credential> {
		self.limiter.acquire(cancel).await?;

		match self.transport.login(identity, secret).await {
			Ok(grant) => {
				let credential = Credential::new(
					identity.clone(),
					grant.access_token,
					grant.refresh_token,
					grant.access_expiration,
				);
				let persisted = self.store.save(credential.clone()).await;

				#[cfg(feature = "tracing")]
				if let Err(e) = &persisted {
					tracing::warn!(
						identity = %credential.identity,
						error = %e,
						"Logged-in credential could not be persisted; continuing with the in-memory copy.",
					);
				}

				self.notify_observers(&credential, &persisted);

				Ok(credential)
			},
			Err(error) => {
				if matches!(error, Error::Auth(AuthError::InvalidCredentials)) {
					// The stored refresh token belongs to the rejected account state; drop it so
					// later `ensure_valid` calls fail fast with `UnknownIdentity`.
					if let Err(_delete_error) = self.store.delete(identity).await {
						#[cfg(feature = "tracing")]
						tracing::warn!(
							identity = %identity,
							error = %_delete_error,
							"Stored credential could not be deleted after a rejected login.",
						);
					}
				}

				Err(error)
			},
		}
	}

	fn notify_observers(&self, credential: &Credential, persisted: &Result<(), StoreError>) {
		let observers = self.observers.read().clone();
		let persisted = persisted.as_ref().map(|_| ());

		for observer in observers {
			observer.credential_refreshed(credential, persisted);
		}
	}
}
impl Debug for SessionRefresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionRefresher")
			.field("flights", &self.flights)
			.field("observers", &self.observers.read().len())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		limit::RateLimit,
		store::{MemoryStore, StoreFuture},
	};

	#[derive(Debug, Default)]
	struct RecordingObserver {
		events: Mutex<Vec<(Credential, Result<(), StoreError>)>>,
	}
	impl SessionObserver for RecordingObserver {
		fn credential_refreshed(&self, credential: &Credential, persisted: Result<(), &StoreError>) {
			self.events.lock().push((credential.clone(), persisted.map_err(Clone::clone)));
		}
	}

	/// Serves a one-shot stale snapshot before falling through to the backing store, standing in
	/// for a reader that loses the race with an overlapping refresh.
	#[derive(Debug, Default)]
	struct StaleSnapshotStore {
		inner: MemoryStore,
		stale: Mutex<Option<Credential>>,
	}
	impl CredentialStore for StaleSnapshotStore {
		fn get<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<Credential>> {
			if let Some(stale) = self.stale.lock().take() {
				return Box::pin(async move { Ok(Some(stale)) });
			}

			self.inner.get(identity)
		}

		fn save(&self, credential: Credential) -> StoreFuture<'_, ()> {
			self.inner.save(credential)
		}

		fn delete<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, ()> {
			self.inner.delete(identity)
		}
	}

	#[derive(Debug, Default)]
	struct FailingSaveStore(MemoryStore);
	impl CredentialStore for FailingSaveStore {
		fn get<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<Credential>> {
			self.0.get(identity)
		}

		fn save(&self, _credential: Credential) -> StoreFuture<'_, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "disk full".into() }) })
		}

		fn delete<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, ()> {
			self.0.delete(identity)
		}
	}

	#[tokio::test]
	async fn valid_credential_skips_the_upstream() {
		let (refresher, store, transport) = build_test_refresher();
		let identity = test_identity();

		store.save(valid_credential(&identity)).await.expect("Seeding the store should succeed.");

		let credential = refresher
			.ensure_valid(&identity, &CancelToken::new())
			.await
			.expect("A stored valid credential should be returned as-is.");

		assert_eq!(credential.access_token.expose(), "fresh-access");
		assert_eq!(transport.refresh_calls(), 0);
	}

	#[tokio::test]
	async fn expired_credential_is_refreshed_and_persisted() {
		let (refresher, store, transport) = build_test_refresher();
		let identity = test_identity();

		store.save(expired_credential(&identity)).await.expect("Seeding the store should succeed.");

		let credential = refresher
			.ensure_valid(&identity, &CancelToken::new())
			.await
			.expect("An expired credential should be refreshed.");

		assert_eq!(credential.access_token.expose(), "access-1");
		assert_eq!(transport.refresh_calls(), 1);

		let stored = store
			.get(&identity)
			.await
			.expect("Reading the store should succeed.")
			.expect("The refreshed credential should be persisted.");

		assert_eq!(stored.refresh_token.expose(), "refresh-1");
	}

	#[tokio::test]
	async fn stale_snapshot_does_not_replay_a_rotated_refresh_token() {
		let store = Arc::new(StaleSnapshotStore::default());
		let transport = Arc::new(MockAuthTransport::default());
		let limiter = Arc::new(RateLimiter::new(RateLimit::new(u32::MAX, 1_000_000.)));
		let refresher = SessionRefresher::new(store.clone(), transport.clone(), limiter);
		let identity = test_identity();
		let rotated = valid_credential(&identity);

		store.inner.save(rotated.clone()).await.expect("Seeding the store should succeed.");
		*store.stale.lock() = Some(expired_credential(&identity));

		let credential = refresher
			.ensure_valid(&identity, &CancelToken::new())
			.await
			.expect("A caller holding a stale snapshot should adopt the rotated credential.");

		assert_eq!(credential, rotated);
		assert_eq!(
			transport.refresh_calls(),
			0,
			"The already-rotated refresh token must not be replayed upstream.",
		);
	}

	#[tokio::test]
	async fn unknown_identity_is_an_auth_failure() {
		let (refresher, _, _) = build_test_refresher();
		let error = refresher
			.ensure_valid(&test_identity(), &CancelToken::new())
			.await
			.expect_err("An identity without a stored credential must not be refreshable.");

		assert!(matches!(error, Error::Auth(AuthError::UnknownIdentity { .. })));
	}

	#[tokio::test]
	async fn persistence_failure_still_yields_the_credential() {
		let store = Arc::new(FailingSaveStore::default());
		let transport = Arc::new(MockAuthTransport::default());
		let limiter = Arc::new(RateLimiter::new(RateLimit::new(u32::MAX, 1_000_000.)));
		let refresher = SessionRefresher::new(store.clone(), transport, limiter);
		let observer = Arc::new(RecordingObserver::default());
		let identity = test_identity();

		refresher.subscribe(observer.clone());
		store.0.save(expired_credential(&identity))
			.await
			.expect("Seeding the inner store should succeed.");

		let credential = refresher
			.ensure_valid(&identity, &CancelToken::new())
			.await
			.expect("A failed save must not discard the freshly minted credential.");

		assert_eq!(credential.access_token.expose(), "access-1");

		let events = observer.events.lock();

		assert_eq!(events.len(), 1);
		assert_eq!(events[0].0, credential);
		assert!(matches!(events[0].1, Err(StoreError::Backend { .. })));
	}

	#[tokio::test]
	async fn rejected_refresh_propagates_the_auth_error() {
		let store = Arc::new(MemoryStore::default());
		let transport = Arc::new(
			MockAuthTransport::default()
				.reject_refresh(AuthError::RefreshRejected { reason: "revoked".into() }),
		);
		let limiter = Arc::new(RateLimiter::new(RateLimit::new(u32::MAX, 1_000_000.)));
		let refresher = SessionRefresher::new(store.clone(), transport, limiter);
		let identity = test_identity();

		store.save(expired_credential(&identity)).await.expect("Seeding the store should succeed.");

		let error = refresher
			.ensure_valid(&identity, &CancelToken::new())
			.await
			.expect_err("A rejected refresh token must propagate.");

		assert!(error.is_auth());
	}

	#[tokio::test]
	async fn login_persists_and_notifies() {
		let (refresher, store, transport) = build_test_refresher();
		let observer = Arc::new(RecordingObserver::default());
		let identity = test_identity();

		refresher.subscribe(observer.clone());

		let credential = refresher
			.login(&identity, "hunter2", &CancelToken::new())
			.await
			.expect("Login with accepted credentials should succeed.");

		assert_eq!(credential.access_token.expose(), "access-1");
		assert_eq!(transport.login_calls(), 1);
		assert!(
			store.get(&identity).await.expect("Reading the store should succeed.").is_some(),
			"Login should persist the minted credential.",
		);

		let events = observer.events.lock();

		assert_eq!(events.len(), 1);
		assert!(events[0].1.is_ok());
	}

	#[tokio::test]
	async fn rejected_login_deletes_the_stored_credential() {
		let store = Arc::new(MemoryStore::default());
		let transport = Arc::new(MockAuthTransport::default().reject_login(AuthError::InvalidCredentials));
		let limiter = Arc::new(RateLimiter::new(RateLimit::new(u32::MAX, 1_000_000.)));
		let refresher = SessionRefresher::new(store.clone(), transport, limiter);
		let identity = test_identity();

		store.save(expired_credential(&identity)).await.expect("Seeding the store should succeed.");

		let error = refresher
			.login(&identity, "wrong", &CancelToken::new())
			.await
			.expect_err("A rejected login must propagate.");

		assert!(matches!(error, Error::Auth(AuthError::InvalidCredentials)));
		assert!(
			store.get(&identity).await.expect("Reading the store should succeed.").is_none(),
			"A rejected login should evict the stored credential.",
		);
	}

	#[tokio::test]
	async fn pre_cancelled_ensure_valid_short_circuits() {
		let (refresher, store, transport) = build_test_refresher();
		let identity = test_identity();
		let cancel = CancelToken::new();

		store.save(expired_credential(&identity)).await.expect("Seeding the store should succeed.");
		cancel.cancel();

		let error = refresher
			.ensure_valid(&identity, &cancel)
			.await
			.expect_err("A fired cancellation signal must stop the refresh before it starts.");

		assert!(error.is_cancelled());
		assert_eq!(transport.refresh_calls(), 0);
	}
}
