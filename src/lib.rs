//! Resilient delivery core for notification bots - token-bucket admission control, singleflight
//! session refresh, and bounded-retry broadcast over rate-limited channels.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

#[cfg(test)]
use notify_courier as _;

pub mod auth;
pub mod broadcast;
pub mod error;
pub mod flight;
pub mod limit;
pub mod obs;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod upstream;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Scripted collaborator doubles and fixtures for integration tests; enabled via `cfg(test)`
	//! or the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::HashSet,
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use crate::{
		auth::{Credential, Identity, Recipient},
		broadcast::{ChannelFuture, MessageChannel, SendError},
		error::AuthError,
		limit::{RateLimit, RateLimiter},
		session::SessionRefresher,
		store::MemoryStore,
		upstream::{AuthFuture, AuthTransport, TokenGrant},
	};

	/// Identity fixture shared across session tests.
	pub fn test_identity() -> Identity {
		Identity::new("courier@example.com").expect("Identity fixture should be valid.")
	}

	/// Credential whose access token expired five minutes ago.
	pub fn expired_credential(identity: &Identity) -> Credential {
		Credential::new(
			identity.clone(),
			"stale-access",
			"stale-refresh",
			OffsetDateTime::now_utc() - Duration::minutes(5),
		)
	}

	/// Credential that stays valid for another hour.
	pub fn valid_credential(identity: &Identity) -> Credential {
		Credential::new(
			identity.clone(),
			"fresh-access",
			"fresh-refresh",
			OffsetDateTime::now_utc() + Duration::hours(1),
		)
	}

	/// Builds `n` distinct recipients named `recipient-0..recipient-n`.
	pub fn recipients(n: usize) -> HashSet<Recipient> {
		(0..n)
			.map(|i| {
				Recipient::new(format!("recipient-{i}")).expect("Recipient fixture should be valid.")
			})
			.collect()
	}

	/// Constructs a [`SessionRefresher`] over an in-memory store, a scripted transport, and an
	/// effectively unthrottled upstream limiter.
	pub fn build_test_refresher() -> (SessionRefresher, Arc<MemoryStore>, Arc<MockAuthTransport>) {
		let store = Arc::new(MemoryStore::default());
		let transport = Arc::new(MockAuthTransport::default());
		let limiter = Arc::new(RateLimiter::new(RateLimit::new(u32::MAX, 1_000_000.)));
		let refresher = SessionRefresher::new(store.clone(), transport.clone(), limiter);

		(refresher, store, transport)
	}

	/// Scripted [`AuthTransport`] double that counts calls and mints deterministic grants.
	#[derive(Debug, Default)]
	pub struct MockAuthTransport {
		login_calls: AtomicUsize,
		refresh_calls: AtomicUsize,
		login_rejection: Mutex<Option<AuthError>>,
		refresh_rejection: Mutex<Option<AuthError>>,
	}
	impl MockAuthTransport {
		/// Makes every subsequent login fail with the provided authentication error.
		pub fn reject_login(self, error: AuthError) -> Self {
			*self.login_rejection.lock() = Some(error);

			self
		}

		/// Makes every subsequent refresh fail with the provided authentication error.
		pub fn reject_refresh(self, error: AuthError) -> Self {
			*self.refresh_rejection.lock() = Some(error);

			self
		}

		/// Number of login calls observed so far.
		pub fn login_calls(&self) -> usize {
			self.login_calls.load(Ordering::SeqCst)
		}

		/// Number of refresh calls observed so far.
		pub fn refresh_calls(&self) -> usize {
			self.refresh_calls.load(Ordering::SeqCst)
		}

		fn mint(serial: usize) -> TokenGrant {
			TokenGrant {
				access_token: format!("access-{serial}"),
				refresh_token: format!("refresh-{serial}"),
				access_expiration: OffsetDateTime::now_utc() + Duration::hours(1),
			}
		}
	}
	impl AuthTransport for MockAuthTransport {
		fn login<'a>(&'a self, _identity: &'a Identity, _secret: &'a str) -> AuthFuture<'a, TokenGrant> {
			Box::pin(async move {
				let serial = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;

				match self.login_rejection.lock().clone() {
					Some(rejection) => Err(rejection.into()),
					None => Ok(Self::mint(serial)),
				}
			})
		}

		fn refresh<'a>(&'a self, _refresh_token: &'a str) -> AuthFuture<'a, TokenGrant> {
			Box::pin(async move {
				let serial = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

				match self.refresh_rejection.lock().clone() {
					Some(rejection) => Err(rejection.into()),
					None => Ok(Self::mint(serial)),
				}
			})
		}
	}

	/// Scripted [`MessageChannel`] double recording every attempt.
	#[derive(Debug, Default)]
	pub struct ScriptedChannel {
		latency: StdDuration,
		state: Mutex<ScriptedState>,
	}
	#[derive(Debug, Default)]
	struct ScriptedState {
		fail_always: HashSet<Recipient>,
		fail_once: HashSet<Recipient>,
		attempts: Vec<(Recipient, tokio::time::Instant)>,
	}
	impl ScriptedChannel {
		/// Marks recipients whose sends fail on every attempt.
		pub fn fail_always(self, recipients: impl IntoIterator<Item = Recipient>) -> Self {
			self.state.lock().fail_always.extend(recipients);

			self
		}

		/// Marks recipients whose first send fails and later sends succeed.
		pub fn fail_once(self, recipients: impl IntoIterator<Item = Recipient>) -> Self {
			self.state.lock().fail_once.extend(recipients);

			self
		}

		/// Adds a fixed per-send latency so cancellation tests can interleave.
		pub fn with_latency(mut self, latency: StdDuration) -> Self {
			self.latency = latency;

			self
		}

		/// Every attempted recipient, in completion order.
		pub fn attempts(&self) -> Vec<Recipient> {
			self.state.lock().attempts.iter().map(|(recipient, _)| recipient.clone()).collect()
		}

		/// Instant of every attempt, in completion order; useful for backoff-schedule checks.
		pub fn attempt_instants(&self) -> Vec<tokio::time::Instant> {
			self.state.lock().attempts.iter().map(|(_, at)| *at).collect()
		}

		/// Number of attempts observed for a single recipient.
		pub fn attempt_count(&self, recipient: &Recipient) -> usize {
			self.state
				.lock()
				.attempts
				.iter()
				.filter(|(attempted, _)| attempted == recipient)
				.count()
		}
	}
	impl MessageChannel for ScriptedChannel {
		fn send<'a>(&'a self, recipient: &'a Recipient, _message: &'a str) -> ChannelFuture<'a> {
			Box::pin(async move {
				if !self.latency.is_zero() {
					tokio::time::sleep(self.latency).await;
				}

				let mut state = self.state.lock();

				state.attempts.push((recipient.clone(), tokio::time::Instant::now()));

				if state.fail_always.contains(recipient) || state.fail_once.remove(recipient) {
					return Err(SendError::new("scripted failure"));
				}

				Ok(())
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
