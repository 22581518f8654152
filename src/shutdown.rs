//! Cooperative cancellation signal threaded through limiter waits, coordinator waits, in-flight
//! sends, and backoff sleeps.

// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Cloneable cancellation handle; every clone observes the same signal.
///
/// Cancellation is a one-way latch: once fired it stays fired. Holders poll
/// [`is_cancelled`](CancelToken::is_cancelled) at decision points and await
/// [`cancelled`](CancelToken::cancelled) inside `select!` arms so waits unwind promptly instead
/// of running their full duration.
#[derive(Clone, Debug)]
pub struct CancelToken(Arc<watch::Sender<bool>>);
impl CancelToken {
	/// Creates a fresh, un-fired token.
	pub fn new() -> Self {
		Self(Arc::new(watch::channel(false).0))
	}

	/// Fires the signal; idempotent.
	pub fn cancel(&self) {
		self.0.send_replace(true);
	}

	/// Returns `true` once the signal has fired.
	pub fn is_cancelled(&self) -> bool {
		*self.0.borrow()
	}

	/// Resolves once the signal fires; resolves immediately if it already has.
	pub async fn cancelled(&self) {
		let mut signal = self.0.subscribe();

		// wait_for errs only when the sender is dropped, which cannot happen while `self`
		// holds it.
		let _ = signal.wait_for(|cancelled| *cancelled).await;
	}
}
impl Default for CancelToken {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration;
	// self
	use super::*;

	#[tokio::test]
	async fn clones_observe_the_same_signal() {
		let token = CancelToken::new();
		let observer = token.clone();

		assert!(!observer.is_cancelled());

		token.cancel();

		assert!(observer.is_cancelled());

		observer.cancelled().await;
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_unblocks_pending_waiters() {
		let token = CancelToken::new();
		let waiter = {
			let token = token.clone();

			tokio::spawn(async move {
				token.cancelled().await;
			})
		};

		tokio::time::sleep(Duration::from_millis(1)).await;
		token.cancel();
		waiter.await.expect("Waiter task should resolve after cancellation.");
	}
}
