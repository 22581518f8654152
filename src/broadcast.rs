//! Multi-round broadcast delivery over a rate-limited message channel.
//!
//! A broadcast walks every recipient through a bounded worker pool, then retries the failures in
//! later rounds with exponentially growing pauses in between. Per-recipient failures never abort
//! the round; the dispatcher reports an aggregate [`DeliveryOutcome`] instead of an error.

// std
use std::{collections::HashSet, time::Duration};
// crates.io
use tokio::{sync::Semaphore, task::JoinSet, time};
// self
use crate::{
	_prelude::*,
	auth::Recipient,
	limit::RateLimiter,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	shutdown::CancelToken,
};

/// Failure reported by a [`MessageChannel`] for a single recipient send.
#[derive(Clone, Debug, ThisError)]
#[error("Send failed: {message}.")]
pub struct SendError {
	/// Channel-supplied reason string.
	pub message: String,
}
impl SendError {
	/// Creates a send error from a reason string.
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

/// Boxed future returned by [`MessageChannel::send`].
pub type ChannelFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendError>> + 'a + Send>>;

/// Contract for the outbound message channel a broadcast delivers through.
///
/// Implementations must tolerate concurrent sends up to the dispatcher's worker bound.
pub trait MessageChannel
where
	Self: Send + Sync,
{
	/// Delivers `message` to a single recipient.
	fn send<'a>(&'a self, recipient: &'a Recipient, message: &'a str) -> ChannelFuture<'a>;
}

/// Tunables for a broadcast run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
	/// Total rounds attempted per recipient, first try included.
	pub max_rounds: u32,
	/// Pause before round two; doubles before every later round.
	pub base_backoff: Duration,
	/// Worker-pool bound on concurrently in-flight sends.
	pub max_in_flight: usize,
}
impl DeliveryConfig {
	/// Replaces the round bound; clamped to at least one round.
	pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
		self.max_rounds = max_rounds.max(1);

		self
	}

	/// Replaces the initial inter-round pause.
	pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
		self.base_backoff = base_backoff;

		self
	}

	/// Replaces the worker-pool bound; clamped to at least one worker.
	pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
		self.max_in_flight = max_in_flight.max(1);

		self
	}
}
impl Default for DeliveryConfig {
	fn default() -> Self {
		Self { max_rounds: 3, base_backoff: Duration::from_millis(500), max_in_flight: 10 }
	}
}

/// Aggregate result of a broadcast run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
	/// Every recipient acknowledged a send within the round budget.
	AllDelivered,
	/// Some recipients were delivered; the rest exhausted every round.
	PartiallyDelivered {
		/// Recipients that never acknowledged a send, cancellation casualties included.
		failed: HashSet<Recipient>,
	},
	/// No recipient acknowledged a send.
	AllFailed,
}
impl DeliveryOutcome {
	fn classify(total: usize, pending: HashSet<Recipient>) -> Self {
		if pending.is_empty() {
			Self::AllDelivered
		} else if pending.len() == total {
			Self::AllFailed
		} else {
			Self::PartiallyDelivered { failed: pending }
		}
	}
}

/// Fans a message out to a recipient set through a bounded worker pool with bounded retries.
pub struct BroadcastDispatcher {
	channel: Arc<dyn MessageChannel>,
	limiter: Arc<RateLimiter>,
	config: DeliveryConfig,
}
impl BroadcastDispatcher {
	/// Creates a dispatcher with the default [`DeliveryConfig`].
	pub fn new(channel: Arc<dyn MessageChannel>, limiter: Arc<RateLimiter>) -> Self {
		Self { channel, limiter, config: DeliveryConfig::default() }
	}

	/// Replaces the delivery tunables.
	pub fn with_config(mut self, config: DeliveryConfig) -> Self {
		self.config = config;

		self
	}

	/// Delivers `message` to every recipient, retrying failures across rounds.
	///
	/// Always resolves to an outcome, never an error: cancellation stops new work promptly and
	/// the recipients left unattempted are reported as failed.
	pub async fn deliver(
		&self,
		recipients: HashSet<Recipient>,
		message: &str,
		cancel: &CancelToken,
	) -> DeliveryOutcome {
		let span = OpSpan::new(OpKind::Broadcast, "deliver");

		record_op_outcome(OpKind::Broadcast, OpOutcome::Attempt);

		let outcome = span.instrument(self.deliver_inner(recipients, message, cancel)).await;

		match &outcome {
			DeliveryOutcome::AllDelivered =>
				record_op_outcome(OpKind::Broadcast, OpOutcome::Success),
			_ => record_op_outcome(OpKind::Broadcast, OpOutcome::Failure),
		}

		outcome
	}

	async fn deliver_inner(
		&self,
		recipients: HashSet<Recipient>,
		message: &str,
		cancel: &CancelToken,
	) -> DeliveryOutcome {
		let total = recipients.len();

		if total == 0 {
			return DeliveryOutcome::AllDelivered;
		}

		let message = <Arc<str>>::from(message);
		let mut pending = recipients;

		for round in 1..=self.config.max_rounds {
			if cancel.is_cancelled() {
				break;
			}

			let final_round = round == self.config.max_rounds;

			pending = self.run_round(pending, &message, cancel, final_round).await;

			if pending.is_empty() || final_round || cancel.is_cancelled() {
				break;
			}

			let backoff = self.config.base_backoff.saturating_mul(2_u32.saturating_pow(round - 1));

			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = time::sleep(backoff) => {},
			}
		}

		DeliveryOutcome::classify(total, pending)
	}

	async fn run_round(
		&self,
		pending: HashSet<Recipient>,
		message: &Arc<str>,
		cancel: &CancelToken,
		final_round: bool,
	) -> HashSet<Recipient> {
		// Struct-literal configs can bypass the builder clamp; a zero-permit pool would park
		// every worker forever.
		let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
		let mut workers = JoinSet::new();

		for recipient in pending {
			let channel = self.channel.clone();
			let limiter = self.limiter.clone();
			let permits = permits.clone();
			let message = message.clone();
			let cancel = cancel.clone();

			workers.spawn(async move {
				let Ok(_permit) = permits.acquire_owned().await else {
					return Some(recipient);
				};

				if cancel.is_cancelled() || limiter.acquire(&cancel).await.is_err() {
					return Some(recipient);
				}

				match channel.send(&recipient, &message).await {
					Ok(()) => None,
					Err(error) => {
						#[cfg(feature = "tracing")]
						if final_round {
							tracing::error!(
								recipient = %recipient,
								error = %error,
								"Recipient exhausted every delivery round.",
							);
						} else {
							tracing::debug!(
								recipient = %recipient,
								error = %error,
								"Send failed; recipient queued for the next round.",
							);
						}
						#[cfg(not(feature = "tracing"))]
						let _ = (&error, final_round);

						Some(recipient)
					},
				}
			});
		}

		let mut failed = HashSet::new();

		while let Some(joined) = workers.join_next().await {
			// A panicked worker forfeits its recipient; the recipient is simply not retried.
			if let Ok(Some(recipient)) = joined {
				failed.insert(recipient);
			}
		}

		failed
	}
}
impl Debug for BroadcastDispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BroadcastDispatcher").field("config", &self.config).finish_non_exhaustive()
	}
}
