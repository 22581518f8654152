//! Token-bucket admission control gating outbound upstream calls and recipient sends.

// std
use std::time::Duration;
// crates.io
use tokio::time::{self, Instant};
// self
use crate::{_prelude::*, shutdown::CancelToken};

/// Token-bucket configuration allowing bursts up to `capacity`, refilling at a fixed rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimit {
	/// Maximum tokens the bucket holds; the largest permitted burst.
	pub capacity: u32,
	/// Tokens restored per second; must be positive.
	pub refill_per_second: f64,
}
impl RateLimit {
	/// Creates a new budget from a burst capacity and a refill rate.
	pub const fn new(capacity: u32, refill_per_second: f64) -> Self {
		Self { capacity, refill_per_second }
	}

	/// Upstream API budget: one call every three seconds with a burst of three.
	pub const fn upstream_default() -> Self {
		Self::new(3, 1. / 3.)
	}

	/// Outbound message budget: thirty sends per second with no burst headroom.
	pub const fn outbound_default() -> Self {
		Self::new(1, 30.)
	}
}

/// Token-bucket admission gate safe for arbitrary concurrent callers.
///
/// Tokens are consumed atomically under the bucket lock. A waiter takes its reservation at call
/// time by driving the balance negative, then sleeps until its own token has refilled, so
/// arrival order bounds every wait and later callers cannot race a parked waiter out of its
/// token.
#[derive(Debug)]
pub struct RateLimiter {
	limit: RateLimit,
	bucket: Mutex<Bucket>,
}
#[derive(Debug)]
struct Bucket {
	tokens: f64,
	refilled_at: Instant,
}
impl RateLimiter {
	/// Creates a limiter whose bucket starts full, permitting an initial burst of `capacity`.
	pub fn new(limit: RateLimit) -> Self {
		let limit = RateLimit {
			capacity: limit.capacity.max(1),
			refill_per_second: limit.refill_per_second.max(f64::MIN_POSITIVE),
		};
		let bucket = Bucket { tokens: limit.capacity as f64, refilled_at: Instant::now() };

		Self { limit, bucket: Mutex::new(bucket) }
	}

	/// The budget this limiter enforces.
	pub fn limit(&self) -> RateLimit {
		self.limit
	}

	/// Consumes a token if one is available right now, without waiting.
	pub fn try_acquire(&self) -> bool {
		let mut bucket = self.bucket.lock();

		self.refill(&mut bucket);

		if bucket.tokens >= 1. {
			bucket.tokens -= 1.;

			true
		} else {
			false
		}
	}

	/// Blocks the calling task until a token is available or `cancel` fires, whichever first.
	///
	/// The token is reserved up front, so a waiter's position in line is fixed at call time and
	/// its wait never exceeds the refill schedule of the debt ahead of it.
	pub async fn acquire(&self, cancel: &CancelToken) -> Result<()> {
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let wait = {
			let mut bucket = self.bucket.lock();

			self.refill(&mut bucket);

			bucket.tokens -= 1.;

			if bucket.tokens >= 0. {
				return Ok(());
			}

			self.reservation_wait(bucket.tokens)
		};

		tokio::select! {
			_ = cancel.cancelled() => {
				self.refund();

				Err(Error::Cancelled)
			},
			_ = time::sleep(wait) => Ok(()),
		}
	}

	fn refill(&self, bucket: &mut Bucket) {
		let now = Instant::now();
		let elapsed = now.duration_since(bucket.refilled_at);

		bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.limit.refill_per_second)
			.min(self.limit.capacity as f64);
		bucket.refilled_at = now;
	}

	// Returns an abandoned reservation so the debt behind a cancelled waiter shrinks.
	fn refund(&self) {
		let mut bucket = self.bucket.lock();

		self.refill(&mut bucket);

		bucket.tokens = (bucket.tokens + 1.).min(self.limit.capacity as f64);
	}

	fn reservation_wait(&self, tokens: f64) -> Duration {
		let deficit_secs = -tokens / self.limit.refill_per_second;

		Duration::try_from_secs_f64(deficit_secs).unwrap_or(Duration::MAX)
	}
}
