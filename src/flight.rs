//! Singleflight coordination collapsing concurrent identical operations into one execution.

// self
use crate::_prelude::*;

type FlightSlot<T> = Arc<AsyncMutex<Option<Result<T, Arc<Error>>>>>;

/// Deduplicates concurrent identical operations keyed by `K` so only one executes at a time.
///
/// The first caller under a key drives the operation itself; callers that join while it runs
/// suspend on the same slot and adopt the driver's exact result (value or error) without
/// re-executing. If the driver's future is dropped mid-flight, the slot stays empty and the next
/// waiter in line becomes the new driver.
pub struct SingleFlight<K, T> {
	flights: Mutex<HashMap<K, FlightSlot<T>>>,
}
impl<K, T> SingleFlight<K, T>
where
	K: Clone + Eq + Hash,
	T: Clone,
{
	/// Creates an empty coordinator.
	pub fn new() -> Self {
		Self { flights: Mutex::new(HashMap::new()) }
	}

	/// Number of keys with an operation currently in flight.
	pub fn in_flight(&self) -> usize {
		self.flights.lock().len()
	}

	/// Executes `operation` under `key`, or adopts the result of the execution already in flight
	/// for that key.
	///
	/// Returns the result plus `true` when it was adopted from another caller's execution. The
	/// driving caller incidentally performs the operation's side effects on behalf of every
	/// joiner; that is the point of the coordination, not an accident.
	pub async fn run<F>(&self, key: K, operation: F) -> (Result<T, Arc<Error>>, bool)
	where
		F: Future<Output = Result<T>>,
	{
		let slot = self.flights.lock().entry(key.clone()).or_default().clone();
		let mut guard = slot.lock().await;

		if let Some(result) = guard.as_ref() {
			return (result.clone(), true);
		}

		let result = operation.await.map_err(Arc::new);

		// Unpublish before filling the slot so callers arriving from now on start a fresh
		// flight instead of adopting a finished one.
		self.flights.lock().remove(&key);

		*guard = Some(result.clone());

		(result, false)
	}
}
impl<K, T> Default for SingleFlight<K, T>
where
	K: Clone + Eq + Hash,
	T: Clone,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<K, T> Debug for SingleFlight<K, T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SingleFlight").field("in_flight", &self.flights.lock().len()).finish()
	}
}
