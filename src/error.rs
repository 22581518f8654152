//! Courier-level error types shared across the session, limiter, and broadcast layers.

// self
use crate::_prelude::*;

/// Courier-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical courier error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Authentication failure; not recoverable by retrying the same call.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The supplied cancellation signal fired while the operation was waiting or in flight.
	#[error("Operation was cancelled.")]
	Cancelled,
	/// Result adopted from a deduplicated in-flight operation; wraps the error produced by the
	/// caller that drove the execution.
	#[error("{0}")]
	Shared(Arc<Error>),
}
impl Error {
	/// Wraps a shared singleflight error without cloning the underlying failure.
	pub fn shared(error: &Arc<Error>) -> Self {
		Self::Shared(Arc::clone(error))
	}

	/// Returns `true` for authentication failures, looking through [`Error::Shared`].
	pub fn is_auth(&self) -> bool {
		match self {
			Self::Auth(_) => true,
			Self::Shared(inner) => inner.is_auth(),
			_ => false,
		}
	}

	/// Returns `true` for retryable failures, looking through [`Error::Shared`].
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Transient(_) | Self::Transport(_) => true,
			Self::Shared(inner) => inner.is_transient(),
			_ => false,
		}
	}

	/// Returns `true` if the failure was a cancellation, looking through [`Error::Shared`].
	pub fn is_cancelled(&self) -> bool {
		match self {
			Self::Cancelled => true,
			Self::Shared(inner) => inner.is_cancelled(),
			_ => false,
		}
	}
}

/// Authentication failures surfaced by the session layer.
///
/// These are terminal for the current credential; callers must not retry them with backoff the
/// way they would a [`TransientError`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthError {
	/// Upstream explicitly rejected the login credentials.
	#[error("Upstream rejected the login credentials.")]
	InvalidCredentials,
	/// Upstream rejected the refresh token itself; a new login is required.
	#[error("Upstream rejected the refresh token: {reason}.")]
	RefreshRejected {
		/// Upstream- or courier-supplied reason string.
		reason: String,
	},
	/// No credential is stored for the requested identity.
	#[error("No credential is stored for `{identity}`.")]
	UnknownIdentity {
		/// Identity the lookup was keyed by.
		identity: String,
	},
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Upstream returned an unexpected but non-fatal response.
	#[error("Upstream returned an unexpected response: {message}.")]
	Upstream {
		/// Upstream- or courier-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Upstream responded with malformed JSON that could not be parsed.
	#[error("Upstream returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the upstream.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the upstream.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
