//! Credential model and validity lifecycle helpers.

// self
use crate::{
	_prelude::*,
	auth::{id::Identity, secret::TokenSecret},
};

/// Current lifecycle status for a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// Access token is present and its expiration is strictly in the future.
	Valid,
	/// Access token is missing or its expiration has passed; the credential must not be used to
	/// authorize calls.
	Expired,
}

/// Token material tied to a single identity.
///
/// A credential is replaced wholesale on refresh, never partially updated. The refresher owns it
/// exclusively inside the refresh critical section; everyone else works on a point-in-time
/// snapshot and must re-check validity before acting on it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Identity the credential belongs to.
	pub identity: Identity,
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret used to mint the next access token.
	pub refresh_token: TokenSecret,
	/// Instant the access token stops being usable.
	pub access_expiration: OffsetDateTime,
}
impl Credential {
	/// Assembles a credential from raw token material.
	pub fn new(
		identity: Identity,
		access_token: impl Into<String>,
		refresh_token: impl Into<String>,
		access_expiration: OffsetDateTime,
	) -> Self {
		Self {
			identity,
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
			access_expiration,
		}
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> CredentialStatus {
		if self.access_token.is_empty() || instant >= self.access_expiration {
			CredentialStatus::Expired
		} else {
			CredentialStatus::Valid
		}
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> CredentialStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the credential may authorize calls at the provided instant.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), CredentialStatus::Valid)
	}

	/// Returns `true` if the credential may authorize calls right now.
	pub fn is_valid(&self) -> bool {
		matches!(self.status(), CredentialStatus::Valid)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("identity", &self.identity)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("access_expiration", &self.access_expiration)
			.finish()
	}
}
