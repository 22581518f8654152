//! Upstream authentication contracts and the built-in reqwest transport.
//!
//! The courier core only needs two upstream operations: a plain login and a refresh-token
//! exchange. [`AuthTransport`] is the seam; the reqwest-backed implementation speaks the
//! upstream's form-encoded request / JSON-envelope response dialect, including its habit of
//! reporting some failures inside a 200-status body.

// self
use crate::{
	_prelude::*,
	auth::Identity,
	error::{AuthError, TransientError, TransportError},
};

/// Boxed future returned by [`AuthTransport`] operations.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Token material minted by the upstream auth endpoints.
///
/// A successful refresh disposes the previous access/refresh pair upstream, so callers must
/// replace their credential wholesale with this grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
	/// Newly minted access token.
	pub access_token: String,
	/// Newly minted refresh token.
	pub refresh_token: String,
	/// Instant the access token stops being usable.
	pub access_expiration: OffsetDateTime,
}

/// Contract for the upstream authentication API.
///
/// Implementations map upstream failures onto the courier taxonomy: explicit credential
/// rejections become [`AuthError`]s, malformed or surprising responses become
/// [`TransientError`]s, and network-level failures become [`TransportError`]s.
pub trait AuthTransport
where
	Self: Send + Sync,
{
	/// Exchanges an identity + secret pair for fresh tokens.
	fn login<'a>(&'a self, identity: &'a Identity, secret: &'a str) -> AuthFuture<'a, TokenGrant>;

	/// Exchanges a refresh token for fresh tokens, invalidating the old pair upstream.
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> AuthFuture<'a, TokenGrant>;
}

/// Error code the upstream pairs with its invalid-login message.
const INVALID_CREDENTIALS_CODE: i64 = 104;
/// Message the upstream returns (with a 200 status) when the refresh token went missing.
const MISSING_REFRESH_MESSAGE: &str = "Refresh token is missing";

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	data: Option<TokenPayload>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
	access_token: String,
	access_exp_timestamp: i64,
	refresh_token: String,
}
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
	#[serde(default)]
	message: String,
	#[serde(default)]
	code: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GrantKind {
	Login,
	Refresh,
}

fn parse_json<'a, T>(bytes: &'a [u8], status: Option<u16>) -> Result<T>
where
	T: Deserialize<'a>,
{
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| TransientError::ResponseParse { source, status }.into())
}

fn grant_from_envelope(envelope: TokenEnvelope, status: u16, kind: GrantKind) -> Result<TokenGrant> {
	if let Some(message) = &envelope.message {
		// The upstream reports this refresh failure inside a 200-status body.
		if kind == GrantKind::Refresh && message == MISSING_REFRESH_MESSAGE {
			return Err(AuthError::RefreshRejected { reason: message.clone() }.into());
		}
	}

	let payload = envelope.data.ok_or_else(|| TransientError::Upstream {
		message: "token payload missing from response".into(),
		status: Some(status),
	})?;
	let access_expiration = OffsetDateTime::from_unix_timestamp(payload.access_exp_timestamp)
		.map_err(|_| TransientError::Upstream {
			message: "access expiration timestamp out of range".into(),
			status: Some(status),
		})?;

	Ok(TokenGrant {
		access_token: payload.access_token,
		refresh_token: payload.refresh_token,
		access_expiration,
	})
}

fn error_from_body(bytes: &[u8], status: u16, kind: GrantKind) -> Error {
	let envelope = match parse_json::<ErrorEnvelope>(bytes, Some(status)) {
		Ok(envelope) => envelope,
		Err(parse_error) => return parse_error,
	};

	match kind {
		GrantKind::Login
			if envelope.code == INVALID_CREDENTIALS_CODE
				&& envelope.message == "Invalid login or password" =>
			AuthError::InvalidCredentials.into(),
		GrantKind::Refresh if (400..500).contains(&status) =>
			AuthError::RefreshRejected { reason: envelope.message }.into(),
		_ => TransientError::Upstream { message: envelope.message, status: Some(status) }.into(),
	}
}

/// Reqwest-backed [`AuthTransport`] speaking the upstream's token envelope dialect.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestAuthTransport {
	client: ReqwestClient,
	login_endpoint: Url,
	refresh_endpoint: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestAuthTransport {
	/// Creates a transport with a default reqwest client.
	pub fn new(login_endpoint: Url, refresh_endpoint: Url) -> Self {
		Self::with_client(ReqwestClient::new(), login_endpoint, refresh_endpoint)
	}

	/// Creates a transport reusing a caller-provided reqwest client.
	pub fn with_client(client: ReqwestClient, login_endpoint: Url, refresh_endpoint: Url) -> Self {
		Self { client, login_endpoint, refresh_endpoint }
	}

	async fn request_grant(
		&self,
		endpoint: &Url,
		form: &[(&str, &str)],
		kind: GrantKind,
	) -> Result<TokenGrant> {
		let response = self
			.client
			.post(endpoint.clone())
			.form(form)
			.send()
			.await
			.map_err(TransportError::from)?;
		let status = response.status().as_u16();
		let bytes = response.bytes().await.map_err(TransportError::from)?;

		if !(200..300).contains(&status) {
			return Err(error_from_body(&bytes, status, kind));
		}

		let envelope = parse_json::<TokenEnvelope>(&bytes, Some(status))?;

		grant_from_envelope(envelope, status, kind)
	}
}
#[cfg(feature = "reqwest")]
impl AuthTransport for ReqwestAuthTransport {
	fn login<'a>(&'a self, identity: &'a Identity, secret: &'a str) -> AuthFuture<'a, TokenGrant> {
		Box::pin(async move {
			self.request_grant(
				&self.login_endpoint,
				&[("email", identity.as_ref()), ("password", secret)],
				GrantKind::Login,
			)
			.await
		})
	}

	fn refresh<'a>(&'a self, refresh_token: &'a str) -> AuthFuture<'a, TokenGrant> {
		Box::pin(async move {
			self.request_grant(&self.refresh_endpoint, &[("token", refresh_token)], GrantKind::Refresh)
				.await
		})
	}
}
