//! Auth engine: validates the caller's credentials at the request-headers
//! phase and rewrites them into `X-Gateway-*`/`X-Auth-Claims` headers for
//! downstream filters. Paths in the whitelist skip authentication entirely.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use once_cell::sync::Lazy;
use protos::ext_proc::{HeaderValue, HeadersResponse, HttpHeaders};
use regex::Regex;

use crate::clients::auth::AuthClient;
use crate::dispatcher::{CallContext, PhaseOutcome, PhaseResult, Processor};
use crate::error::ProcessorError;
use crate::jwt::Verifier;
use crate::responses;

static UUID_REGEX: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[0-9a-f]{8}(-[0-9a-f]{4}){3}-[0-9a-f]{12}$").unwrap());

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
	pub identity: Option<String>,
	pub authorization: Option<String>,
	pub secret: Option<String>,
	pub token: Option<String>,
	pub method: Option<String>,
	pub path: Option<String>,
}

/// Reads the auth-relevant headers in a single linear pass.
///
/// `x-api-token`, if present, seeds `token` during the pass. An
/// `authorization: Bearer ...` header is handled afterwards and, when
/// present, unconditionally overwrites that token — so a Bearer
/// `authorization` header always wins over `x-api-token` regardless of the
/// order the two appeared on the wire. `authorization: Basic ...` instead
/// fills in `identity`/`secret`, and any other `authorization` value is
/// taken verbatim as `secret`.
pub fn extract_header_info(headers: &[HeaderValue]) -> HeaderInfo {
	let mut info = HeaderInfo::default();

	for h in headers {
		match h.key.as_str() {
			":method" => info.method = Some(h.value.clone()),
			":path" => info.path = Some(h.value.clone()),
			"identity" => info.identity = Some(h.value.clone()),
			"authorization" => info.authorization = Some(h.value.clone()),
			"x-api-key" => info.secret = Some(h.value.clone()),
			"x-api-token" => info.token = Some(h.value.clone()),
			_ => {},
		}
	}

	if let Some(auth) = info.authorization.clone() {
		let lower = auth.to_ascii_lowercase();
		if lower.starts_with("bearer ") {
			if let Some(token) = auth.splitn(2, ' ').nth(1) {
				info.token = Some(token.to_string());
			}
		} else if lower.starts_with("basic ") {
			if let Some(creds) = auth.splitn(2, ' ').nth(1)
				&& let Some((identity, secret)) = decode_basic_auth_header(creds)
			{
				info.identity = Some(identity);
				info.secret = Some(secret);
			}
		} else {
			info.secret = Some(auth);
		}
	}

	info
}

fn decode_basic_auth_header(creds: &str) -> Option<(String, String)> {
	let decoded = URL_SAFE.decode(creds).ok()?;
	let decoded = String::from_utf8(decoded).ok()?;
	let mut parts = decoded.splitn(2, ':');
	let identity = parts.next()?.to_string();
	let secret = parts.next()?.to_string();
	Some((identity, secret))
}

async fn verify_basic_auth(
	auth_client: &AuthClient,
	identity: Option<&str>,
	secret: Option<&str>,
) -> Result<String, ProcessorError> {
	let (identity, secret) = match (identity, secret) {
		(Some(i), Some(s)) => (i, s),
		_ => return Err(ProcessorError::NoCredentials),
	};
	if !UUID_REGEX.is_match(identity) {
		return Err(ProcessorError::MalformedCredentials);
	}
	auth_client.exchange(identity, secret).await
}

pub struct AuthnProcessor {
	auth_client: AuthClient,
	verifier: Verifier,
	whitelist: HashSet<String>,
}

impl AuthnProcessor {
	pub fn new(auth_client: AuthClient, verifier: Verifier) -> Self {
		Self {
			auth_client,
			verifier,
			whitelist: ["/health"].into_iter().map(str::to_string).collect(),
		}
	}
}

#[async_trait::async_trait]
impl Processor for AuthnProcessor {
	async fn request_headers(
		&self,
		headers: &HttpHeaders,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let raw = headers.headers.as_ref().map(|m| m.headers.as_slice()).unwrap_or(&[]);
		let info = extract_header_info(raw);

		if let Some(path) = &info.path
			&& self.whitelist.contains(path.as_str())
		{
			return Ok(PhaseResult::Continue(responses::continue_headers()));
		}

		let mut response = responses::continue_headers();
		let common = response.response.as_mut().expect("set by continue_headers");
		responses::add_header(common, "X-Request-Started", &chrono::Utc::now().to_rfc3339());

		let token = match info.token.clone() {
			Some(t) => t,
			None => verify_basic_auth(&self.auth_client, info.identity.as_deref(), info.secret.as_deref()).await?,
		};

		let claims = self.verifier.verify(&token)?;
		let encoded_claims = URL_SAFE.encode(serde_json::to_vec(&claims).unwrap_or_default());
		let identity_claims = claims.get("identity");

		if info.identity.is_some() {
			let key_id = identity_claims
				.and_then(|v| v.get("key_id"))
				.and_then(|v| v.as_str())
				.ok_or(ProcessorError::MalformedCredentials)?;
			responses::add_header(common, "X-Gateway-KeyId", key_id);
		}
		let tenant = identity_claims
			.and_then(|v| v.get("tenant"))
			.and_then(|v| v.as_str())
			.ok_or(ProcessorError::MalformedCredentials)?;
		responses::add_header(common, "X-Gateway-Tenant", tenant);
		let user_id = identity_claims
			.and_then(|v| v.get("user_id"))
			.and_then(|v| v.as_str())
			.ok_or(ProcessorError::MalformedCredentials)?;
		responses::add_header(common, "X-Gateway-UserId", user_id);
		responses::add_header(common, "X-Auth-Claims", &encoded_claims);

		Ok(PhaseResult::Continue(response))
	}
}
