//! HTTP client for the auth service's token-exchange endpoint used by
//! `verify_basic_auth`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

use crate::error::ProcessorError;

pub struct AuthClient {
	http: reqwest::Client,
	url: String,
}

impl AuthClient {
	pub fn new(url: String) -> Self {
		Self {
			http: reqwest::Client::new(),
			url,
		}
	}

	/// Exchanges `identity:secret` (HTTP Basic) for a bearer token.
	/// 2xx -> token; 4xx -> `Unauthenticated`; anything else (5xx, transport
	/// failure) -> a non-auth error that the dispatcher maps to a 500.
	pub async fn exchange(&self, identity: &str, secret: &str) -> Result<String, ProcessorError> {
		let basic = URL_SAFE.encode(format!("{identity}:{secret}"));
		let resp = self
			.http
			.get(&self.url)
			.header("Authorization", format!("Basic {basic}"))
			.send()
			.await?;

		let status = resp.status();
		if status.is_success() {
			let body: serde_json::Value = resp.json().await?;
			let token = body
				.get("token")
				.and_then(|v| v.as_str())
				.ok_or_else(|| ProcessorError::Other("auth response missing token field".into()))?;
			Ok(token.to_string())
		} else if status.is_client_error() {
			let text = resp.text().await.unwrap_or_default();
			Err(ProcessorError::Unauthenticated(text))
		} else {
			Err(ProcessorError::Other(format!("auth service returned {status}")))
		}
	}
}

#[cfg(test)]
mod tests {
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn success_returns_the_token() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v0/tokens"))
			.and(header(
				"Authorization",
				format!("Basic {}", URL_SAFE.encode("the-identity:the-secret")).as_str(),
			))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "abc.def.ghi"})))
			.mount(&server)
			.await;

		let client = AuthClient::new(format!("{}/api/v0/tokens", server.uri()));
		let token = client.exchange("the-identity", "the-secret").await.unwrap();
		assert_eq!(token, "abc.def.ghi");
	}

	#[tokio::test]
	async fn client_error_becomes_unauthenticated() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v0/tokens"))
			.respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
			.mount(&server)
			.await;

		let client = AuthClient::new(format!("{}/api/v0/tokens", server.uri()));
		let err = client.exchange("id", "secret").await.unwrap_err();
		assert!(matches!(err, ProcessorError::Unauthenticated(body) if body == "forbidden"));
	}

	#[tokio::test]
	async fn server_error_is_not_unauthenticated() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v0/tokens"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let client = AuthClient::new(format!("{}/api/v0/tokens", server.uri()));
		let err = client.exchange("id", "secret").await.unwrap_err();
		assert!(!err.is_unauthenticated());
	}
}
