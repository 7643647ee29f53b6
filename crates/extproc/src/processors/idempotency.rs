//! Idempotency engine: guards POST requests with a two-phase sentinel/cache
//! protocol backed by an external KV store. See the cache key lifecycle in
//! `create_sentinel`/`delete_sentinel`/`cache_response` below — a sentinel
//! (`status == 0`) exists only between the request-headers and
//! response-headers phases; a cache miss on the store is always treated as
//! if nothing were cached, never as a request failure.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use protos::ext_proc::{
	BodyResponse, HeaderMutation, HeaderValue, HeaderValueOption, HeadersResponse, HttpBody,
	HttpHeaders, HttpStatus, ImmediateResponse, StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::clients::cache::Cache;
use crate::dispatcher::{CallContext, PhaseOutcome, PhaseResult, Processor};
use crate::error::ProcessorError;
use crate::responses;

const IDEMPOTENT_METHODS: &[&str] = &["POST"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHeader {
	pub key: String,
	pub value: String,
}

/// The record written to the cache, both as a sentinel (`status == 0`) and
/// as the final cached response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
	pub key: String,
	pub path: String,
	pub tenant: String,
	pub digest: String,
	pub identity: Option<String>,
	pub status: i32,
	pub headers: Vec<CachedHeader>,
	pub body: Vec<u8>,
}

impl CachedEntry {
	fn encode(&self) -> String {
		let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
			.expect("CachedEntry has no types that fail to encode");
		STANDARD.encode(bytes)
	}

	fn decode(value: &str) -> Option<Self> {
		let bytes = STANDARD.decode(value).ok()?;
		bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
			.ok()
			.map(|(entry, _)| entry)
	}
}

/// `cached == None` means this stream's method isn't idempotency-guarded
/// (the flag the original service stores as `callctx["cached"] = None`);
/// `cached == Some(_)` carries the in-progress entry across phases.
pub struct IdempotencyState {
	pub cached: Option<CachedEntry>,
}

pub struct IdempotencyProcessor {
	cache: Arc<dyn Cache>,
	sentinel_ttl: Duration,
	cache_ttl: Duration,
}

impl IdempotencyProcessor {
	pub fn new(cache: Arc<dyn Cache>, sentinel_ttl: Duration, cache_ttl: Duration) -> Self {
		Self {
			cache,
			sentinel_ttl,
			cache_ttl,
		}
	}

	async fn create_sentinel(&self, entry: &CachedEntry) -> Result<(), ProcessorError> {
		if entry.status != 0 {
			return Err(ProcessorError::InvalidSentinel(entry.status));
		}
		self.cache.setex(&entry.key, &entry.encode(), self.sentinel_ttl).await;
		Ok(())
	}

	async fn delete_sentinel(&self, key: &str) {
		if self.cache.exists(key).await
			&& let Some(raw) = self.cache.get(key).await
			&& let Some(cached) = CachedEntry::decode(&raw)
			&& cached.status == 0
		{
			self.cache.delete(key).await;
		}
	}

	async fn cache_response(&self, entry: &CachedEntry) {
		self.cache.setex(&entry.key, &entry.encode(), self.cache_ttl).await;
	}

	async fn response_from_cache(&self, key: &str) -> Result<ImmediateResponse, ProcessorError> {
		let raw = self
			.cache
			.get(key)
			.await
			.ok_or_else(|| ProcessorError::CacheMiss(key.to_string()))?;
		let cached =
			CachedEntry::decode(&raw).ok_or_else(|| ProcessorError::Other("corrupt cache entry".into()))?;

		if cached.status == 0 {
			let details = serde_json::json!({
				"key": cached.key, "path": cached.path, "tenant": cached.tenant,
			})
			.to_string();
			return Ok(ImmediateResponse {
				status: Some(HttpStatus {
					code: StatusCode::Conflict as i32,
				}),
				headers: Some(HeaderMutation::default()),
				body: serde_json::json!({
					"message": "Duplicate request in progress",
					"status": 409,
					"details": details,
				})
				.to_string()
				.into_bytes(),
				grpc_status: 0,
				details,
			});
		}

		let mut headers = HeaderMutation::default();
		for h in &cached.headers {
			headers.set_headers.push(HeaderValueOption {
				header: Some(HeaderValue {
					key: h.key.clone(),
					value: h.value.clone(),
					raw_value: Vec::new(),
				}),
				append: false,
			});
		}
		headers.set_headers.push(HeaderValueOption {
			header: Some(HeaderValue {
				key: "X-Gateway-Cached".to_string(),
				value: "true".to_string(),
				raw_value: Vec::new(),
			}),
			append: false,
		});

		Ok(ImmediateResponse {
			status: Some(HttpStatus { code: cached.status }),
			headers: Some(headers),
			body: cached.body.clone(),
			grpc_status: 0,
			details: String::new(),
		})
	}
}

#[async_trait::async_trait]
impl Processor for IdempotencyProcessor {
	async fn request_headers(
		&self,
		headers: &HttpHeaders,
		ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let values = responses::get_headers_mapped(
			headers,
			&[
				(":method", "method"),
				(":path", "path"),
				("x-gateway-tenant", "tenant"),
				("x-request-digest", "digest"),
				("x-idempotency-key", "idemp_key"),
			],
		);

		let method = values.get("method").cloned().unwrap_or_default();
		if !IDEMPOTENT_METHODS.contains(&method.as_str()) {
			ctx.idempotency = Some(IdempotencyState { cached: None });
			return Ok(PhaseResult::Continue(responses::continue_headers()));
		}

		let path = values.get("path").cloned().unwrap_or_default();
		let tenant = values.get("tenant").cloned().unwrap_or_default();
		let digest = values.get("digest").cloned().unwrap_or_default();
		let key = values.get("idemp_key").cloned().unwrap_or_else(|| digest.clone());

		if self.cache.exists(&key).await {
			let imm = self.response_from_cache(&key).await?;
			return Ok(PhaseResult::Immediate(imm));
		}

		let entry = CachedEntry {
			key: key.clone(),
			path,
			tenant,
			digest,
			identity: None,
			status: 0,
			headers: Vec::new(),
			body: Vec::new(),
		};
		self.create_sentinel(&entry).await?;
		ctx.idempotency = Some(IdempotencyState { cached: Some(entry) });

		Ok(PhaseResult::Continue(responses::continue_headers()))
	}

	async fn response_headers(
		&self,
		headers: &HttpHeaders,
		ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let Some(cached) = ctx.idempotency.as_mut().and_then(|s| s.cached.as_mut()) else {
			return Ok(PhaseResult::Continue(responses::continue_headers()));
		};

		self.delete_sentinel(&cached.key).await;
		// Between here and the response-body cache write is a window where we
		// hold a real response but haven't persisted it yet; the sentinel is
		// already gone, so a racing duplicate request would create its own.

		if let Some(map) = &headers.headers {
			for h in &map.headers {
				if h.key == ":status" {
					cached.status = h.value.parse().unwrap_or(0);
				} else if !h.key.starts_with(':') {
					cached.headers.push(CachedHeader {
						key: h.key.clone(),
						value: h.value.clone(),
					});
				}
			}
		}

		let mut response = responses::continue_headers();
		let common = response.response.as_mut().expect("set by continue_headers");
		responses::add_header(common, "X-Gateway-Cached", "false");
		Ok(PhaseResult::Continue(response))
	}

	async fn response_body(
		&self,
		body: &HttpBody,
		ctx: &mut CallContext,
	) -> PhaseOutcome<BodyResponse> {
		let Some(cached) = ctx.idempotency.as_mut().and_then(|s| s.cached.as_mut()) else {
			return Ok(PhaseResult::Continue(responses::continue_body()));
		};

		if matches!(cached.status, 200 | 201) {
			cached.body = body.body.clone();
			self.cache_response(cached).await;
		}

		Ok(PhaseResult::Continue(responses::continue_body()))
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use protos::ext_proc::{HeaderMap, HeaderValue as ProtoHeaderValue};

	use super::*;
	use crate::clients::cache::fake::FakeCache;

	#[test]
	fn cached_entry_round_trips_through_the_wire_encoding() {
		let entry = CachedEntry {
			key: "550e8400-e29b-41d4-a716-446655440000".to_string(),
			path: "/api/v0/resource".to_string(),
			tenant: "acme".to_string(),
			digest: "a".repeat(64),
			identity: Some("550e8400-e29b-41d4-a716-446655440111".to_string()),
			status: 201,
			headers: vec![CachedHeader {
				key: "Location".to_string(),
				value: "/x".to_string(),
			}],
			body: b"ok".to_vec(),
		};

		let wire = entry.encode();
		let decoded = CachedEntry::decode(&wire).expect("round trip must decode");
		assert_eq!(decoded, entry);
	}

	fn headers(pairs: &[(&str, &str)]) -> HttpHeaders {
		HttpHeaders {
			headers: Some(HeaderMap {
				headers: pairs
					.iter()
					.map(|(k, v)| ProtoHeaderValue {
						key: (*k).to_string(),
						value: (*v).to_string(),
						raw_value: Vec::new(),
					})
					.collect(),
			}),
			end_of_stream: false,
		}
	}

	fn processor() -> IdempotencyProcessor {
		IdempotencyProcessor::new(
			Arc::new(FakeCache::default()),
			Duration::from_secs(180),
			Duration::from_secs(86400),
		)
	}

	#[tokio::test]
	async fn non_post_is_skipped_entirely() {
		let p = processor();
		let mut ctx = CallContext::default();
		let h = headers(&[(":method", "GET"), (":path", "/x")]);
		let result = p.request_headers(&h, &mut ctx).await.unwrap();
		assert_matches!(result, PhaseResult::Continue(_));
		assert!(ctx.idempotency.unwrap().cached.is_none());
	}

	#[tokio::test]
	async fn second_post_while_sentinel_live_gets_409() {
		let p = processor();
		let mut ctx1 = CallContext::default();
		let h = headers(&[
			(":method", "POST"),
			(":path", "/orders"),
			("x-gateway-tenant", "acme"),
			("x-request-digest", "abc123"),
		]);
		p.request_headers(&h, &mut ctx1).await.unwrap();

		let mut ctx2 = CallContext::default();
		let result = p.request_headers(&h, &mut ctx2).await.unwrap();
		match result {
			PhaseResult::Immediate(imm) => {
				assert_eq!(imm.status.unwrap().code, StatusCode::Conflict as i32);
			},
			_ => panic!("expected a 409 conflict"),
		}
	}

	#[tokio::test]
	async fn successful_response_is_replayed_with_cached_true() {
		let p = processor();
		let mut ctx = CallContext::default();
		let h = headers(&[
			(":method", "POST"),
			(":path", "/orders"),
			("x-gateway-tenant", "acme"),
			("x-request-digest", "abc123"),
		]);
		p.request_headers(&h, &mut ctx).await.unwrap();

		let resp_headers = headers(&[(":status", "201"), ("content-type", "application/json")]);
		p.response_headers(&resp_headers, &mut ctx).await.unwrap();

		let body = HttpBody {
			body: br#"{"id":1}"#.to_vec(),
			end_of_stream: true,
		};
		p.response_body(&body, &mut ctx).await.unwrap();

		let mut replay_ctx = CallContext::default();
		let result = p.request_headers(&h, &mut replay_ctx).await.unwrap();
		match result {
			PhaseResult::Immediate(imm) => {
				assert_eq!(imm.status.unwrap().code, 201);
				let cached_header = imm
					.headers
					.unwrap()
					.set_headers
					.into_iter()
					.find(|h| h.header.as_ref().unwrap().key == "X-Gateway-Cached")
					.unwrap();
				assert_eq!(cached_header.header.unwrap().value, "true");
				assert_eq!(imm.body, br#"{"id":1}"#);
			},
			_ => panic!("expected a replayed cached response"),
		}
	}
}
