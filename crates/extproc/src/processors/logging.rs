//! Log engine: accumulates a structured [`LogRecord`] across all four HTTP
//! phases and publishes it once, at the end of the response-body phase, to
//! the durable message bus. Publication is always best-effort — bus errors
//! and schema-validation failures are logged and dropped, never surfaced to
//! the client (spec's `BusError`/`BusValidationError` rows).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use protos::ext_proc::{BodyResponse, HeadersResponse, HttpBody, HttpHeaders};
use rand::Rng;
use serde::Serialize;

use crate::clients::bus::Bus;
use crate::dispatcher::{CallContext, PhaseOutcome, PhaseResult, Processor};
use crate::responses;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogMetadata {
	pub key: String,
	pub value: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogBody {
	pub headers: Vec<LogMetadata>,
	pub body: Vec<LogMetadata>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogIdentity {
	pub tenant: String,
	pub user_id: String,
	pub key_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogRecordFields {
	pub method: String,
	pub path: String,
	pub domain: String,
	pub scheme: String,
	pub url: String,
	pub request_id: String,
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
	pub duration_ns: i64,
	pub status: i32,
}

/// One entry in the log pipeline. Matches the `Log`/`LogRecord` shape from
/// `gateway.log.v1` in the original service; `content_type` is scratch state
/// threaded between the headers and body phases of each direction and never
/// makes it onto the bus.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogRecord {
	pub record: LogRecordFields,
	pub identity: LogIdentity,
	pub request: LogBody,
	pub response: LogBody,
	#[serde(skip)]
	content_type: String,
}

fn flatten_json(value: &serde_json::Value, prefix: &str, out: &mut Vec<LogMetadata>) {
	match value {
		serde_json::Value::Object(map) => {
			for (k, v) in map {
				let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
				flatten_json(v, &key, out);
			}
		},
		serde_json::Value::Array(items) => {
			for (i, v) in items.iter().enumerate() {
				flatten_json(v, &format!("{prefix}.{i}"), out);
			}
		},
		serde_json::Value::Null => out.push(LogMetadata {
			key: prefix.to_string(),
			value: String::new(),
		}),
		serde_json::Value::String(s) => out.push(LogMetadata {
			key: prefix.to_string(),
			value: s.clone(),
		}),
		other => out.push(LogMetadata {
			key: prefix.to_string(),
			value: other.to_string(),
		}),
	}
}

fn encode_raw_body(body: &[u8]) -> Vec<LogMetadata> {
	vec![LogMetadata {
		key: "raw".to_string(),
		value: String::from_utf8_lossy(body).to_string(),
	}]
}

/// Flattens a JSON body into dotted-path metadata pairs; anything that
/// isn't valid JSON (or isn't declared `application/json`) falls back to a
/// single `("raw", body)` pair, mirroring `encode_body_data` in the
/// original logging processor.
fn encode_body_data(body: &[u8], content_type: &str) -> Vec<LogMetadata> {
	if content_type == "application/json" {
		match serde_json::from_slice::<serde_json::Value>(body) {
			Ok(value) => {
				let mut out = Vec::new();
				flatten_json(&value, "", &mut out);
				out
			},
			Err(_) => encode_raw_body(body),
		}
	} else {
		encode_raw_body(body)
	}
}

pub struct LoggingProcessor {
	bus: Arc<dyn Bus>,
	topic: String,
}

impl LoggingProcessor {
	pub fn new(bus: Arc<dyn Bus>, topic: String) -> Self {
		Self { bus, topic }
	}

	/// Structural stand-in for the original's protoc-gen-validate schema
	/// check: every record must carry a request id, a tenant, and an HTTP
	/// status in range before it is allowed onto the bus.
	fn validate(record: &LogRecord) -> Result<(), String> {
		if record.record.request_id.is_empty() {
			return Err("missing request_id".to_string());
		}
		if record.identity.tenant.is_empty() {
			return Err("missing identity.tenant".to_string());
		}
		if !(100..=599).contains(&record.record.status) {
			return Err(format!("status {} out of range", record.record.status));
		}
		Ok(())
	}

	fn publish(&self, record: &LogRecord) {
		if let Err(reason) = Self::validate(record) {
			tracing::error!(reason, "log record failed validation, dropping");
			return;
		}

		let value = match serde_json::to_vec(record) {
			Ok(bytes) => bytes,
			Err(err) => {
				tracing::error!(error = %err, "failed to serialize log record, dropping");
				return;
			},
		};

		let partition_key: u8 = rand::rng().random_range(0..=255);
		let key = serde_json::json!({ "value": partition_key }).to_string().into_bytes();

		if let Err(err) = self.bus.produce(&self.topic, &key, &value) {
			tracing::error!(error = %err, topic = %self.topic, "failed to publish log record");
		}
		self.bus.poll();
	}
}

#[async_trait::async_trait]
impl Processor for LoggingProcessor {
	async fn request_headers(
		&self,
		headers: &HttpHeaders,
		ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let mut record = LogRecord {
			content_type: "text/plain".to_string(),
			..Default::default()
		};
		let mut scheme = String::new();

		if let Some(map) = &headers.headers {
			for h in &map.headers {
				match h.key.as_str() {
					":method" => record.record.method = h.value.clone(),
					":path" => record.record.path = h.value.clone(),
					":authority" => record.record.domain = h.value.clone(),
					":scheme" => scheme = h.value.clone(),
					"x-request-started" => {
						record.record.start_time = DateTime::parse_from_rfc3339(&h.value)
							.ok()
							.map(|dt| dt.with_timezone(&Utc));
					},
					"x-request-id" => record.record.request_id = h.value.clone(),
					"x-gateway-tenant" => record.identity.tenant = h.value.clone(),
					"x-gateway-userid" => record.identity.user_id = h.value.clone(),
					"identity" => record.identity.key_id = h.value.clone(),
					"content-type" => record.content_type = h.value.to_ascii_lowercase(),
					_ => {},
				}
				if !h.key.starts_with(':') {
					record.request.headers.push(LogMetadata {
						key: h.key.clone(),
						value: h.value.clone(),
					});
				}
			}
		}

		record.record.scheme = scheme.clone();
		record.record.url = format!("{scheme}://{}{}", record.record.domain, record.record.path);

		ctx.log = Some(record);
		Ok(PhaseResult::Continue(responses::continue_headers()))
	}

	async fn request_body(
		&self,
		body: &HttpBody,
		ctx: &mut CallContext,
	) -> PhaseOutcome<BodyResponse> {
		if let Some(record) = ctx.log.as_mut() {
			let encoded = encode_body_data(&body.body, &record.content_type);
			record.request.body.extend(encoded);
		}
		Ok(PhaseResult::Continue(responses::continue_body()))
	}

	async fn response_headers(
		&self,
		headers: &HttpHeaders,
		ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let Some(record) = ctx.log.as_mut() else {
			return Ok(PhaseResult::Continue(responses::continue_headers()));
		};

		record.content_type = "text/plain".to_string();
		if let Some(map) = &headers.headers {
			for h in &map.headers {
				if h.key == ":status" {
					record.record.status = h.value.parse().unwrap_or(0);
				} else if h.key == "content-type" {
					record.content_type = h.value.to_ascii_lowercase();
				}
				if !h.key.starts_with(':') {
					record.response.headers.push(LogMetadata {
						key: h.key.clone(),
						value: h.value.clone(),
					});
				}
			}
		}

		Ok(PhaseResult::Continue(responses::continue_headers()))
	}

	async fn response_body(
		&self,
		body: &HttpBody,
		ctx: &mut CallContext,
	) -> PhaseOutcome<BodyResponse> {
		let Some(record) = ctx.log.as_mut() else {
			return Ok(PhaseResult::Continue(responses::continue_body()));
		};

		let encoded = encode_body_data(&body.body, &record.content_type);
		record.response.body.extend(encoded);

		let end_time = Utc::now();
		record.record.end_time = Some(end_time);
		record.record.duration_ns = match record.record.start_time {
			Some(start) => (end_time - start).num_nanoseconds().unwrap_or(0),
			None => 0,
		};

		self.publish(record);

		Ok(PhaseResult::Continue(responses::continue_body()))
	}
}

#[cfg(test)]
mod tests {
	use protos::ext_proc::{HeaderMap, HeaderValue};

	use super::*;
	use crate::clients::bus::fake::FakeBus;

	fn headers(pairs: &[(&str, &str)]) -> HttpHeaders {
		HttpHeaders {
			headers: Some(HeaderMap {
				headers: pairs
					.iter()
					.map(|(k, v)| HeaderValue {
						key: (*k).to_string(),
						value: (*v).to_string(),
						raw_value: Vec::new(),
					})
					.collect(),
			}),
			end_of_stream: false,
		}
	}

	#[tokio::test]
	async fn full_flow_publishes_flattened_json_body() {
		let bus = Arc::new(FakeBus::default());
		let p = LoggingProcessor::new(bus.clone(), "gateway.logs.v1".to_string());
		let mut ctx = CallContext::default();

		let req_headers = headers(&[
			(":method", "POST"),
			(":path", "/api/v0/things"),
			(":authority", "gateway.example.com"),
			(":scheme", "https"),
			("x-request-started", "2026-01-01T00:00:00Z"),
			("x-request-id", "req-1"),
			("x-gateway-tenant", "acme"),
			("x-gateway-userid", "u1"),
			("content-type", "application/json"),
		]);
		p.request_headers(&req_headers, &mut ctx).await.unwrap();
		assert_eq!(ctx.log.as_ref().unwrap().record.url, "https://gateway.example.com/api/v0/things");

		let req_body = HttpBody {
			body: br#"{"a":{"b":1}}"#.to_vec(),
			end_of_stream: true,
		};
		p.request_body(&req_body, &mut ctx).await.unwrap();
		assert!(
			ctx
				.log
				.as_ref()
				.unwrap()
				.request
				.body
				.iter()
				.any(|m| m.key == "a.b" && m.value == "1")
		);

		let resp_headers = headers(&[(":status", "200"), ("content-type", "application/json")]);
		p.response_headers(&resp_headers, &mut ctx).await.unwrap();

		let resp_body = HttpBody {
			body: br#"{"ok":true}"#.to_vec(),
			end_of_stream: true,
		};
		p.response_body(&resp_body, &mut ctx).await.unwrap();

		let published = bus.published.lock().unwrap();
		assert_eq!(published.len(), 1);
		let value: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
		assert_eq!(value["record"]["status"], 200);
		assert_eq!(value["identity"]["tenant"], "acme");
	}

	#[tokio::test]
	async fn invalid_record_is_dropped_not_published() {
		let bus = Arc::new(FakeBus::default());
		let p = LoggingProcessor::new(bus.clone(), "gateway.logs.v1".to_string());
		let mut ctx = CallContext::default();

		// No tenant, no request id -> fails validation.
		let req_headers = headers(&[(":method", "GET"), (":path", "/x"), (":scheme", "http"), (":authority", "h")]);
		p.request_headers(&req_headers, &mut ctx).await.unwrap();
		let resp_headers = headers(&[(":status", "200")]);
		p.response_headers(&resp_headers, &mut ctx).await.unwrap();
		let resp_body = HttpBody {
			body: b"".to_vec(),
			end_of_stream: true,
		};
		p.response_body(&resp_body, &mut ctx).await.unwrap();

		assert!(bus.published.lock().unwrap().is_empty());
	}
}
