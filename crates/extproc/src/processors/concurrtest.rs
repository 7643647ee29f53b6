//! Concurrency-correctness probe: records identifying fields at the
//! request-headers phase and asserts, later in the same stream, that it is
//! still looking at its own `CallContext` and not one leaked from another
//! stream. Used in integration, never in production traffic.

use protos::ext_proc::{BodyResponse, HeadersResponse, HttpBody, HttpHeaders};

use crate::dispatcher::{CallContext, PhaseOutcome, PhaseResult, Processor};
use crate::error::ProcessorError;
use crate::responses;

#[derive(Debug, Clone, Default)]
pub struct ConcurrencyState {
	pub path: String,
	pub request_id: String,
	pub gateway_request_id: String,
}

#[derive(Default)]
pub struct ConcurrencyTestProcessor;

#[async_trait::async_trait]
impl Processor for ConcurrencyTestProcessor {
	async fn request_headers(
		&self,
		headers: &HttpHeaders,
		ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let values = responses::get_headers_mapped(
			headers,
			&[
				(":path", "path"),
				("x-request-id", "request_id"),
				("x-gateway-request-id", "gateway_request_id"),
			],
		);
		let state = ConcurrencyState {
			path: values.get("path").cloned().unwrap_or_default(),
			request_id: values.get("request_id").cloned().unwrap_or_default(),
			gateway_request_id: values.get("gateway_request_id").cloned().unwrap_or_default(),
		};

		let mut response = responses::continue_headers();
		let common = response.response.as_mut().expect("set by continue_headers");
		responses::add_header(common, "X-Gateway-Request-Id", &state.gateway_request_id);

		ctx.concurrency = Some(state);
		Ok(PhaseResult::Continue(response))
	}

	async fn request_body(
		&self,
		body: &HttpBody,
		ctx: &mut CallContext,
	) -> PhaseOutcome<BodyResponse> {
		let state = ctx
			.concurrency
			.as_ref()
			.ok_or_else(|| ProcessorError::Other("request_body seen before request_headers".into()))?;
		let body_text = String::from_utf8_lossy(&body.body);
		if body_text != state.gateway_request_id {
			return Err(ProcessorError::ConcurrencyMismatch(format!(
				"request body {body_text:?} does not match recorded x-gateway-request-id {:?} — CallContext leaked across streams",
				state.gateway_request_id
			)));
		}
		Ok(PhaseResult::Continue(responses::continue_body()))
	}

	async fn response_body(
		&self,
		body: &HttpBody,
		ctx: &mut CallContext,
	) -> PhaseOutcome<BodyResponse> {
		let state = ctx
			.concurrency
			.as_ref()
			.ok_or_else(|| ProcessorError::Other("response_body seen before request_headers".into()))?;

		let parsed: serde_json::Value = serde_json::from_slice(&body.body)?;
		let path = parsed.get("path").and_then(|v| v.as_str()).unwrap_or_default();
		if path != state.path {
			return Err(ProcessorError::ConcurrencyMismatch(format!(
				"response body path {path:?} does not match recorded path {:?} — CallContext leaked across streams",
				state.path
			)));
		}

		let mut response = responses::continue_body();
		let common = response.response.as_mut().expect("set by continue_body");
		responses::add_header(common, "X-Gateway-Request-Id", &state.gateway_request_id);
		Ok(PhaseResult::Continue(response))
	}
}

#[cfg(test)]
mod tests {
	use protos::ext_proc::{HeaderMap, HeaderValue};

	use super::*;

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
	async fn matching_request_body_passes() {
		let p = ConcurrencyTestProcessor;
		let mut ctx = CallContext::default();
		let h = headers(&[(":path", "/x"), ("x-request-id", "r1"), ("x-gateway-request-id", "g1")]);
		p.request_headers(&h, &mut ctx).await.unwrap();

		let body = HttpBody {
			body: b"g1".to_vec(),
			end_of_stream: true,
		};
		let result = p.request_body(&body, &mut ctx).await.unwrap();
		assert!(matches!(result, PhaseResult::Continue(_)));
	}

	#[tokio::test]
	async fn mismatched_request_body_raises() {
		let p = ConcurrencyTestProcessor;
		let mut ctx = CallContext::default();
		let h = headers(&[(":path", "/x"), ("x-gateway-request-id", "g1")]);
		p.request_headers(&h, &mut ctx).await.unwrap();

		let body = HttpBody {
			body: b"someone-elses-id".to_vec(),
			end_of_stream: true,
		};
		let err = p.request_body(&body, &mut ctx).await.unwrap_err();
		assert!(matches!(err, ProcessorError::ConcurrencyMismatch(_)));
	}

	#[tokio::test]
	async fn response_body_path_mismatch_raises() {
		let p = ConcurrencyTestProcessor;
		let mut ctx = CallContext::default();
		let h = headers(&[(":path", "/expected"), ("x-gateway-request-id", "g1")]);
		p.request_headers(&h, &mut ctx).await.unwrap();

		let body = HttpBody {
			body: br#"{"path":"/other"}"#.to_vec(),
			end_of_stream: true,
		};
		let err = p.response_body(&body, &mut ctx).await.unwrap_err();
		assert!(matches!(err, ProcessorError::ConcurrencyMismatch(_)));
	}
}
