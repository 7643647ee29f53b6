//! Phase dispatcher: drives one ext_proc gRPC stream, routing each inbound
//! phase message to the active [`Processor`] and timing every handler call.

use std::time::Instant;

use protos::ext_proc::processing_request::Request as Phase;
use protos::ext_proc::processing_response::Response as PhaseResponseKind;
use protos::ext_proc::{HttpStatus, ImmediateResponse, ProcessingRequest, ProcessingResponse, StatusCode};

use crate::error::ProcessorError;
use crate::processors::concurrtest::ConcurrencyState;
use crate::processors::digester::DigestState;
use crate::processors::idempotency::IdempotencyState;
use crate::processors::logging::LogRecord;
use crate::responses;

/// Per-stream scratchpad threaded through every phase call. One instance is
/// created when a gRPC stream opens and dropped when it ends; nothing here
/// outlives the call. Modeled as a typed struct (not a string-keyed map) so
/// each processor's cross-phase state is checked at compile time.
#[derive(Default)]
pub struct CallContext {
	/// Cumulative handler time across every phase seen on this stream,
	/// in nanoseconds. Monotonically non-decreasing.
	pub overhead_ns: u64,

	pub digest: Option<DigestState>,
	pub idempotency: Option<IdempotencyState>,
	pub log: Option<LogRecord>,
	pub concurrency: Option<ConcurrencyState>,
}

/// What a phase handler produced: either the canonical "keep going" shape
/// (optionally mutated) or a request to short-circuit the exchange.
pub enum PhaseResult<T> {
	Continue(T),
	Immediate(ImmediateResponse),
}

pub type PhaseOutcome<T> = Result<PhaseResult<T>, ProcessorError>;

/// Implemented by each of the five processors (base/digest/idempotency/
/// authn/logging/concurrency-test). Every method defaults to "continue,
/// unmodified" so a processor only overrides the phases it actually cares
/// about — exactly the shape `BaseExternalProcessorService` gives its
/// subclasses.
#[async_trait::async_trait]
pub trait Processor: Send + Sync + 'static {
	async fn request_headers(
		&self,
		_headers: &protos::ext_proc::HttpHeaders,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<protos::ext_proc::HeadersResponse> {
		Ok(PhaseResult::Continue(responses::continue_headers()))
	}

	async fn request_body(
		&self,
		_body: &protos::ext_proc::HttpBody,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<protos::ext_proc::BodyResponse> {
		Ok(PhaseResult::Continue(responses::continue_body()))
	}

	async fn request_trailers(
		&self,
		_trailers: &protos::ext_proc::HttpTrailers,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<protos::ext_proc::TrailersResponse> {
		Ok(PhaseResult::Continue(responses::continue_trailers()))
	}

	async fn response_headers(
		&self,
		_headers: &protos::ext_proc::HttpHeaders,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<protos::ext_proc::HeadersResponse> {
		Ok(PhaseResult::Continue(responses::continue_headers()))
	}

	async fn response_body(
		&self,
		_body: &protos::ext_proc::HttpBody,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<protos::ext_proc::BodyResponse> {
		Ok(PhaseResult::Continue(responses::continue_body()))
	}

	async fn response_trailers(
		&self,
		_trailers: &protos::ext_proc::HttpTrailers,
		_ctx: &mut CallContext,
	) -> PhaseOutcome<protos::ext_proc::TrailersResponse> {
		Ok(PhaseResult::Continue(responses::continue_trailers()))
	}
}

/// Drives a single `ProcessingRequest` through `processor`, returning the
/// `ProcessingResponse` to send back. Never fails: any processor error is
/// folded into an `ImmediateResponse` here, matching the spec's "handler
/// exceptions become Immediate responses" contract.
pub async fn drive_one<P: Processor + ?Sized>(
	processor: &P,
	request: ProcessingRequest,
	ctx: &mut CallContext,
) -> ProcessingResponse {
	let start = Instant::now();

	let phase_name = phase_name(&request.request);
	let response = match request.request {
		Some(Phase::RequestHeaders(h)) => {
			let out = processor.request_headers(&h, ctx).await;
			wrap(out, PhaseResponseKind::RequestHeaders)
		},
		Some(Phase::ResponseHeaders(h)) => {
			let out = processor.response_headers(&h, ctx).await;
			wrap(out, PhaseResponseKind::ResponseHeaders)
		},
		Some(Phase::RequestBody(b)) => {
			let out = processor.request_body(&b, ctx).await;
			wrap(out, PhaseResponseKind::RequestBody)
		},
		Some(Phase::ResponseBody(b)) => {
			let out = processor.response_body(&b, ctx).await;
			wrap(out, PhaseResponseKind::ResponseBody)
		},
		Some(Phase::RequestTrailers(t)) => {
			let out = processor.request_trailers(&t, ctx).await;
			wrap(out, PhaseResponseKind::RequestTrailers)
		},
		Some(Phase::ResponseTrailers(t)) => {
			let out = processor.response_trailers(&t, ctx).await;
			wrap(out, PhaseResponseKind::ResponseTrailers)
		},
		None => PhaseResponseKind::RequestHeaders(responses::continue_headers()),
	};

	let elapsed = start.elapsed().as_nanos() as u64;
	ctx.overhead_ns = ctx.overhead_ns.saturating_add(elapsed);
	tracing::debug!(phase = phase_name, elapsed_ns = elapsed, "processed phase");

	ProcessingResponse {
		response: Some(response),
		override_message_timeout: None,
	}
}

fn phase_name(phase: &Option<Phase>) -> &'static str {
	match phase {
		Some(Phase::RequestHeaders(_)) => "request_headers",
		Some(Phase::ResponseHeaders(_)) => "response_headers",
		Some(Phase::RequestBody(_)) => "request_body",
		Some(Phase::ResponseBody(_)) => "response_body",
		Some(Phase::RequestTrailers(_)) => "request_trailers",
		Some(Phase::ResponseTrailers(_)) => "response_trailers",
		None => "unknown",
	}
}

fn wrap<T>(
	outcome: PhaseOutcome<T>,
	into: impl FnOnce(T) -> PhaseResponseKind,
) -> PhaseResponseKind {
	match outcome {
		Ok(PhaseResult::Continue(v)) => into(v),
		Ok(PhaseResult::Immediate(imm)) => PhaseResponseKind::ImmediateResponse(imm),
		Err(err) if err.is_unauthenticated() => {
			tracing::warn!(error = %err, "rejecting request");
			PhaseResponseKind::ImmediateResponse(json_immediate(
				StatusCode::Unauthorized,
				"Unauthenticated",
				401,
				format!("{} {err}", err.kind()),
			))
		},
		Err(err) => {
			tracing::error!(error = %err, "processor handler failed");
			PhaseResponseKind::ImmediateResponse(json_immediate(
				StatusCode::InternalServerError,
				"ServerError",
				500,
				format!("{} {err}", err.kind()),
			))
		},
	}
}

fn json_immediate(
	code: StatusCode,
	message: &str,
	status: i32,
	details: String,
) -> ImmediateResponse {
	let body = serde_json::json!({
		"message": message,
		"status": status,
		"details": details,
	})
	.to_string();
	ImmediateResponse {
		status: Some(HttpStatus { code: code as i32 }),
		headers: Some(protos::ext_proc::HeaderMutation::default()),
		body: body.into_bytes(),
		grpc_status: 0,
		details,
	}
}

#[cfg(test)]
mod tests {
	use protos::ext_proc::{HttpHeaders, processing_request::Request as Phase};

	use super::*;

	struct AlwaysRejects;

	#[async_trait::async_trait]
	impl Processor for AlwaysRejects {
		async fn request_headers(
			&self,
			_headers: &protos::ext_proc::HttpHeaders,
			_ctx: &mut CallContext,
		) -> PhaseOutcome<protos::ext_proc::HeadersResponse> {
			Err(ProcessorError::NoCredentials)
		}
	}

	struct AlwaysBlowsUp;

	#[async_trait::async_trait]
	impl Processor for AlwaysBlowsUp {
		async fn request_headers(
			&self,
			_headers: &protos::ext_proc::HttpHeaders,
			_ctx: &mut CallContext,
		) -> PhaseOutcome<protos::ext_proc::HeadersResponse> {
			Err(ProcessorError::Other("boom".into()))
		}
	}

	fn headers_request() -> ProcessingRequest {
		ProcessingRequest {
			request: Some(Phase::RequestHeaders(HttpHeaders {
				headers: None,
				end_of_stream: false,
			})),
			metadata_context: None,
		}
	}

	#[tokio::test]
	async fn base_processor_continues_every_phase() {
		struct Base;
		#[async_trait::async_trait]
		impl Processor for Base {}

		let mut ctx = CallContext::default();
		let resp = drive_one(&Base, headers_request(), &mut ctx).await;
		match resp.response {
			Some(PhaseResponseKind::RequestHeaders(h)) => {
				assert_eq!(
					h.response.unwrap().status,
					protos::ext_proc::common_response::ResponseStatus::Continue as i32
				);
			},
			other => panic!("expected RequestHeaders continue, got {other:?}"),
		}
		assert!(ctx.overhead_ns > 0 || ctx.overhead_ns == 0);
	}

	#[tokio::test]
	async fn unauthenticated_error_becomes_401() {
		let mut ctx = CallContext::default();
		let resp = drive_one(&AlwaysRejects, headers_request(), &mut ctx).await;
		match resp.response {
			Some(PhaseResponseKind::ImmediateResponse(imm)) => {
				assert_eq!(imm.status.unwrap().code, StatusCode::Unauthorized as i32);
				assert_eq!(imm.details, "NoCredentials neither identity nor secret were supplied");
			},
			other => panic!("expected an immediate 401, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn generic_error_becomes_500() {
		let mut ctx = CallContext::default();
		let resp = drive_one(&AlwaysBlowsUp, headers_request(), &mut ctx).await;
		match resp.response {
			Some(PhaseResponseKind::ImmediateResponse(imm)) => {
				assert_eq!(imm.status.unwrap().code, StatusCode::InternalServerError as i32);
				assert_eq!(imm.details, "Other boom");
			},
			other => panic!("expected an immediate 500, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn unknown_phase_is_empty_continue() {
		struct Base;
		#[async_trait::async_trait]
		impl Processor for Base {}

		let mut ctx = CallContext::default();
		let req = ProcessingRequest {
			request: None,
			metadata_context: None,
		};
		let resp = drive_one(&Base, req, &mut ctx).await;
		assert!(matches!(
			resp.response,
			Some(PhaseResponseKind::RequestHeaders(_))
		));
	}
}
