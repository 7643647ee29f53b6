//! Rolling digest engine: hashes `tenant ‖ method ‖ path ‖ body` and
//! republishes the running hex digest on `X-Request-Digest` at every phase
//! that can produce one.

use protos::ext_proc::{BodyResponse, HeadersResponse, HttpBody, HttpHeaders};
use sha2::{Digest, Sha256};

use crate::dispatcher::{CallContext, PhaseOutcome, PhaseResult, Processor};
use crate::error::ProcessorError;
use crate::responses;

pub struct DigestState {
	hasher: Sha256,
}

#[derive(Default)]
pub struct DigestProcessor;

#[async_trait::async_trait]
impl Processor for DigestProcessor {
	async fn request_headers(
		&self,
		headers: &HttpHeaders,
		ctx: &mut CallContext,
	) -> PhaseOutcome<HeadersResponse> {
		let values = responses::get_headers_mapped(
			headers,
			&[(":path", "path"), (":method", "method"), ("x-gateway-tenant", "tenant")],
		);
		let method = values.get("method").cloned().unwrap_or_default();
		let path = values.get("path").cloned().unwrap_or_default();
		let tenant = values.get("tenant").cloned().unwrap_or_default();

		let mut hasher = Sha256::new();
		hasher.update(tenant.as_bytes());
		hasher.update(method.as_bytes());
		hasher.update(path.as_bytes());

		let mut response = responses::continue_headers();

		// GETs carry no body phase, so this is the only chance to emit a digest.
		if method.eq_ignore_ascii_case("get") {
			let digest = hex::encode(hasher.clone().finalize());
			let common = response.response.as_mut().expect("continue_headers always sets response");
			responses::add_header(common, "X-Request-Digest", &digest);
		}

		ctx.digest = Some(DigestState { hasher });
		Ok(PhaseResult::Continue(response))
	}

	async fn request_body(
		&self,
		body: &HttpBody,
		ctx: &mut CallContext,
	) -> PhaseOutcome<BodyResponse> {
		let state = ctx
			.digest
			.as_mut()
			.ok_or_else(|| ProcessorError::Other("request_body seen before request_headers".into()))?;
		state.hasher.update(&body.body);
		let digest = hex::encode(state.hasher.clone().finalize());

		let mut response = responses::continue_body();
		let common = response.response.as_mut().expect("continue_body always sets response");
		responses::add_header(common, "X-Request-Digest", &digest);
		Ok(PhaseResult::Continue(response))
	}
}
