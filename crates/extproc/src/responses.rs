//! Pure builders for the canonical "move on" response shapes, plus the
//! header-mutation helpers every processor uses to read an inbound phase's
//! headers or append to an outbound one.

use std::collections::HashMap;

use protos::ext_proc::common_response::ResponseStatus;
use protos::ext_proc::{
	BodyResponse, CommonResponse, HeaderMutation, HeaderValue, HeaderValueOption, HeadersResponse,
	HttpHeaders, TrailersResponse,
};

pub fn continue_response() -> CommonResponse {
	CommonResponse {
		status: ResponseStatus::Continue as i32,
		header_mutation: Some(HeaderMutation::default()),
		body_mutation: None,
	}
}

pub fn continue_headers() -> HeadersResponse {
	HeadersResponse {
		response: Some(continue_response()),
	}
}

pub fn continue_body() -> BodyResponse {
	BodyResponse {
		response: Some(continue_response()),
	}
}

pub fn continue_trailers() -> TrailersResponse {
	TrailersResponse {
		header_mutation: Some(HeaderMutation::default()),
	}
}

/// Envoy always lower-cases header names; callers pass whatever case is
/// convenient and we normalize here.
pub fn get_header(headers: &HttpHeaders, name: &str) -> Option<String> {
	let name = name.to_ascii_lowercase();
	headers
		.headers
		.as_ref()?
		.headers
		.iter()
		.find(|h| h.key == name)
		.map(|h| h.value.clone())
}

/// Collects several headers at once, keyed by their own (lower-cased) name.
pub fn get_headers(headers: &HttpHeaders, names: &[&str]) -> HashMap<String, String> {
	let wanted: Vec<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
	let mut out = HashMap::new();
	if let Some(map) = &headers.headers {
		for h in &map.headers {
			if wanted.contains(&h.key) {
				out.insert(h.key.clone(), h.value.clone());
			}
		}
	}
	out
}

/// Like [`get_headers`], but renames each collected header to the paired
/// context key instead of keeping the wire name — mirrors the `mapping`
/// argument processors like the digest and idempotency engines use to pull
/// several headers straight into their own field names.
pub fn get_headers_mapped(headers: &HttpHeaders, pairs: &[(&str, &str)]) -> HashMap<String, String> {
	let mut out = HashMap::new();
	if let Some(map) = &headers.headers {
		for h in &map.headers {
			for (wire_name, ctx_key) in pairs {
				if h.key == *wire_name {
					out.insert((*ctx_key).to_string(), h.value.clone());
				}
			}
		}
	}
	out
}

pub fn add_header(response: &mut CommonResponse, key: &str, value: &str) {
	let mutation = response
		.header_mutation
		.get_or_insert_with(HeaderMutation::default);
	mutation.set_headers.push(HeaderValueOption {
		header: Some(HeaderValue {
			key: key.to_string(),
			value: value.to_string(),
			raw_value: Vec::new(),
		}),
		append: false,
	});
}

pub fn remove_header(response: &mut CommonResponse, name: &str) {
	let mutation = response
		.header_mutation
		.get_or_insert_with(HeaderMutation::default);
	mutation.remove_headers.push(name.to_string());
}
