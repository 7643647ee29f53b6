use thiserror::Error;

/// Errors a processor's phase handler can fail with. The dispatcher (see
/// [`crate::dispatcher`]) converts every variant into an `ImmediateResponse`
/// before it ever reaches the caller — nothing here is allowed to unwind the
/// stream.
#[derive(Debug, Error)]
pub enum ProcessorError {
	#[error("neither identity nor secret were supplied")]
	NoCredentials,

	#[error("identity is not a well-formed UUID")]
	MalformedCredentials,

	#[error("token rejected: {0}")]
	InvalidToken(String),

	#[error("auth service rejected the exchange: {0}")]
	Unauthenticated(String),

	#[error("auth service call failed")]
	AuthTransport(#[from] reqwest::Error),

	#[error("sentinel must have status == 0, got {0}")]
	InvalidSentinel(i32),

	#[error("{0} is not cached")]
	CacheMiss(String),

	#[error("concurrency probe mismatch: {0}")]
	ConcurrencyMismatch(String),

	#[error("malformed body: {0}")]
	BadBody(#[from] serde_json::Error),

	#[error("{0}")]
	Other(String),
}

impl ProcessorError {
	/// True for anything that should surface to the data plane as a 401
	/// rather than a 500, per the auth engine's error mapping.
	pub fn is_unauthenticated(&self) -> bool {
		matches!(
			self,
			Self::NoCredentials
				| Self::MalformedCredentials
				| Self::Unauthenticated(_)
				| Self::InvalidToken(_)
		)
	}

	/// The variant name, used as the `details` prefix the way the original
	/// service prefixes its exception `ImmediateResponse`s with
	/// `err.__class__.__name__`.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::NoCredentials => "NoCredentials",
			Self::MalformedCredentials => "MalformedCredentials",
			Self::InvalidToken(_) => "InvalidToken",
			Self::Unauthenticated(_) => "Unauthenticated",
			Self::AuthTransport(_) => "AuthTransport",
			Self::InvalidSentinel(_) => "InvalidSentinel",
			Self::CacheMiss(_) => "CacheMiss",
			Self::ConcurrencyMismatch(_) => "ConcurrencyMismatch",
			Self::BadBody(_) => "BadBody",
			Self::Other(_) => "Other",
		}
	}
}
