//! Selects and builds the single [`Processor`] the deployed instance runs,
//! by name, at startup. Mirrors `is_service`/`getattr(processors, args.service)`
//! in the original `__main__.py`, but each processor's out-of-band clients
//! are wired up explicitly here instead of resolved through a dynamic
//! lookup — there is exactly one processor per process (see spec §1
//! Non-goals: no dynamic processor pipelines at runtime).

use std::sync::Arc;

use crate::clients::auth::AuthClient;
use crate::clients::bus::{Bus, KafkaBus, bootstrap_servers_from_file};
use crate::clients::cache::{Cache, RedisCache};
use crate::config::Config;
use crate::dispatcher::Processor;
use crate::jwt::Verifier;
use crate::processors::BaseProcessor;
use crate::processors::authn::AuthnProcessor;
use crate::processors::concurrtest::ConcurrencyTestProcessor;
use crate::processors::digester::DigestProcessor;
use crate::processors::idempotency::IdempotencyProcessor;
use crate::processors::logging::LoggingProcessor;

/// One variant per processor class in the original service, named the same
/// way so operators familiar with that service recognize the `-s` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceName {
	Base,
	Digest,
	Idempotency,
	Authn,
	Logging,
	ConcurrencyTest,
}

impl std::str::FromStr for ServiceName {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"BaseExternalProcessorService" => Self::Base,
			"DigestExternalProcessorService" => Self::Digest,
			"IdempotencyExternalProcessorService" => Self::Idempotency,
			"AuthnExternalProcessorService" => Self::Authn,
			"LoggingExternalProcessorService" => Self::Logging,
			"ConcurrencyTestingService" => Self::ConcurrencyTest,
			other => anyhow::bail!("{other} is not defined in processors"),
		})
	}
}

impl std::fmt::Display for ServiceName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Base => "BaseExternalProcessorService",
			Self::Digest => "DigestExternalProcessorService",
			Self::Idempotency => "IdempotencyExternalProcessorService",
			Self::Authn => "AuthnExternalProcessorService",
			Self::Logging => "LoggingExternalProcessorService",
			Self::ConcurrencyTest => "ConcurrencyTestingService",
		};
		f.write_str(name)
	}
}

/// Builds the selected processor, connecting only the out-of-band clients
/// it actually needs.
pub async fn build(name: ServiceName, cfg: &Config) -> anyhow::Result<Arc<dyn Processor>> {
	Ok(match name {
		ServiceName::Base => Arc::new(BaseProcessor) as Arc<dyn Processor>,
		ServiceName::Digest => Arc::new(DigestProcessor) as Arc<dyn Processor>,
		ServiceName::ConcurrencyTest => Arc::new(ConcurrencyTestProcessor) as Arc<dyn Processor>,
		ServiceName::Idempotency => {
			let cache: Arc<dyn Cache> = Arc::new(RedisCache::connect(&cfg.redis_url()).await?);
			Arc::new(IdempotencyProcessor::new(
				cache,
				cfg.idemp_sentinel_time,
				cfg.idemp_cache_time,
			)) as Arc<dyn Processor>
		},
		ServiceName::Authn => {
			let auth_client = AuthClient::new(cfg.auth_url());
			let verifier = Verifier::new(
				&cfg.token_public_key,
				&cfg.token_algorithm,
				&cfg.token_issuer,
				&cfg.token_audience,
			)?;
			Arc::new(AuthnProcessor::new(auth_client, verifier)) as Arc<dyn Processor>
		},
		ServiceName::Logging => {
			let bootstrap = bootstrap_servers_from_file(&cfg.kafka_config_file);
			let bus: Arc<dyn Bus> = Arc::new(KafkaBus::new(&bootstrap)?);
			Arc::new(LoggingProcessor::new(bus, cfg.kafka_topic.clone())) as Arc<dyn Processor>
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_every_known_service_name() {
		for name in [
			"BaseExternalProcessorService",
			"DigestExternalProcessorService",
			"IdempotencyExternalProcessorService",
			"AuthnExternalProcessorService",
			"LoggingExternalProcessorService",
			"ConcurrencyTestingService",
		] {
			let parsed: ServiceName = name.parse().unwrap();
			assert_eq!(parsed.to_string(), name);
		}
	}

	#[test]
	fn unknown_service_name_is_an_error() {
		let err = "NotAProcessor".parse::<ServiceName>().unwrap_err();
		assert!(err.to_string().contains("not defined in processors"));
	}
}
