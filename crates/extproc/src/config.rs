//! Environment-driven configuration. Every processor reads its tunables from
//! here instead of the module-level constants the original implementation
//! hardcoded, so the binary needs no rebuild to point at a different auth
//! host, cache, or bus.

use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
	std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
	std::env::var(key)
		.ok()
		.and_then(|v| v.parse().ok())
		.unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
	pub grpc_port: u16,
	pub grpc_workers: usize,

	pub auth_host: String,
	pub auth_port: u16,

	pub token_public_key: secrecy::SecretString,
	pub token_private_key: secrecy::SecretString,
	pub token_algorithm: String,
	pub token_issuer: String,
	pub token_audience: String,

	pub redis_cache_host: String,
	pub redis_cache_port: u16,

	pub idemp_sentinel_time: Duration,
	pub idemp_cache_time: Duration,

	pub kafka_topic: String,
	pub kafka_config_file: String,

	pub log_level: String,
}

impl Config {
	pub fn from_env() -> Self {
		Config {
			grpc_port: env_parse_or("GRPC_PORT", 50051),
			grpc_workers: env_parse_or("GRPC_WORKERS", 5),

			auth_host: env_or("AUTH_HOST", "http://auth"),
			auth_port: env_parse_or("AUTH_PORT", 443),

			token_public_key: secrecy::SecretString::from(env_or(
				"TOKEN_PUBLIC_KEY",
				"CHANGE_ME_PLEASE",
			)),
			token_private_key: secrecy::SecretString::from(env_or(
				"TOKEN_PRIVATE_KEY",
				"CHANGE_ME_PLEASE",
			)),
			token_algorithm: env_or("TOKEN_ALGORITHM", "HS256"),
			token_issuer: env_or("TOKEN_ISSUER", "auth"),
			token_audience: env_or("TOKEN_AUDIENCE", "auth"),

			redis_cache_host: env_or("REDIS_CACHE_HOST", "redis"),
			redis_cache_port: env_parse_or("REDIS_CACHE_PORT", 6379),

			idemp_sentinel_time: env_parse_or("IDEMP_SENTINEL_TIME_SECS", 180u64).pipe(Duration::from_secs),
			idemp_cache_time: env_parse_or("IDEMP_CACHE_TIME_SECS", 24 * 3600u64).pipe(Duration::from_secs),

			kafka_topic: env_or("KAFKA_TOPIC", "gateway.logs.v1"),
			kafka_config_file: env_or("KAFKA_CONFIG_FILE", "/etc/kafka/config.yaml"),

			log_level: env_or("LOG_LEVEL", "info"),
		}
	}

	pub fn auth_url(&self) -> String {
		format!("{}:{}/api/v0/tokens", self.auth_host, self.auth_port)
	}

	pub fn redis_url(&self) -> String {
		format!("redis://{}:{}", self.redis_cache_host, self.redis_cache_port)
	}
}

/// Tiny pipe helper so a parsed env value can flow straight into a
/// constructor without a temporary binding.
trait Pipe: Sized {
	fn pipe<T>(self, f: impl FnOnce(Self) -> T) -> T {
		f(self)
	}
}
impl<T> Pipe for T {}
