//! Thin wrapper over the external KV store backing the idempotency engine.
//! Every call swallows transport errors and logs them — the idempotency
//! engine treats a store outage as a cache miss, never as a request failure.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

#[async_trait::async_trait]
pub trait Cache: Send + Sync {
	async fn exists(&self, key: &str) -> bool;
	async fn get(&self, key: &str) -> Option<String>;
	async fn setex(&self, key: &str, value: &str, ttl: Duration) -> bool;
	async fn delete(&self, key: &str);
}

#[derive(Clone)]
pub struct RedisCache {
	conn: ConnectionManager,
}

impl RedisCache {
	pub async fn connect(url: &str) -> anyhow::Result<Self> {
		let client = redis::Client::open(url)?;
		let conn = client.get_connection_manager().await?;
		Ok(Self { conn })
	}
}

#[async_trait::async_trait]
impl Cache for RedisCache {
	async fn exists(&self, key: &str) -> bool {
		let mut conn = self.conn.clone();
		match conn.exists::<_, bool>(key).await {
			Ok(v) => v,
			Err(err) => {
				tracing::error!(error = %err, "cache exists() failed, treating as miss");
				false
			},
		}
	}

	async fn get(&self, key: &str) -> Option<String> {
		let mut conn = self.conn.clone();
		match conn.get::<_, Option<String>>(key).await {
			Ok(v) => v,
			Err(err) => {
				tracing::error!(error = %err, "cache get() failed, treating as miss");
				None
			},
		}
	}

	async fn setex(&self, key: &str, value: &str, ttl: Duration) -> bool {
		let mut conn = self.conn.clone();
		match conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await {
			Ok(()) => true,
			Err(err) => {
				tracing::error!(error = %err, "cache setex() failed");
				false
			},
		}
	}

	async fn delete(&self, key: &str) {
		let mut conn = self.conn.clone();
		if let Err(err) = conn.del::<_, ()>(key).await {
			tracing::error!(error = %err, "cache delete() failed");
		}
	}
}
