use async_trait::async_trait;
use lb_core::prelude::*;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{BackendStore, StoreError};
use crate::backend::Backend;
use crate::config::RedisConfig;

/// Membership set for all known backend identities.
const CACHE_TAG: &str = "backends";
/// How often an optimistic adjust may race a concurrent writer before the
/// operation is reported as failed.
const ADJUST_ATTEMPTS: usize = 5;

/// Coordination-store-backed variant, shared by every proxy replica.
/// Membership lives in a set under [`CACHE_TAG`]; each record lives under its
/// identity as the key, encoded with [`Backend::encode`].
pub struct RedisStore {
	client: redis::Client,
	manager: ConnectionManager,
}

impl RedisStore {
	pub async fn connect(cfg: &RedisConfig) -> anyhow::Result<Self> {
		let client = redis::Client::open(connection_info(cfg)?)?;
		let manager = ConnectionManager::new(client.clone()).await?;
		Ok(RedisStore { client, manager })
	}
}

pub(crate) fn connection_info(cfg: &RedisConfig) -> anyhow::Result<redis::ConnectionInfo> {
	let (host, port) = match cfg.addr.rsplit_once(':') {
		Some((host, port)) => (
			host.to_string(),
			port
				.parse::<u16>()
				.with_context(|| format!("invalid store address '{}'", cfg.addr))?,
		),
		None => (cfg.addr.clone(), 6379),
	};
	Ok(redis::ConnectionInfo {
		addr: redis::ConnectionAddr::Tcp(host, port),
		redis: redis::RedisConnectionInfo {
			db: cfg.db,
			username: cfg.username.clone(),
			password: cfg.password.clone(),
			..Default::default()
		},
	})
}

#[async_trait]
impl BackendStore for RedisStore {
	async fn add(&self, backend: Backend) -> Result<(), StoreError> {
		let identity = backend.address();
		let encoded = backend.encode()?;
		let mut con = self.manager.clone();
		// NX keeps the record (and its in-flight count) of an already-known
		// identity untouched.
		let _: () = redis::pipe()
			.atomic()
			.sadd(CACHE_TAG, identity.as_str())
			.ignore()
			.cmd("SET")
			.arg(identity.as_str())
			.arg(encoded)
			.arg("NX")
			.ignore()
			.query_async(&mut con)
			.await?;
		info!(backend=%identity, name=%backend.name(), "adding backend");
		Ok(())
	}

	async fn remove(&self, identity: &str) -> Result<(), StoreError> {
		if identity.is_empty() {
			return Err(StoreError::EmptyIdentity);
		}
		// The membership set is left to drift; snapshot tolerates nil values.
		let mut con = self.manager.clone();
		con.del::<_, ()>(identity).await?;
		info!(backend = identity, "backend removed");
		Ok(())
	}

	async fn adjust(&self, identity: &str, delta: i64) -> Result<(), StoreError> {
		if identity.is_empty() {
			debug!("adjust with empty identity ignored");
			return Ok(());
		}
		for attempt in 1..=ADJUST_ATTEMPTS {
			// WATCH state lives on the connection, so every attempt runs on its
			// own connection rather than the shared manager.
			let mut con = self.client.get_multiplexed_async_connection().await?;
			let _: () = redis::cmd("WATCH")
				.arg(identity)
				.query_async(&mut con)
				.await?;
			let Some(raw) = con.get::<_, Option<String>>(identity).await? else {
				let _: () = redis::cmd("UNWATCH").query_async(&mut con).await?;
				// The backend raced with a removal.
				debug!(backend = identity, "could not find backend");
				return Ok(());
			};
			let backend = Backend::decode(&raw)?;
			backend.adjust(delta);
			let committed: Option<(String,)> = redis::pipe()
				.atomic()
				.set(identity, backend.encode()?)
				.query_async(&mut con)
				.await?;
			if committed.is_some() {
				return Ok(());
			}
			trace!(
				backend = identity,
				attempt, "adjust raced a concurrent writer, retrying"
			);
		}
		Err(StoreError::Conflict(strng::new(identity), ADJUST_ATTEMPTS))
	}

	async fn snapshot(&self) -> Result<Vec<Backend>, StoreError> {
		let mut con = self.manager.clone();
		let keys: Vec<String> = con.smembers(CACHE_TAG).await?;
		if keys.is_empty() {
			return Ok(Vec::new());
		}
		let values: Vec<Option<String>> = con.mget(&keys).await?;
		values
			.into_iter()
			.flatten()
			.map(|raw| Backend::decode(&raw).map_err(Into::into))
			.collect()
	}
}
