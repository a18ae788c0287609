mod memory;
pub(crate) mod redis;

use async_trait::async_trait;
use lb_core::prelude::*;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::backend::Backend;
use crate::config::{Config, StoreConfig};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("identity must not be empty")]
	EmptyIdentity,
	#[error("coordination store error: {0}")]
	Coordination(#[from] ::redis::RedisError),
	#[error("backend record codec error: {0}")]
	Codec(#[from] serde_json::Error),
	#[error("adjust of '{0}' conflicted {1} times, giving up")]
	Conflict(Strng, usize),
}

/// BackendStore is the shared, fast-mutating view of the pool: backends keyed
/// by identity, plus their in-flight request accounting.
///
/// The contract all variants uphold:
/// * `add` of an already-known identity keeps the existing record (and its
///   count) untouched.
/// * `remove` of an unknown identity is a no-op; an empty identity is an error.
/// * `adjust` of an unknown identity is a no-op, so a request that raced with
///   a removal still completes cleanly.
/// * `snapshot` is a consistent view; mutations made after it is taken are not
///   observed by traversals of it.
#[async_trait]
pub trait BackendStore: Send + Sync + 'static {
	async fn add(&self, backend: Backend) -> Result<(), StoreError>;
	async fn remove(&self, identity: &str) -> Result<(), StoreError>;
	async fn adjust(&self, identity: &str, delta: i64) -> Result<(), StoreError>;
	async fn snapshot(&self) -> Result<Vec<Backend>, StoreError>;
}

/// Builds the store variant selected by the configuration.
pub async fn from_config(config: &Config) -> anyhow::Result<Arc<dyn BackendStore>> {
	match &config.store {
		StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
		StoreConfig::Redis(redis) => {
			let store = RedisStore::connect(redis)
				.await
				.context("connecting to the coordination store")?;
			Ok(Arc::new(store))
		},
	}
}
