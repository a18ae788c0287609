use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use lb_core::prelude::*;
use parking_lot::Mutex;

use super::{BackendStore, StoreError};
use crate::backend::Backend;

/// Process-local store: a mutex-guarded map. The mutex only protects the
/// structure of the map; each backend's count is itself atomic, so adjusts
/// touch the lock just long enough to look the record up.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<HashMap<Strng, Backend>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Default::default()
	}
}

#[async_trait]
impl BackendStore for MemoryStore {
	async fn add(&self, backend: Backend) -> Result<(), StoreError> {
		let address = backend.address();
		match self.inner.lock().entry(address.clone()) {
			Entry::Occupied(_) => {
				// Modified events re-announce running pods; the in-flight count
				// on the existing record must survive them.
				debug!(backend=%address, "already known, keeping existing record");
			},
			Entry::Vacant(slot) => {
				info!(backend=%address, name=%backend.name(), "adding backend");
				slot.insert(backend);
			},
		}
		Ok(())
	}

	async fn remove(&self, identity: &str) -> Result<(), StoreError> {
		if identity.is_empty() {
			return Err(StoreError::EmptyIdentity);
		}
		if self.inner.lock().remove(identity).is_some() {
			info!(backend = identity, "backend removed");
		}
		Ok(())
	}

	async fn adjust(&self, identity: &str, delta: i64) -> Result<(), StoreError> {
		let backend = self.inner.lock().get(identity).cloned();
		match backend {
			Some(backend) => {
				backend.adjust(delta);
			},
			// The backend raced with a removal; the request is already on the
			// wire, so this must not become an error.
			None => debug!(backend = identity, "could not find backend"),
		}
		Ok(())
	}

	async fn snapshot(&self) -> Result<Vec<Backend>, StoreError> {
		Ok(self.inner.lock().values().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn backend(address: &str) -> Backend {
		Backend::new(strng::new(address), strng::new("server"))
	}

	#[tokio::test]
	async fn add_then_snapshot() {
		let store = MemoryStore::new();
		store.add(backend("10.0.0.1")).await.unwrap();
		store.add(backend("10.0.0.2")).await.unwrap();
		let mut addrs: Vec<_> = store
			.snapshot()
			.await
			.unwrap()
			.iter()
			.map(|b| b.address())
			.collect();
		addrs.sort();
		assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.2"]);
	}

	#[tokio::test]
	async fn add_existing_keeps_count() {
		let store = MemoryStore::new();
		store.add(backend("10.0.0.1")).await.unwrap();
		store.adjust("10.0.0.1", 3).await.unwrap();
		store.add(backend("10.0.0.1")).await.unwrap();
		let snapshot = store.snapshot().await.unwrap();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].count(), 3);
	}

	#[tokio::test]
	async fn remove_is_idempotent() {
		let store = MemoryStore::new();
		store.add(backend("10.0.0.1")).await.unwrap();
		store.remove("10.0.0.1").await.unwrap();
		store.remove("10.0.0.1").await.unwrap();
		assert!(store.snapshot().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn remove_empty_identity_is_an_error() {
		let store = MemoryStore::new();
		assert!(matches!(
			store.remove("").await,
			Err(StoreError::EmptyIdentity)
		));
	}

	#[tokio::test]
	async fn adjust_unknown_is_a_noop() {
		let store = MemoryStore::new();
		store.adjust("10.9.9.9", -1).await.unwrap();
	}

	#[tokio::test]
	async fn adjust_saturates_at_zero() {
		let store = MemoryStore::new();
		store.add(backend("10.0.0.1")).await.unwrap();
		store.adjust("10.0.0.1", -10).await.unwrap();
		assert_eq!(store.snapshot().await.unwrap()[0].count(), 0);
	}

	#[tokio::test]
	async fn snapshot_is_isolated_from_removal() {
		let store = MemoryStore::new();
		store.add(backend("10.0.0.1")).await.unwrap();
		let snapshot = store.snapshot().await.unwrap();
		store.remove("10.0.0.1").await.unwrap();
		// The snapshot taken before the removal still traverses cleanly.
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].address(), "10.0.0.1");
	}

	#[tokio::test]
	async fn concurrent_adjusts_conserve_counts() {
		let store = Arc::new(MemoryStore::new());
		store.add(backend("10.0.0.1")).await.unwrap();

		let mut tasks = Vec::new();
		for _ in 0..8 {
			let store = store.clone();
			tasks.push(tokio::spawn(async move {
				for _ in 0..100 {
					store.adjust("10.0.0.1", 1).await.unwrap();
				}
				for _ in 0..100 {
					store.adjust("10.0.0.1", -1).await.unwrap();
				}
			}));
		}
		for task in tasks {
			task.await.unwrap();
		}

		let snapshot = store.snapshot().await.unwrap();
		assert_eq!(snapshot[0].count(), 0);
	}
}
