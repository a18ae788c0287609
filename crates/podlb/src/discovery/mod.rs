pub mod kubernetes;

use futures::Stream;
use futures_util::StreamExt;
use lb_core::prelude::*;

use crate::backend::Backend;
use crate::store::{BackendStore, StoreError};

/// What the proxy needs to know about a pod, independent of the orchestrator
/// client that produced it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodSnapshot {
	/// The instance network address; empty while the orchestrator has not
	/// assigned one yet.
	pub address: Strng,
	pub name: Strng,
	/// Set when the orchestrator has stamped the pod for deletion.
	pub terminating: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodEvent {
	Added(PodSnapshot),
	Modified(PodSnapshot),
	Deleted(PodSnapshot),
}

/// observe drains the orchestrator event stream into store mutations, in
/// stream order. It runs until the stream closes; store failures are logged
/// and the loop continues.
pub async fn observe<S>(mut events: S, store: Arc<dyn BackendStore>)
where
	S: Stream<Item = PodEvent> + Unpin,
{
	while let Some(event) = events.next().await {
		if let Err(err) = apply(&*store, event).await {
			warn!(%err, "failed to apply pod event");
		}
	}
	info!("pod event stream closed, observer exiting");
}

async fn apply(store: &dyn BackendStore, event: PodEvent) -> Result<(), StoreError> {
	match event {
		PodEvent::Added(pod) => {
			// A freshly added pod may not have an address yet; the Modified
			// event that assigns one will bring it in.
			if pod.address.is_empty() {
				debug!(pod=%pod.name, "added without an address, skipping");
				return Ok(());
			}
			store.add(Backend::new(pod.address, pod.name)).await
		},
		PodEvent::Deleted(pod) => store.remove(&pod.address).await,
		PodEvent::Modified(pod) => {
			if pod.terminating {
				store.remove(&pod.address).await
			} else if !pod.address.is_empty() {
				store.add(Backend::new(pod.address, pod.name)).await
			} else {
				Ok(())
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::MemoryStore;

	fn pod(address: &str, name: &str) -> PodSnapshot {
		PodSnapshot {
			address: strng::new(address),
			name: strng::new(name),
			terminating: false,
		}
	}

	fn terminating(address: &str, name: &str) -> PodSnapshot {
		PodSnapshot {
			terminating: true,
			..pod(address, name)
		}
	}

	async fn drained(events: Vec<PodEvent>) -> Arc<MemoryStore> {
		let store = Arc::new(MemoryStore::new());
		observe(tokio_stream::iter(events), store.clone() as Arc<dyn BackendStore>).await;
		store
	}

	#[tokio::test]
	async fn membership_reflects_events() {
		let store = drained(vec![
			PodEvent::Added(pod("10.0.0.1", "server-1")),
			// No address yet; must not create a record.
			PodEvent::Added(pod("", "server-2")),
			// The address arrives later through Modified.
			PodEvent::Modified(pod("10.0.0.2", "server-2")),
			PodEvent::Added(pod("10.0.0.3", "server-3")),
			PodEvent::Deleted(pod("10.0.0.3", "server-3")),
			PodEvent::Added(pod("10.0.0.4", "server-4")),
			PodEvent::Modified(terminating("10.0.0.4", "server-4")),
		])
		.await;

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
	async fn repeated_adds_are_safe() {
		let store = drained(vec![
			PodEvent::Added(pod("10.0.0.1", "server-1")),
			PodEvent::Added(pod("10.0.0.1", "server-1")),
			PodEvent::Modified(pod("10.0.0.1", "server-1")),
		])
		.await;
		assert_eq!(store.snapshot().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn delete_unknown_is_safe() {
		let store = drained(vec![PodEvent::Deleted(pod("10.9.9.9", "ghost"))]).await;
		assert!(store.snapshot().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn pod_removed_while_request_in_flight() {
		let store = Arc::new(MemoryStore::new());
		store
			.add(Backend::new(strng::new("10.0.0.2"), strng::new("server-2")))
			.await
			.unwrap();
		store.adjust("10.0.0.2", 1).await.unwrap();

		observe(
			tokio_stream::iter(vec![PodEvent::Deleted(pod("10.0.0.2", "server-2"))]),
			store.clone() as Arc<dyn BackendStore>,
		)
		.await;

		// The request completes after the removal; the decrement must be a
		// clean no-op.
		store.adjust("10.0.0.2", -1).await.unwrap();
		assert!(store.snapshot().await.unwrap().is_empty());
	}
}
