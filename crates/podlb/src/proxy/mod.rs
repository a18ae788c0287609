pub mod gateway;

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::BoxStream;
use lb_core::prelude::*;

pub use gateway::Gateway;

use crate::config::SpecConfig;
use crate::discovery::{self, PodEvent, kubernetes};
use crate::store::{BackendStore, StoreError};
use crate::strategy::Strategy;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("no backends available")]
	NoBackends,
	#[error("request rewrite failed: {0}")]
	Rewrite(#[from] ::http::Error),
	#[error("backend store failure: {0}")]
	Store(#[from] StoreError),
}

/// Pool is the dispatch engine's composition root for the data path: it owns
/// the backend registry, applies the election policy on the way in, and
/// settles the accounting on the way out.
pub struct Pool {
	store: Arc<dyn BackendStore>,
	strategy: Strategy,
	specs: SpecConfig,
	refresh_rate: Duration,
	initialized: AtomicBool,
}

impl Pool {
	pub fn new(
		store: Arc<dyn BackendStore>,
		strategy: Strategy,
		specs: SpecConfig,
		refresh_rate: Duration,
	) -> Arc<Pool> {
		Arc::new(Pool {
			store,
			strategy,
			specs,
			refresh_rate,
			initialized: AtomicBool::new(false),
		})
	}

	/// direct elects a backend, charges it one in-flight request, and rewrites
	/// the request to target it. The charge completes before the request is
	/// forwarded, so overlapping elections observe each other's load.
	pub async fn direct<B>(&self, req: &mut ::http::Request<B>) -> Result<Strng, ProxyError> {
		let snapshot = self.store.snapshot().await?;
		let Some(elected) = self.strategy.elect(&snapshot) else {
			return Err(ProxyError::NoBackends);
		};
		let identity = elected.address();
		if let Err(err) = self.store.adjust(&identity, 1).await {
			// Best-effort accounting: the election stands, the request is
			// served either way.
			warn!(backend=%identity, %err, "failed to charge backend");
		}
		debug!(backend=%identity, requests = elected.count(), "request directed to backend");
		kubernetes::direct_request(req, elected, &self.specs)?;
		Ok(identity)
	}

	/// modify_response recovers the backend identity from the host the request
	/// went out to and releases its charge. Nothing here may fail the client's
	/// response, so every error is logged and swallowed.
	pub async fn modify_response(&self, upstream_host: &str) {
		let identity = match kubernetes::backend_from_host(upstream_host) {
			Ok(identity) => identity,
			Err(err) => {
				warn!(host = upstream_host, %err, "could not attribute response");
				return;
			},
		};
		if let Err(err) = self.store.adjust(&identity, -1).await {
			warn!(backend=%identity, %err, "failed to release backend");
		}
	}

	/// init launches the observer and the periodic per-backend count logger.
	/// Idempotent; only the first call spawns anything.
	pub fn init(self: &Arc<Self>, events: BoxStream<'static, PodEvent>) {
		if self.initialized.swap(true, Ordering::SeqCst) {
			return;
		}
		tokio::spawn(discovery::observe(events, self.store.clone()));
		let pool = self.clone();
		tokio::spawn(async move { pool.log_loop().await });
	}

	async fn log_loop(&self) {
		loop {
			tokio::time::sleep(self.refresh_rate).await;
			match self.store.snapshot().await {
				Ok(snapshot) => {
					for backend in &snapshot {
						info!(backend=%backend.address(), requests = backend.count(), "in flight");
					}
				},
				Err(err) => warn!(%err, "could not snapshot backends"),
			}
		}
	}
}
