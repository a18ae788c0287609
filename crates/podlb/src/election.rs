use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lb_core::drain::DrainWatcher;
use lb_core::prelude::*;
use redis::aio::ConnectionManager;

use crate::config::RedisConfig;
use crate::store::redis::connection_info;

/// The well-known coordination-store key the lease lives under.
const LEADER_KEY: &str = "proxy_leader";

/// LeaseStore is the slice of the coordination store the election needs: an
/// atomic claim-if-absent with a TTL, and a TTL refresh for the held key.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
	/// try_acquire claims the key for `id` iff nobody holds it. Returns whether
	/// the claim succeeded.
	async fn try_acquire(&self, key: &str, id: &str, ttl: Duration) -> anyhow::Result<bool>;
	/// extend refreshes the TTL of the held key. Returns false if the key no
	/// longer exists.
	async fn extend(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;
}

pub struct RedisLease {
	manager: ConnectionManager,
}

impl RedisLease {
	pub async fn connect(cfg: &RedisConfig) -> anyhow::Result<Self> {
		let client = redis::Client::open(connection_info(cfg)?)?;
		let manager = ConnectionManager::new(client).await?;
		Ok(RedisLease { manager })
	}
}

#[async_trait]
impl LeaseStore for RedisLease {
	async fn try_acquire(&self, key: &str, id: &str, ttl: Duration) -> anyhow::Result<bool> {
		let mut con = self.manager.clone();
		let claimed: Option<String> = redis::cmd("SET")
			.arg(key)
			.arg(id)
			.arg("NX")
			.arg("EX")
			.arg(ttl.as_secs().max(1))
			.query_async(&mut con)
			.await?;
		Ok(claimed.is_some())
	}

	async fn extend(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
		let mut con = self.manager.clone();
		let refreshed: bool = redis::cmd("EXPIRE")
			.arg(key)
			.arg(ttl.as_secs().max(1))
			.query_async(&mut con)
			.await?;
		Ok(refreshed)
	}
}

/// Elector drives distributed single-leader election over the coordination
/// store. At most one instance holds the lease at any instant; the rest are
/// followers that retry acquisition every `lock_ttl`.
///
/// No leader-scoped work is wired up yet; the lease is the gating primitive
/// for future singleton duties, observed through [`Elector::is_leader`].
pub struct Elector {
	id: Strng,
	lease: Arc<dyn LeaseStore>,
	leader: AtomicBool,
	lock_ttl: Duration,
}

impl Elector {
	pub fn new(id: Strng, lease: Arc<dyn LeaseStore>, lock_ttl: Duration) -> Arc<Self> {
		Arc::new(Elector {
			id,
			lease,
			leader: AtomicBool::new(false),
			lock_ttl,
		})
	}

	pub fn is_leader(&self) -> bool {
		self.leader.load(Ordering::Relaxed)
	}

	/// run drives the acquire/renew loop until drain. The lease is not
	/// released explicitly; letting the TTL lapse covers shutdown and crash
	/// alike.
	pub async fn run(self: Arc<Self>, drain: DrainWatcher) {
		tokio::select! {
			_ = drain.wait_for_drain() => {
				info!(instance=%self.id, "leader election shutting down");
			},
			_ = self.election_loop() => {},
		}
	}

	async fn election_loop(&self) {
		loop {
			match self
				.lease
				.try_acquire(LEADER_KEY, &self.id, self.lock_ttl)
				.await
			{
				Ok(true) => {
					info!(instance=%self.id, "acquired leadership");
					self.leader.store(true, Ordering::SeqCst);
					if let Err(err) = self.keep_alive().await {
						warn!(instance=%self.id, %err, "lost leadership");
					}
					self.leader.store(false, Ordering::SeqCst);
					// Fall through and compete for the lease again.
				},
				Ok(false) => tokio::time::sleep(self.lock_ttl).await,
				Err(err) => {
					warn!(%err, "could not attempt acquisition");
					tokio::time::sleep(self.lock_ttl).await;
				},
			}
		}
	}

	/// keep_alive renews the lease every `lock_ttl / 2` and returns on the
	/// first failure, at which point the caller demotes itself.
	async fn keep_alive(&self) -> anyhow::Result<()> {
		loop {
			tokio::time::sleep(self.lock_ttl / 2).await;
			if !self.lease.extend(LEADER_KEY, self.lock_ttl).await? {
				anyhow::bail!("lease expired before renewal");
			}
		}
	}
}
