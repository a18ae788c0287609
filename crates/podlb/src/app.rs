use lb_core::prelude::*;
use lb_core::{drain, readiness, signal};

use crate::config::{Config, StoreConfig};
use crate::discovery::kubernetes::KubeDiscovery;
use crate::election::{Elector, RedisLease};
use crate::management::health_server;
use crate::proxy::{Gateway, Pool};
use crate::store;
use crate::strategy::Strategy;

/// run wires the whole proxy together and brings it up. Everything that can
/// fail here is a startup error and aborts the process; once `Bound` is
/// returned, failures are handled per-request.
pub async fn run(config: Arc<Config>) -> anyhow::Result<Bound> {
	let shutdown = signal::Shutdown::new();
	// Any component which wants time to gracefully exit holds a drain_rx
	// clone and finishes up when it is signaled.
	let (drain_tx, drain_rx) = drain::new();

	let ready = readiness::Ready::new();
	let store_task = ready.register_task("backend store");
	let discovery_task = ready.register_task("discovery");

	let health_server =
		health_server::Server::new(config.health_addr, drain_rx.clone(), ready.clone())
			.await
			.context("health server starts")?;
	health_server.spawn();

	let backend_store = store::from_config(&config)
		.await
		.context("backend store starts")?;
	drop(store_task);

	let discovery = KubeDiscovery::connect(&config)
		.await
		.context("orchestrator connect")?;
	let events = discovery.events().await.context("pod watch starts")?;
	drop(discovery_task);

	// The lease only makes sense with a coordination store to hold it; a
	// memory-store deployment is single-replica by construction.
	match &config.store {
		StoreConfig::Redis(redis) => {
			let lease = RedisLease::connect(redis)
				.await
				.context("lease store connect")?;
			let elector = Elector::new(config.instance_id.clone(), Arc::new(lease), config.lock_ttl);
			tokio::spawn(elector.run(drain_rx.clone()));
		},
		StoreConfig::Memory => {
			info!("leader election disabled: no coordination store configured");
		},
	}

	let pool = Pool::new(
		backend_store,
		Strategy::new(config.strategy),
		config.specs.clone(),
		config.refresh_rate,
	);
	pool.init(events);

	let gateway = Gateway::bind(config.proxy_addr, pool, drain_rx.clone())
		.await
		.context("proxy listener binds")?;
	gateway.spawn();

	Ok(Bound {
		shutdown,
		drain_tx,
		termination_deadline: config.termination_deadline,
	})
}

pub struct Bound {
	pub shutdown: signal::Shutdown,
	drain_tx: drain::DrainTrigger,
	termination_deadline: Duration,
}

impl Bound {
	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.shutdown.wait().await;

		// Start a drain; established connections get a bounded window to
		// complete before the process exits underneath them.
		info!(
			"shutting down, draining for up to {:?}",
			self.termination_deadline
		);
		if tokio::time::timeout(self.termination_deadline, self.drain_tx.start_drain_and_wait())
			.await
			.is_err()
		{
			warn!("drain deadline expired with connections outstanding");
		}

		Ok(())
	}
}
