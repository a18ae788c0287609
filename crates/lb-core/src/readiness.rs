// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::telemetry;

/// Ready reports whether startup has finished: it holds the set of startup
/// tasks that have not completed yet, and the process is ready once that set
/// is empty.
#[derive(Clone, Debug, Default)]
pub struct Ready(Arc<Mutex<HashSet<String>>>);

impl Ready {
	pub fn new() -> Ready {
		Ready(Default::default())
	}

	/// register_task marks `name` as pending until the returned guard drops.
	pub fn register_task(&self, name: &str) -> PendingTask {
		self.0.lock().unwrap().insert(name.to_string());
		PendingTask {
			parent: self.clone(),
			name: name.to_string(),
		}
	}

	/// pending returns the startup tasks still outstanding.
	pub fn pending(&self) -> HashSet<String> {
		self.0.lock().unwrap().clone()
	}
}

/// PendingTask keeps one startup task counted as outstanding; dropping it
/// marks the task complete.
pub struct PendingTask {
	parent: Ready,
	name: String,
}

impl Drop for PendingTask {
	fn drop(&mut self) {
		let mut pending = self.parent.0.lock().unwrap();
		pending.remove(&self.name);
		let left = pending.len();
		let dur = telemetry::APPLICATION_START_TIME.elapsed();
		if left == 0 {
			info!("task '{}' complete ({dur:?}), server ready", self.name);
		} else {
			info!(
				"task '{}' complete ({dur:?}), {left} still pending",
				self.name
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pending_drains_as_tasks_drop() {
		let ready = Ready::new();
		let store = ready.register_task("backend store");
		let discovery = ready.register_task("discovery");
		assert_eq!(ready.pending().len(), 2);
		drop(store);
		assert_eq!(ready.pending(), HashSet::from(["discovery".to_string()]));
		drop(discovery);
		assert!(ready.pending().is_empty());
	}
}
