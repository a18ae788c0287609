use std::sync::atomic::{AtomicUsize, Ordering};

use itertools::Itertools;

use crate::backend::Backend;
use crate::config::StrategyKind;

/// Election policy over a store snapshot. The variant is fixed at startup.
#[derive(Debug)]
pub enum Strategy {
	/// Pick the backend with the fewest requests in flight. Backends can have
	/// wildly different per-request service times, so filling the idle holes
	/// approximates join-the-shortest-queue.
	LeastLoaded,
	/// Rotate through the pool in identity order.
	RoundRobin { next: AtomicUsize },
}

impl Strategy {
	pub fn new(kind: StrategyKind) -> Strategy {
		match kind {
			StrategyKind::LeastLoaded => Strategy::LeastLoaded,
			StrategyKind::RoundRobin => Strategy::RoundRobin {
				next: AtomicUsize::new(0),
			},
		}
	}

	/// elect picks one backend from the snapshot, or `None` iff it is empty.
	pub fn elect<'a>(&self, snapshot: &'a [Backend]) -> Option<&'a Backend> {
		match self {
			Strategy::LeastLoaded => least_loaded(snapshot),
			Strategy::RoundRobin { next } => round_robin(next, snapshot),
		}
	}
}

fn least_loaded(snapshot: &[Backend]) -> Option<&Backend> {
	let mut min: Option<(&Backend, i64)> = None;
	for backend in snapshot {
		let count = backend.count();
		if min.is_none_or(|(_, min_count)| count < min_count) {
			min = Some((backend, count));
		}
		if count == 0 {
			// Nothing beats an idle backend.
			break;
		}
	}
	min.map(|(backend, _)| backend)
}

fn round_robin<'a>(next: &AtomicUsize, snapshot: &'a [Backend]) -> Option<&'a Backend> {
	if snapshot.is_empty() {
		return None;
	}
	let turn = next.fetch_add(1, Ordering::Relaxed);
	snapshot
		.iter()
		.sorted_by_key(|backend| backend.address())
		.nth(turn % snapshot.len())
}
