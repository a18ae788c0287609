use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use lb_core::prelude::*;
use serde::{Deserialize, Serialize};

/// Backend is one downstream instance: its identity (the instance network
/// address), a display name for logs, and the number of requests currently in
/// flight toward it.
///
/// Clones share the count, so a snapshot taken from a store observes (and may
/// charge) the same in-flight accounting as the store itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
	address: Strng,
	name: Strng,
	#[serde(with = "shared_count")]
	count: Arc<AtomicI64>,
}

impl Backend {
	pub fn new(address: Strng, name: Strng) -> Self {
		Backend {
			address,
			name,
			count: Default::default(),
		}
	}

	/// Identity of the backend. Immutable after creation.
	pub fn address(&self) -> Strng {
		self.address.clone()
	}

	pub fn name(&self) -> Strng {
		self.name.clone()
	}

	pub fn count(&self) -> i64 {
		self.count.load(Ordering::SeqCst)
	}

	/// adjust applies a delta to the in-flight count, saturating at zero, and
	/// returns the new count.
	pub fn adjust(&self, delta: i64) -> i64 {
		let prev = self
			.count
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
				Some((count + delta).max(0))
			})
			.expect("closure always returns Some");
		(prev + delta).max(0)
	}

	/// encode produces the wire form stored by the coordinated store.
	pub fn encode(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	pub fn decode(raw: &str) -> Result<Backend, serde_json::Error> {
		serde_json::from_str(raw)
	}
}

mod shared_count {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicI64, Ordering};

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(count: &Arc<AtomicI64>, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_i64(count.load(Ordering::SeqCst))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Arc<AtomicI64>, D::Error> {
		Ok(Arc::new(AtomicI64::new(i64::deserialize(d)?)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn adjust_saturates_at_zero() {
		let b = Backend::new(strng::new("10.0.0.1"), strng::new("server-0"));
		assert_eq!(b.adjust(3), 3);
		assert_eq!(b.adjust(-1), 2);
		assert_eq!(b.adjust(-5), 0);
		assert_eq!(b.count(), 0);
		assert_eq!(b.adjust(1), 1);
	}

	#[test]
	fn clones_share_the_count() {
		let b = Backend::new(strng::new("10.0.0.1"), strng::new("server-0"));
		let clone = b.clone();
		b.adjust(2);
		assert_eq!(clone.count(), 2);
	}

	#[test]
	fn wire_round_trip() {
		let b = Backend::new(strng::new("10.244.0.6"), strng::new("server-abc"));
		b.adjust(4);
		let decoded = Backend::decode(&b.encode().unwrap()).unwrap();
		assert_eq!(decoded.address(), b.address());
		assert_eq!(decoded.name(), b.name());
		assert_eq!(decoded.count(), 4);
	}
}
