use std::{
	hash::Hash,
	time::{Duration, Instant},
};

use dashmap::DashMap;

/// In-process cache for derived values. Concurrent fills race and the last writer wins.
pub(crate) struct TtlCache<K, V> {
	entries: DashMap<K, (Instant, V)>,
	ttl: Duration,
}
impl<K, V> TtlCache<K, V>
where
	K: Eq + Hash,
	V: Clone,
{
	pub(crate) fn new(ttl: Duration) -> Self {
		Self { entries: DashMap::new(), ttl }
	}

	pub(crate) fn get(&self, key: &K) -> Option<V> {
		let fresh = {
			let entry = self.entries.get(key)?;
			let (stored_at, value) = entry.value();

			(stored_at.elapsed() < self.ttl).then(|| value.clone())
		};

		if fresh.is_none() {
			self.entries.remove_if(key, |_, (stored_at, _)| stored_at.elapsed() >= self.ttl);
		}

		fresh
	}

	pub(crate) fn insert(&self, key: K, value: V) {
		self.entries.insert(key, (Instant::now(), value));
	}

	pub(crate) fn invalidate(&self, key: &K) {
		self.entries.remove(key);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_ttl_never_serves() {
		let cache = TtlCache::new(Duration::ZERO);

		cache.insert("k", 1);

		assert_eq!(cache.get(&"k"), None);
		assert!(cache.entries.is_empty());
	}

	#[test]
	fn serves_until_invalidated() {
		let cache = TtlCache::new(Duration::from_secs(60));

		cache.insert("k".to_string(), vec![1, 2]);

		assert_eq!(cache.get(&"k".to_string()), Some(vec![1, 2]));

		cache.invalidate(&"k".to_string());

		assert_eq!(cache.get(&"k".to_string()), None);
	}
}
