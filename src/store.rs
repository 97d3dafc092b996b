use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::types::{Parameter, ParameterId};

/// Cache entry. `None` means "wanted but not yet fetched", which
/// readers must be able to tell apart from "never asked". A freshness
/// deadline suppresses refetching values that were just pushed in.
#[derive(Debug, Clone, Default)]
struct ParameterRecord {
    parameter: Option<Parameter>,
    fresh_until: Option<Instant>,
}

/// Per-system cache of parameter snapshots keyed by parameter id.
#[derive(Debug)]
pub struct ParameterStore {
    records: Mutex<HashMap<ParameterId, ParameterRecord>>,
    freshness: Duration,
}

impl ParameterStore {
    /// `freshness` is how long a stored value suppresses a refetch.
    pub fn new(freshness: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            freshness,
        }
    }

    /// Last known value, `None` if never observed. No side effects.
    pub fn get(&self, id: ParameterId) -> Option<Parameter> {
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|record| record.parameter.clone())
    }

    /// Unconditional wholesale overwrite. A `Some` value is stamped
    /// fresh so the coordinator does not immediately re-request it; a
    /// `None` stays pending and will be fetched next cycle.
    pub fn set(&self, id: ParameterId, parameter: Option<Parameter>) {
        let fresh_until = parameter.is_some().then(|| Instant::now() + self.freshness);
        self.records
            .lock()
            .unwrap()
            .insert(id, ParameterRecord { parameter, fresh_until });
    }

    /// Ensure a placeholder exists for each id so readers observe
    /// "known-unknown" instead of "never asked". Existing entries are
    /// left untouched.
    pub fn want<I>(&self, ids: I)
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let mut records = self.records.lock().unwrap();
        for id in ids {
            records.entry(id).or_default();
        }
    }

    /// Out of `wanted`, the ids the cache cannot serve fresh: never
    /// stored, placeholder-only, or past the freshness window.
    pub(crate) fn filter_pending<I>(&self, wanted: I) -> HashSet<ParameterId>
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let now = Instant::now();
        let records = self.records.lock().unwrap();
        wanted
            .into_iter()
            .filter(|id| match records.get(id) {
                Some(record) => {
                    record.parameter.is_none()
                        || record.fresh_until.is_none_or(|deadline| deadline <= now)
                }
                None => true,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    subscribers: HashMap<u64, HashSet<ParameterId>>,
}

/// Tracks, per live consumer, which parameter ids it needs, and
/// computes the de-duplicated set still worth fetching. Request volume
/// stays proportional to distinct data needed, not to consumer count.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer's wanted set. The returned capability
    /// removes exactly that entry; calling it twice is a no-op.
    pub fn subscribe<I>(&self, ids: I) -> Subscription
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let wanted: HashSet<ParameterId> = ids.into_iter().collect();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, wanted);
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Union of all live subscribers' ids, snapshotted under the lock
    /// so a detach during a poll cycle cannot invalidate iteration.
    pub fn wanted(&self) -> HashSet<ParameterId> {
        let inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .values()
            .flat_map(|ids| ids.iter().copied())
            .collect()
    }

    /// Subscribed ids the store cannot serve fresh.
    pub fn pending(&self, store: &ParameterStore) -> HashSet<ParameterId> {
        store.filter_pending(self.wanted())
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

/// Capability returned by [`SubscriberRegistry::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Mutex<RegistryInner>>,
    id: u64,
}

impl Subscription {
    /// Remove this subscriber's entry. Idempotent; also safe after
    /// the registry itself has been torn down.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().unwrap().subscribers.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter(id: u32, title: &str, value: f64) -> Parameter {
        Parameter {
            id: ParameterId(id),
            title: title.to_string(),
            designation: String::new(),
            unit: "°C".to_string(),
            display_value: format!("{value}°C"),
            value: Some(value),
            raw_value: Some((value * 10.0) as i64),
        }
    }

    fn ids(list: &[u32]) -> Vec<ParameterId> {
        list.iter().copied().map(ParameterId).collect()
    }

    #[test]
    fn get_returns_last_known_value() {
        let store = ParameterStore::new(Duration::from_secs(120));
        assert_eq!(store.get(ParameterId(10)), None);
        store.set(ParameterId(10), Some(parameter(10, "outdoor temp.", 2.5)));
        assert_eq!(store.get(ParameterId(10)).unwrap().value, Some(2.5));
    }

    #[test]
    fn set_replaces_wholesale_never_merges() {
        let store = ParameterStore::new(Duration::from_secs(120));
        let first = Parameter {
            designation: "BT1".to_string(),
            ..parameter(10, "outdoor temp.", 2.5)
        };
        store.set(ParameterId(10), Some(first));

        let second = parameter(10, "outdoor temp.", 3.0);
        store.set(ParameterId(10), Some(second.clone()));

        let stored = store.get(ParameterId(10)).unwrap();
        assert_eq!(stored, second);
        assert!(stored.designation.is_empty(), "no field survives from the prior snapshot");
    }

    #[test]
    fn want_installs_placeholders_only() {
        let store = ParameterStore::new(Duration::from_secs(120));
        store.set(ParameterId(20), Some(parameter(20, "hot water", 48.0)));
        store.want(ids(&[10, 20]));

        // Placeholder reads as None, existing value is untouched.
        assert_eq!(store.get(ParameterId(10)), None);
        assert_eq!(store.get(ParameterId(20)).unwrap().value, Some(48.0));
    }

    #[test]
    fn overlapping_subscribers_dedup() {
        let store = ParameterStore::new(Duration::from_secs(120));
        let registry = SubscriberRegistry::new();
        let _a = registry.subscribe(ids(&[10, 20]));
        let _b = registry.subscribe(ids(&[20, 30]));

        let pending = registry.pending(&store);
        assert_eq!(pending, ids(&[10, 20, 30]).into_iter().collect());

        // A status push for 20 removes it from the pending set.
        store.set(ParameterId(20), Some(parameter(20, "hot water", 48.0)));
        let pending = registry.pending(&store);
        assert_eq!(pending, ids(&[10, 30]).into_iter().collect());
    }

    #[test]
    fn pending_cardinality_bounded_by_distinct_ids() {
        let store = ParameterStore::new(Duration::from_secs(120));
        let registry = SubscriberRegistry::new();
        let subscriptions: Vec<_> = (0..50).map(|_| registry.subscribe(ids(&[1, 2, 3]))).collect();

        assert_eq!(registry.pending(&store).len(), 3);
        drop(subscriptions);
    }

    #[test]
    fn none_placeholder_still_counts_as_pending() {
        let store = ParameterStore::new(Duration::from_secs(120));
        let registry = SubscriberRegistry::new();
        let _sub = registry.subscribe(ids(&[10]));

        store.want(ids(&[10]));
        assert!(registry.pending(&store).contains(&ParameterId(10)));

        // An explicit known-absent write does not stamp freshness either.
        store.set(ParameterId(10), None);
        assert!(registry.pending(&store).contains(&ParameterId(10)));
    }

    #[test]
    fn stale_value_becomes_pending_again() {
        let store = ParameterStore::new(Duration::ZERO);
        let registry = SubscriberRegistry::new();
        let _sub = registry.subscribe(ids(&[10]));

        store.set(ParameterId(10), Some(parameter(10, "outdoor temp.", 2.5)));
        assert!(registry.pending(&store).contains(&ParameterId(10)));
        // The stale value itself is still readable.
        assert!(store.get(ParameterId(10)).is_some());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let a = registry.subscribe(ids(&[10]));
        let b = registry.subscribe(ids(&[10, 20]));
        assert_eq!(registry.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(registry.subscriber_count(), 1);
        a.unsubscribe();
        assert_eq!(registry.subscriber_count(), 1);

        // The other entry is unaffected.
        assert_eq!(registry.wanted(), ids(&[10, 20]).into_iter().collect());
        b.unsubscribe();
        assert!(registry.wanted().is_empty());
    }

    #[test]
    fn unsubscribe_after_registry_drop_is_safe() {
        let registry = SubscriberRegistry::new();
        let sub = registry.subscribe(ids(&[10]));
        drop(registry);
        sub.unsubscribe();
    }
}
