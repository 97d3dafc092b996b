use std::sync::Arc;

use crate::store::{ParameterStore, SubscriberRegistry, Subscription};
use crate::types::{Parameter, ParameterId};

/// One consumer's subscribed view of a system's parameter cache.
///
/// Presentation adapters own a reader and compose the typed getters
/// they need; there is no per-kind class hierarchy. The wanted set is
/// registered at construction, so the ids show up as placeholders
/// immediately and the next poll cycle fetches them.
pub struct SubscribingReader {
    store: Arc<ParameterStore>,
    subscription: Subscription,
}

impl SubscribingReader {
    pub(crate) fn new<I>(
        store: Arc<ParameterStore>,
        registry: &SubscriberRegistry,
        ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let ids: Vec<ParameterId> = ids.into_iter().collect();
        store.want(ids.iter().copied());
        let subscription = registry.subscribe(ids);
        Self { store, subscription }
    }

    /// Last cached snapshot, `None` while still loading or unknown.
    pub fn get(&self, id: ParameterId) -> Option<Parameter> {
        self.store.get(id)
    }

    /// Display-scale value.
    pub fn get_value(&self, id: ParameterId) -> Option<f64> {
        self.get(id).and_then(|p| p.value)
    }

    /// Value in the vendor's native integer scale.
    pub fn get_raw(&self, id: ParameterId) -> Option<i64> {
        self.get(id).and_then(|p| p.raw_value)
    }

    /// Truthiness of the value; unknown reads as `false`.
    pub fn get_bool(&self, id: ParameterId) -> bool {
        self.get_value(id).is_some_and(|v| v != 0.0)
    }

    /// Vendor-formatted display string.
    pub fn get_display(&self, id: ParameterId) -> Option<String> {
        self.get(id).map(|p| p.display_value)
    }

    /// Ratio between native and display scale, `1.0` while unknown.
    pub fn get_scale(&self, id: ParameterId) -> f64 {
        match self.get(id) {
            Some(p) => match (p.raw_value, p.value) {
                (Some(raw), Some(value)) if value != 0.0 => raw as f64 / value,
                _ => 1.0,
            },
            None => 1.0,
        }
    }

    /// Detach this consumer. Idempotent.
    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }
}
