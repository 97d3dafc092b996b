use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::config::UnitConfig;
use crate::reader::SubscribingReader;
use crate::store::{ParameterStore, SubscriberRegistry, Subscription};
use crate::types::{Notification, Parameter, ParameterId, SystemInfo};
use crate::Result;

/// Default window during which a just-stored value suppresses a
/// refetch: two poll cycles, matching the status push cadence.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(120);

type EventCallback = Box<dyn Fn(&SystemEvent) + Send + Sync>;

/// Host-facing signals emitted by a system monitor.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// A notice appeared on the remote system.
    AlertRaised(Notification),
    /// A previously reported notice disappeared.
    AlertCleared(Notification),
    /// The set of active status titles changed.
    StatusesChanged(HashSet<String>),
    /// Cached state changed; consumers re-read through `get`.
    Changed,
}

pub struct SystemMonitorBuilder {
    client: Arc<ApiClient>,
    system_id: u32,
    freshness: Duration,
    callbacks: Vec<EventCallback>,
}

impl SystemMonitorBuilder {
    pub fn new(client: Arc<ApiClient>, system_id: u32) -> Self {
        Self {
            client,
            system_id,
            freshness: DEFAULT_FRESHNESS,
            callbacks: Vec::new(),
        }
    }

    pub fn freshness(mut self, window: Duration) -> Self {
        self.freshness = window;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&SystemEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> SystemMonitor {
        SystemMonitor {
            client: self.client,
            system_id: self.system_id,
            store: Arc::new(ParameterStore::new(self.freshness)),
            registry: SubscriberRegistry::new(),
            info: Mutex::new(None),
            notices: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashSet::new()),
            callbacks: self.callbacks,
        }
    }
}

/// Poll coordination for one remote installation.
///
/// One cycle refreshes notifications, then statuses (whose embedded
/// parameters are pushed straight into the cache), then fans out one
/// fetch per subscribed-but-uncached parameter. All fetches of a cycle
/// are awaited before the cycle ends, so cycles never overlap.
pub struct SystemMonitor {
    client: Arc<ApiClient>,
    system_id: u32,
    store: Arc<ParameterStore>,
    registry: SubscriberRegistry,
    info: Mutex<Option<SystemInfo>>,
    notices: Mutex<Vec<Notification>>,
    statuses: Mutex<HashSet<String>>,
    callbacks: Vec<EventCallback>,
}

impl SystemMonitor {
    pub fn builder(client: Arc<ApiClient>, system_id: u32) -> SystemMonitorBuilder {
        SystemMonitorBuilder::new(client, system_id)
    }

    pub fn system_id(&self) -> u32 {
        self.system_id
    }

    pub fn info(&self) -> Option<SystemInfo> {
        self.info.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> HashSet<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notices.lock().unwrap().clone()
    }

    pub fn get(&self, parameter_id: ParameterId) -> Option<Parameter> {
        self.store.get(parameter_id)
    }

    pub fn subscribe<I>(&self, ids: I) -> Subscription
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let ids: Vec<ParameterId> = ids.into_iter().collect();
        self.store.want(ids.iter().copied());
        self.registry.subscribe(ids)
    }

    pub fn reader<I>(&self, ids: I) -> SubscribingReader
    where
        I: IntoIterator<Item = ParameterId>,
    {
        SubscribingReader::new(self.store.clone(), &self.registry, ids)
    }

    /// Fetch installation metadata. Called once at entry setup; a
    /// failure here is fatal to that entry only.
    pub async fn load(&self) -> Result<SystemInfo> {
        let info = self.client.get_system(self.system_id).await?;
        debug!(system = self.system_id, name = %info.name, "loaded system");
        *self.info.lock().unwrap() = Some(info.clone());
        Ok(info)
    }

    /// Prefetch the parameters of each configured unit's selected
    /// service-info categories. These arrive as a side effect, like
    /// status pushes: cached, but only kept hot if some subscriber
    /// wants them.
    pub async fn load_units(&self, units: &[UnitConfig]) -> Result<()> {
        for unit in units {
            if !unit.categories.is_enabled() {
                continue;
            }
            let categories = self
                .client
                .get_categories(self.system_id, unit.unit, true)
                .await?;
            for category in categories {
                if !unit.categories.selects(&category.id) {
                    continue;
                }
                for parameter in category.parameters {
                    self.store.set(parameter.id, Some(parameter));
                }
            }
        }
        Ok(())
    }

    /// One poll cycle. Each stage's failure is logged and isolated:
    /// the next scheduled cycle retries after the guaranteed gap.
    pub async fn poll(&self) {
        if let Err(err) = self.update_notifications().await {
            warn!(system = self.system_id, error = %err, "notification refresh failed");
        }
        if let Err(err) = self.update_statuses().await {
            warn!(system = self.system_id, error = %err, "status refresh failed");
        }
        self.update_parameters().await;
        self.emit(&SystemEvent::Changed);
    }

    /// Diff against the previous notice list by value equality and
    /// surface additions and removals.
    async fn update_notifications(&self) -> Result<()> {
        let notices = self.client.get_notifications(self.system_id).await?;
        let previous = self.notices.lock().unwrap().clone();

        let added: Vec<Notification> = notices
            .iter()
            .filter(|n| !previous.contains(n))
            .cloned()
            .collect();
        let removed: Vec<Notification> = previous
            .iter()
            .filter(|n| !notices.contains(n))
            .cloned()
            .collect();

        *self.notices.lock().unwrap() = notices;

        for notice in added {
            debug!(system = self.system_id, id = notice.id, "notice raised");
            self.emit(&SystemEvent::AlertRaised(notice));
        }
        for notice in removed {
            debug!(system = self.system_id, id = notice.id, "notice cleared");
            self.emit(&SystemEvent::AlertCleared(notice));
        }
        Ok(())
    }

    /// One status call returns many parameters; pushing them into the
    /// store here is what keeps per-parameter fetch volume down.
    async fn update_statuses(&self) -> Result<()> {
        let icons = self.client.get_status(self.system_id).await?;

        let mut titles = HashSet::new();
        for icon in icons {
            titles.insert(icon.title.clone());
            for parameter in icon.parameters {
                self.store.set(parameter.id, Some(parameter));
            }
        }

        let changed = {
            let mut statuses = self.statuses.lock().unwrap();
            if *statuses != titles {
                *statuses = titles.clone();
                true
            } else {
                false
            }
        };
        if changed {
            debug!(system = self.system_id, ?titles, "statuses changed");
            self.emit(&SystemEvent::StatusesChanged(titles));
        }
        Ok(())
    }

    /// Fan out one fetch per still-pending parameter. A single failed
    /// fetch leaves its entry unchanged and does not disturb the rest.
    async fn update_parameters(&self) {
        let pending = self.registry.pending(&self.store);
        if pending.is_empty() {
            return;
        }
        debug!(system = self.system_id, count = pending.len(), "fetching pending parameters");

        let mut fetches = JoinSet::new();
        for id in pending {
            let client = self.client.clone();
            let system_id = self.system_id;
            fetches.spawn(async move { (id, client.get_parameter(system_id, id).await) });
        }

        while let Some(joined) = fetches.join_next().await {
            let Ok((id, result)) = joined else { continue };
            match result {
                Ok(parameter) => self.store.set(id, parameter),
                Err(err) => {
                    warn!(system = self.system_id, parameter = %id, error = %err, "parameter fetch failed");
                }
            }
        }
    }

    fn emit(&self, event: &SystemEvent) {
        for callback in &self.callbacks {
            callback(event);
        }
    }
}
