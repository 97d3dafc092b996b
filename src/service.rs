use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::auth::{AuthCorrelator, PendingAuth};
use crate::client::ApiClient;
use crate::config::EntryConfig;
use crate::reader::SubscribingReader;
use crate::scheduler::{schedule_delta, ScheduleHandle};
use crate::session::{PersistHook, Session, TokenSet};
use crate::store::Subscription;
use crate::system::{SystemEvent, SystemMonitor};
use crate::types::{Parameter, ParameterId};
use crate::{Error, Result};

/// Default spacing between poll cycles, measured from completion of
/// the previous cycle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

type ServiceCallback = Arc<dyn Fn(u32, &SystemEvent) + Send + Sync>;

pub struct UplinkServiceBuilder {
    api_base: String,
    auth_base: String,
    config: EntryConfig,
    tokens: Option<TokenSet>,
    persist: Option<PersistHook>,
    poll_interval: Duration,
    callbacks: Vec<ServiceCallback>,
}

impl UplinkServiceBuilder {
    pub fn new(
        api_base: impl Into<String>,
        auth_base: impl Into<String>,
        config: EntryConfig,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            auth_base: auth_base.into(),
            config,
            tokens: None,
            persist: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            callbacks: Vec::new(),
        }
    }

    /// Previously persisted credentials, if any.
    pub fn access_data(mut self, tokens: TokenSet) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn persist_with(
        mut self,
        hook: impl Fn(&TokenSet) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.persist = Some(Box::new(hook));
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Receive every monitored system's events, tagged with its id.
    pub fn on_event(mut self, f: impl Fn(u32, &SystemEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.push(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<UplinkService> {
        self.config.validate()?;

        let mut session = Session::builder(self.auth_base)
            .client_id(self.config.client_id.clone())
            .client_secret(self.config.client_secret.clone())
            .redirect_uri(self.config.redirect_uri.clone())
            .scope(self.config.scope());
        if let Some(tokens) = self.tokens {
            session = session.access_data(tokens);
        }
        if let Some(hook) = self.persist {
            session = session.persist_with(hook);
        }
        let session = Arc::new(session.build());
        let client = Arc::new(ApiClient::builder(self.api_base, session.clone()).build());

        Ok(UplinkService {
            config: self.config,
            session,
            client,
            correlator: AuthCorrelator::new(),
            poll_interval: self.poll_interval,
            callbacks: self.callbacks,
            monitors: HashMap::new(),
            handles: Vec::new(),
        })
    }
}

/// Lifecycle owner for one configured entry: the session, the API
/// client, the authorization correlator and one monitor per system.
pub struct UplinkService {
    config: EntryConfig,
    session: Arc<Session>,
    client: Arc<ApiClient>,
    correlator: AuthCorrelator,
    poll_interval: Duration,
    callbacks: Vec<ServiceCallback>,
    monitors: HashMap<u32, Arc<SystemMonitor>>,
    handles: Vec<ScheduleHandle>,
}

impl UplinkService {
    pub fn builder(
        api_base: impl Into<String>,
        auth_base: impl Into<String>,
        config: EntryConfig,
    ) -> UplinkServiceBuilder {
        UplinkServiceBuilder::new(api_base, auth_base, config)
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Handle for the host's redirect endpoint.
    pub fn correlator(&self) -> AuthCorrelator {
        self.correlator.clone()
    }

    /// Start an authorization attempt for this entry's session.
    pub fn authorize(&self) -> Result<PendingAuth> {
        self.correlator.begin(self.session.clone())
    }

    /// Bring the entry up: validate credentials, load each configured
    /// system, run one initial cycle and arm its poll scheduler. Any
    /// failure is fatal to this entry only.
    pub async fn setup(&mut self) -> Result<()> {
        if !self.session.is_authorized().await {
            return Err(Error::NotAuthorized);
        }
        // A stale refresh token should fail setup up front, not
        // surface as a background surprise on the first cycle.
        self.session.refresh().await?;

        if self.config.systems.is_empty() {
            let available = self.client.get_systems().await?;
            let listing: Vec<String> = available
                .iter()
                .map(|s| format!("{} ({})", s.system_id, s.name))
                .collect();
            return Err(Error::InvalidConfig(format!(
                "no systems selected, available: [{}]",
                listing.join(", ")
            )));
        }

        for system in &self.config.systems {
            let system_id = system.system_id;
            let mut builder = SystemMonitor::builder(self.client.clone(), system_id)
                .freshness(self.poll_interval * 2);
            for callback in &self.callbacks {
                let callback = callback.clone();
                builder = builder.on_event(move |event| callback(system_id, event));
            }
            let monitor = Arc::new(builder.build());

            let info = monitor.load().await?;
            debug!(system = system_id, name = %info.name, "system loaded");
            monitor.load_units(&system.units).await?;
            monitor.poll().await;

            self.monitors.insert(system_id, monitor.clone());
            self.handles.push(schedule_delta(self.poll_interval, move || {
                let monitor = monitor.clone();
                async move { monitor.poll().await }
            }));
        }

        info!(systems = self.monitors.len(), "entry setup complete");
        Ok(())
    }

    /// Tear the entry down. Pending timers are cancelled; an in-flight
    /// cycle finishes naturally, updates its store once more and is
    /// not rescheduled.
    pub fn unload(&mut self) {
        debug!(systems = self.monitors.len(), "unloading entry");
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
        self.monitors.clear();
    }

    pub fn system(&self, system_id: u32) -> Option<Arc<SystemMonitor>> {
        self.monitors.get(&system_id).cloned()
    }

    pub fn systems(&self) -> Vec<Arc<SystemMonitor>> {
        self.monitors.values().cloned().collect()
    }

    /// Last cached snapshot for a parameter, `None` while loading or
    /// for an unknown system.
    pub fn get_parameter(&self, system_id: u32, parameter_id: ParameterId) -> Option<Parameter> {
        self.monitors.get(&system_id)?.get(parameter_id)
    }

    pub fn subscribe<I>(&self, system_id: u32, ids: I) -> Result<Subscription>
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let monitor = self
            .monitors
            .get(&system_id)
            .ok_or(Error::UnknownSystem(system_id))?;
        Ok(monitor.subscribe(ids))
    }

    pub fn reader<I>(&self, system_id: u32, ids: I) -> Result<SubscribingReader>
    where
        I: IntoIterator<Item = ParameterId>,
    {
        let monitor = self
            .monitors
            .get(&system_id)
            .ok_or(Error::UnknownSystem(system_id))?;
        Ok(monitor.reader(ids))
    }

    /// Fire-and-forget write passthrough. A failure is logged; the
    /// next poll cycle re-reads the authoritative remote value either
    /// way.
    pub fn set_parameter(
        &self,
        system_id: u32,
        parameter_id: ParameterId,
        value: impl Into<String>,
    ) {
        let client = self.client.clone();
        let value = value.into();
        tokio::spawn(async move {
            match client.put_parameter(system_id, parameter_id, &value).await {
                Ok(()) => debug!(system = system_id, parameter = %parameter_id, "parameter written"),
                Err(err) => {
                    error!(system = system_id, parameter = %parameter_id, error = %err, "parameter write failed")
                }
            }
        });
    }
}
