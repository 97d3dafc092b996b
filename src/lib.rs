mod auth;
mod client;
mod config;
mod error;
mod logger;
mod reader;
mod scheduler;
mod service;
mod session;
mod store;
mod system;
mod types;

pub use auth::{handle_redirect, AuthCorrelator, CallbackResponse, PendingAuth};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::{EntryConfig, Selection, SystemConfig, UnitConfig};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use reader::SubscribingReader;
pub use scheduler::{schedule_delta, ScheduleHandle};
pub use service::{UplinkService, UplinkServiceBuilder, DEFAULT_POLL_INTERVAL};
pub use session::{PersistHook, Session, SessionBuilder, TokenSet};
pub use store::{ParameterStore, SubscriberRegistry, Subscription};
pub use system::{SystemEvent, SystemMonitor, SystemMonitorBuilder};
pub use types::*;
