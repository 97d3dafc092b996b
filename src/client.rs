use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::logger::{MessageLogMode, MessageLogger};
use crate::session::Session;
use crate::types::*;
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// List endpoints return their items inside a paging envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    #[serde(default)]
    objects: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SmartHomeMode {
    mode: String,
}

pub struct ApiClientBuilder {
    base_url: String,
    session: Arc<Session>,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Self {
        Self {
            base_url: base_url.into(),
            session,
            timeout: DEFAULT_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write all API traffic to an NDJSON log file.
    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> ApiClient {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .expect("failed to build HTTP client");

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => {
                Some(Mutex::new(MessageLogger::new(mode, &path).expect("failed to open log file")))
            }
            _ => None,
        };

        ApiClient {
            http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            session: self.session,
            logger,
        }
    }
}

/// Typed client for the vendor REST API. Bearer credentials come from
/// the [`Session`]; a rejected token is refreshed once and the request
/// retried before the error propagates.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
    logger: Option<Mutex<MessageLogger>>,
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>, session: Arc<Session>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url, session)
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    pub async fn get_systems(&self) -> Result<Vec<SystemInfo>> {
        let page: Page<SystemInfo> = self.get_json("/systems").await?;
        Ok(page.objects)
    }

    pub async fn get_system(&self, system_id: u32) -> Result<SystemInfo> {
        self.get_json(&format!("/systems/{system_id}")).await
    }

    pub async fn get_units(&self, system_id: u32) -> Result<Vec<SystemUnit>> {
        self.get_json(&format!("/systems/{system_id}/units")).await
    }

    pub async fn get_categories(
        &self,
        system_id: u32,
        unit_id: u32,
        parameters: bool,
    ) -> Result<Vec<Category>> {
        self.get_json(&format!(
            "/systems/{system_id}/serviceinfo/categories?systemUnitId={unit_id}&parameters={parameters}"
        ))
        .await
    }

    pub async fn get_status(&self, system_id: u32) -> Result<Vec<StatusIcon>> {
        self.get_json(&format!("/systems/{system_id}/status/system")).await
    }

    pub async fn get_unit_status(&self, system_id: u32, unit_id: u32) -> Result<Vec<StatusIcon>> {
        self.get_json(&format!("/systems/{system_id}/status/systemUnit/{unit_id}"))
            .await
    }

    pub async fn get_notifications(&self, system_id: u32) -> Result<Vec<Notification>> {
        let page: Page<Notification> = self
            .get_json(&format!("/systems/{system_id}/notifications"))
            .await?;
        Ok(page.objects)
    }

    /// Fetch one parameter. `Ok(None)` means the vendor reports no
    /// such data point for this system.
    pub async fn get_parameter(
        &self,
        system_id: u32,
        parameter_id: ParameterId,
    ) -> Result<Option<Parameter>> {
        let parameters: Vec<Parameter> = self
            .get_json(&format!(
                "/systems/{system_id}/parameters?parameterIds={parameter_id}"
            ))
            .await?;
        Ok(parameters.into_iter().next())
    }

    pub async fn put_parameter(
        &self,
        system_id: u32,
        parameter_id: ParameterId,
        value: &str,
    ) -> Result<()> {
        let body = json!({ "settings": { (parameter_id.to_string()): value } });
        self.log_request("PUT", &format!("/systems/{system_id}/parameters"), Some(&body));
        self.send_json(
            self.http
                .put(format!("{}/systems/{system_id}/parameters", self.base_url))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn get_smarthome_mode(&self, system_id: u32) -> Result<String> {
        let mode: SmartHomeMode = self
            .get_json(&format!("/systems/{system_id}/smarthome/mode"))
            .await?;
        Ok(mode.mode)
    }

    pub async fn put_smarthome_mode(&self, system_id: u32, mode: &str) -> Result<()> {
        let body = json!({ "mode": mode });
        self.log_request("PUT", &format!("/systems/{system_id}/smarthome/mode"), Some(&body));
        self.send_json(
            self.http
                .put(format!("{}/systems/{system_id}/smarthome/mode", self.base_url))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn post_smarthome_thermostat(
        &self,
        system_id: u32,
        thermostat: &Thermostat,
    ) -> Result<()> {
        let body = serde_json::to_value(thermostat).map_err(|e| Error::Protocol(e.to_string()))?;
        self.log_request(
            "POST",
            &format!("/systems/{system_id}/smarthome/thermostats"),
            Some(&body),
        );
        self.send_json(
            self.http
                .post(format!(
                    "{}/systems/{system_id}/smarthome/thermostats",
                    self.base_url
                ))
                .json(thermostat),
        )
        .await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET");
        let resp = self.send_json(self.http.get(&url)).await?;
        if let Some(logger) = &self.logger {
            let status = resp.status().as_u16();
            let body: Value = resp.json().await?;
            logger.lock().unwrap().log_poll(path, status, &body);
            return serde_json::from_value(body).map_err(|e| Error::Protocol(e.to_string()));
        }
        Ok(resp.json().await?)
    }

    fn log_request(&self, method: &str, path: &str, body: Option<&Value>) {
        if let Some(logger) = &self.logger {
            logger.lock().unwrap().log_request(method, path, body);
        }
    }

    /// Send with bearer credentials; on 401 refresh once and retry,
    /// since a token can be revoked before its nominal expiry.
    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.session.access_token().await?;
        let first = request
            .try_clone()
            .ok_or_else(|| Error::Protocol("request body not clonable".to_string()))?;
        let resp = first.bearer_auth(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp.error_for_status()?);
        }

        debug!("access token rejected, refreshing and retrying once");
        self.session.refresh().await?;
        let token = self.session.access_token().await?;
        let resp = request.bearer_auth(&token).send().await?;
        Ok(resp.error_for_status()?)
    }
}
