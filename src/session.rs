use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};
use url::Url;

use crate::{Error, Result};

/// How long before nominal expiry a token is treated as stale.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Persisted credential blob. Written through the host hook on every
/// change; read back once at session construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: String,
}

impl TokenSet {
    pub fn is_expired(&self, margin_secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(margin_secs) >= self.expires_at
    }
}

/// Raw token endpoint response (RFC 6749).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Host-supplied credential write-back. Invoked on every change; a
/// failure keeps the in-memory session usable for this process
/// lifetime but forces re-authorization after restart.
pub type PersistHook = Box<dyn Fn(&TokenSet) -> std::result::Result<(), String> + Send + Sync>;

pub struct SessionBuilder {
    auth_base: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    tokens: Option<TokenSet>,
    persist: Option<PersistHook>,
}

impl SessionBuilder {
    pub fn new(auth_base: impl Into<String>) -> Self {
        Self {
            auth_base: auth_base.into(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scope: String::new(),
            tokens: None,
            persist: None,
        }
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
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

    pub fn build(self) -> Session {
        let base = self.auth_base.trim_end_matches('/');
        Session {
            http: reqwest::Client::new(),
            authorize_endpoint: format!("{base}/oauth/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            scope: self.scope,
            tokens: RwLock::new(self.tokens),
            refresh_guard: Mutex::new(()),
            persist: self.persist,
        }
    }
}

/// OAuth2 credential holder for one configured entry.
///
/// All credential writes happen here: code exchange and refresh share
/// one in-flight guard, so a manual refresh can never race an
/// automatic one and the persistence hook sees every change in order.
pub struct Session {
    http: reqwest::Client,
    authorize_endpoint: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    tokens: RwLock<Option<TokenSet>>,
    refresh_guard: Mutex<()>,
    persist: Option<PersistHook>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authorize_endpoint", &self.authorize_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("tokens", &self.tokens)
            .field("has_persist_hook", &self.persist.is_some())
            .finish()
    }
}

impl Session {
    pub fn builder(auth_base: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(auth_base)
    }

    /// URL the user must visit to authorize this entry, carrying the
    /// correlation state issued by the caller.
    pub fn authorize_url(&self, state: &str) -> Result<Url> {
        let url = Url::parse_with_params(
            &self.authorize_endpoint,
            [
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", self.scope.as_str()),
                ("state", state),
            ],
        )?;
        Ok(url)
    }

    pub async fn is_authorized(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    pub async fn tokens(&self) -> Option<TokenSet> {
        self.tokens.read().await.clone()
    }

    /// Exchange an authorization code for credentials and persist them.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let _guard = self.refresh_guard.lock().await;
        debug!("exchanging authorization code");
        let response = self
            .token_request(&[("grant_type", "authorization_code"), ("code", code)])
            .await?;
        self.store_tokens(response).await;
        Ok(())
    }

    /// Unconditionally refresh the access token. Used at entry setup
    /// to validate stored credentials and when the API rejects a
    /// token that has not nominally expired.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_guard.lock().await;
        self.refresh_locked().await
    }

    /// Current access token, refreshed transparently when within the
    /// expiry margin. Concurrent callers are serialized on the guard;
    /// whoever arrives second finds fresh tokens and does not hit the
    /// token endpoint again.
    pub async fn access_token(&self) -> Result<String> {
        let stale = {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                Some(t) => t.is_expired(REFRESH_MARGIN_SECS),
                None => return Err(Error::NotAuthorized),
            }
        };

        if stale {
            let _guard = self.refresh_guard.lock().await;
            let still_stale = self
                .tokens
                .read()
                .await
                .as_ref()
                .is_none_or(|t| t.is_expired(REFRESH_MARGIN_SECS));
            if still_stale {
                self.refresh_locked().await?;
            }
        }

        let tokens = self.tokens.read().await;
        tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(Error::NotAuthorized)
    }

    async fn refresh_locked(&self) -> Result<()> {
        let refresh_token = {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                Some(t) => t.refresh_token.clone(),
                None => return Err(Error::NotAuthorized),
            }
        };

        debug!("refreshing access token");
        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .await?;
        self.store_tokens(response).await;
        Ok(())
    }

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let credentials = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let form: Vec<(&str, &str)> = grant.iter().chain(credentials.iter()).copied().collect();

        let resp = self.http.post(&self.token_endpoint).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::AuthRejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }

    async fn store_tokens(&self, response: TokenResponse) {
        let tokens = TokenSet {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in),
            token_type: response.token_type,
            scope: response.scope.unwrap_or_else(|| self.scope.clone()),
        };

        if let Some(persist) = &self.persist
            && let Err(err) = persist(&tokens)
        {
            error!(
                error = %err,
                "failed to persist credentials; re-authorization will be required after restart"
            );
        }

        *self.tokens.write().await = Some(tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_set(expires_in_secs: i64) -> TokenSet {
        TokenSet {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            token_type: "Bearer".to_string(),
            scope: "READSYSTEM".to_string(),
        }
    }

    #[test]
    fn expiry_margin() {
        assert!(token_set(60).is_expired(300));
        assert!(!token_set(3600).is_expired(300));
    }

    #[test]
    fn authorize_url_carries_state_and_credentials() {
        let session = Session::builder("https://auth.example.com/")
            .client_id("abc")
            .client_secret("shh")
            .redirect_uri("http://localhost:8123/auth/callback")
            .scope("READSYSTEM")
            .build();

        let url = session.authorize_url("state123").unwrap();
        assert_eq!(url.path(), "/oauth/authorize");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("state".into(), "state123".into())));
        assert!(pairs.contains(&("client_id".into(), "abc".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(!url.as_str().contains("shh"), "secret never appears in the authorize url");
    }

    #[tokio::test]
    async fn access_token_without_credentials_fails() {
        let session = Session::builder("https://auth.example.com").build();
        assert!(matches!(
            session.access_token().await,
            Err(Error::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn access_token_served_from_memory_when_fresh() {
        let session = Session::builder("https://auth.example.com")
            .access_data(token_set(3600))
            .build();
        assert_eq!(session.access_token().await.unwrap(), "at");
    }

    #[test]
    fn token_set_round_trips_as_opaque_blob() {
        let tokens = token_set(3600);
        let blob = serde_json::to_string(&tokens).unwrap();
        let back: TokenSet = serde_json::from_str(&blob).unwrap();
        assert_eq!(back, tokens);
    }
}
