use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::session::Session;
use crate::{Error, Result};

/// Pending attempts older than this are dropped at the next sweep.
const ATTEMPT_TTL: Duration = Duration::from_secs(600);
/// Hard cap on concurrently pending attempts.
const MAX_PENDING: usize = 16;

/// A single-use correlation between an issued authorization URL and
/// the in-process flow waiting for its redirect.
struct AuthAttempt {
    session: Arc<Session>,
    waiter: oneshot::Sender<Result<Arc<Session>>>,
    created_at: Instant,
}

/// Matches inbound OAuth2 redirects back to the flow that initiated
/// them, keyed by an unpredictable per-attempt state token.
///
/// One instance is owned by whichever component manages integration
/// lifecycle and handed to the HTTP boundary; there is no ambient
/// global.
#[derive(Clone, Default)]
pub struct AuthCorrelator {
    pending: Arc<Mutex<HashMap<String, AuthAttempt>>>,
}

impl AuthCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue an authorization URL for `session`. Returns the URL the
    /// user must visit, the state it carries, and a waiter resolved
    /// when the matching redirect arrives.
    pub fn begin(&self, session: Arc<Session>) -> Result<PendingAuth> {
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().unwrap();
        Self::sweep(&mut pending);

        let mut state = new_state();
        while pending.contains_key(&state) {
            state = new_state();
        }

        let url = session.authorize_url(&state)?;
        debug!(state, "registered authorization attempt");
        pending.insert(
            state.clone(),
            AuthAttempt {
                session,
                waiter: tx,
                created_at: Instant::now(),
            },
        );

        Ok(PendingAuth {
            url,
            state,
            done: rx,
        })
    }

    /// Resolve an inbound redirect. Consumes the attempt first: a
    /// second call with the same state fails with
    /// [`Error::UnknownAttempt`], so an authorization code can never
    /// be exchanged twice.
    pub async fn complete(&self, state: &str, code: &str) -> Result<Arc<Session>> {
        let attempt = self
            .pending
            .lock()
            .unwrap()
            .remove(state)
            .ok_or(Error::UnknownAttempt)?;

        match attempt.session.exchange_code(code).await {
            Ok(()) => {
                debug!(state, "authorization attempt completed");
                let _ = attempt.waiter.send(Ok(attempt.session.clone()));
                Ok(attempt.session)
            }
            Err(err) => {
                warn!(state, error = %err, "authorization code exchange failed");
                let summary = match &err {
                    Error::AuthRejected { status, message } => Error::AuthRejected {
                        status: *status,
                        message: message.clone(),
                    },
                    other => Error::Protocol(other.to_string()),
                };
                // The initiating flow gets the original error and can
                // offer the user a retry.
                let _ = attempt.waiter.send(Err(err));
                Err(summary)
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn sweep(pending: &mut HashMap<String, AuthAttempt>) {
        pending.retain(|state, attempt| {
            let live = attempt.created_at.elapsed() < ATTEMPT_TTL;
            if !live {
                debug!(state, "expired stale authorization attempt");
            }
            live
        });

        while pending.len() >= MAX_PENDING {
            let oldest = pending
                .iter()
                .min_by_key(|(_, attempt)| attempt.created_at)
                .map(|(state, _)| state.clone());
            match oldest {
                Some(state) => {
                    warn!(state, "evicting authorization attempt, cap reached");
                    pending.remove(&state);
                }
                None => break,
            }
        }
    }
}

fn new_state() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One issued authorization URL and the means to await its redirect.
pub struct PendingAuth {
    pub url: Url,
    pub state: String,
    done: oneshot::Receiver<Result<Arc<Session>>>,
}

impl PendingAuth {
    /// Wait for the redirect to complete this attempt. Fails with
    /// [`Error::AttemptAbandoned`] if the attempt expired or was
    /// evicted before a redirect arrived.
    pub async fn wait(self) -> Result<Arc<Session>> {
        self.done.await.map_err(|_| Error::AttemptAbandoned)?
    }
}

/// Host-framework-agnostic outcome of the redirect endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: String,
}

impl CallbackResponse {
    fn bad_request(body: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: body.into(),
        }
    }
}

/// Handle `GET <callback-path>?state=..&code=..`.
///
/// Duplicate or stale callbacks are rejected with a client error and
/// logged; they may simply be a browser retry and must not crash the
/// process or re-run an exchange.
pub async fn handle_redirect(correlator: &AuthCorrelator, url: &Url) -> CallbackResponse {
    let mut state = None;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "state" => state = Some(value.into_owned()),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }

    let Some(state) = state else {
        warn!("redirect missing state");
        return CallbackResponse::bad_request("state missing in redirect url");
    };
    let Some(code) = code else {
        warn!(state, "redirect missing code");
        return CallbackResponse::bad_request("code missing in redirect url");
    };

    match correlator.complete(&state, &code).await {
        Ok(_) => CallbackResponse {
            status: 200,
            body: "Authorization complete. You can close this window.".to_string(),
        },
        Err(err @ Error::UnknownAttempt) => CallbackResponse::bad_request(err.to_string()),
        Err(err) => CallbackResponse::bad_request(format!("authorization failed: {err}")),
    }
}
