use std::sync::{Arc, Mutex};

use chrono::Utc;
use heatpump_uplink::{handle_redirect, AuthCorrelator, Error, Session, TokenSet};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tokens(access_token: &str, expires_in_secs: i64) -> TokenSet {
    TokenSet {
        access_token: access_token.to_string(),
        refresh_token: "rt-0".to_string(),
        expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        token_type: "Bearer".to_string(),
        scope: "READSYSTEM".to_string(),
    }
}

fn token_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "bearer",
        "expires_in": 3600,
        "scope": "READSYSTEM"
    })
}

fn session(server: &MockServer) -> Session {
    Session::builder(server.uri())
        .client_id("client")
        .client_secret("secret")
        .redirect_uri("http://localhost:8123/auth/callback")
        .scope("READSYSTEM")
        .build()
}

fn callback_url(state: &str, code: &str) -> Url {
    Url::parse(&format!(
        "http://localhost:8123/auth/callback?state={state}&code={code}"
    ))
    .unwrap()
}

#[tokio::test]
async fn redirect_completes_pending_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
        .expect(1)
        .mount(&server)
        .await;

    let persisted: Arc<Mutex<Vec<TokenSet>>> = Arc::new(Mutex::new(vec![]));
    let persisted_clone = persisted.clone();
    let session = Arc::new(
        Session::builder(server.uri())
            .client_id("client")
            .client_secret("secret")
            .redirect_uri("http://localhost:8123/auth/callback")
            .scope("READSYSTEM")
            .persist_with(move |t| {
                persisted_clone.lock().unwrap().push(t.clone());
                Ok(())
            })
            .build(),
    );

    let correlator = AuthCorrelator::new();
    let pending = correlator.begin(session).unwrap();
    let state = pending.state.clone();

    let response = handle_redirect(&correlator, &callback_url(&state, "code-1")).await;
    assert_eq!(response.status, 200);

    let session = pending.wait().await.expect("flow should resume with a session");
    assert!(session.is_authorized().await);
    assert_eq!(session.tokens().await.unwrap().access_token, "at-1");

    // Every credential change goes through the write-back hook.
    let persisted = persisted.lock().unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].access_token, "at-1");
    assert_eq!(persisted[0].refresh_token, "rt-1");
}

#[tokio::test]
async fn duplicate_redirect_never_exchanges_twice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
        .expect(1)
        .mount(&server)
        .await;

    let correlator = AuthCorrelator::new();
    let pending = correlator.begin(Arc::new(session(&server))).unwrap();
    let url = callback_url(&pending.state, "code-1");

    let first = handle_redirect(&correlator, &url).await;
    assert_eq!(first.status, 200);

    // A browser retry replays the same redirect. The attempt was
    // consumed, so the code must not be exchanged a second time.
    let second = handle_redirect(&correlator, &url).await;
    assert_eq!(second.status, 400);
    assert!(second.body.contains("unknown"));
}

#[tokio::test]
async fn rejected_exchange_surfaces_to_initiating_flow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let correlator = AuthCorrelator::new();
    let pending = correlator.begin(Arc::new(session(&server))).unwrap();

    let response = handle_redirect(&correlator, &callback_url(&pending.state, "bad-code")).await;
    assert_eq!(response.status, 400);

    // The waiter gets the rejection and can offer a retry.
    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, Error::AuthRejected { status: 400, .. }));
}

#[tokio::test]
async fn concurrent_access_token_calls_refresh_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("at-1", "rt-1"))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Within the expiry margin, so the first caller must refresh.
    let session = Arc::new(
        Session::builder(server.uri())
            .client_id("client")
            .client_secret("secret")
            .redirect_uri("http://localhost:8123/auth/callback")
            .scope("READSYSTEM")
            .access_data(tokens("at-0", 30))
            .build(),
    );

    let (a, b) = tokio::join!(session.access_token(), session.access_token());
    assert_eq!(a.unwrap(), "at-1");
    assert_eq!(b.unwrap(), "at-1");
}

#[tokio::test]
async fn fresh_token_is_served_without_network() {
    // No token endpoint mounted: any refresh attempt would error.
    let server = MockServer::start().await;
    let session = Session::builder(server.uri())
        .client_id("client")
        .client_secret("secret")
        .redirect_uri("http://localhost:8123/auth/callback")
        .scope("READSYSTEM")
        .access_data(tokens("at-0", 3600))
        .build();

    assert_eq!(session.access_token().await.unwrap(), "at-0");
}

#[tokio::test]
async fn persistence_failure_keeps_session_usable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
        .mount(&server)
        .await;

    let session = Session::builder(server.uri())
        .client_id("client")
        .client_secret("secret")
        .redirect_uri("http://localhost:8123/auth/callback")
        .scope("READSYSTEM")
        .access_data(tokens("at-0", 30))
        .persist_with(|_| Err("disk full".to_string()))
        .build();

    // The write-back failed but the refreshed credentials are live
    // for the rest of this process.
    session.refresh().await.expect("refresh should succeed");
    assert_eq!(session.access_token().await.unwrap(), "at-1");
}
