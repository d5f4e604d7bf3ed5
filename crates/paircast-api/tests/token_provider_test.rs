// Integration tests for `TokenProvider` using wiremock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use secrecy::SecretString;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use paircast_api::auth::TokenClaims;
use paircast_api::{ApiEvent, Error, IdentitySource, Severity, TokenProvider};

// ── Helpers ─────────────────────────────────────────────────────────

const SECRET: &str = "s3cret-key";

struct TestSource {
    server: Url,
    secret: Option<String>,
}

#[async_trait]
impl IdentitySource for TestSource {
    async fn player_hash(&self) -> Option<String> {
        Some("1a2b3c4d5e6f".to_string())
    }

    fn server_url(&self) -> Url {
        self.server.clone()
    }

    fn secret_key(&self) -> Option<SecretString> {
        self.secret.clone().map(SecretString::from)
    }

    fn api_key(&self) -> Option<SecretString> {
        None
    }
}

fn provider_for(server: &MockServer, secret: Option<&str>) -> TokenProvider {
    let source = TestSource {
        server: Url::parse(&server.uri()).unwrap(),
        secret: secret.map(str::to_string),
    };
    TokenProvider::new(reqwest::Client::new(), Arc::new(source))
}

/// Mint a real JWT whose expiry sits `exp_offset_secs` from now.
fn mint(exp_offset_secs: i64) -> String {
    let claims = TokenClaims {
        exp: Utc::now().timestamp() + exp_offset_secs,
        nbf: 0,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"tests")).unwrap()
}

fn auth_ok(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "token": token,
        "expiresUtc": "2031-01-01T00:00:00Z"
    }))
}

fn auth_mock(token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/auth"))
        .and(header("X-Api-Key", SECRET))
        .and(body_json(json!({ "apiKey": SECRET })))
        .respond_with(auth_ok(token))
}

// ── Acquisition and caching ─────────────────────────────────────────

#[tokio::test]
async fn test_first_acquisition_caches() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();

    let token = mint(3600);
    auth_mock(&token).expect(1).mount(&server).await;

    let first = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let second = provider.get_or_update_token(&cancel).await.unwrap().unwrap();

    assert_eq!(first, token);
    assert_eq!(second, token);
}

#[tokio::test]
async fn test_token_inside_renewal_margin_is_renewed() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();

    // Four minutes of validity left: inside the five-minute margin.
    let stale = mint(4 * 60);
    let fresh = mint(3600);
    auth_mock(&stale).up_to_n_times(1).expect(1).mount(&server).await;
    auth_mock(&fresh).expect(1).mount(&server).await;

    let first = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let second = provider.get_or_update_token(&cancel).await.unwrap().unwrap();

    assert_eq!(first, stale);
    assert_eq!(second, fresh);
}

#[tokio::test]
async fn test_token_outside_renewal_margin_is_reused() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();

    // Six minutes of validity left: outside the margin, no renewal.
    let token = mint(6 * 60);
    auth_mock(&token).expect(1).mount(&server).await;

    let first = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let second = provider.get_or_update_token(&cancel).await.unwrap().unwrap();

    assert_eq!(first, token);
    assert_eq!(second, token);
}

#[tokio::test]
async fn test_force_renew_bypasses_fresh_cache() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();

    let first_token = mint(3600);
    let second_token = mint(3600);
    auth_mock(&first_token).up_to_n_times(1).expect(1).mount(&server).await;
    auth_mock(&second_token).expect(1).mount(&server).await;

    let acquired = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    assert_eq!(acquired, first_token);

    let renewed = provider.force_renew(&cancel).await.unwrap();
    assert_eq!(renewed, second_token);

    // The renewed token replaced the cached one.
    let cached = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    assert_eq!(cached, second_token);
}

#[tokio::test]
async fn test_session_renewal_cycle() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();
    let mut events = provider.events();

    // First token is already within the renewal margin; the second
    // carries a comfortable validity window. Across repeated checks the
    // provider must hit the endpoint exactly twice.
    let short_lived = mint(4 * 60);
    let long_lived = mint(50 * 60);
    auth_mock(&short_lived).up_to_n_times(1).expect(1).mount(&server).await;
    auth_mock(&long_lived).expect(1).mount(&server).await;

    let first = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let second = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let third = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let fourth = provider.get_or_update_token(&cancel).await.unwrap().unwrap();

    assert_eq!(first, short_lived);
    assert_eq!(second, long_lived);
    assert_eq!(third, long_lived);
    assert_eq!(fourth, long_lived);

    // An uneventful renewal cycle raises no user-facing signals.
    assert!(events.try_recv().is_err());
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_renewal_evicts_and_signals() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();
    let mut events = provider.events();

    // Seed the cache with a token that will need renewal immediately.
    let stale = mint(4 * 60);
    auth_mock(&stale).up_to_n_times(1).expect(1).mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Banned: too many alts"))
        .expect(1)
        .mount(&server)
        .await;

    let seeded = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    assert_eq!(seeded, stale);

    let result = provider.get_or_update_token(&cancel).await;
    match result {
        Err(Error::AuthFailure { ref reason }) => {
            assert_eq!(reason, "Banned: too many alts");
        }
        other => panic!("expected AuthFailure, got: {other:?}"),
    }

    // The cache entry is gone.
    assert!(matches!(provider.token().await, Err(Error::NoTokenCached)));

    // Exactly one notice (renewal flavor) plus the revocation signal.
    match events.try_recv().unwrap() {
        ApiEvent::Notice(notice) => {
            assert_eq!(notice.severity, Severity::Error);
            assert!(notice.message.contains("renewed"), "message: {}", notice.message);
        }
        other => panic!("expected Notice, got: {other:?}"),
    }
    assert!(matches!(events.try_recv().unwrap(), ApiEvent::AuthRevoked));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_fresh_credential_signals_differently() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();
    let mut events = provider.events();

    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let result = provider.get_or_update_token(&cancel).await;
    assert!(matches!(result, Err(Error::AuthFailure { .. })));

    match events.try_recv().unwrap() {
        ApiEvent::Notice(notice) => {
            assert!(
                notice.message.contains("rejected"),
                "message: {}",
                notice.message
            );
        }
        other => panic!("expected Notice, got: {other:?}"),
    }
    assert!(matches!(events.try_recv().unwrap(), ApiEvent::AuthRevoked));
}

#[tokio::test]
async fn test_server_error_evicts_cache() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();

    let stale = mint(4 * 60);
    auth_mock(&stale).up_to_n_times(1).expect(1).mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    let result = provider.get_or_update_token(&cancel).await;
    assert!(matches!(result, Err(Error::Transport(_))));

    // Any acquisition failure clears the entry, not just 401s.
    assert!(matches!(provider.token().await, Err(Error::NoTokenCached)));
}

#[tokio::test]
async fn test_missing_secret_is_terminal() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, None);
    let cancel = CancellationToken::new();
    let mut events = provider.events();

    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(auth_ok(&mint(3600)))
        .expect(0)
        .mount(&server)
        .await;

    let result = provider.get_or_update_token(&cancel).await;
    assert!(matches!(result, Err(Error::NoSecretConfigured)));

    match events.try_recv().unwrap() {
        ApiEvent::Notice(notice) => assert_eq!(notice.severity, Severity::Error),
        other => panic!("expected Notice, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancelled_acquisition_makes_no_request() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();
    cancel.cancel();

    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(auth_ok(&mint(3600)))
        .expect(0)
        .mount(&server)
        .await;

    let result = provider.get_or_update_token(&cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

// ── Clock sanity ────────────────────────────────────────────────────

#[tokio::test]
async fn test_clock_skew_rejects_and_evicts() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();
    let mut events = provider.events();

    // Issued token reads as expired eleven minutes ago: the local clock
    // must be wrong.
    auth_mock(&mint(-11 * 60)).expect(1).mount(&server).await;

    let result = provider.get_or_update_token(&cancel).await;
    assert!(matches!(result, Err(Error::ClockSkew { .. })));
    assert!(matches!(provider.token().await, Err(Error::NoTokenCached)));

    match events.try_recv().unwrap() {
        ApiEvent::Notice(notice) => {
            assert!(notice.title.to_lowercase().contains("clock"));
        }
        other => panic!("expected Notice, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_barely_stale_token_is_within_tolerance() {
    let server = MockServer::start().await;
    let provider = provider_for(&server, Some(SECRET));
    let cancel = CancellationToken::new();

    // Expired nine minutes ago: ugly, but inside the tolerance window a
    // slightly-off clock produces. The server gets the benefit of the
    // doubt.
    let token = mint(-9 * 60);
    auth_mock(&token).expect(1).mount(&server).await;

    let acquired = provider.get_or_update_token(&cancel).await.unwrap().unwrap();
    assert_eq!(acquired, token);
}
