// Integration tests for `RestClient` 401 handling using wiremock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use paircast_api::auth::TokenClaims;
use paircast_api::{Error, IdentitySource, RestClient, TokenProvider};

// ── Helpers ─────────────────────────────────────────────────────────

const SECRET: &str = "s3cret-key";

struct TestSource {
    server: Url,
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
        Some(SecretString::from(SECRET.to_string()))
    }

    fn api_key(&self) -> Option<SecretString> {
        None
    }
}

fn mint(exp_offset_secs: i64) -> String {
    let claims = TokenClaims {
        exp: Utc::now().timestamp() + exp_offset_secs,
        nbf: 0,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"tests")).unwrap()
}

fn rest_for(server: &MockServer) -> RestClient {
    let url = Url::parse(&server.uri()).unwrap();
    let source = TestSource { server: url.clone() };
    let tokens = Arc::new(TokenProvider::new(reqwest::Client::new(), Arc::new(source)));
    RestClient::new(reqwest::Client::new(), &url, tokens).unwrap()
}

fn auth_mock(token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
}

// ── Bearer handling ─────────────────────────────────────────────────

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let server = MockServer::start().await;
    let client = rest_for(&server);
    let cancel = CancellationToken::new();

    let token = mint(3600);
    auth_mock(&token).expect(1).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/pairs"))
        .and(header("Authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["alice", "bob"])))
        .expect(1)
        .mount(&server)
        .await;

    let pairs: Vec<String> = client.get_json("pairs", &cancel).await.unwrap();
    assert_eq!(pairs, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn test_get_json_decodes_payload() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct PairEntry {
        user_id: String,
        muted: bool,
    }

    let server = MockServer::start().await;
    let client = rest_for(&server);
    let cancel = CancellationToken::new();

    auth_mock(&mint(3600)).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/pairs/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "abc",
            "muted": false
        })))
        .mount(&server)
        .await;

    let entry: PairEntry = client.get_json("pairs/details", &cancel).await.unwrap();
    assert_eq!(
        entry,
        PairEntry {
            user_id: "abc".to_string(),
            muted: false
        }
    );
}

// ── 401 retry ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_retries_once_with_renewed_token() {
    let server = MockServer::start().await;
    let client = rest_for(&server);
    let cancel = CancellationToken::new();

    let first_token = mint(3600);
    let renewed_token = mint(3600);
    auth_mock(&first_token).up_to_n_times(1).expect(1).mount(&server).await;
    auth_mock(&renewed_token).expect(1).mount(&server).await;

    // The first attempt is rejected even though the token looked fine
    // locally; the retry must carry the renewed credential.
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header(
            "Authorization",
            format!("Bearer {renewed_token}").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let response = client.get("data", &cancel).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_second_401_is_an_auth_failure() {
    let server = MockServer::start().await;
    let client = rest_for(&server);
    let cancel = CancellationToken::new();

    auth_mock(&mint(3600)).up_to_n_times(1).mount(&server).await;
    auth_mock(&mint(3600)).mount(&server).await;

    // Exactly two attempts: the original and one retry.
    Mock::given(method("GET"))
        .and(path("/locked"))
        .respond_with(ResponseTemplate::new(401).set_body_string("no entry"))
        .expect(2)
        .mount(&server)
        .await;

    let result = client.get("locked", &cancel).await;
    match result {
        Err(Error::AuthFailure { ref reason }) => assert_eq!(reason, "no entry"),
        other => panic!("expected AuthFailure, got: {other:?}"),
    }
}

// ── Other failure modes ─────────────────────────────────────────────

#[tokio::test]
async fn test_plain_4xx_is_a_transport_error() {
    let server = MockServer::start().await;
    let client = rest_for(&server);
    let cancel = CancellationToken::new();

    auth_mock(&mint(3600)).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client.get("missing", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
    assert_eq!(err.http_status(), Some(404));
}

#[tokio::test]
async fn test_cancelled_call_makes_no_request() {
    let server = MockServer::start().await;
    let client = rest_for(&server);
    let cancel = CancellationToken::new();
    cancel.cancel();

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = client.get("data", &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}
