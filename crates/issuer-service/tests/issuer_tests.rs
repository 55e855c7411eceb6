//! End-to-end tests for the token issuer over real HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use auth_test_utils::TokenAssertions;
use common::jwks::{verify_signature, Jwks, KeySet};
use common::policy::{authorize, DenyReason, Verdict};
use issuer_service::config::Config;
use issuer_service::routes::{build_routes, AppState};
use issuer_service::services::{PrincipalRegistry, SigningKeyRing, TokenService};
use metrics_exporter_prometheus::PrometheusBuilder;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const PRINCIPALS: &str = r#"[
    {"id": "aggregator", "kind": "service", "secret": "agg-secret", "scopes": ["read"]},
    {"id": "ops", "kind": "service", "secret": "ops-secret", "scopes": ["admin:keys"]},
    {"id": "alice", "kind": "user", "secret": "alice-pw", "subject": "user-alice",
     "email_verified": true},
    {"id": "bob", "kind": "user", "secret": "bob-pw", "subject": "user-bob"}
]"#;

struct TestIssuer {
    addr: SocketAddr,
    client: reqwest::Client,
}

impl TestIssuer {
    async fn spawn() -> Result<Self, anyhow::Error> {
        let vars = HashMap::from([
            ("ISSUER_PRINCIPALS".to_string(), PRINCIPALS.to_string()),
            ("BCRYPT_COST".to_string(), "10".to_string()),
            ("TOKEN_LIFETIME_SECONDS".to_string(), "900".to_string()),
        ]);
        let config = Config::from_vars(&vars)?;

        let key_ring = Arc::new(
            SigningKeyRing::new(&config.key_prefix, Duration::from_secs(config.key_overlap_seconds))
                .map_err(|e| anyhow::anyhow!("Failed to create key ring: {e}"))?,
        );
        let principals = Arc::new(
            PrincipalRegistry::from_config(&config.principals, config.bcrypt_cost)
                .map_err(|e| anyhow::anyhow!("Failed to load principals: {e}"))?,
        );
        let token_service = TokenService::new(
            Arc::clone(&key_ring),
            principals,
            config.token_lifetime_seconds,
            config.user_token_client_id.clone(),
        );

        let state = Arc::new(AppState {
            config,
            key_ring,
            token_service,
        });
        let app = build_routes(state, PrometheusBuilder::new().build_recorder().handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self {
            addr,
            client: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn service_token(&self, client_id: &str, secret: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/v1/auth/service/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", secret),
            ])
            .send()
            .await
            .unwrap()
    }

    async fn access_token(&self, client_id: &str, secret: &str) -> String {
        let response = self.service_token(client_id, secret).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn user_token(&self, username: &str, password: &str) -> String {
        let response = self
            .client
            .post(self.url("/api/v1/auth/user/token"))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn jwks(&self) -> Jwks {
        self.client
            .get(self.url("/.well-known/jwks.json"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn rotate(&self, bearer: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(self.url("/api/v1/admin/keys/rotate"));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }
}

#[tokio::test]
async fn test_service_token_round_trip_through_jwks() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let response = issuer.service_token("aggregator", "agg-secret").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["scope"], "read");

    let token = body["access_token"].as_str().unwrap().to_string();
    token
        .assert_valid_jwt()
        .assert_client_id("aggregator")
        .assert_for_subject("aggregator")
        .assert_has_scope("read")
        .assert_lifetime(900);

    let keys = KeySet::from_jwks(&issuer.jwks().await);
    assert!(verify_signature(&token, &keys).is_ok());

    let claims = common::jwt::decode(&token).unwrap();
    assert_eq!(authorize(&claims), Verdict::Admit);
}

#[tokio::test]
async fn test_service_token_with_basic_auth_and_json_body() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let response = issuer
        .client
        .post(issuer.url("/api/v1/auth/service/token"))
        .basic_auth("aggregator", Some("agg-secret"))
        .json(&json!({"grant_type": "client_credentials"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["access_token"]
        .as_str()
        .unwrap()
        .to_string()
        .assert_client_id("aggregator");
}

#[tokio::test]
async fn test_bad_credentials_are_rejected_uniformly() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let bad_credentials = [
        ("aggregator", "wrong"),
        ("ghost", "agg-secret"),
        ("alice", "alice-pw"),
    ];
    for (client_id, secret) in bad_credentials {
        let response = issuer.service_token(client_id, secret).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{client_id}");
        assert_eq!(response.headers()["www-authenticate"], "Bearer");

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "INVALID_CLIENT");
    }
}

#[tokio::test]
async fn test_scope_outside_grant_is_forbidden() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let response = issuer
        .client
        .post(issuer.url("/api/v1/auth/service/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "aggregator"),
            ("client_secret", "agg-secret"),
            ("scope", "admin:keys"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_tokens_carry_email_verification() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let alice = issuer.user_token("alice", "alice-pw").await;
    alice
        .assert_valid_jwt()
        .assert_client_id("frontend")
        .assert_for_subject("user-alice");
    assert_eq!(authorize(&common::jwt::decode(&alice).unwrap()), Verdict::Admit);

    let bob = issuer.user_token("bob", "bob-pw").await;
    assert_eq!(
        authorize(&common::jwt::decode(&bob).unwrap()),
        Verdict::Deny(DenyReason::PolicyDenied)
    );
}

#[tokio::test]
async fn test_admin_rotation_keeps_old_tokens_verifiable() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let before = issuer.jwks().await;
    assert_eq!(before.keys.len(), 2);
    let old_kid = before.keys[0].kid.clone();
    let pre_published_kid = before.keys[1].kid.clone();
    let cached_keys = KeySet::from_jwks(&before);

    let old_token = issuer.access_token("aggregator", "agg-secret").await;
    old_token.assert_signed_by(&old_kid);

    let admin_token = issuer.access_token("ops", "ops-secret").await;
    let response = issuer.rotate(Some(&admin_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let new_kid = response.json::<Value>().await.unwrap()["kid"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(new_kid, old_kid);
    assert_eq!(new_kid, pre_published_kid);

    let after = issuer.jwks().await;
    let kids: Vec<_> = after.keys.iter().map(|k| k.kid.as_str()).collect();
    assert_eq!(kids.len(), 3);
    assert_eq!(kids[0], new_kid);
    assert_eq!(kids[2], old_kid);

    let keys = KeySet::from_jwks(&after);
    assert!(verify_signature(&old_token, &keys).is_ok());

    let new_token = issuer.access_token("aggregator", "agg-secret").await;
    new_token.assert_signed_by(&new_kid);
    assert!(verify_signature(&new_token, &keys).is_ok());
    // A verifier still holding the pre-rotation JWKS accepts the new key.
    assert!(verify_signature(&new_token, &cached_keys).is_ok());
}

#[tokio::test]
async fn test_rotation_requires_admin_scope() {
    let issuer = TestIssuer::spawn().await.unwrap();

    assert_eq!(issuer.rotate(None).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        issuer.rotate(Some("not.a.token")).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let reader = issuer.access_token("aggregator", "agg-secret").await;
    let response = issuer.rotate(Some(&reader)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["required_scope"], "admin:keys");

    assert_eq!(issuer.jwks().await.keys.len(), 2);
}

#[tokio::test]
async fn test_health_and_ready() {
    let issuer = TestIssuer::spawn().await.unwrap();

    let health = issuer.client.get(issuer.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let ready: Value = issuer
        .client
        .get(issuer.url("/ready"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["published_keys"], 2);
}
