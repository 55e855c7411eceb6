//! wiremock helpers for the issuer endpoints other services depend on.

use crate::crypto_fixtures::TestKeypair;
use common::jwks::Jwks;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the issuer publishes its JWKS under.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Path of the issuer's client credentials endpoint.
pub const SERVICE_TOKEN_PATH: &str = "/api/v1/auth/service/token";

/// JWKS document publishing every given keypair.
pub fn jwks_for(keypairs: &[&TestKeypair]) -> Jwks {
    Jwks {
        keys: keypairs.iter().map(|k| k.jwk()).collect(),
    }
}

/// Mount `GET /.well-known/jwks.json` answering with `keypairs`.
pub async fn mount_jwks(server: &MockServer, keypairs: &[&TestKeypair]) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_for(keypairs)))
        .mount(server)
        .await;
}

/// Start a mock issuer that serves a JWKS for `keypairs`.
pub async fn mock_jwks_server(keypairs: &[&TestKeypair]) -> MockServer {
    let server = MockServer::start().await;
    mount_jwks(&server, keypairs).await;
    server
}

/// Mount a client credentials endpoint that always hands out `access_token`.
pub async fn mount_service_token(server: &MockServer, access_token: &str, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path(SERVICE_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": expires_in,
        })))
        .mount(server)
        .await;
}
