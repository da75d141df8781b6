// tests/http_clients.rs
//! HTTP clients against mockito servers: registry JSON-RPC, read API,
//! scoped token exchange and the attestation authorization-code flow.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

use did_onboarding::blockchain::read_api::ReadApiClient;
use did_onboarding::blockchain::rpc_client::LedgerRpcClient;
use did_onboarding::blockchain::RegistryRpc;
use did_onboarding::models::credential::AttestationCredential;
use did_onboarding::services::attestation::{
    AttestationObtainer, AttestationRequest, AttestationSource, AttestationState,
};
use did_onboarding::services::token_exchange::{AccessTokenSource, HolderContext, ScopedAccessTokenExchanger};
use did_onboarding::utils::http::build_client;
use did_onboarding::utils::serialization::base64url;
use did_onboarding::wallet::credential_storage::CredentialStorage;
use did_onboarding::wallet::key_management::{DidKeySet, KeyMaterialProvisioner};
use did_onboarding::{Error, Result};

const DID: &str = "did:ebsi:zkP3ahcNh3Fh8eZ3z3hfPPr";

fn http() -> reqwest::Client {
    build_client(Duration::from_secs(5)).unwrap()
}

fn keys() -> DidKeySet {
    KeyMaterialProvisioner::provision_set(None, None).unwrap()
}

fn attestation_request(issuer_url: &str) -> AttestationRequest {
    AttestationRequest {
        issuer_url: issuer_url.to_string(),
        credential_type: "VerifiableAuthorisationToOnboard".into(),
        acceptable_formats: vec!["jwt_vc".into()],
        client_id: None,
        redirect_uri: "openid://".into(),
        timeout: Duration::from_secs(5),
    }
}

fn unsigned_jwt(claims: &Value) -> String {
    format!(
        "{}.{}.c2ln",
        base64url(br#"{"alg":"ES256","typ":"JWT"}"#),
        base64url(claims.to_string())
    )
}

/// Attestation source that must never be consulted.
struct NoIssuer;

#[async_trait]
impl AttestationSource for NoIssuer {
    async fn obtain(
        &self,
        _request: &AttestationRequest,
        _holder_did: &str,
        _keys: &DidKeySet,
        _held: &CredentialStorage,
    ) -> Result<AttestationCredential> {
        panic!("no attestation expected");
    }
}

/// Issues a fixed credential and records which types were requested.
struct StubIssuer {
    credential: String,
    requested: Mutex<Vec<String>>,
}

impl StubIssuer {
    fn new(credential: String) -> Self {
        Self { credential, requested: Mutex::new(Vec::new()) }
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttestationSource for StubIssuer {
    async fn obtain(
        &self,
        request: &AttestationRequest,
        holder_did: &str,
        _keys: &DidKeySet,
        _held: &CredentialStorage,
    ) -> Result<AttestationCredential> {
        self.requested.lock().unwrap().push(request.credential_type.clone());
        Ok(AttestationCredential::from_jwt(
            self.credential.clone(),
            "jwt_vc",
            &request.credential_type,
            holder_did,
        ))
    }
}

fn onboarding_descriptor(id: &str) -> Value {
    json!({
        "id": id,
        "constraints": {"fields": [{
            "path": ["$.vc.type"],
            "filter": {"type": "array", "contains": {"const": "VerifiableAuthorisationToOnboard"}}
        }]}
    })
}

fn onboarding_credential(exp: i64) -> String {
    unsigned_jwt(&json!({
        "sub": DID,
        "exp": exp,
        "vc": {"type": ["VerifiableCredential", "VerifiableAuthorisationToOnboard"]}
    }))
}

// ---------------------------------------------------------------- registry

#[tokio::test]
async fn parse_error_without_id_keeps_the_registry_code() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/jsonrpc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#)
        .create_async()
        .await;

    let client = LedgerRpcClient::new(http(), &server.url());
    let err = client.call("addService", vec![json!({})], 3, "t").await.unwrap_err();
    assert!(matches!(err, Error::Rpc { code: -32700, ref message, .. } if message == "Parse error"));
}

#[tokio::test]
async fn rpc_error_envelope_becomes_typed_error() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/jsonrpc")
        .match_header("authorization", "Bearer invite-token")
        .match_body(Matcher::PartialJson(json!({"jsonrpc": "2.0", "method": "insertDidDocument", "id": 5})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":5,"error":{"code":-32000,"message":"DID already exists"}}"#)
        .create_async()
        .await;

    let client = LedgerRpcClient::new(http(), &server.url());
    let err = client
        .call("insertDidDocument", vec![json!({"did": DID})], 5, "invite-token")
        .await
        .unwrap_err();

    mock.assert_async().await;
    match err {
        Error::Rpc { method, id, code, message } => {
            assert_eq!(method, "insertDidDocument");
            assert_eq!(id, 5);
            assert_eq!(code, -32000);
            assert_eq!(message, "DID already exists");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn raw_call_returns_the_envelope_even_on_http_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/jsonrpc")
        .with_status(400)
        .with_body(r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32602,"message":"Invalid params"}}"#)
        .create_async()
        .await;

    let client = LedgerRpcClient::new(http(), &server.url());
    let envelope = client.call_raw("addService", &[json!({})], 9, "t").await.unwrap();
    assert_eq!(envelope.error.unwrap().code, -32602);
}

#[tokio::test]
async fn non_envelope_failure_is_an_http_status_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/jsonrpc")
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let client = LedgerRpcClient::new(http(), &server.url());
    let err = client.call("addService", vec![json!({})], 1, "t").await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 502, ref body, .. } if body == "bad gateway"));
}

#[tokio::test]
async fn read_api_reports_problem_details() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Regex(r"^/identifiers/did:ebsi:".into()))
        .with_status(404)
        .with_header("content-type", "application/problem+json")
        .with_body(r#"{"title":"Identifier Not Found","status":404}"#)
        .create_async()
        .await;

    let reader = ReadApiClient::new(http(), &server.url());
    let err = reader.fetch(DID, None).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 404, ref body, .. } if body.contains("Identifier Not Found")));
}

#[tokio::test]
async fn read_api_sends_valid_at() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Regex(r"^/identifiers/did:ebsi:".into()))
        .match_query(Matcher::UrlEncoded("valid_at".into(), "2024-01-01T00:00:00Z".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": DID}).to_string())
        .create_async()
        .await;

    let reader = ReadApiClient::new(http(), &server.url());
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let document = reader.fetch(DID, Some(at)).await.unwrap();
    mock.assert_async().await;
    assert_eq!(document["id"], DID);
}

// ---------------------------------------------------------- token exchange

async fn authorisation_server(server: &mut ServerGuard, definition: Value) -> Vec<Mock> {
    let url = server.url();
    let metadata = server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "issuer": url,
                "token_endpoint": format!("{url}/token"),
                "presentation_definition_endpoint": format!("{url}/presentation-definitions"),
            })
            .to_string(),
        )
        .create_async()
        .await;
    let definition = server
        .mock("GET", Matcher::Regex(r"^/presentation-definitions".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(definition.to_string())
        .create_async()
        .await;
    vec![metadata, definition]
}

#[tokio::test]
async fn zero_descriptor_scope_still_sends_a_submission() {
    let mut server = Server::new_async().await;
    let _discovery = authorisation_server(&mut server, json!({"id": "didr_invite_presentation", "input_descriptors": []})).await;
    let token_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("grant_type=vp_token".into()),
            Matcher::Regex("scope=openid\\+didr_invite".into()),
            Matcher::Regex("descriptor_map%22%3A%5B%5D".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"invite-token","token_type":"Bearer","expires_in":7200,"scope":"openid didr_invite"}"#)
        .create_async()
        .await;

    let exchanger = ScopedAccessTokenExchanger::new(
        http(),
        &server.url(),
        Arc::new(NoIssuer),
        attestation_request("https://issuer.example"),
    );
    let keys = keys();
    let mut credentials = CredentialStorage::new();
    let mut holder = HolderContext { did: DID, keys: &keys, credentials: &mut credentials };
    let token = exchanger.access_token("didr_invite", &mut holder).await.unwrap();

    token_mock.assert_async().await;
    assert_eq!(token.scope, "didr_invite");
    assert_eq!(token.access_token, "invite-token");
    assert_eq!(token.expires_in, 7200);
}

#[tokio::test]
async fn held_credential_is_presented_for_a_matching_descriptor() {
    let mut server = Server::new_async().await;
    let _discovery = authorisation_server(
        &mut server,
        json!({
            "id": "didr_invite_presentation",
            "input_descriptors": [{
                "id": "didr_invite_credential",
                "constraints": {"fields": [{
                    "path": ["$.vc.type"],
                    "filter": {"type": "array", "contains": {"const": "VerifiableAuthorisationToOnboard"}}
                }]}
            }]
        }),
    )
    .await;
    let token_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("didr_invite_credential".into()),
            Matcher::Regex("verifiableCredential%5B0%5D".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"invite-token"}"#)
        .create_async()
        .await;

    let exchanger = ScopedAccessTokenExchanger::new(
        http(),
        &server.url(),
        Arc::new(NoIssuer),
        attestation_request("https://issuer.example"),
    );
    let keys = keys();
    let mut credentials = CredentialStorage::new();
    credentials.store_credential(AttestationCredential::from_jwt(
        unsigned_jwt(&json!({"sub": DID, "vc": {"type": ["VerifiableCredential", "VerifiableAuthorisationToOnboard"]}})),
        "jwt_vc",
        "VerifiableAuthorisationToOnboard",
        DID,
    ));
    let mut holder = HolderContext { did: DID, keys: &keys, credentials: &mut credentials };
    let token = exchanger.access_token("didr_invite", &mut holder).await.unwrap();

    token_mock.assert_async().await;
    assert_eq!(token.token_type, "Bearer");
}

#[tokio::test]
async fn missing_access_token_is_a_token_exchange_error() {
    let mut server = Server::new_async().await;
    let _discovery = authorisation_server(&mut server, json!({"id": "didr_write_presentation"})).await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token_type":"Bearer"}"#)
        .create_async()
        .await;

    let exchanger = ScopedAccessTokenExchanger::new(
        http(),
        &server.url(),
        Arc::new(NoIssuer),
        attestation_request("https://issuer.example"),
    );
    let keys = keys();
    let mut credentials = CredentialStorage::new();
    let mut holder = HolderContext { did: DID, keys: &keys, credentials: &mut credentials };
    let err = exchanger.access_token("didr_write", &mut holder).await.unwrap_err();
    assert!(matches!(err, Error::TokenExchange { ref scope, .. } if scope == "didr_write"));
}

#[tokio::test]
async fn rejected_presentation_surfaces_problem_details() {
    let mut server = Server::new_async().await;
    let _discovery = authorisation_server(&mut server, json!({"id": "didr_write_presentation", "input_descriptors": []})).await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/problem+json")
        .with_body(r#"{"title":"invalid_request","detail":"VP is not signed by a registered key"}"#)
        .create_async()
        .await;

    let exchanger = ScopedAccessTokenExchanger::new(
        http(),
        &server.url(),
        Arc::new(NoIssuer),
        attestation_request("https://issuer.example"),
    );
    let keys = keys();
    let mut credentials = CredentialStorage::new();
    let mut holder = HolderContext { did: DID, keys: &keys, credentials: &mut credentials };
    let err = exchanger.access_token("didr_write", &mut holder).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 400, ref body, .. } if body.contains("registered key")));
}

#[tokio::test]
async fn missing_credential_is_obtained_stored_and_presented_once() {
    let mut server = Server::new_async().await;
    let _discovery = authorisation_server(
        &mut server,
        json!({
            "id": "didr_invite_presentation",
            "input_descriptors": [onboarding_descriptor("first"), onboarding_descriptor("second")]
        }),
    )
    .await;
    let token_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("first".into()),
            Matcher::Regex("second".into()),
            Matcher::Regex("verifiableCredential%5B0%5D".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"invite-token"}"#)
        .create_async()
        .await;

    let fresh = onboarding_credential((Utc::now() + ChronoDuration::days(30)).timestamp());
    let issuer = Arc::new(StubIssuer::new(fresh.clone()));
    let exchanger = ScopedAccessTokenExchanger::new(
        http(),
        &server.url(),
        issuer.clone(),
        attestation_request("https://issuer.example"),
    );
    let keys = keys();
    let mut credentials = CredentialStorage::new();
    // An expired credential of the right type must not be presented.
    credentials.store_credential(AttestationCredential::from_jwt(
        onboarding_credential((Utc::now() - ChronoDuration::minutes(5)).timestamp()),
        "jwt_vc",
        "VerifiableAuthorisationToOnboard",
        DID,
    ));
    let mut holder = HolderContext { did: DID, keys: &keys, credentials: &mut credentials };
    let token = exchanger.access_token("didr_invite", &mut holder).await.unwrap();

    token_mock.assert_async().await;
    assert_eq!(token.access_token, "invite-token");
    assert_eq!(issuer.requested(), vec!["VerifiableAuthorisationToOnboard".to_string()]);
    assert_eq!(credentials.count_credentials(), 1);
    let held = credentials
        .find_matching(&serde_json::from_value(onboarding_descriptor("any")).unwrap(), Utc::now())
        .unwrap();
    assert_eq!(held.raw, fresh);
}

#[tokio::test]
async fn definition_endpoint_query_is_extended_not_replaced() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let _metadata = server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "issuer": url,
                "token_endpoint": format!("{url}/token"),
                "presentation_definition_endpoint": format!("{url}/presentation-definitions?version=2"),
            })
            .to_string(),
        )
        .create_async()
        .await;
    let definition = server
        .mock("GET", "/presentation-definitions")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("version".into(), "2".into()),
            Matcher::UrlEncoded("scope".into(), "openid didr_write".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": "didr_write_presentation", "input_descriptors": []}).to_string())
        .create_async()
        .await;
    let _token = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"write-token"}"#)
        .create_async()
        .await;

    let exchanger = ScopedAccessTokenExchanger::new(
        http(),
        &url,
        Arc::new(NoIssuer),
        attestation_request("https://issuer.example"),
    );
    let keys = keys();
    let mut credentials = CredentialStorage::new();
    let mut holder = HolderContext { did: DID, keys: &keys, credentials: &mut credentials };
    let token = exchanger.access_token("didr_write", &mut holder).await.unwrap();

    definition.assert_async().await;
    assert_eq!(token.access_token, "write-token");
}

// ------------------------------------------------------------- attestation

async fn issuer_discovery(server: &mut ServerGuard) -> (String, Vec<Mock>) {
    let authorize = format!("{}/auth/authorize", server.url());
    issuer_discovery_at(server, &authorize).await
}

/// Issuer and authorisation server metadata, with the given authorization endpoint.
async fn issuer_discovery_at(server: &mut ServerGuard, authorization_endpoint: &str) -> (String, Vec<Mock>) {
    let url = server.url();
    let issuer = server
        .mock("GET", "/issuer/.well-known/openid-credential-issuer")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "credential_issuer": format!("{url}/issuer"),
                "authorization_server": format!("{url}/auth"),
                "credential_endpoint": format!("{url}/issuer/credential"),
                "credentials_supported": [{
                    "format": "jwt_vc",
                    "types": ["VerifiableCredential", "VerifiableAttestation", "VerifiableAuthorisationToOnboard"]
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let authorisation = server
        .mock("GET", "/auth/.well-known/openid-configuration")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "issuer": format!("{url}/auth"),
                "authorization_endpoint": authorization_endpoint,
                "token_endpoint": format!("{url}/auth/token"),
            })
            .to_string(),
        )
        .create_async()
        .await;
    (url, vec![issuer, authorisation])
}

#[tokio::test]
async fn authorization_code_flow_yields_the_credential() {
    let mut server = Server::new_async().await;
    let (url, _discovery) = issuer_discovery(&mut server).await;

    let _mock = server
        .mock("GET", Matcher::Regex(r"^/auth/authorize".into()))
        .with_status(302)
        .with_header(
            "location",
            &format!(
                "openid://?response_type=id_token&client_id={url}/auth&redirect_uri={url}/auth/direct_post&nonce=n-1&state=as-state"
            ),
        )
        .create_async()
        .await;
    let direct_post = server
        .mock("POST", "/auth/direct_post")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("id_token=".into()),
            Matcher::Regex("state=as-state".into()),
        ]))
        .with_status(302)
        .with_header("location", "openid://?code=code-1")
        .create_async()
        .await;
    let token = server
        .mock("POST", "/auth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("grant_type=authorization_code".into()),
            Matcher::Regex("code=code-1".into()),
            Matcher::Regex("code_verifier=".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"issuer-token","token_type":"Bearer","c_nonce":"c-nonce-1"}"#)
        .create_async()
        .await;
    let credential_jwt = unsigned_jwt(&json!({
        "sub": DID,
        "exp": 4_102_444_800_i64,
        "vc": {"type": ["VerifiableCredential", "VerifiableAuthorisationToOnboard"]}
    }));
    let credential = server
        .mock("POST", "/issuer/credential")
        .match_header("authorization", "Bearer issuer-token")
        .match_body(Matcher::PartialJson(json!({"format": "jwt_vc", "proof": {"proof_type": "jwt"}})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"format": "jwt_vc", "credential": credential_jwt}).to_string())
        .create_async()
        .await;

    let obtainer = AttestationObtainer::new(http());
    let issued = obtainer
        .obtain(&attestation_request(&format!("{url}/issuer")), DID, &keys(), &CredentialStorage::new())
        .await
        .unwrap();

    direct_post.assert_async().await;
    token.assert_async().await;
    credential.assert_async().await;
    assert_eq!(issued.holder, DID);
    assert_eq!(issued.credential_type, "VerifiableAuthorisationToOnboard");
    assert_eq!(issued.raw, credential_jwt);
    assert!(issued.is_valid_at(Utc::now()));
}

#[tokio::test]
async fn error_redirect_fails_with_the_flow_state() {
    let mut server = Server::new_async().await;
    let (url, _discovery) = issuer_discovery(&mut server).await;
    let _mock = server
        .mock("GET", Matcher::Regex(r"^/auth/authorize".into()))
        .with_status(302)
        .with_header("location", "openid://?error=invalid_request&error_description=unknown+client")
        .create_async()
        .await;

    let err = AttestationObtainer::new(http())
        .obtain(&attestation_request(&format!("{url}/issuer")), DID, &keys(), &CredentialStorage::new())
        .await
        .unwrap_err();
    match err {
        Error::AttestationFlow { state, reason } => {
            assert_eq!(state, AttestationState::Authorizing);
            assert!(reason.contains("invalid_request"));
            assert!(reason.contains("unknown client"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_credential_type_fails_during_discovery() {
    let mut server = Server::new_async().await;
    let (url, _discovery) = issuer_discovery(&mut server).await;

    let mut request = attestation_request(&format!("{url}/issuer"));
    request.credential_type = "VerifiableAccreditationToAttest".into();
    let err = AttestationObtainer::new(http())
        .obtain(&request, DID, &keys(), &CredentialStorage::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AttestationFlow { state: AttestationState::Discovering, .. }));
}

/// Token endpoint and credential endpoint of the issuer mock.
async fn issuance(server: &mut ServerGuard, code: &str, credential_jwt: &str) -> Vec<Mock> {
    let token = server
        .mock("POST", "/auth/token")
        .match_body(Matcher::Regex(format!("code={code}")))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"issuer-token","c_nonce":"c-nonce-2"}"#)
        .create_async()
        .await;
    let credential = server
        .mock("POST", "/issuer/credential")
        .match_header("authorization", "Bearer issuer-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"format": "jwt_vc", "credential": credential_jwt}).to_string())
        .create_async()
        .await;
    vec![token, credential]
}

#[tokio::test]
async fn vp_token_request_by_reference_is_answered_with_held_credentials() {
    let mut server = Server::new_async().await;
    let (url, _discovery) = issuer_discovery(&mut server).await;

    let _authorize = server
        .mock("GET", Matcher::Regex(r"^/auth/authorize".into()))
        .with_status(302)
        .with_header(
            "location",
            &format!("openid://?client_id={url}/auth&request_uri={url}/auth/requests/1"),
        )
        .create_async()
        .await;
    let request_object = unsigned_jwt(&json!({
        "response_type": "vp_token",
        "response_mode": "direct_post",
        "client_id": format!("{url}/auth"),
        "response_uri": format!("{url}/auth/direct_post"),
        "nonce": "n-2",
        "state": "vp-state",
        "presentation_definition": {
            "id": "holder-wallet-qualification",
            "input_descriptors": [onboarding_descriptor("onboarding")]
        }
    }));
    let by_reference = server
        .mock("GET", "/auth/requests/1")
        .with_status(200)
        .with_header("content-type", "application/oauth-authz-req+jwt")
        .with_body(request_object)
        .create_async()
        .await;
    let direct_post = server
        .mock("POST", "/auth/direct_post")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("vp_token=".into()),
            Matcher::Regex("presentation_submission=".into()),
            Matcher::Regex("holder-wallet-qualification".into()),
            Matcher::Regex("state=vp-state".into()),
        ]))
        .with_status(302)
        .with_header("location", "openid://?code=code-2")
        .create_async()
        .await;
    let issued_jwt = onboarding_credential(4_102_444_800);
    let _issuance = issuance(&mut server, "code-2", &issued_jwt).await;

    let mut held = CredentialStorage::new();
    held.store_credential(AttestationCredential::from_jwt(
        onboarding_credential(4_102_444_800),
        "jwt_vc",
        "VerifiableAuthorisationToOnboard",
        DID,
    ));
    let issued = AttestationObtainer::new(http())
        .obtain(&attestation_request(&format!("{url}/issuer")), DID, &keys(), &held)
        .await
        .unwrap();

    by_reference.assert_async().await;
    direct_post.assert_async().await;
    assert_eq!(issued.raw, issued_jwt);
}

#[tokio::test]
async fn inline_request_object_drives_the_id_token_answer() {
    let mut server = Server::new_async().await;
    let (url, _discovery) = issuer_discovery(&mut server).await;

    let request_object = unsigned_jwt(&json!({
        "response_type": "id_token",
        "client_id": format!("{url}/auth"),
        "redirect_uri": format!("{url}/auth/direct_post"),
        "nonce": "n-3",
        "state": "inline-state"
    }));
    let _authorize = server
        .mock("GET", Matcher::Regex(r"^/auth/authorize".into()))
        .with_status(302)
        .with_header("location", &format!("openid://?client_id={url}/auth&request={request_object}"))
        .create_async()
        .await;
    let direct_post = server
        .mock("POST", "/auth/direct_post")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("id_token=".into()),
            Matcher::Regex("state=inline-state".into()),
        ]))
        .with_status(302)
        .with_header("location", "openid://?code=code-3")
        .create_async()
        .await;
    let issued_jwt = onboarding_credential(4_102_444_800);
    let _issuance = issuance(&mut server, "code-3", &issued_jwt).await;

    let issued = AttestationObtainer::new(http())
        .obtain(&attestation_request(&format!("{url}/issuer")), DID, &keys(), &CredentialStorage::new())
        .await
        .unwrap();

    direct_post.assert_async().await;
    assert_eq!(issued.raw, issued_jwt);
}

#[tokio::test]
async fn timeout_reports_the_state_that_was_in_progress() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = format!("http://{}/authorize", listener.local_addr().unwrap());
    let _hold = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            open.push(stream);
        }
    });

    let mut server = Server::new_async().await;
    let (url, _discovery) = issuer_discovery_at(&mut server, &silent).await;

    let mut request = attestation_request(&format!("{url}/issuer"));
    request.timeout = Duration::from_millis(300);
    let err = AttestationObtainer::new(http())
        .obtain(&request, DID, &keys(), &CredentialStorage::new())
        .await
        .unwrap_err();
    match err {
        Error::AttestationFlow { state, reason } => {
            assert_eq!(state, AttestationState::Authorizing);
            assert!(reason.contains("timed out"));
        }
        other => panic!("unexpected {other:?}"),
    }
}
