//! Integration tests for the scriptgate MCP server.
//!
//! Tool tests drive a real rmcp client/server pair over a duplex pipe. Auth
//! tests run a mock authority (OIDC discovery + key set) and the HTTP router
//! on ephemeral ports.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use jsonwebtoken::{EncodingKey, Header, encode, get_current_timestamp};
use rmcp::ServiceExt;
use rmcp::model::{CallToolResult, RawContent, ReadResourceRequestParam, ResourceContents};
use rmcp::service::{RoleClient, RunningService};
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;

use scriptgate_kernel::mcp::McpClient;
use scriptgate_kernel::{ApiCatalog, CatalogOptions, Kernel, KernelConfig, RestApi};
use scriptgate_mcp::{AuthError, JwtValidator, McpAuthConfig, ScriptgateServer};
use scriptgate_testutil::{PetApi, connect_mock_server, spawn_pet_api};
use scriptgate_types::CredentialBinding;

const SIGNING_KEY: &[u8] = include_bytes!("fixtures/jwt_signing_key.pem");
const KEY_ID: &str = "test-key";
const AUDIENCE: &str = "https://mcp.example.com";
const MODULUS: &str = "0EjlBB1B-G-6bCW_-lE4mGn-jPkngmyvP9fnlfsrNNNN_UJWYAtpPnt1R5lkxRUAkUt0YgY8yuATsNluA9bwd8FF0XF5VYWJPcvg-Ym2k_j__DeYYmw4J6R_XakN0lvMaNbl5BEOqjgDWK_uxsfoBYMbbIJXSIEE3At1gcHr_A_XOvLenHUYXVVXfZHhaBo8Wvjc4CIl9jYGO3FkKewsMdv4UNYqnGlNsvlwMFZxPh8putm2Xr4lsGSwj8xiBnsZVV8EHhXOiGMEpFMWChtWPX4qFlXd4ZyiyAUOloAPH2fTDTGGiFdhzGsnkUeNcUFW-_pRkU4EOIbomLarSuda6w";

async fn kernel(api: &PetApi) -> Kernel {
    let catalog = ApiCatalog::from_document("petstore", &api.document(), &CatalogOptions::default())
        .expect("catalog");
    let mock = McpClient::from_service("mock", connect_mock_server().await.expect("mock server"));
    Kernel::builder(KernelConfig::local().with_output(None))
        .rest_api(RestApi::new(catalog).with_binding(CredentialBinding::default()))
        .tool_server(Arc::new(mock))
        .build()
        .await
        .expect("kernel")
}

/// Serve a [`ScriptgateServer`] on a duplex pipe and return the raw client session.
async fn session(server: ScriptgateServer) -> RunningService<RoleClient, ()> {
    let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);
    tokio::spawn(async move {
        let (read, write) = tokio::io::split(server_stream);
        if let Ok(service) = server.serve((read, write)).await {
            let _ = service.waiting().await;
        }
    });
    let (read, write) = tokio::io::split(client_stream);
    ().serve((read, write)).await.expect("client")
}

async fn connect(server: ScriptgateServer) -> McpClient {
    McpClient::from_service("scriptgate", session(server).await)
}

async fn gateway_client() -> (McpClient, PetApi) {
    let api = spawn_pet_api().await.expect("pet api");
    let server = ScriptgateServer::new(kernel(&api).await);
    (connect(server).await, api)
}

fn text(result: &CallToolResult) -> String {
    match result.content.first().map(|c| &c.raw) {
        Some(RawContent::Text(t)) => t.text.clone(),
        other => panic!("expected text content, got {other:?}"),
    }
}

fn json_text(result: &CallToolResult) -> JsonValue {
    serde_json::from_str(&text(result)).expect("json content")
}

fn args(value: JsonValue) -> Option<serde_json::Map<String, JsonValue>> {
    value.as_object().cloned()
}

// ============================================================================
// Tools over a real MCP session
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_exposes_six_tools() {
    let (client, _api) = gateway_client().await;
    let mut names: Vec<String> = client
        .list_tools()
        .await
        .expect("tools")
        .into_iter()
        .map(|t| t.name.to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        ["execute_script", "get_function_docs", "get_schema", "list_apis", "list_functions", "search_docs"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_apis_counts_match_list_functions() {
    let (client, _api) = gateway_client().await;
    let apis = json_text(&client.call_tool("list_apis", None).await.expect("list_apis"));
    let apis = apis.as_array().expect("array").clone();
    assert_eq!(apis.len(), 2);
    assert_eq!(apis[0]["name"], "petstore");
    assert_eq!(apis[0]["source"], "rest");
    assert_eq!(apis[1]["name"], "mock");
    assert_eq!(apis[1]["source"], "tool_protocol");

    for api in &apis {
        let listed = json_text(
            &client
                .call_tool("list_functions", args(json!({ "api": api["name"] })))
                .await
                .expect("list_functions"),
        );
        assert_eq!(
            listed.as_array().map(Vec::len),
            api["tool_count"].as_u64().map(|n| n as usize),
            "{}",
            api["name"]
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_docs_and_schema_lookup() {
    let (client, _api) = gateway_client().await;

    let docs = client
        .call_tool("get_function_docs", args(json!({ "name": "get_pet" })))
        .await
        .expect("docs");
    assert_ne!(docs.is_error, Some(true));
    assert!(text(&docs).contains("function sdk.get_pet(params) end"));

    let schema = client
        .call_tool("get_schema", args(json!({ "name": "Pet" })))
        .await
        .expect("schema");
    assert!(text(&schema).contains("--- @class Pet"));

    let missing = client
        .call_tool("get_function_docs", args(json!({ "name": "nope.missing" })))
        .await
        .expect("missing docs");
    assert_eq!(missing.is_error, Some(true));
    assert_eq!(text(&missing), "function 'nope.missing' not found");

    let missing = client
        .call_tool("get_schema", args(json!({ "name": "Unicorn" })))
        .await
        .expect("missing schema");
    assert_eq!(missing.is_error, Some(true));
    assert_eq!(text(&missing), "schema 'Unicorn' not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_docs() {
    let (client, _api) = gateway_client().await;
    let hits = json_text(
        &client
            .call_tool("search_docs", args(json!({ "query": "user" })))
            .await
            .expect("search"),
    );
    assert_eq!(hits[0]["name"], "mock.get_user");
    assert_eq!(hits[0]["type"], "mcp_tool");

    let empty = client
        .call_tool("search_docs", args(json!({ "query": "" })))
        .await
        .expect("empty search");
    assert_eq!(empty.is_error, Some(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resources_over_session() {
    let api = spawn_pet_api().await.expect("pet api");
    let client = session(ScriptgateServer::new(kernel(&api).await)).await;
    let resources = client.list_all_resources().await.expect("resources");
    let uris: Vec<&str> = resources.iter().map(|r| r.raw.uri.as_str()).collect();
    assert!(uris.contains(&"sdk://petstore/overview"));
    assert!(uris.contains(&"sdk://mock/functions/get_user"));

    let read = client
        .read_resource(ReadResourceRequestParam {
            uri: "sdk://petstore/functions/get_pet".to_string(),
        })
        .await
        .expect("read");
    let ResourceContents::TextResourceContents { text, .. } = &read.contents[0] else {
        panic!("expected text contents");
    };
    assert!(text.contains("function sdk.get_pet(params) end"), "{text}");

    let missing = client
        .read_resource(ReadResourceRequestParam {
            uri: "sdk://unicorns/overview".to_string(),
        })
        .await;
    assert!(missing.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_script_envelope() {
    let (client, _api) = gateway_client().await;
    let script = r#"
        print("listing")
        local pets = sdk.list_pets()
        local sum = sdk.mock.add({ a = 2, b = 3 })
        return { total = pets.total, sum = sum }
    "#;
    let result = client
        .call_tool("execute_script", args(json!({ "script": script })))
        .await
        .expect("execute");
    assert_ne!(result.is_error, Some(true));

    let envelope = json_text(&result);
    assert_eq!(envelope["result"], json!({ "total": 4, "sum": 5 }));
    assert_eq!(envelope["logs"], json!(["listing"]));
    assert_eq!(envelope["stats"]["api_calls"], 2);
    assert_eq!(envelope["files_written"], json!([]));
    assert!(envelope.get("error").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_script_failure_is_error_result() {
    let (client, _api) = gateway_client().await;
    let result = client
        .call_tool(
            "execute_script",
            args(json!({ "script": "print('before')\nreturn io.open('x')" })),
        )
        .await
        .expect("execute");
    assert_eq!(result.is_error, Some(true));

    let envelope = json_text(&result);
    assert_eq!(envelope["kind"], "sandbox_violation");
    assert!(envelope["error"].as_str().unwrap_or_default().contains("'io'"));
    assert_eq!(envelope["logs"], json!(["before"]));
    assert_eq!(envelope["result"], JsonValue::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_script_timeout_input() {
    let (client, _api) = gateway_client().await;
    let result = client
        .call_tool(
            "execute_script",
            args(json!({ "script": "while true do end", "timeout_ms": 150 })),
        )
        .await
        .expect("execute");
    assert_eq!(result.is_error, Some(true));
    let envelope = json_text(&result);
    assert_eq!(envelope["kind"], "timeout");
    assert_eq!(envelope["error"], "script execution timed out after 150ms");
}

// ============================================================================
// Mock authority
// ============================================================================

#[derive(Default)]
struct AuthorityHits {
    discovery: AtomicUsize,
    jwks: AtomicUsize,
}

struct Authority {
    url: String,
    hits: Arc<AuthorityHits>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for Authority {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn_authority() -> Authority {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let hits = Arc::new(AuthorityHits::default());

    let discovery = {
        let url = url.clone();
        move |State(hits): State<Arc<AuthorityHits>>| {
            let url = url.clone();
            async move {
                hits.discovery.fetch_add(1, Ordering::SeqCst);
                axum::Json(json!({ "issuer": url, "jwks_uri": format!("{url}/jwks") }))
            }
        }
    };
    let jwks = |State(hits): State<Arc<AuthorityHits>>| async move {
        hits.jwks.fetch_add(1, Ordering::SeqCst);
        axum::Json(json!({
            "keys": [{
                "kty": "RSA",
                "kid": KEY_ID,
                "use": "sig",
                "alg": "RS256",
                "n": MODULUS,
                "e": "AQAB",
            }]
        }))
    };
    let app = axum::Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/jwks", get(jwks))
        .with_state(Arc::clone(&hits));

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Authority { url, hits, handle }
}

fn auth_config(authority: &Authority) -> McpAuthConfig {
    McpAuthConfig {
        authority: authority.url.clone(),
        audience: AUDIENCE.to_string(),
        jwks_uri_override: None,
    }
}

fn claims(issuer: &str, audience: &str, exp: u64) -> JsonValue {
    json!({ "sub": "user-1", "iss": issuer, "aud": audience, "exp": exp })
}

fn sign(claims: &JsonValue, kid: Option<&str>) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = kid.map(String::from);
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY).expect("signing key");
    encode(&header, claims, &key).expect("sign")
}

fn valid_token(authority: &Authority) -> String {
    sign(&claims(&authority.url, AUDIENCE, get_current_timestamp() + 3600), Some(KEY_ID))
}

// ============================================================================
// JWT validation
// ============================================================================

#[tokio::test]
async fn test_valid_token_is_accepted_and_keys_cached() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(auth_config(&authority));

    let context = validator.validate(&valid_token(&authority)).await.expect("valid");
    assert_eq!(context.subject.as_deref(), Some("user-1"));
    assert_eq!(context.claims["aud"], AUDIENCE);

    validator.validate(&valid_token(&authority)).await.expect("valid again");
    assert_eq!(authority.hits.discovery.load(Ordering::SeqCst), 1);
    assert_eq!(authority.hits.jwks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_without_kid_uses_single_key() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(auth_config(&authority));
    let token = sign(&claims(&authority.url, AUDIENCE, get_current_timestamp() + 3600), None);
    assert!(validator.validate(&token).await.is_ok());
}

#[tokio::test]
async fn test_unknown_kid_refetches_once_then_rejects() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(auth_config(&authority));
    validator.validate(&valid_token(&authority)).await.expect("warm cache");

    let token = sign(&claims(&authority.url, AUDIENCE, get_current_timestamp() + 3600), Some("rotated"));
    let err = validator.validate(&token).await.expect_err("unknown kid");
    assert!(err.to_string().contains("unknown signing key rotated"), "{err}");
    assert_eq!(authority.hits.jwks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_kids_share_one_refetch_per_interval() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(auth_config(&authority));
    validator.validate(&valid_token(&authority)).await.expect("warm cache");

    for kid in ["rotated", "rotated", "other"] {
        let token = sign(&claims(&authority.url, AUDIENCE, get_current_timestamp() + 3600), Some(kid));
        let err = validator.validate(&token).await.expect_err("unknown kid");
        assert!(err.to_string().contains(&format!("unknown signing key {kid}")), "{err}");
    }
    assert_eq!(authority.hits.jwks.load(Ordering::SeqCst), 2);

    // Known keys keep validating from the cache.
    validator.validate(&valid_token(&authority)).await.expect("still valid");
    assert_eq!(authority.hits.jwks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_refetch_interval_refetches_every_miss() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(auth_config(&authority)).with_refetch_interval(Duration::ZERO);
    validator.validate(&valid_token(&authority)).await.expect("warm cache");

    for _ in 0..2 {
        let token = sign(&claims(&authority.url, AUDIENCE, get_current_timestamp() + 3600), Some("rotated"));
        assert!(validator.validate(&token).await.is_err());
    }
    assert_eq!(authority.hits.jwks.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rejected_tokens() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(auth_config(&authority));
    let now = get_current_timestamp();

    let wrong_audience = sign(&claims(&authority.url, "https://other.example.com", now + 3600), Some(KEY_ID));
    let expired = sign(&claims(&authority.url, AUDIENCE, now - 3600), Some(KEY_ID));
    let wrong_issuer = sign(&claims("https://evil.example.com", AUDIENCE, now + 3600), Some(KEY_ID));
    let symmetric = encode(
        &Header::new(jsonwebtoken::Algorithm::HS256),
        &claims(&authority.url, AUDIENCE, now + 3600),
        &EncodingKey::from_secret(b"shared-secret"),
    )
    .expect("hs256");

    for token in [wrong_audience, expired, wrong_issuer, symmetric, "not-a-jwt".to_string()] {
        let err = validator.validate(&token).await.expect_err("should reject");
        assert!(matches!(err, AuthError::InvalidToken(_)), "{err}");
    }
}

#[tokio::test]
async fn test_jwks_override_skips_discovery() {
    let authority = spawn_authority().await;
    let validator = JwtValidator::new(McpAuthConfig {
        jwks_uri_override: Some(format!("{}/jwks", authority.url)),
        ..auth_config(&authority)
    });
    validator.validate(&valid_token(&authority)).await.expect("valid");
    assert_eq!(authority.hits.discovery.load(Ordering::SeqCst), 0);
    assert_eq!(authority.hits.jwks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_authority() {
    let validator = JwtValidator::new(McpAuthConfig {
        authority: "http://127.0.0.1:1".to_string(),
        audience: AUDIENCE.to_string(),
        jwks_uri_override: None,
    });
    let token = sign(&claims("http://127.0.0.1:1", AUDIENCE, get_current_timestamp() + 3600), Some(KEY_ID));
    let err = validator.validate(&token).await.expect_err("no authority");
    assert!(matches!(err, AuthError::KeySet(_)), "{err}");
}

// ============================================================================
// HTTP router
// ============================================================================

struct HttpGateway {
    url: String,
    ct: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    _api: PetApi,
}

impl Drop for HttpGateway {
    fn drop(&mut self) {
        self.ct.cancel();
        self.handle.abort();
    }
}

async fn spawn_gateway(auth: Option<McpAuthConfig>) -> HttpGateway {
    let api = spawn_pet_api().await.expect("pet api");
    let server = ScriptgateServer::new(kernel(&api).await);
    let ct = CancellationToken::new();
    let app = scriptgate_mcp::http::router(server, auth.map(|c| Arc::new(JwtValidator::new(c))), &ct);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    HttpGateway {
        url,
        ct,
        handle,
        _api: api,
    }
}

fn initialize_request() -> JsonValue {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "0.0.0" }
        }
    })
}

fn post_mcp(http: &reqwest::Client, gateway: &HttpGateway) -> reqwest::RequestBuilder {
    http.post(format!("{}/mcp", gateway.url))
        .header("accept", "application/json, text/event-stream")
        .json(&initialize_request())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metadata_document_served_with_auth() {
    let authority = spawn_authority().await;
    let gateway = spawn_gateway(Some(auth_config(&authority))).await;

    let response = reqwest::get(format!("{}/.well-known/oauth-protected-resource", gateway.url))
        .await
        .expect("metadata");
    assert_eq!(response.status(), 200);
    let doc: JsonValue = response.json().await.expect("json");
    assert_eq!(doc["resource"], AUDIENCE);
    assert_eq!(doc["authorization_servers"], json!([authority.url]));
    assert_eq!(doc["bearer_methods_supported"], json!(["header"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metadata_document_absent_without_auth() {
    let gateway = spawn_gateway(None).await;
    let response = reqwest::get(format!("{}/.well-known/oauth-protected-resource", gateway.url))
        .await
        .expect("metadata");
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_token_gets_challenge() {
    let authority = spawn_authority().await;
    let gateway = spawn_gateway(Some(auth_config(&authority))).await;
    let http = reqwest::Client::new();

    let response = post_mcp(&http, &gateway).send().await.expect("post");
    assert_eq!(response.status(), 401);
    let challenge = response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let host = gateway.url.trim_start_matches("http://");
    assert_eq!(
        challenge,
        format!("Bearer resource_metadata=\"http://{host}/.well-known/oauth-protected-resource\"")
    );
    let body: JsonValue = response.json().await.expect("json");
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_token_rejected_good_token_admitted() {
    let authority = spawn_authority().await;
    let gateway = spawn_gateway(Some(auth_config(&authority))).await;
    let http = reqwest::Client::new();

    let rejected = post_mcp(&http, &gateway)
        .bearer_auth("garbage")
        .send()
        .await
        .expect("post");
    assert_eq!(rejected.status(), 401);

    let admitted = post_mcp(&http, &gateway)
        .bearer_auth(valid_token(&authority))
        .send()
        .await
        .expect("post");
    assert_eq!(admitted.status(), 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_auth_admits_anonymous_requests() {
    let gateway = spawn_gateway(None).await;
    let http = reqwest::Client::new();
    let response = post_mcp(&http, &gateway).send().await.expect("post");
    assert_eq!(response.status(), 200);
}
