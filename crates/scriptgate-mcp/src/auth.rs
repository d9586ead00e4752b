//! Inbound bearer-token auth for the HTTP transport.
//!
//! Tokens are JWTs signed by an external authority. Signing keys come from
//! the authority's key set: `--auth-jwks-uri` when given, otherwise the
//! `jwks_uri` of `{authority}/.well-known/openid-configuration`. The key set
//! is cached and refetched once when a token names an unknown `kid`; after
//! such a refetch, unknown kids are rejected from the cache until
//! [`DEFAULT_REFETCH_INTERVAL`] has passed.
//!
//! ```text
//! request ──► extract_bearer_token ──► JwtValidator::validate ──► /mcp
//!                  │                         │
//!                  └──────── 401 + WWW-Authenticate: Bearer resource_metadata=...
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tokio::sync::RwLock;

/// Path of the protected-resource metadata document.
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Minimum time between key set refetches triggered by unknown kids.
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Authority and audience inbound tokens are checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpAuthConfig {
    pub authority: String,
    pub audience: String,
    pub jwks_uri_override: Option<String>,
}

impl McpAuthConfig {
    /// Authority and audience must both be set or both omitted.
    pub fn from_parts(
        authority: Option<String>,
        audience: Option<String>,
        jwks_uri: Option<String>,
    ) -> Result<Option<Self>> {
        match (authority, audience) {
            (Some(authority), Some(audience)) => Ok(Some(Self {
                authority,
                audience,
                jwks_uri_override: jwks_uri,
            })),
            (None, None) => Ok(None),
            _ => bail!("--auth-authority and --auth-audience must both be set (or both omitted)"),
        }
    }

    /// Body of `GET /.well-known/oauth-protected-resource`.
    pub fn protected_resource_metadata(&self) -> JsonValue {
        json!({
            "resource": self.audience,
            "authorization_servers": [self.authority],
            "bearer_methods_supported": ["header"],
        })
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("signing keys unavailable: {0}")]
    KeySet(String),
}

impl AuthError {
    fn invalid(reason: impl std::fmt::Display) -> Self {
        Self::InvalidToken(reason.to_string())
    }
}

/// Verified caller identity, attached to the request's extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: Option<String>,
    pub claims: JsonValue,
}

/// Token from an `Authorization` header value. The scheme must be `Bearer`
/// (any case) and the token non-empty.
pub fn extract_bearer_token(header_value: &str) -> Result<&str, AuthError> {
    let (scheme, token) = header_value
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| AuthError::invalid("missing bearer token"))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::invalid(format!("unsupported auth scheme '{scheme}'")));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::invalid("empty bearer token"));
    }
    Ok(token)
}

/// Only signature algorithms with a public verification key are accepted.
fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
    #[serde(default)]
    issuer: Option<String>,
}

#[derive(Debug, Clone)]
struct KeyCache {
    keys: JwkSet,
    issuer: Option<String>,
    /// Last refetch for an unknown kid, successful or not.
    refetched_at: Option<Instant>,
}

/// Validates inbound JWTs against the authority's published keys.
pub struct JwtValidator {
    config: McpAuthConfig,
    http: reqwest::Client,
    cache: RwLock<Option<KeyCache>>,
    refetch_interval: Duration,
}

impl JwtValidator {
    pub fn new(config: McpAuthConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: McpAuthConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            cache: RwLock::new(None),
            refetch_interval: DEFAULT_REFETCH_INTERVAL,
        }
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = interval;
        self
    }

    pub fn config(&self) -> &McpAuthConfig {
        &self.config
    }

    /// Check signature, issuer, audience and expiry.
    pub async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let header = decode_header(token).map_err(AuthError::invalid)?;
        if !is_asymmetric(header.alg) {
            return Err(AuthError::invalid(format!("unsupported algorithm {:?}", header.alg)));
        }

        let (jwk, issuer) = self.signing_key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(AuthError::invalid)?;

        let mut validation = Validation::new(header.alg);
        let mut issuers = vec![
            self.config.authority.clone(),
            self.config.authority.trim_end_matches('/').to_string(),
        ];
        issuers.extend(issuer);
        validation.set_issuer(&issuers[..]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = decode::<JsonValue>(token, &key, &validation).map_err(AuthError::invalid)?;
        let subject = data.claims.get("sub").and_then(JsonValue::as_str).map(String::from);
        tracing::debug!(subject = subject.as_deref().unwrap_or("-"), "token accepted");
        Ok(AuthContext {
            subject,
            claims: data.claims,
        })
    }

    /// The key for `kid`, refreshing the cached key set once if it is
    /// missing. Without a `kid` the set must hold exactly one key.
    async fn signing_key(&self, kid: Option<&str>) -> Result<(Jwk, Option<String>), AuthError> {
        if let Some(cache) = self.cache.read().await.as_ref() {
            if let Some(jwk) = select_key(&cache.keys, kid) {
                return Ok((jwk, cache.issuer.clone()));
            }
        }

        // Held across the fetch so concurrent misses share one request.
        let mut cache = self.cache.write().await;
        if let Some(current) = cache.as_ref() {
            if let Some(jwk) = select_key(&current.keys, kid) {
                return Ok((jwk, current.issuer.clone()));
            }
            if current.refetched_at.is_some_and(|at| at.elapsed() < self.refetch_interval) {
                tracing::debug!(kid = kid.unwrap_or("-"), "key set refetched recently, not refetching");
                return Err(unknown_key(kid));
            }
        }

        let refetched_at = cache.is_some().then(Instant::now);
        let mut fresh = match self.fetch_keys().await {
            Ok(fresh) => fresh,
            Err(e) => {
                if let Some(current) = cache.as_mut() {
                    current.refetched_at = refetched_at;
                }
                return Err(e);
            }
        };
        fresh.refetched_at = refetched_at;
        let found = select_key(&fresh.keys, kid).map(|jwk| (jwk, fresh.issuer.clone()));
        *cache = Some(fresh);
        found.ok_or_else(|| unknown_key(kid))
    }

    async fn fetch_keys(&self) -> Result<KeyCache, AuthError> {
        let (jwks_uri, issuer) = match &self.config.jwks_uri_override {
            Some(uri) => (uri.clone(), None),
            None => {
                let url = format!(
                    "{}/.well-known/openid-configuration",
                    self.config.authority.trim_end_matches('/')
                );
                let discovery: OidcDiscovery = self.get_json(&url).await?;
                (discovery.jwks_uri, discovery.issuer)
            }
        };
        let keys: JwkSet = self.get_json(&jwks_uri).await?;
        tracing::info!(jwks_uri = %jwks_uri, keys = keys.keys.len(), "fetched signing keys");
        Ok(KeyCache {
            keys,
            issuer,
            refetched_at: None,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AuthError> {
        let fail = |e: reqwest::Error| AuthError::KeySet(format!("{url}: {e}"));
        self.http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fail)?
            .json()
            .await
            .map_err(fail)
    }
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn unknown_key(kid: Option<&str>) -> AuthError {
    AuthError::invalid(format!("unknown signing key {}", kid.unwrap_or("(no kid)")))
}

fn select_key(keys: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => keys.find(kid).cloned(),
        None => match keys.keys.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        },
    }
}

/// Where clients find the metadata document, as seen through this request.
pub fn resource_metadata_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}{PROTECTED_RESOURCE_PATH}")
}

fn unauthorized(metadata_url: &str, error: &AuthError) -> Response {
    let challenge = format!("Bearer resource_metadata=\"{metadata_url}\"");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        axum::Json(json!({
            "error": "invalid_token",
            "error_description": error.to_string(),
        })),
    )
        .into_response()
}

/// axum middleware guarding `/mcp`.
pub async fn auth_middleware(
    State(validator): State<Arc<JwtValidator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let outcome = match extract_bearer_token(&header_value) {
        Ok(token) => validator.validate(token).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "rejected MCP request");
            unauthorized(&resource_metadata_url(request.headers()), &e)
        }
    }
}
