//! REST dispatch over reqwest.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use serde_json::{Map, Value as JsonValue};
use url::Url;

use scriptgate_types::{
    ApiConfig, AuthScheme, Credential, DispatchError, FunctionEntry, FunctionTarget, Operation,
    ParamLocation, UpstreamError,
};

use super::{Backend, BoundCall, scalar_text};

static PATH_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{([^}]+)\}").unwrap()
});

/// Dispatches REST operations of one API.
#[derive(Debug, Clone)]
pub struct RestBackend {
    config: Arc<ApiConfig>,
    http: reqwest::Client,
}

impl RestBackend {
    /// Share one `reqwest::Client` across APIs to pool connections.
    pub fn new(config: ApiConfig, http: reqwest::Client) -> Self {
        Self {
            config: Arc::new(config),
            http,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn build_url(
        &self,
        op: &Operation,
        params: &Map<String, JsonValue>,
    ) -> Result<Url, DispatchError> {
        let invalid = |msg: String| DispatchError::InvalidArguments(msg);
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| invalid(format!("invalid base URL '{}': {e}", self.config.base_url)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid(format!("base URL '{}' cannot carry a path", self.config.base_url)))?;
            segments.pop_if_empty();
            for raw in op.path_template.split('/').filter(|s| !s.is_empty()) {
                let segment = PATH_PARAM.replace_all(raw, |caps: &regex::Captures<'_>| {
                    params.get(&caps[1]).map(scalar_text).unwrap_or_default()
                });
                // push() percent-encodes the substituted value.
                segments.push(&segment);
            }
        }

        let query: Vec<(String, String)> = op
            .parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Query)
            .filter_map(|p| params.get(&p.name).map(|v| (p.name.clone(), v)))
            .flat_map(|(name, value)| match value {
                JsonValue::Array(items) => items
                    .iter()
                    .map(|item| (name.clone(), scalar_text(item)))
                    .collect::<Vec<_>>(),
                other => vec![(name, scalar_text(other))],
            })
            .collect();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn apply_credential(
        &self,
        request: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> Result<reqwest::RequestBuilder, DispatchError> {
        let request = match (credential, &self.config.auth_scheme) {
            (Credential::None, _) => request,
            (Credential::Basic { username, password }, _) => {
                request.basic_auth(username, Some(password))
            }
            (Credential::Bearer(secret) | Credential::ApiKey(secret), Some(AuthScheme::ApiKey { header })) => {
                request.header(header_name(header)?, header_value(secret)?)
            }
            (Credential::Bearer(secret) | Credential::ApiKey(secret), Some(AuthScheme::Bearer { header, prefix })) => {
                request.header(header_name(header)?, header_value(&format!("{prefix}{secret}"))?)
            }
            (Credential::Bearer(token), _) => request.bearer_auth(token),
            (Credential::ApiKey(key), _) => request.header("X-API-Key", header_value(key)?),
        };
        Ok(request)
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn invoke(
        &self,
        entry: &FunctionEntry,
        call: BoundCall,
        credential: &Credential,
    ) -> Result<JsonValue, DispatchError> {
        let FunctionTarget::Rest(op) = &entry.target else {
            return Err(DispatchError::UnknownFunction(entry.qualified_name.clone()));
        };

        let BoundCall { mut params, body, .. } = call;
        for param in &op.parameters {
            if let Some(frozen) = &param.frozen_value {
                params.insert(param.name.clone(), JsonValue::String(frozen.clone()));
            }
        }

        let url = self.build_url(op, &params)?;
        let method = reqwest::Method::from_bytes(op.http_method.to_string().as_bytes())
            .map_err(|e| DispatchError::InvalidArguments(e.to_string()))?;
        let mut request = self.http.request(method, url);

        for param in op.parameters.iter().filter(|p| p.location == ParamLocation::Header) {
            if let Some(value) = params.get(&param.name) {
                request = request.header(header_name(&param.name)?, header_value(&scalar_text(value))?);
            }
        }

        let body_fields: Map<String, JsonValue> = op
            .parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Body)
            .filter_map(|p| params.get(&p.name).map(|v| (p.name.clone(), v.clone())))
            .collect();
        match body {
            Some(body) => request = request.json(&body),
            None if !body_fields.is_empty() => request = request.json(&body_fields),
            None => {}
        }

        request = self.apply_credential(request, credential)?;

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::request_failed(e.to_string()))?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::request_failed(e.to_string()))?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "upstream returned error status");
            return Err(UpstreamError::http(status.as_u16(), text).into());
        }

        Ok(decode_body(&text, is_json))
    }
}

fn decode_body(text: &str, is_json: bool) -> JsonValue {
    if text.is_empty() {
        return JsonValue::Null;
    }
    if is_json {
        if let Ok(value) = serde_json::from_str(text) {
            return value;
        }
    }
    JsonValue::String(text.to_string())
}

fn header_name(name: &str) -> Result<HeaderName, DispatchError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| DispatchError::InvalidArguments(format!("invalid header name '{name}': {e}")))
}

fn header_value(value: &str) -> Result<HeaderValue, DispatchError> {
    HeaderValue::from_str(value)
        .map_err(|e| DispatchError::InvalidArguments(format!("invalid header value: {e}")))
}
