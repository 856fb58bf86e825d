//! Digital Twins REST backend
//!
//! Talks to the twin service data plane with a pre-acquired bearer token.
//! Token acquisition is left to the caller.

use crate::entity::{ConcurrencyToken, EntitySnapshot, StoredModel};
use crate::error::StoreError;
use crate::query::EntityQuery;
use crate::EntityStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use twinsync_model::PatchOperation;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_API_VERSION: &str = "2023-10-31";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStoreConfig {
    /// Instance URL, e.g. `https://plant.api.weu.digitaltwins.azure.net`.
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub bearer_token: Option<String>,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bearer_token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HttpStoreConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Load from `TWINSYNC_STORE_*` environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("TWINSYNC_STORE_ENDPOINT")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| StoreError::Config("TWINSYNC_STORE_ENDPOINT is not set".into()))?;

        let mut config = Self::new(endpoint.trim());
        config.bearer_token = lookup("TWINSYNC_STORE_TOKEN").filter(|token| !token.is_empty());
        if let Some(version) = lookup("TWINSYNC_STORE_API_VERSION") {
            config.api_version = version;
        }
        if let Some(secs) = lookup("TWINSYNC_STORE_TIMEOUT_SECS") {
            config.timeout_secs = secs.trim().parse().map_err(|_| {
                StoreError::Config(format!("TWINSYNC_STORE_TIMEOUT_SECS is not a number: {secs}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|err| StoreError::Config(format!("endpoint {:?}: {err}", self.endpoint)))?;
        if url.cannot_be_a_base() {
            return Err(StoreError::Config(format!(
                "endpoint {:?} is not a base URL",
                self.endpoint
            )));
        }
        if self.api_version.trim().is_empty() {
            return Err(StoreError::Config("api_version must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(StoreError::Config("timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct HttpEntityStore {
    client: Client,
    base: Url,
    config: HttpStoreConfig,
}

impl HttpEntityStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let base = Url::parse(&config.endpoint)
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| StoreError::Config(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        endpoint_url(&self.base, segments, &self.config.api_version)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        Ok(self.authorize(request).send().await?)
    }
}

#[async_trait]
impl EntityStore for HttpEntityStore {
    async fn get_entity(&self, id: &str) -> Result<EntitySnapshot, StoreError> {
        let url = self.url(&["digitaltwins", id])?;
        let response = self.send(self.client.get(url)).await?;
        let response = check_status(response, id).await?;
        let twin: Value = response
            .json()
            .await
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;
        snapshot_from_twin(twin)
    }

    async fn update_entity(
        &self,
        id: &str,
        patch: &[PatchOperation],
        token: &ConcurrencyToken,
    ) -> Result<(), StoreError> {
        let url = self.url(&["digitaltwins", id])?;
        let body = serde_json::to_vec(patch)
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;
        let request = self
            .client
            .patch(url)
            .header("Content-Type", "application/json-patch+json")
            .header("If-Match", token.if_match())
            .body(body);
        let response = self.send(request).await?;
        check_status(response, id).await?;
        Ok(())
    }

    async fn model_documents(&self) -> Result<Vec<StoredModel>, StoreError> {
        let mut url = self.url(&["models"])?;
        url.query_pairs_mut()
            .append_pair("includeModelDefinition", "true");

        let mut models = Vec::new();
        let mut next = Some(url);
        while let Some(page_url) = next.take() {
            let response = self.send(self.client.get(page_url)).await?;
            let response = check_status(response, "models").await?;
            let page: ModelPage = response
                .json()
                .await
                .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;

            for entry in page.value {
                match entry.model {
                    Some(definition) => {
                        models.push(StoredModel::new(entry.id, definition.to_string()))
                    }
                    None => tracing::warn!(model = %entry.id, "model listed without a definition"),
                }
            }
            next = page
                .next_link
                .map(|link| Url::parse(&link))
                .transpose()
                .map_err(|err| StoreError::InvalidResponse(format!("bad nextLink: {err}")))?;
        }
        Ok(models)
    }

    async fn query(&self, query: &EntityQuery) -> Result<Vec<EntitySnapshot>, StoreError> {
        let url = self.url(&["query"])?;
        let text = query.to_query_text();
        tracing::debug!(query = %text, "querying twins");

        let mut snapshots = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut body = serde_json::json!({ "query": text });
            if let Some(token) = &continuation {
                body["continuationToken"] = Value::String(token.clone());
            }
            let response = self.send(self.client.post(url.clone()).json(&body)).await?;
            let response = check_status(response, "query").await?;
            let page: QueryPage = response
                .json()
                .await
                .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;

            for item in page.value {
                snapshots.push(snapshot_from_twin(unwrap_projection(item))?);
            }
            match page.continuation_token {
                Some(token) if !token.is_empty() => continuation = Some(token),
                _ => break,
            }
        }
        Ok(snapshots)
    }
}

// ============================================================================
// Wire helpers
// ============================================================================

#[derive(Debug, Deserialize)]
struct ModelPage {
    #[serde(default)]
    value: Vec<ModelEntry>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    model: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "continuationToken")]
    continuation_token: Option<String>,
}

fn endpoint_url(base: &Url, segments: &[&str], api_version: &str) -> Result<Url, StoreError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StoreError::Config(format!("endpoint {base} is not a base URL")))?
        .pop_if_empty()
        .extend(segments);
    url.query_pairs_mut().append_pair("api-version", api_version);
    Ok(url)
}

async fn check_status(response: Response, id: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_status(status, id, body))
}

fn map_status(status: StatusCode, id: &str, body: String) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound { id: id.to_string() },
        StatusCode::PRECONDITION_FAILED => StoreError::PreconditionFailed { id: id.to_string() },
        StatusCode::BAD_REQUEST => StoreError::Rejected {
            id: id.to_string(),
            message: body,
        },
        other => StoreError::Http {
            status: other.as_u16(),
            body,
        },
    }
}

/// Query results of `SELECT CT ...` arrive wrapped as `{"CT": {...}}`.
fn unwrap_projection(item: Value) -> Value {
    if let Value::Object(fields) = &item {
        if fields.len() == 1 && !fields.contains_key("$dtId") {
            if let Some(inner @ Value::Object(twin)) = fields.values().next() {
                if twin.contains_key("$dtId") {
                    return inner.clone();
                }
            }
        }
    }
    item
}

fn snapshot_from_twin(twin: Value) -> Result<EntitySnapshot, StoreError> {
    let Value::Object(fields) = twin else {
        return Err(StoreError::InvalidResponse("twin is not a JSON object".into()));
    };
    let id = fields
        .get("$dtId")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidResponse("twin has no $dtId".into()))?
        .to_string();
    let etag = fields
        .get("$etag")
        .and_then(Value::as_str)
        .map(str::to_string);
    let schema_id = fields
        .get("$metadata")
        .and_then(|metadata| metadata.get("$model"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let properties: Map<String, Value> = fields
        .into_iter()
        .filter(|(name, _)| !name.starts_with('$'))
        .collect();

    Ok(EntitySnapshot {
        id,
        schema_id,
        etag,
        properties,
    })
}
