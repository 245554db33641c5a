//! HTTP remote client
//!
//! [`RemoteClient`] over the platform REST API. Upserts follow the
//! find-then-write protocol:
//!
//! 1. `GET /<collection>?filter=<match>` looks for an existing resource
//! 2. match found → `PUT /<collection>/<id>`, otherwise `POST /<collection>`
//!
//! Every request carries the operator API key in `Authorization`. Failed
//! requests become [`RemoteError`]s; retrying is the caller's job.

use super::remote_client::{
    ContainerRef, MatchKey, RemoteClient, RemoteError, RemoteResource, ResourceKind,
    SecondaryResource,
};
use async_trait::async_trait;
use csvl_common::config::RemoteConfig;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

const USER_AGENT: &str = concat!("csvl/", env!("CARGO_PKG_VERSION"));
const PROJECTS_PATH: &str = "projects";

/// Platform REST API client
pub struct HttpRemoteClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, RemoteError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &RemoteConfig, api_key: String) -> Result<Self, RemoteError> {
        Self::new(
            &config.api_url,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.http_client
            .request(method, url)
            .header(AUTHORIZATION, &self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message: api_message(status, &body),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self.send(request).await?;
        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))
    }

    /// Id of the first resource in `collection` matching `filter`
    async fn find_id(&self, collection: &str, filter: &str) -> Result<Option<String>, RemoteError> {
        let request = self
            .request(Method::GET, collection)
            .query(&[("filter", filter)]);
        let matches: Vec<RemoteResource> = self.send_json(request).await?;

        if matches.len() > 1 {
            tracing::warn!(
                collection,
                filter,
                matches = matches.len(),
                "Several resources match, updating the first"
            );
        }

        Ok(matches.into_iter().next().map(|r| r.id))
    }

    async fn upsert_in(
        &self,
        collection: &str,
        body: &Value,
        filter: &str,
    ) -> Result<RemoteResource, RemoteError> {
        match self.find_id(collection, filter).await? {
            Some(id) => {
                tracing::debug!(collection, id = %id, "Updating existing resource");
                let path = format!("{}/{}", collection, id);
                self.send_json(self.request(Method::PUT, &path).json(body)).await
            }
            None => {
                tracing::debug!(collection, filter, "Creating resource");
                self.send_json(self.request(Method::POST, collection).json(body)).await
            }
        }
    }

    async fn write_redirector(
        &self,
        method: Method,
        path: &str,
        payload: &Value,
    ) -> Result<SecondaryResource, RemoteError> {
        let response = self.send(self.request(method, path).json(payload)).await?;
        let body = response.text().await.map_err(transport_error)?;

        if body.trim().is_empty() {
            return Ok(SecondaryResource::default());
        }
        serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn ensure_container(&self, name: &str) -> Result<ContainerRef, RemoteError> {
        let filter = MatchKey::Name(name.to_string()).filter();
        let project = self
            .upsert_in(PROJECTS_PATH, &json!({ "name": name }), &filter)
            .await?;

        tracing::info!(project_id = %project.id, project = name, "Using project");
        Ok(ContainerRef {
            id: project.id,
            name: name.to_string(),
        })
    }

    async fn upsert(
        &self,
        kind: ResourceKind,
        document: &Value,
        key: &MatchKey,
    ) -> Result<RemoteResource, RemoteError> {
        self.upsert_in(kind.collection_path(), document, &key.filter())
            .await
    }

    async fn update_scope(
        &self,
        kind: ResourceKind,
        id: &str,
        container: &ContainerRef,
    ) -> Result<(), RemoteError> {
        let path = format!("{}/{}", kind.collection_path(), id);
        let payload = json!({ "scopes": { "projects": [format!("+{}", container.id)] } });

        self.send(self.request(Method::PUT, &path).json(&payload))
            .await
            .map(|_| ())
    }

    async fn upsert_secondary(
        &self,
        kind: ResourceKind,
        id: &str,
        payload: &Value,
    ) -> Result<SecondaryResource, RemoteError> {
        let path = format!("{}/{}/redirector", kind.collection_path(), id);

        match self.write_redirector(Method::PUT, &path, payload).await {
            Err(RemoteError::Api { status: 404, .. }) => {
                tracing::debug!(id, "No redirector yet, creating one");
                self.write_redirector(Method::POST, &path, payload).await
            }
            other => other,
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.send(self.http_client.get(url)).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout(e.to_string())
    } else if e.is_decode() {
        RemoteError::Parse(e.to_string())
    } else {
        RemoteError::Network(e.to_string())
    }
}

/// Human-readable message from an error response body
///
/// The API answers `{"status":400,"errors":["..."]}`; other bodies are
/// passed through, and an empty body falls back to the status reason.
fn api_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(first) = value
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .and_then(Value::as_str)
        {
            return first.to_string();
        }
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        trimmed.to_string()
    }
}
