//! HTTP client for a Qdrant-compatible vector server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backend::{Distance, Hit, Point, VectorBackend};
use crate::error::VectorError;

/// Configuration for the HTTP vector client.
#[derive(Debug, Clone)]
pub struct VectorClientConfig {
    /// Server base URL (e.g., "http://localhost:6333")
    pub base_url: String,

    /// Timeout for data requests
    pub timeout: Duration,

    /// Timeout for the readiness probe
    pub probe_timeout: Duration,
}

impl VectorClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct AliasesResponse {
    #[serde(default)]
    result: AliasList,
}

#[derive(Debug, Default, Deserialize)]
struct AliasList {
    #[serde(default)]
    aliases: Vec<AliasEntry>,
}

#[derive(Debug, Deserialize)]
struct AliasEntry {
    alias_name: String,
    collection_name: String,
}

/// Qdrant HTTP client.
pub struct QdrantClient {
    client: Client,
    config: VectorClientConfig,
}

impl QdrantClient {
    pub fn new(config: VectorClientConfig) -> Result<Self, VectorError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn status_error(operation: &'static str, response: Response) -> VectorError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        VectorError::Status {
            operation,
            status,
            body,
        }
    }

    async fn post_alias_actions(&self, actions: Value) -> Result<Response, VectorError> {
        Ok(self
            .client
            .post(self.url("/collections/aliases"))
            .json(&json!({ "actions": actions }))
            .send()
            .await?)
    }
}

fn accepted(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 202)
}

#[async_trait]
impl VectorBackend for QdrantClient {
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<(), VectorError> {
        let body = json!({ "vectors": { "size": vector_size, "distance": distance } });
        let response = self
            .client
            .put(self.url(&format!("/collections/{}", name)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if accepted(status) || status == StatusCode::CONFLICT {
            debug!(collection = %name, status = status.as_u16(), "Collection ready");
            return Ok(());
        }
        Err(Self::status_error("create_collection", response).await)
    }

    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<(), VectorError> {
        let response = self
            .client
            .put(self.url(&format!("/collections/{}/points", collection)))
            .query(&[("wait", "true")])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if accepted(response.status()) {
            debug!(collection = %collection, points = points.len(), "Upserted points");
            return Ok(());
        }
        Err(Self::status_error("upsert_points", response).await)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Hit>, VectorError> {
        let body = json!({ "vector": vector, "limit": limit, "with_payload": true });
        let response = self
            .client
            .post(self.url(&format!("/collections/{}/points/search", collection)))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let parsed: SearchResponse = response.json().await?;
                Ok(parsed.result)
            }
            StatusCode::NOT_FOUND => Err(VectorError::CollectionNotFound(collection.to_string())),
            _ => Err(Self::status_error("search", response).await),
        }
    }

    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, VectorError> {
        let response = self
            .client
            .get(self.url("/collections/aliases"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error("list_aliases", response).await);
        }

        let parsed: AliasesResponse = response.json().await?;
        Ok(parsed
            .result
            .aliases
            .into_iter()
            .find(|entry| entry.alias_name == alias)
            .map(|entry| entry.collection_name))
    }

    async fn set_alias(&self, alias: &str, collection: &str) -> Result<(), VectorError> {
        let create = json!({ "create_alias": { "alias_name": alias, "collection_name": collection } });

        let replace = json!([{ "delete_alias": { "alias_name": alias } }, create.clone()]);
        let first = self.post_alias_actions(replace).await?;
        if accepted(first.status()) {
            info!(alias = %alias, collection = %collection, "Alias updated");
            return Ok(());
        }

        // Deleting an alias that does not exist can reject the whole batch
        let first_status = first.status().as_u16();
        let first_body = first.text().await.unwrap_or_default();
        warn!(
            alias = %alias,
            status = first_status,
            "Alias replace rejected, retrying with create only"
        );

        let second = self.post_alias_actions(json!([create])).await?;
        if accepted(second.status()) {
            info!(alias = %alias, collection = %collection, "Alias created");
            return Ok(());
        }
        let second_status = second.status().as_u16();
        let second_body = second.text().await.unwrap_or_default();
        Err(VectorError::Status {
            operation: "set_alias",
            status: second_status,
            body: format!(
                "{} {} / {} {}",
                first_status, first_body, second_status, second_body
            ),
        })
    }

    async fn ready(&self) -> Result<bool, VectorError> {
        let response = self
            .client
            .get(self.url("/readyz"))
            .timeout(self.config.probe_timeout)
            .send()
            .await?;
        Ok(response.status() == StatusCode::OK)
    }
}
