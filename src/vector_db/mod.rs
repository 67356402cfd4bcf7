//! Qdrant vector store adapter.
//!
//! One shared collection holds every tenant's chunks; isolation is enforced
//! by a payload filter on `tenant_id` that every search and delete carries.

use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

pub const COLLECTION_NAME: &str = "minirag_chunks";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A point to upsert: the chunk id doubles as the vector id.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// One search result, highest similarity first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub score: f32,
    pub payload: Value,
}

#[derive(Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
}

impl VectorStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.base_url, COLLECTION_NAME, suffix
        )
    }

    /// Create the chunk collection if it does not exist. Called once at
    /// startup with the dimensionality of the default embedding model.
    pub async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        let response = self
            .client
            .get(self.collection_url(""))
            .timeout(ADMIN_TIMEOUT)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        info!(
            "Creating vector collection {} ({} dims)",
            COLLECTION_NAME, dimensions
        );
        let response = self
            .client
            .put(self.collection_url(""))
            .timeout(ADMIN_TIMEOUT)
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("collection create failed: HTTP {}", response.status());
        }
        Ok(())
    }

    /// Idempotent upsert by point id.
    pub async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id.to_string(),
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>()
        });

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .timeout(ADMIN_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("vector upsert failed: HTTP {}", response.status());
        }
        Ok(())
    }

    /// Search scoped to one tenant and one bot profile. The filter is not
    /// optional; a hit from another tenant must be impossible.
    pub async fn search(
        &self,
        tenant_id: Uuid,
        bot_profile_id: Uuid,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let body = json!({
            "vector": query_vector,
            "limit": top_k,
            "with_payload": true,
            "filter": {
                "must": [
                    { "key": "tenant_id", "match": { "value": tenant_id.to_string() } },
                    { "key": "bot_profile_id", "match": { "value": bot_profile_id.to_string() } }
                ]
            }
        });

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .timeout(SEARCH_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("vector search failed: HTTP {}", response.status());
        }

        let result: Value = response.json().await?;
        let hits = result["result"]
            .as_array()
            .ok_or_else(|| anyhow!("unexpected search response shape"))?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit["id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| anyhow!("search hit without a UUID id"))?;
            let payload = hit["payload"].clone();
            // A hit must never cross tenants, whatever the filter did.
            if payload["tenant_id"].as_str() != Some(tenant_id.to_string().as_str()) {
                warn!("search hit with mismatched tenant payload, dropping");
                continue;
            }
            out.push(SearchHit {
                chunk_id: id,
                score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                payload,
            });
        }
        Ok(out)
    }

    /// Remove every vector tagged with the given source. Used for the
    /// delete-then-insert replacement during ingestion and for source
    /// deletion.
    pub async fn delete_by_source(&self, tenant_id: Uuid, source_id: Uuid) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "tenant_id", "match": { "value": tenant_id.to_string() } },
                    { "key": "source_id", "match": { "value": source_id.to_string() } }
                ]
            }
        });

        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .timeout(ADMIN_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("vector delete failed: HTTP {}", response.status());
        }
        Ok(())
    }

    /// Connectivity probe for the health endpoint.
    pub async fn healthz(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("HTTP {}", response.status());
        }
        Ok(())
    }
}

/// Build the payload stored with every chunk vector.
pub fn chunk_payload(
    tenant_id: Uuid,
    bot_profile_id: Uuid,
    source_id: Uuid,
    document_id: Uuid,
    chunk_id: Uuid,
    ordinal: i32,
    content: &str,
) -> Value {
    json!({
        "tenant_id": tenant_id.to_string(),
        "bot_profile_id": bot_profile_id.to_string(),
        "source_id": source_id.to_string(),
        "document_id": document_id.to_string(),
        "chunk_id": chunk_id.to_string(),
        "ordinal": ordinal,
        "content": content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_payload_fields() {
        let tenant = Uuid::new_v4();
        let chunk = Uuid::new_v4();
        let payload = chunk_payload(
            tenant,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            chunk,
            3,
            "hello",
        );
        assert_eq!(payload["tenant_id"], tenant.to_string());
        assert_eq!(payload["chunk_id"], chunk.to_string());
        assert_eq!(payload["ordinal"], 3);
        assert_eq!(payload["content"], "hello");
    }

    #[test]
    fn test_collection_url_shape() {
        let store = VectorStore::new("http://localhost:6333/");
        assert_eq!(
            store.collection_url("/points/search"),
            "http://localhost:6333/collections/minirag_chunks/points/search"
        );
    }
}
