//! Cluster REST operations and the Elasticsearch implementation.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::ClusterError;
use crate::types::{AliasBinding, IndexInfo, ShardPlacement};

/// Dotted settings path of the allocation exclusion list.
const EXCLUDE_SETTING: &str = "cluster.routing.allocation.exclude._name";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The operations the autoscaler needs from the cluster service.
///
/// The drain coordinator and rebalancer are generic over this trait;
/// tests drive them with scripted in-memory implementations.
pub trait ClusterOps {
    /// Node names currently excluded from shard allocation.
    fn get_excluded_names(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, ClusterError>> + Send;

    /// Replace the exclusion list.
    fn set_excluded_names(
        &self,
        names: &[String],
    ) -> impl std::future::Future<Output = Result<(), ClusterError>> + Send;

    /// Shard placements, scoped to `indices` when non-empty.
    fn list_shard_placements(
        &self,
        indices: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<ShardPlacement>, ClusterError>> + Send;

    /// Names of all nodes currently in the cluster.
    fn list_node_names(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, ClusterError>> + Send;

    /// Alias bindings matching the given alias patterns.
    fn resolve_aliases(
        &self,
        patterns: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<AliasBinding>, ClusterError>> + Send;

    /// Index summaries for the given names or patterns.
    fn get_index_info(
        &self,
        patterns: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<IndexInfo>, ClusterError>> + Send;

    /// Set an index's replica count.
    fn set_index_replicas(
        &self,
        index: &str,
        count: u32,
    ) -> impl std::future::Future<Output = Result<(), ClusterError>> + Send;
}

/// Elasticsearch REST implementation of [`ClusterOps`].
pub struct EsCluster {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl EsCluster {
    pub fn new(
        url: &str,
        user: &str,
        password: &str,
        insecure_skip_verify: bool,
    ) -> Result<Self, ClusterError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_auth(self.http.get(format!("{}{path}", self.base_url)))
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_auth(self.http.put(format!("{}{path}", self.base_url)))
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.user.is_empty() {
            req
        } else {
            req.basic_auth(&self.user, Some(&self.password))
        }
    }

    async fn send_checked(
        req: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, ClusterError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(ClusterError::Status {
            operation,
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }

    async fn json_rows<T: serde::de::DeserializeOwned>(
        req: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<Vec<T>, ClusterError> {
        let resp = Self::send_checked(req, operation).await?;
        resp.json().await.map_err(|e| ClusterError::Decode {
            operation,
            message: e.to_string(),
        })
    }
}

/// Pull the comma-joined exclusion value out of the nested settings
/// envelope returned by `GET _cluster/settings`.
fn excluded_from_settings(settings: &Value) -> Vec<String> {
    settings
        .pointer("/persistent/cluster/routing/allocation/exclude/_name")
        .and_then(Value::as_str)
        .map(split_names)
        .unwrap_or_default()
}

fn split_names(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ClusterOps for EsCluster {
    async fn get_excluded_names(&self) -> Result<Vec<String>, ClusterError> {
        let resp = Self::send_checked(self.get("/_cluster/settings"), "get-settings").await?;
        let settings: Value = resp.json().await.map_err(|e| ClusterError::Decode {
            operation: "get-settings",
            message: e.to_string(),
        })?;
        Ok(excluded_from_settings(&settings))
    }

    async fn set_excluded_names(&self, names: &[String]) -> Result<(), ClusterError> {
        // An empty list clears the setting with an explicit null.
        let value = if names.is_empty() {
            Value::Null
        } else {
            Value::String(names.join(","))
        };
        let body = json!({ "persistent": { EXCLUDE_SETTING: value } });
        Self::send_checked(self.put("/_cluster/settings").json(&body), "put-settings").await?;
        debug!(excluded = names.len(), "updated allocation exclusion list");
        Ok(())
    }

    async fn list_shard_placements(
        &self,
        indices: &[String],
    ) -> Result<Vec<ShardPlacement>, ClusterError> {
        let path = if indices.is_empty() {
            "/_cat/shards?format=json".to_string()
        } else {
            format!("/_cat/shards/{}?format=json", indices.join(","))
        };
        Self::json_rows(self.get(&path), "cat-shards").await
    }

    async fn list_node_names(&self) -> Result<Vec<String>, ClusterError> {
        #[derive(serde::Deserialize)]
        struct Row {
            name: String,
        }
        let rows: Vec<Row> =
            Self::json_rows(self.get("/_cat/nodes?format=json&h=name"), "cat-nodes").await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    async fn resolve_aliases(&self, patterns: &[String]) -> Result<Vec<AliasBinding>, ClusterError> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!("/_cat/aliases/{}?format=json", patterns.join(","));
        Self::json_rows(self.get(&path), "cat-aliases").await
    }

    async fn get_index_info(&self, patterns: &[String]) -> Result<Vec<IndexInfo>, ClusterError> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!("/_cat/indices/{}?format=json", patterns.join(","));
        Self::json_rows(self.get(&path), "cat-indices").await
    }

    async fn set_index_replicas(&self, index: &str, count: u32) -> Result<(), ClusterError> {
        let body = json!({ "index": { "number_of_replicas": count } });
        Self::send_checked(
            self.put(&format!("/{index}/_settings")).json(&body),
            "put-index-settings",
        )
        .await?;
        debug!(index, replicas = count, "updated index replica count");
        Ok(())
    }
}
