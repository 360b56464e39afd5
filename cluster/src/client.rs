//! Control-plane client
//!
//! [`ControlPlane`] is the narrow HTTP surface the lifecycle manager needs.
//! [`AtlasClient`] implements it against the Atlas Admin API v2.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use unibench_core::cluster::{ClusterError, ClusterSpec};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v2";

/// Versioned media type sent with every request
pub const ATLAS_ACCEPT: &str = "application/vnd.atlas.2023-11-15+json";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Control plane trait
// ============================================================================

/// HTTP operations against a cluster control plane
///
/// Non-success responses surface as [`ClusterError::Api`] with the response
/// body, except where a 404 is part of the contract.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Cluster description; `None` when the cluster does not exist
    async fn get_cluster(&self, name: &str) -> Result<Option<Value>, ClusterError>;

    /// Create a cluster from a full payload
    async fn create_cluster(&self, payload: &Value) -> Result<(), ClusterError>;

    /// Re-apply a full payload to an existing cluster
    async fn modify_cluster(&self, name: &str, payload: &Value) -> Result<(), ClusterError>;

    /// Patch server process arguments
    async fn patch_process_args(&self, name: &str, args: &Value) -> Result<(), ClusterError>;

    /// Delete a cluster; returns `false` when it did not exist
    async fn delete_cluster(&self, name: &str) -> Result<bool, ClusterError>;

    /// All processes in the project
    async fn list_processes(&self) -> Result<Value, ClusterError>;

    /// Process measurements at one-minute granularity
    async fn process_measurements(
        &self,
        process_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ClusterError>;

    /// Data disk measurements at one-minute granularity
    async fn disk_measurements(
        &self,
        process_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ClusterError>;
}

/// Full create/modify payload for a replica set
pub fn cluster_payload(spec: &ClusterSpec) -> Value {
    let autoscaling_off = json!({
        "compute": { "enabled": false, "scaleDownEnabled": false },
        "diskGB": { "enabled": false }
    });
    json!({
        "name": spec.name,
        "backupEnabled": false,
        "biConnector": { "enabled": false, "readPreference": "secondary" },
        "clusterType": "REPLICASET",
        "diskSizeGB": spec.disk_size_gb,
        "diskWarmingMode": "FULLY_WARMED",
        "encryptionAtRestProvider": "NONE",
        "globalClusterSelfManagedSharding": false,
        "mongoDBMajorVersion": spec.major_version,
        "pitEnabled": false,
        "replicationSpecs": [{
            "numShards": 1,
            "zoneName": "Zone 1",
            "regionConfigs": [{
                "electableSpecs": {
                    "diskIOPS": spec.iops,
                    "ebsVolumeType": spec.disk_type,
                    "instanceSize": spec.tier,
                    "nodeCount": spec.node_count
                },
                "priority": 7,
                "providerName": spec.provider,
                "regionName": spec.region,
                "autoScaling": autoscaling_off,
                "analyticsAutoScaling": autoscaling_off,
                "analyticsSpecs": {
                    "nodeCount": 0,
                    "diskIOPS": spec.iops,
                    "ebsVolumeType": spec.disk_type,
                    "instanceSize": spec.tier
                },
                "readOnlySpecs": {
                    "nodeCount": 0,
                    "diskIOPS": spec.iops,
                    "ebsVolumeType": spec.disk_type,
                    "instanceSize": spec.tier
                }
            }]
        }]
    })
}

// ============================================================================
// Configuration
// ============================================================================

/// How requests authenticate
#[derive(Clone, PartialEq, Eq)]
pub enum AtlasCredentials {
    /// Programmatic API key pair
    ApiKey {
        /// Public key, sent as the user name
        public_key: String,
        /// Private key, sent as the password
        private_key: String,
    },
    /// Service-account access token
    Bearer(String),
}

impl std::fmt::Debug for AtlasCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtlasCredentials::ApiKey { public_key, .. } => f
                .debug_struct("ApiKey")
                .field("public_key", public_key)
                .field("private_key", &"<redacted>")
                .finish(),
            AtlasCredentials::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Control-plane connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasConfig {
    /// API root, without trailing slash
    pub base_url: String,
    /// Project (group) id
    pub project_id: String,
    /// Credentials
    pub credentials: AtlasCredentials,
}

impl AtlasConfig {
    /// Settings from `ATLAS_PROJECT_ID`, `ATLAS_ACCESS_TOKEN` or
    /// `ATLAS_PUBLIC_KEY`/`ATLAS_PRIVATE_KEY`, and optionally `ATLAS_BASE_URL`
    pub fn from_env() -> Result<Self, ClusterError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AtlasConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClusterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_id = get("ATLAS_PROJECT_ID")
            .ok_or_else(|| ClusterError::Config("ATLAS_PROJECT_ID is not set".into()))?;

        let credentials = match get("ATLAS_ACCESS_TOKEN") {
            Some(token) => AtlasCredentials::Bearer(token),
            None => match (get("ATLAS_PUBLIC_KEY"), get("ATLAS_PRIVATE_KEY")) {
                (Some(public_key), Some(private_key)) => AtlasCredentials::ApiKey {
                    public_key,
                    private_key,
                },
                _ => {
                    return Err(ClusterError::Config(
                        "set ATLAS_ACCESS_TOKEN or both ATLAS_PUBLIC_KEY and ATLAS_PRIVATE_KEY"
                            .into(),
                    ))
                }
            },
        };

        let base_url = get("ATLAS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self::new(base_url, project_id, credentials))
    }

    /// Settings with an explicit root URL
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        credentials: AtlasCredentials,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            project_id: project_id.into(),
            credentials,
        }
    }
}

// ============================================================================
// Atlas client
// ============================================================================

/// Atlas Admin API client
pub struct AtlasClient {
    config: AtlasConfig,
    client: Client,
}

impl AtlasClient {
    /// Create a client
    pub fn new(config: AtlasConfig) -> Result<Self, ClusterError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    fn group_url(&self) -> String {
        format!("{}/groups/{}", self.config.base_url, self.config.project_id)
    }

    fn clusters_url(&self) -> String {
        format!("{}/clusters", self.group_url())
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static(ATLAS_ACCEPT));
        match &self.config.credentials {
            AtlasCredentials::ApiKey {
                public_key,
                private_key,
            } => builder.basic_auth(public_key, Some(private_key)),
            AtlasCredentials::Bearer(token) => builder.bearer_auth(token),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String), ClusterError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn send_expect_success(&self, builder: RequestBuilder) -> Result<String, ClusterError> {
        let (status, body) = self.send(builder).await?;
        check_status(status, body)
    }

    async fn measurements(
        &self,
        url: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ClusterError> {
        let builder = self.request(Method::GET, url).query(&[
            ("granularity", "PT1M".to_string()),
            ("start", format_instant(start)),
            ("end", format_instant(end)),
        ]);
        let body = self.send_expect_success(builder).await?;
        parse_body(&body)
    }
}

impl std::fmt::Debug for AtlasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasClient")
            .field("base_url", &self.config.base_url)
            .field("project_id", &self.config.project_id)
            .finish()
    }
}

fn check_status(status: StatusCode, body: String) -> Result<String, ClusterError> {
    if status.is_success() {
        Ok(body)
    } else {
        Err(ClusterError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_body(body: &str) -> Result<Value, ClusterError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| ClusterError::Decode(e.to_string()))
}

fn format_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ControlPlane for AtlasClient {
    async fn get_cluster(&self, name: &str) -> Result<Option<Value>, ClusterError> {
        let url = format!("{}/{}", self.clusters_url(), name);
        let (status, body) = self.send(self.request(Method::GET, url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check_status(status, body)?;
        parse_body(&body).map(Some)
    }

    async fn create_cluster(&self, payload: &Value) -> Result<(), ClusterError> {
        let builder = self.request(Method::POST, self.clusters_url()).json(payload);
        let body = self.send_expect_success(builder).await?;
        tracing::debug!(response = %body, "Cluster create accepted");
        Ok(())
    }

    async fn modify_cluster(&self, name: &str, payload: &Value) -> Result<(), ClusterError> {
        let url = format!("{}/{}", self.clusters_url(), name);
        let builder = self.request(Method::PATCH, url).json(payload);
        let body = self.send_expect_success(builder).await?;
        tracing::debug!(cluster = name, response = %body, "Cluster modify accepted");
        Ok(())
    }

    async fn patch_process_args(&self, name: &str, args: &Value) -> Result<(), ClusterError> {
        let url = format!("{}/{}/processArgs", self.clusters_url(), name);
        let builder = self.request(Method::PATCH, url).json(args);
        self.send_expect_success(builder).await?;
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<bool, ClusterError> {
        let url = format!("{}/{}", self.clusters_url(), name);
        let (status, body) = self.send(self.request(Method::DELETE, url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(status, body)?;
        Ok(true)
    }

    async fn list_processes(&self) -> Result<Value, ClusterError> {
        let url = format!("{}/processes", self.group_url());
        let body = self
            .send_expect_success(self.request(Method::GET, url))
            .await?;
        parse_body(&body)
    }

    async fn process_measurements(
        &self,
        process_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ClusterError> {
        let url = format!("{}/processes/{}/measurements", self.group_url(), process_id);
        self.measurements(url, start, end).await
    }

    async fn disk_measurements(
        &self,
        process_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ClusterError> {
        let url = format!(
            "{}/processes/{}/disks/data/measurements",
            self.group_url(),
            process_id
        );
        self.measurements(url, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::mpsc;
    use std::thread;
    use tiny_http::{Header, Response, Server};

    /// What the test server saw
    #[derive(Debug)]
    struct Seen {
        method: String,
        url: String,
        accept: Option<String>,
        authorization: Option<String>,
        body: String,
    }

    /// Serve one canned response per request, in order
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::Receiver<Seen>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let header = |name: &str| {
                    request
                        .headers()
                        .iter()
                        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                        .map(|h| h.value.as_str().to_string())
                };
                let accept = header("Accept");
                let authorization = header("Authorization");
                let mut content = String::new();
                let _ = request.as_reader().read_to_string(&mut content);
                let _ = tx.send(Seen {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    accept,
                    authorization,
                    body: content,
                });
                let response = Response::from_string(body)
                    .with_status_code(status)
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").unwrap(),
                    );
                let _ = request.respond(response);
            }
        });
        (format!("http://{addr}"), rx)
    }

    fn client(base_url: &str) -> AtlasClient {
        AtlasClient::new(AtlasConfig::new(
            base_url,
            "proj",
            AtlasCredentials::Bearer("token".into()),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_cluster_maps_404_to_none() {
        let (url, seen) = serve(vec![(404, r#"{"error":404}"#)]);
        let result = client(&url).get_cluster("bench").await.unwrap();

        assert!(result.is_none());
        let req = seen.recv().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "/groups/proj/clusters/bench");
        assert_eq!(req.accept.as_deref(), Some(ATLAS_ACCEPT));
        assert_eq!(req.authorization.as_deref(), Some("Bearer token"));
    }

    #[tokio::test]
    async fn test_get_cluster_returns_description() {
        let (url, _seen) = serve(vec![(200, r#"{"name":"bench","stateName":"IDLE"}"#)]);
        let result = client(&url).get_cluster("bench").await.unwrap().unwrap();

        assert_eq!(result["stateName"], "IDLE");
    }

    #[tokio::test]
    async fn test_api_error_carries_body() {
        let (url, _seen) = serve(vec![(409, r#"{"errorCode":"CLUSTER_ALREADY_EXISTS"}"#)]);
        let err = client(&url)
            .create_cluster(&json!({"name": "bench"}))
            .await
            .unwrap_err();

        match err {
            ClusterError::Api { status, body } => {
                assert_eq!(status, 409);
                assert!(body.contains("CLUSTER_ALREADY_EXISTS"));
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_modify_is_patch_with_payload() {
        let (url, seen) = serve(vec![(200, "{}")]);
        let spec = ClusterSpec::new("bench", "M40");
        client(&url)
            .modify_cluster("bench", &cluster_payload(&spec))
            .await
            .unwrap();

        let req = seen.recv().unwrap();
        assert_eq!(req.method, "PATCH");
        assert_eq!(req.url, "/groups/proj/clusters/bench");
        let body: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(
            body["replicationSpecs"][0]["regionConfigs"][0]["electableSpecs"]["instanceSize"],
            "M40"
        );
    }

    #[tokio::test]
    async fn test_delete_404_is_not_an_error() {
        let (url, _seen) = serve(vec![(404, "{}"), (202, "{}")]);
        let c = client(&url);

        assert!(!c.delete_cluster("bench").await.unwrap());
        assert!(c.delete_cluster("bench").await.unwrap());
    }

    #[tokio::test]
    async fn test_measurements_query() {
        let (url, seen) = serve(vec![(200, r#"{"measurements":[]}"#)]);
        let start = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2025-01-01T00:10:00Z")
            .unwrap()
            .with_timezone(&Utc);

        client(&url)
            .disk_measurements("host:27017", start, end)
            .await
            .unwrap();

        let req = seen.recv().unwrap();
        let (path, query) = req.url.split_once('?').unwrap();
        assert_eq!(path, "/groups/proj/processes/host:27017/disks/data/measurements");
        let params: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|kv| kv.split_once('='))
            .collect();
        assert_eq!(params["granularity"], "PT1M");
        assert_eq!(params["start"], "2025-01-01T00%3A00%3A00Z");
    }

    #[test]
    fn test_payload_shape() {
        let mut spec = ClusterSpec::new("bench", "M30");
        spec.iops = 6000;
        let payload = cluster_payload(&spec);

        assert_eq!(payload["clusterType"], "REPLICASET");
        assert_eq!(payload["diskSizeGB"], 60);
        assert_eq!(payload["mongoDBMajorVersion"], "8.0");
        let region = &payload["replicationSpecs"][0]["regionConfigs"][0];
        assert_eq!(region["electableSpecs"]["diskIOPS"], 6000);
        assert_eq!(region["electableSpecs"]["nodeCount"], 3);
        assert_eq!(region["regionName"], "EU_WEST_1");
        assert_eq!(region["priority"], 7);
    }

    #[test]
    fn test_config_from_lookup_prefers_token() {
        let vars: HashMap<&str, &str> = [
            ("ATLAS_PROJECT_ID", "proj"),
            ("ATLAS_ACCESS_TOKEN", "tok"),
            ("ATLAS_PUBLIC_KEY", "pub"),
            ("ATLAS_PRIVATE_KEY", "priv"),
        ]
        .into_iter()
        .collect();
        let config = AtlasConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.credentials, AtlasCredentials::Bearer("tok".into()));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_config_from_lookup_requires_credentials() {
        let err = AtlasConfig::from_lookup(|k| (k == "ATLAS_PROJECT_ID").then(|| "p".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));

        let err = AtlasConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("ATLAS_PROJECT_ID"));
    }

    #[test]
    fn test_config_trims_base_url() {
        let config = AtlasConfig::new(
            "http://localhost:8080/api/",
            "p",
            AtlasCredentials::ApiKey {
                public_key: "pub".into(),
                private_key: "secret".into(),
            },
        );
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert!(!format!("{:?}", config.credentials).contains("secret"));
    }
}
