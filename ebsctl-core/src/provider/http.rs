//! HTTP/JSON gateway client
//!
//! Resources live under `{endpoint}/regions/{region}/`. Mutating requests
//! carry `dry_run`; a gateway that validated a dry-run request answers with
//! the error code `DryRunOperation`.

use super::{BlockStorage, CreateVolumeRequest, ProviderError, ProviderResult};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use ebsctl_common::{DesiredRunState, Instance, Snapshot, Volume};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DRY_RUN_CODE: &str = "DryRunOperation";

/// Error body returned by the gateway
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct DryRunBody {
    dry_run: bool,
}

#[derive(Serialize)]
struct CreateVolumeBody<'a> {
    #[serde(flatten)]
    request: &'a CreateVolumeRequest,
    dry_run: bool,
}

#[derive(Serialize)]
struct AttachBody<'a> {
    instance_id: &'a str,
    device: &'a str,
    dry_run: bool,
}

#[derive(Serialize)]
struct TagBody<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct CreateSnapshotBody<'a> {
    volume_id: &'a str,
    description: &'a str,
    dry_run: bool,
}

/// Block storage gateway client
#[derive(Clone)]
pub struct HttpBlockStorage {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBlockStorage {
    /// Create a client for the configured endpoint and region
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let mut base_url = Url::parse(&config.endpoint)
            .map_err(|e| ProviderError::Transport(format!("invalid endpoint '{}': {}", config.endpoint, e)))?;
        base_url
            .path_segments_mut()
            .map_err(|_| ProviderError::Transport(format!("endpoint '{}' cannot be a base", config.endpoint)))?
            .pop_if_empty()
            .extend(["regions", config.region.as_str()]);

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Build headers for requests
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    /// Region-scoped URL; every segment is percent-encoded on its own
    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> ProviderResult<Url> {
        // url drops dot segments instead of encoding them
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(ProviderError::Malformed(format!("'{}'", bad)));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Malformed(segments.join("/")))?
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send<T, B>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(segments, query)?;
        let path = segments.join("/");
        tracing::debug!(method = %method, url = %url, "Gateway request");

        let mut request = self.client.request(method, url).headers(self.headers());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Self::handle_response(&path, response).await
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, &str)]) -> ProviderResult<T> {
        self.send::<T, ()>(Method::GET, segments, query, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, segments: &[&str], body: &B) -> ProviderResult<T> {
        self.send(Method::POST, segments, &[], Some(body)).await
    }

    /// Handle API response
    async fn handle_response<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if status.is_success() {
            // Empty bodies stand in for unit responses
            let body = if body.trim().is_empty() { "null" } else { body.as_str() };
            return serde_json::from_str(body)
                .map_err(|e| ProviderError::Transport(format!("invalid response for {}: {}", path, e)));
        }

        Err(Self::classify_error(path, status, &body))
    }

    fn classify_error(path: &str, status: StatusCode, body: &str) -> ProviderError {
        let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();

        match parsed {
            Some(err) if err.code == DRY_RUN_CODE => ProviderError::DryRun,
            Some(err) if err.code.ends_with(".NotFound") => ProviderError::NotFound(err.message),
            Some(err) if err.code.ends_with(".Malformed") || err.code == "InvalidParameterValue" => {
                ProviderError::Malformed(err.message)
            }
            _ if status == StatusCode::NOT_FOUND => ProviderError::NotFound(path.to_string()),
            Some(err) => ProviderError::Api {
                code: err.code,
                message: err.message,
            },
            None => ProviderError::Api {
                code: status.as_u16().to_string(),
                message: body.to_string(),
            },
        }
    }
}

fn dry_run_flag(dry_run: bool) -> &'static str {
    if dry_run {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl BlockStorage for HttpBlockStorage {
    async fn get_instance(&self, id: &str) -> ProviderResult<Instance> {
        self.get(&["instances", id], &[]).await
    }

    async fn find_instance_by_name(&self, name: &str) -> ProviderResult<Instance> {
        let instances: Vec<Instance> = self.get(&["instances"], &[("name", name)]).await?;
        instances
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn set_instance_state(
        &self,
        id: &str,
        state: DesiredRunState,
        dry_run: bool,
    ) -> ProviderResult<()> {
        let action = match state {
            DesiredRunState::Running => "start",
            DesiredRunState::Stopped => "stop",
        };
        self.post(&["instances", id, action], &DryRunBody { dry_run })
            .await
    }

    async fn list_volumes_attached_to(&self, instance_id: &str) -> ProviderResult<Vec<Volume>> {
        self.get(&["volumes"], &[("instance_id", instance_id)]).await
    }

    async fn get_volume(&self, id: &str) -> ProviderResult<Volume> {
        self.get(&["volumes", id], &[]).await
    }

    async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
        dry_run: bool,
    ) -> ProviderResult<Volume> {
        self.post(&["volumes"], &CreateVolumeBody { request, dry_run }).await
    }

    async fn delete_volume(&self, id: &str, dry_run: bool) -> ProviderResult<()> {
        self.send::<(), ()>(
            Method::DELETE,
            &["volumes", id],
            &[("dry_run", dry_run_flag(dry_run))],
            None,
        )
        .await
    }

    async fn attach_volume(
        &self,
        id: &str,
        instance_id: &str,
        device: &str,
        dry_run: bool,
    ) -> ProviderResult<()> {
        self.post(
            &["volumes", id, "attach"],
            &AttachBody {
                instance_id,
                device,
                dry_run,
            },
        )
        .await
    }

    async fn detach_volume(&self, id: &str, dry_run: bool) -> ProviderResult<()> {
        self.post(&["volumes", id, "detach"], &DryRunBody { dry_run })
            .await
    }

    async fn tag_resource(&self, id: &str, key: &str, value: &str) -> ProviderResult<()> {
        self.post(&["tags", id], &TagBody { key, value }).await
    }

    async fn list_snapshots_of(&self, volume_id: &str) -> ProviderResult<Vec<Snapshot>> {
        self.get(&["snapshots"], &[("volume_id", volume_id)]).await
    }

    async fn get_snapshot(&self, id: &str) -> ProviderResult<Snapshot> {
        self.get(&["snapshots", id], &[]).await
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        dry_run: bool,
    ) -> ProviderResult<Snapshot> {
        self.post(
            &["snapshots"],
            &CreateSnapshotBody {
                volume_id,
                description,
                dry_run,
            },
        )
        .await
    }

    async fn delete_snapshot(&self, id: &str, dry_run: bool) -> ProviderResult<()> {
        self.send::<(), ()>(
            Method::DELETE,
            &["snapshots", id],
            &[("dry_run", dry_run_flag(dry_run))],
            None,
        )
        .await
    }
}
