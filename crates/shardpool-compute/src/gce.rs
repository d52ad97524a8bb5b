//! GCE Instance Group Manager REST backends.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::auth::TokenSource;
use crate::{ComputeError, GroupMember, InstanceGroup};

const API_ROOT: &str = "https://compute.googleapis.com/compute/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagerInfo {
    target_size: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedInstanceList {
    #[serde(default)]
    managed_instances: Vec<ManagedInstance>,
}

#[derive(Debug, Deserialize)]
struct ManagedInstance {
    instance: String,
}

/// Shared REST plumbing for both group scopes. The scope path is the
/// piece between the project and the group name:
/// `zones/<zone>` or `regions/<region>`.
struct MigClient {
    http: reqwest::Client,
    token: TokenSource,
    project: String,
    group_url: String,
}

impl MigClient {
    fn new(
        project: &str,
        scope: &str,
        group: &str,
        token: TokenSource,
    ) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token,
            project: project.to_string(),
            group_url: format!("{API_ROOT}/projects/{project}/{scope}/instanceGroupManagers/{group}"),
        })
    }

    async fn get(&self, path: &str, operation: &'static str) -> Result<reqwest::Response, ComputeError> {
        let token = self.token.token().await?;
        let resp = self
            .http
            .get(format!("{}{path}", self.group_url))
            .bearer_auth(token)
            .send()
            .await?;
        check_status(resp, operation).await
    }

    async fn post(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
        operation: &'static str,
    ) -> Result<reqwest::Response, ComputeError> {
        let token = self.token.token().await?;
        let mut req = self
            .http
            .post(format!("{}{path}", self.group_url))
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        check_status(req.send().await?, operation).await
    }

    async fn target_size(&self) -> Result<u32, ComputeError> {
        let info: ManagerInfo = self.get("", "get").await?.json().await?;
        Ok(info.target_size)
    }

    async fn resize(&self, size: u32) -> Result<(), ComputeError> {
        self.post(&format!("/resize?size={size}"), None, "resize")
            .await?;
        info!(size, "resized instance group");
        Ok(())
    }

    async fn list_instance_urls(&self) -> Result<Vec<String>, ComputeError> {
        let list: ManagedInstanceList = self
            .post("/listManagedInstances", None, "listManagedInstances")
            .await?
            .json()
            .await?;
        Ok(list.managed_instances.into_iter().map(|m| m.instance).collect())
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<(), ComputeError> {
        let instance_url = format!("projects/{}/zones/{zone}/instances/{name}", self.project);
        self.post(
            "/deleteInstances",
            Some(json!({ "instances": [instance_url] })),
            "deleteInstances",
        )
        .await?;
        info!(instance = name, zone, "deleted instance from group");
        Ok(())
    }
}

async fn check_status(
    resp: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, ComputeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(ComputeError::Status {
        operation,
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    })
}

/// Last path segment of an instance resource URL — the instance name.
fn name_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or_default().to_string()
}

/// Zone segment of an instance resource URL
/// (`.../zones/<zone>/instances/<name>`).
fn zone_from_url(url: &str) -> String {
    let parts: Vec<&str> = url.split('/').collect();
    if parts.len() >= 3 {
        parts[parts.len() - 3].to_string()
    } else {
        String::new()
    }
}

/// Managed instance group pinned to one zone. All members share the
/// configured zone.
pub struct ZonalGroup {
    client: MigClient,
    zone: String,
}

impl ZonalGroup {
    pub fn new(
        project: &str,
        zone: &str,
        group: &str,
        token: TokenSource,
    ) -> Result<Self, ComputeError> {
        Ok(Self {
            client: MigClient::new(project, &format!("zones/{zone}"), group, token)?,
            zone: zone.to_string(),
        })
    }
}

impl InstanceGroup for ZonalGroup {
    async fn get_target_size(&self) -> Result<u32, ComputeError> {
        self.client.target_size().await
    }

    async fn resize(&self, size: u32) -> Result<(), ComputeError> {
        self.client.resize(size).await
    }

    async fn list_members(&self) -> Result<Vec<GroupMember>, ComputeError> {
        let urls = self.client.list_instance_urls().await?;
        debug!(count = urls.len(), "listed group members");
        Ok(urls
            .iter()
            .map(|url| GroupMember {
                name: name_from_url(url),
                zone: self.zone.clone(),
            })
            .collect())
    }

    async fn delete_member(&self, member: &GroupMember) -> Result<(), ComputeError> {
        self.client.delete_instance(&member.zone, &member.name).await
    }
}

/// Managed instance group spread across a region. Each member's zone
/// is resolved from its instance resource URL.
pub struct RegionalGroup {
    client: MigClient,
}

impl RegionalGroup {
    pub fn new(
        project: &str,
        region: &str,
        group: &str,
        token: TokenSource,
    ) -> Result<Self, ComputeError> {
        Ok(Self {
            client: MigClient::new(project, &format!("regions/{region}"), group, token)?,
        })
    }
}

impl InstanceGroup for RegionalGroup {
    async fn get_target_size(&self) -> Result<u32, ComputeError> {
        self.client.target_size().await
    }

    async fn resize(&self, size: u32) -> Result<(), ComputeError> {
        self.client.resize(size).await
    }

    async fn list_members(&self) -> Result<Vec<GroupMember>, ComputeError> {
        let urls = self.client.list_instance_urls().await?;
        debug!(count = urls.len(), "listed group members");
        Ok(urls
            .iter()
            .map(|url| GroupMember {
                name: name_from_url(url),
                zone: zone_from_url(url),
            })
            .collect())
    }

    async fn delete_member(&self, member: &GroupMember) -> Result<(), ComputeError> {
        self.client.delete_instance(&member.zone, &member.name).await
    }
}
