//! Sonatype Nexus 2 REST binding for hosted snapshot repositories and
//! repository groups.

use async_trait::async_trait;
use jobsync_core::{ArtifactRepository, GroupId, RemoteResult, RepositoryGroup, RepositoryId};
use reqwest::{header, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::http::{Response, ServiceClient, WebClientParams};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRepository<'a> {
    id: &'a str,
    name: &'a str,
    content_resource_uri: String,
    provider: &'static str,
    provider_role: &'static str,
    format: &'static str,
    repo_type: &'static str,
    repo_policy: &'static str,
    write_policy: &'static str,
    exposed: bool,
    browseable: bool,
    indexable: bool,
    #[serde(rename = "notFoundCacheTTL")]
    not_found_cache_ttl: u32,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    data: GroupData,
}

#[derive(Debug, Deserialize)]
struct GroupData {
    id: String,
    #[serde(default)]
    repositories: Vec<GroupMember>,
}

#[derive(Debug, Deserialize)]
struct GroupMember {
    id: String,
}

#[derive(Debug, Clone)]
pub struct NexusClient {
    client: ServiceClient,
    base_url: String,
}

impl NexusClient {
    pub fn new(params: &WebClientParams) -> RemoteResult<Self> {
        Ok(Self {
            client: ServiceClient::new(params)?,
            base_url: params.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, method: Method, segments: &[&str], body: Option<Value>) -> RemoteResult<Response> {
        let url = self.client.endpoint(segments)?;
        let mut request = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.client.send(request).await
    }

    /// Raw group document, kept whole so a write preserves every field.
    async fn group_document(&self, id: &GroupId) -> RemoteResult<Value> {
        let response = self
            .send(Method::GET, &["service", "local", "repo_groups", id.as_str()], None)
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.unexpected(&Method::GET));
        }
        response.json()
    }
}

#[async_trait]
impl ArtifactRepository for NexusClient {
    async fn exists(&self, id: &RepositoryId) -> RemoteResult<bool> {
        let response = self
            .send(Method::GET, &["service", "local", "repositories", id.as_str()], None)
            .await?;
        match response.status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.unexpected(&Method::GET)),
        }
    }

    async fn create(&self, id: &RepositoryId) -> RemoteResult<()> {
        let repository = NewRepository {
            id: id.as_str(),
            name: id.as_str(),
            content_resource_uri: format!("{}/content/repositories/{}", self.base_url, id),
            provider: "maven2",
            provider_role: "org.sonatype.nexus.proxy.repository.Repository",
            format: "maven2",
            repo_type: "hosted",
            repo_policy: "SNAPSHOT",
            write_policy: "ALLOW_WRITE",
            exposed: true,
            browseable: true,
            indexable: true,
            not_found_cache_ttl: 1440,
        };
        debug!(repository_id = %id, "creating hosted snapshot repository");
        let response = self
            .send(
                Method::POST,
                &["service", "local", "repositories"],
                Some(json!({ "data": repository })),
            )
            .await?;
        if response.status != StatusCode::CREATED {
            return Err(response.unexpected(&Method::POST));
        }
        Ok(())
    }

    async fn delete(&self, id: &RepositoryId) -> RemoteResult<bool> {
        let response = self
            .send(Method::DELETE, &["service", "local", "repositories", id.as_str()], None)
            .await?;
        match response.status {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.unexpected(&Method::DELETE)),
        }
    }

    async fn group(&self, id: &GroupId) -> RemoteResult<RepositoryGroup> {
        let response = self
            .send(Method::GET, &["service", "local", "repo_groups", id.as_str()], None)
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.unexpected(&Method::GET));
        }
        let envelope: GroupEnvelope = response.json()?;
        Ok(RepositoryGroup {
            id: GroupId::new(envelope.data.id),
            members: envelope
                .data
                .repositories
                .into_iter()
                .map(|m| RepositoryId::new(m.id))
                .collect(),
        })
    }

    /// Rewrite the group's member list, keeping the group's other settings
    /// and the entries of members that stay.
    async fn put_group(&self, id: &GroupId, members: &[RepositoryId]) -> RemoteResult<()> {
        let mut document = self.group_document(id).await?;
        let existing: Vec<Value> = document
            .pointer("/data/repositories")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let repositories: Vec<Value> = members
            .iter()
            .map(|member| {
                existing
                    .iter()
                    .find(|entry| entry.get("id").and_then(Value::as_str) == Some(member.as_str()))
                    .cloned()
                    .unwrap_or_else(|| {
                        json!({
                            "id": member.as_str(),
                            "name": member.as_str(),
                            "resourceURI": format!(
                                "{}/service/local/repo_groups/{}/{}",
                                self.base_url, id, member
                            ),
                        })
                    })
            })
            .collect();

        match document.get_mut("data").and_then(Value::as_object_mut) {
            Some(data) => {
                data.insert("repositories".to_string(), Value::Array(repositories));
            }
            None => {
                document = json!({ "data": { "id": id.as_str(), "repositories": repositories } });
            }
        }

        let response = self
            .send(
                Method::PUT,
                &["service", "local", "repo_groups", id.as_str()],
                Some(document),
            )
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.unexpected(&Method::PUT));
        }
        Ok(())
    }
}
