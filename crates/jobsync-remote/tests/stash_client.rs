//! Bitbucket Server binding against a mock server.

use jobsync_core::{RemoteError, Scm};
use jobsync_remote::{StashClient, WebClientParams};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO_PATH: &str = "/rest/api/1.0/projects/PLAT/repos/web";

fn client(server: &MockServer) -> StashClient {
    StashClient::new(&WebClientParams::new(&server.uri(), "bot", "secret")).unwrap()
}

#[tokio::test]
async fn test_repository_ssh_clone_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REPO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "slug": "web",
            "links": {
                "clone": [
                    {"href": "https://stash.example.com/scm/plat/web.git", "name": "http"},
                    {"href": "ssh://git@stash.example.com:7999/plat/web.git", "name": "ssh"}
                ]
            }
        })))
        .mount(&server)
        .await;

    let repo = client(&server).repository("PLAT", "web").await.unwrap();
    assert_eq!(repo.project_key, "PLAT");
    assert_eq!(repo.slug, "web");
    assert_eq!(
        repo.ssh_url.as_deref(),
        Some("ssh://git@stash.example.com:7999/plat/web.git")
    );
}

#[tokio::test]
async fn test_repository_without_ssh_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REPO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"slug": "web"})))
        .mount(&server)
        .await;

    let repo = client(&server).repository("PLAT", "web").await.unwrap();
    assert_eq!(repo.ssh_url, None);
}

#[tokio::test]
async fn test_unknown_repository_is_not_found() {
    let server = MockServer::start().await;
    let err = client(&server).repository("PLAT", "nope").await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 404, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_branches_follow_pages() {
    let server = MockServer::start().await;
    let branches_path = format!("{REPO_PATH}/branches");
    Mock::given(method("GET"))
        .and(path(branches_path.as_str()))
        .and(query_param("start", "0"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{"displayId": "develop"}, {"displayId": "feature/a"}],
            "isLastPage": false,
            "nextPageStart": 2
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(branches_path.as_str()))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{"displayId": "hotfix/b"}],
            "isLastPage": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let branches = client(&server).branches("PLAT", "web").await.unwrap();
    let names: Vec<_> = branches.keys().map(String::as_str).collect();
    assert_eq!(names, ["develop", "feature/a", "hotfix/b"]);
    assert_eq!(branches["feature/a"].display_id, "feature/a");
}

#[tokio::test]
async fn test_branches_stop_when_page_does_not_advance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{REPO_PATH}/branches").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{"displayId": "develop"}],
            "isLastPage": false,
            "nextPageStart": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let branches = client(&server).branches("PLAT", "web").await.unwrap();
    assert_eq!(branches.len(), 1);
}
