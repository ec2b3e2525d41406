use std::sync::Arc;
use std::time::Duration;

use jobsync_core::fakes::{ArtifactCall, MemoryArtifactRepository};
use jobsync_core::{
    ArtifactLifecycle, BranchPolicy, DeleteOutcome, GroupId, LifecycleError, NexusParams,
    ProvisionOutcome, RepositoryId, RetryPolicy,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const GROUP: &str = "feature-branches";

fn lifecycle(repo: &Arc<MemoryArtifactRepository>) -> ArtifactLifecycle {
    ArtifactLifecycle::new(
        repo.clone(),
        NexusParams {
            base_url: "http://nexus.example.com/nexus".to_string(),
            group_id: GroupId::new(GROUP),
        },
        BranchPolicy::parse("feature/,hotfix/"),
    )
}

#[tokio::test]
async fn test_provision_creates_and_joins_group() {
    let repo = Arc::new(MemoryArtifactRepository::new().with_group(GROUP, &["other"]));
    let outcome = lifecycle(&repo)
        .on_job_created("PRJ", "APP", "feature/1")
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ProvisionOutcome::Provisioned {
            repository_id: RepositoryId::new("PRJ.APP.feature_1"),
            created: true,
            joined_group: true,
        }
    );
    assert!(repo.contains("PRJ.APP.feature_1"));
    assert_eq!(
        repo.members(GROUP),
        vec![RepositoryId::new("other"), RepositoryId::new("PRJ.APP.feature_1")]
    );
}

#[tokio::test]
async fn test_second_provision_issues_no_mutating_calls() {
    let repo = Arc::new(MemoryArtifactRepository::new());
    let lc = lifecycle(&repo);
    lc.on_job_created("proj", "lib", "feature/1").await.unwrap();

    repo.clear_calls();
    let outcome = lc.on_job_created("proj", "lib", "feature/1").await.unwrap();

    assert_eq!(
        outcome,
        ProvisionOutcome::Provisioned {
            repository_id: RepositoryId::new("proj.lib.feature_1"),
            created: false,
            joined_group: false,
        }
    );
    assert!(repo.mutating_calls().is_empty(), "{:?}", repo.calls());
    assert_eq!(
        repo.calls(),
        vec![
            ArtifactCall::Exists(RepositoryId::new("proj.lib.feature_1")),
            ArtifactCall::Group(GroupId::new(GROUP)),
        ]
    );
}

#[tokio::test]
async fn test_existing_repository_still_joins_group() {
    let repo = Arc::new(MemoryArtifactRepository::new().with_repository("proj.lib.feature_1"));
    let outcome = lifecycle(&repo)
        .on_job_created("proj", "lib", "feature/1")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProvisionOutcome::Provisioned { created: false, joined_group: true, .. }
    ));
    assert!(!repo
        .calls()
        .iter()
        .any(|c| matches!(c, ArtifactCall::Create(_))));
}

#[tokio::test]
async fn test_non_feature_branches_are_left_alone() {
    let repo = Arc::new(MemoryArtifactRepository::new());
    let lc = lifecycle(&repo);
    for branch in ["develop", "origin/develop", "master", "origin/feature/*"] {
        assert_eq!(
            lc.on_job_created("proj", "lib", branch).await.unwrap(),
            ProvisionOutcome::SkippedNonFeature
        );
        assert_eq!(
            lc.on_job_deleted("proj", "lib", branch).await.unwrap(),
            DeleteOutcome::SkippedNonFeature
        );
    }
    assert!(repo.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_settle_wait_polls_until_visible() {
    let repo = Arc::new(MemoryArtifactRepository::new().with_settle_lag(3));
    let lc = lifecycle(&repo).with_retry(RetryPolicy::new(1, 0), RetryPolicy::new(5, 2_000));

    let start = Instant::now();
    let outcome = lc.on_job_created("proj", "lib", "feature/slow").await.unwrap();
    assert!(matches!(outcome, ProvisionOutcome::Provisioned { created: true, joined_group: true, .. }));

    // Initial check, then polls 1..=4 with backoff 0s, 2s, 4s, 8s.
    assert_eq!(start.elapsed(), Duration::from_secs(14));
    let exists_calls = repo
        .calls()
        .iter()
        .filter(|c| matches!(c, ArtifactCall::Exists(_)))
        .count();
    assert_eq!(exists_calls, 5);
}

#[tokio::test(start_paused = true)]
async fn test_settle_wait_exhaustion_is_not_settled() {
    let repo = Arc::new(
        MemoryArtifactRepository::new()
            .with_settle_lag(100)
            .with_group(GROUP, &[]),
    );
    let lc = lifecycle(&repo).with_retry(RetryPolicy::new(1, 0), RetryPolicy::new(3, 10));

    let err = lc.on_job_created("proj", "lib", "feature/never").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotSettled { ref repository_id } if repository_id == "proj.lib.feature_never"));
    // Short-circuited before the group step.
    assert!(repo.members(GROUP).is_empty());
    assert!(!repo.calls().iter().any(|c| matches!(c, ArtifactCall::Group(_))));
}

#[tokio::test]
async fn test_create_failure_rechecks_existence() {
    let repo = Arc::new(MemoryArtifactRepository::new());
    repo.fail_permanently("create");
    let err = lifecycle(&repo)
        .with_retry(RetryPolicy::new(1, 0), RetryPolicy::new(1, 0))
        .on_job_created("proj", "lib", "feature/1")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Remote { step: "create", .. }));
    let exists_calls = repo
        .calls()
        .iter()
        .filter(|c| matches!(c, ArtifactCall::Exists(_)))
        .count();
    assert_eq!(exists_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_group_failure_is_retried() {
    let repo = Arc::new(MemoryArtifactRepository::new());
    repo.fail_transiently("put_group", 2);
    let outcome = lifecycle(&repo)
        .with_retry(RetryPolicy::new(3, 100), RetryPolicy::new(1, 0))
        .on_job_created("proj", "lib", "feature/1")
        .await
        .unwrap();
    assert!(matches!(outcome, ProvisionOutcome::Provisioned { joined_group: true, .. }));
    assert_eq!(repo.members(GROUP), vec![RepositoryId::new("proj.lib.feature_1")]);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let repo = Arc::new(MemoryArtifactRepository::new().with_repository("proj.lib.feature_1"));
    let lc = lifecycle(&repo);
    assert_eq!(
        lc.on_job_deleted("proj", "lib", "origin/feature/1").await.unwrap(),
        DeleteOutcome::Deleted(RepositoryId::new("proj.lib.feature_1"))
    );
    assert_eq!(
        lc.on_job_deleted("proj", "lib", "feature/1").await.unwrap(),
        DeleteOutcome::AlreadyAbsent(RepositoryId::new("proj.lib.feature_1"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_settle_wait() {
    let repo = Arc::new(MemoryArtifactRepository::new().with_settle_lag(100));
    let cancel = CancellationToken::new();
    let lc = lifecycle(&repo)
        .with_retry(RetryPolicy::new(1, 0), RetryPolicy::new(10, 60_000))
        .with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        trigger.cancel();
    });

    let err = lc.on_job_created("proj", "lib", "feature/1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Cancelled(_)));
}
