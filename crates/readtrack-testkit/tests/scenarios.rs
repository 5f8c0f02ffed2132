//! End-to-end scenarios over a fully wired service.

use std::sync::Arc;

use proptest::prelude::*;
use readtrack::{PolicyViolation, ReceiptConfig, ReceiptEvent, ServiceError};
use readtrack_core::{
    privacy, AuditAction, BatchRequest, ChannelType, PostId, UserId, VisibilityMode,
};
use readtrack_store::{MemoryStore, ReceiptStore, SqliteStore};
use readtrack_testkit::generators::{receipts_for_post, visibility_mode};
use readtrack_testkit::{direct_message_fixture, FlakyStore, ServiceFixture};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn mark_read_twice_keeps_one_row_with_latest_read() -> anyhow::Result<()> {
    init_tracing();
    let (fixture, _dm, post) = direct_message_fixture().await;
    let bob = UserId::new("bob");

    let first = fixture.service.mark_read(&bob, &post, 1000, None).await?;
    assert_eq!(first.read_at, 1000);

    let second = fixture.service.mark_read(&bob, &post, 2000, None).await?;
    assert_eq!(second.read_at, 2000);

    let rows = fixture.store.list_receipts_for_post(&post).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].read_at, 2000);
    Ok(())
}

#[tokio::test]
async fn batch_with_one_public_post_returns_two() -> anyhow::Result<()> {
    init_tracing();
    let fixture = ServiceFixture::new();
    let dm = fixture.channel("dm", ChannelType::Direct);
    let group = fixture.channel("group", ChannelType::Group);
    let town = fixture.channel("town-square", ChannelType::Open);

    let posts = vec![
        fixture.post("p1", &dm, "alice", 1),
        fixture.post("p2", &group, "alice", 1),
        fixture.post("p3", &town, "alice", 1),
    ];

    let user = UserId::new("bob");
    let stored = fixture
        .service
        .mark_read_batch(&user, &BatchRequest::new(posts.clone()).read_at(10))
        .await?;

    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| posts.contains(&r.post_id)));
    assert!(stored.iter().all(|r| r.post_id != PostId::new("p3")));

    // One notification per channel, never split.
    let events = fixture.sink.events();
    assert_eq!(events.len(), 2);
    for event in &events {
        match event {
            ReceiptEvent::PostReadBatch { count, receipts, .. } => {
                assert_eq!(*count, 1);
                assert_eq!(receipts.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    Ok(())
}

#[tokio::test]
async fn summary_two_of_five_is_partially_read() -> anyhow::Result<()> {
    init_tracing();
    let fixture = ServiceFixture::new();
    let group = fixture.channel("group", ChannelType::Group);
    let users = fixture.members(&group, &["a", "b", "c", "d", "e"]).await;
    let post = fixture.post("p1", &group, "a", 1);

    fixture.service.mark_read(&users[1], &post, 100, None).await?;
    fixture.service.mark_read(&users[2], &post, 200, None).await?;
    fixture.service.flush_summaries().await;

    let summary = fixture
        .store
        .get_summary(&post)
        .await?
        .expect("summary written");
    assert_eq!(summary.read_count, 2);
    assert_eq!(summary.total_recipients, 5);
    assert!(summary.partially_read());
    assert!(!summary.all_read());

    let info = fixture.service.get_info(&post, &users[0]).await?;
    assert_eq!(info.read_count, 2);
    assert!(info.partially_read);
    assert!(!info.all_read);
    assert!((info.read_percentage() - 40.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn backfill_respects_last_viewed_at() -> anyhow::Result<()> {
    init_tracing();
    let fixture = ServiceFixture::new();
    let dm = fixture.channel("dm", ChannelType::Direct);
    let member = fixture.member(&dm, "m", 500).await;
    fixture.member(&dm, "author", 0).await;

    let older = fixture.post("older", &dm, "author", 400);
    let newer = fixture.post("newer", &dm, "author", 600);

    let report = fixture.service.backfill_channel(&dm).await?;
    assert_eq!(report.created, 1);
    assert_eq!(report.members_skipped, 1);

    let receipt = fixture
        .store
        .get_receipt(&older, &member)
        .await?
        .expect("backfilled receipt");
    assert_eq!(receipt.read_at, 500);
    assert!(fixture.store.get_receipt(&newer, &member).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn backfill_write_failure_does_not_abort_the_rest() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = ServiceFixture::with_store(store.clone(), ReceiptConfig::default());
    let dm = fixture.channel("dm", ChannelType::Direct);
    let member = fixture.member(&dm, "m", 1000).await;

    let posts = vec![
        fixture.post("p1", &dm, "author", 100),
        fixture.post("p2", &dm, "author", 200),
        fixture.post("p3", &dm, "author", 300),
    ];
    store.fail_receipt_writes_for(&posts[1], &member);

    let report = fixture.service.backfill_channel(&dm).await?;
    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.already_present, 0);

    assert!(store.inner().get_receipt(&posts[0], &member).await?.is_some());
    assert!(store.inner().get_receipt(&posts[1], &member).await?.is_none());
    assert!(store.inner().get_receipt(&posts[2], &member).await?.is_some());

    fixture.service.flush_summaries().await;
    assert!(store.inner().get_summary(&posts[0]).await?.is_some());
    assert!(store.inner().get_summary(&posts[1]).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn deleting_missing_receipt_succeeds() -> anyhow::Result<()> {
    let (fixture, _dm, post) = direct_message_fixture().await;
    let bob = UserId::new("bob");

    fixture.service.delete_receipt(&bob, &post).await?;

    let audit = fixture.service.audit_history(&bob, 0, 0).await?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::PrivacyView);
    Ok(())
}

#[tokio::test]
async fn hidden_receipts_shrink_reported_count() -> anyhow::Result<()> {
    let (fixture, _dm, post) = direct_message_fixture().await;
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    fixture.service.mark_read(&alice, &post, 10, None).await?;
    fixture.service.mark_read(&bob, &post, 20, None).await?;
    fixture.preference(&bob, "show_others_receipts", "none");

    let info = fixture.service.get_info(&post, &bob).await?;
    assert_eq!(info.read_count, 1);
    assert_eq!(info.receipts.len(), 1);
    assert_eq!(info.receipts[0].user_id, bob);
    assert!(info.all_read == (info.read_count >= info.total_users));
    assert!(info.partially_read);
    Ok(())
}

#[tokio::test]
async fn storage_failure_fails_whole_batch() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = ServiceFixture::with_store(store.clone(), ReceiptConfig::default());
    let dm = fixture.channel("dm", ChannelType::Direct);
    let posts = vec![
        fixture.post("p1", &dm, "alice", 1),
        fixture.post("p2", &dm, "alice", 1),
    ];

    store.set_fail_writes(true);
    let err = fixture
        .service
        .mark_read_batch(&UserId::new("bob"), &BatchRequest::new(posts.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Storage(_)));
    assert!(err.is_retryable());

    store.set_fail_writes(false);
    for post in &posts {
        assert!(store.inner().list_receipts_for_post(post).await?.is_empty());
    }
    assert!(fixture.sink.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn summary_refresh_retries_then_succeeds() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = ServiceFixture::with_store(store.clone(), ReceiptConfig::default());
    let dm = fixture.channel("dm", ChannelType::Direct);
    let post = fixture.post("p1", &dm, "alice", 1);

    // Default policy allows three attempts.
    store.fail_next_summary_writes(2);
    fixture
        .service
        .mark_read(&UserId::new("bob"), &post, 100, None)
        .await?;
    fixture.service.flush_summaries().await;

    let summary = store.inner().get_summary(&post).await?;
    assert_eq!(summary.map(|s| s.read_count), Some(1));
    Ok(())
}

#[tokio::test]
async fn summary_refresh_failure_never_reaches_writer() -> anyhow::Result<()> {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let fixture = ServiceFixture::with_store(store.clone(), ReceiptConfig::default());
    let dm = fixture.channel("dm", ChannelType::Direct);
    let post = fixture.post("p1", &dm, "alice", 1);

    store.fail_next_summary_writes(10);
    let receipt = fixture
        .service
        .mark_read(&UserId::new("bob"), &post, 100, None)
        .await?;
    assert_eq!(receipt.read_at, 100);

    fixture.service.flush_summaries().await;
    assert!(store.inner().get_summary(&post).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn opted_out_user_cannot_mark() -> anyhow::Result<()> {
    let (fixture, _dm, post) = direct_message_fixture().await;
    let bob = UserId::new("bob");
    fixture.preference(&bob, "receipt_mode", "disabled");

    let err = fixture
        .service
        .mark_read(&bob, &post, 100, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::PolicyViolation(PolicyViolation::UserOptedOut)
    ));
    assert!(!err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn sqlite_backed_service_persists_across_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("receipts.db");

    {
        let store = Arc::new(SqliteStore::open(&path)?);
        let fixture = ServiceFixture::with_store(store, ReceiptConfig::default());
        let dm = fixture.channel("dm", ChannelType::Direct);
        fixture.members(&dm, &["alice", "bob"]).await;
        let post = fixture.post("p1", &dm, "alice", 1);

        fixture
            .service
            .mark_read(&UserId::new("bob"), &post, 1234, Some("desktop-1"))
            .await?;
        fixture.service.ghost_read(&UserId::new("alice"), &post, None).await?;
        fixture.service.flush_summaries().await;
    }

    let store = SqliteStore::open(&path)?;
    let receipt = store
        .get_receipt(&PostId::new("p1"), &UserId::new("bob"))
        .await?
        .expect("receipt persisted");
    assert_eq!(receipt.read_at, 1234);

    let summary = store
        .get_summary(&PostId::new("p1"))
        .await?
        .expect("summary persisted");
    assert_eq!(summary.read_count, 1);
    assert_eq!(summary.total_recipients, 2);

    let audit = store.list_audit(&UserId::new("alice"), 0, 10).await?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::GhostRead);
    Ok(())
}

#[test]
fn config_loads_from_json() -> anyhow::Result<()> {
    let config: ReceiptConfig = serde_json::from_str(
        r#"{ "enabled": true, "team_channels_eligible": true, "retention_days": 7 }"#,
    )?;
    assert!(config.team_channels_eligible);
    assert_eq!(config.retention_days, 7);
    assert_eq!(config.max_batch_size, 100);
    Ok(())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn batch_result_is_subset_of_request(
        picks in prop::collection::vec((0usize..6, prop::bool::ANY), 1..20)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let fixture = ServiceFixture::new();
            let dm = fixture.channel("dm", ChannelType::Direct);
            let town = fixture.channel("town", ChannelType::Open);

            let mut request_ids = Vec::new();
            for (n, public) in &picks {
                let id = format!("p{}-{}", n, public);
                let channel = if *public { &town } else { &dm };
                request_ids.push(fixture.post(&id, channel, "alice", 1));
            }
            request_ids.push(PostId::new("unknown"));

            let stored = fixture
                .service
                .mark_read_batch(&UserId::new("bob"), &BatchRequest::new(request_ids.clone()))
                .await
                .expect("batch succeeds");

            assert!(stored.len() <= request_ids.len());
            assert!(stored.iter().all(|r| request_ids.contains(&r.post_id)));
            assert!(stored.iter().all(|r| r.channel_id == dm));
        });
    }

    #[test]
    fn repeated_marks_keep_latest(reads in prop::collection::vec(1i64..1_000_000, 1..10)) {
        let rt = runtime();
        rt.block_on(async {
            let (fixture, _dm, post) = direct_message_fixture().await;
            let bob = UserId::new("bob");

            let mut sorted = reads.clone();
            sorted.sort();
            for read_at in &sorted {
                fixture.service.mark_read(&bob, &post, *read_at, None).await.expect("mark");
            }

            let rows = fixture.store.list_receipts_for_post(&post).await.expect("list");
            assert_eq!(rows.len(), 1);
            assert_eq!(Some(rows[0].read_at), sorted.last().copied());
        });
    }

    #[test]
    fn show_none_leaves_at_most_own_receipt(
        receipts in receipts_for_post(PostId::new("p"), 8),
        mode in visibility_mode(),
        viewer in 0u8..8,
    ) {
        let viewer = UserId::new(format!("user{}", viewer));
        let visible = privacy::filter(receipts.clone(), &viewer, mode);
        match mode {
            VisibilityMode::ShowAll => prop_assert_eq!(visible, receipts),
            VisibilityMode::ShowNone => {
                prop_assert!(visible.len() <= 1);
                prop_assert!(visible.iter().all(|r| r.user_id == viewer));
            }
        }
    }
}
