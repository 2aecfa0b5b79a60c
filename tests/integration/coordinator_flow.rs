use crate::integration::support::{link_names, Harness};
use futures::future::join_all;
use pinset::types::ContentId;
use pinset::PinCoordinator;
use std::time::Duration;

async fn idle(coordinator: &PinCoordinator) {
    coordinator
        .wait_for_idle(Some(Duration::from_secs(600)))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn unpin_submits_exactly_once_and_keeps_remaining_links() {
    let h = Harness::new();
    let a = h.put(b"parcel-a").await;
    let b = h.put(b"parcel-b").await;
    let coordinator = h.coordinator().await;

    coordinator.pin_cid("a", &a).await.unwrap();
    coordinator.pin_cid("b", &b).await.unwrap();
    idle(&coordinator).await;

    let before = h.pinning.submits();
    coordinator.unpin_cid("a").await.unwrap();
    assert_eq!(h.pinning.submits(), before + 1);
    idle(&coordinator).await;
    assert_eq!(h.pinning.submits(), before + 1);

    let links = coordinator.bucket().queued_links().unwrap();
    let pairs: Vec<(String, ContentId)> = links
        .iter()
        .map(|l| (l.name.clone(), l.cid.clone()))
        .collect();
    assert_eq!(pairs, vec![("b".to_string(), b.clone())]);
    assert!(coordinator.is_pinned(&b));
    assert!(!coordinator.is_queued(&a));
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_polling_follows_backoff_schedule() {
    let h = Harness::new();
    let a = h.put(b"slow to pin").await;
    let coordinator = h.coordinator().await;
    h.pinning.report_unpinned(2);

    coordinator.pin_cid("a", &a).await.unwrap();
    assert!(coordinator.is_queued(&a));
    assert!(!coordinator.succeeded_pins().contains(&a));
    idle(&coordinator).await;

    let calls = h.pinning.status_calls();
    assert_eq!(calls.len(), 3);
    let first = calls[1] - calls[0];
    let second = calls[2] - calls[1];
    assert!(first >= Duration::from_millis(5000) && first < Duration::from_millis(5100));
    assert!(second >= Duration::from_millis(7500) && second < Duration::from_millis(7600));

    assert!(coordinator.succeeded_pins().contains(&a));
    assert!(coordinator.is_pinned(&a));
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_pins_apply_in_submission_order() {
    let h = Harness::new();
    let mut cids = Vec::new();
    for i in 0..5u8 {
        cids.push(h.put(&[i; 16]).await);
    }
    let names: Vec<String> = (0..5).map(|i| format!("n{}", i)).collect();
    let coordinator = h.coordinator().await;

    let results = join_all(
        names
            .iter()
            .zip(&cids)
            .map(|(name, cid)| coordinator.pin_cid(name, cid)),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let writes = h.objects.directories();
    assert_eq!(writes.len(), 5);
    for (i, (_, written)) in writes.iter().enumerate() {
        assert_eq!(written, &names[..=i].to_vec());
    }
    for pair in writes.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(500));
    }
    assert_eq!(link_names(coordinator.bucket()), names);
    assert_eq!(coordinator.stats().completed, 5);
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_pin_is_reported_and_retry_clears_it() {
    let h = Harness::new();
    let a = h.put(b"flaky").await;
    let coordinator = h.coordinator().await;
    h.pinning.set_fail_submits(true);

    coordinator.pin_cid("a", &a).await.unwrap();
    idle(&coordinator).await;
    assert!(coordinator.failed_pins().contains(&a));
    assert!(coordinator.is_failed(&a));
    assert!(!coordinator.succeeded_pins().contains(&a));
    assert!(coordinator.is_queued(&a));

    assert!(coordinator.retry_pin().await.is_err());
    assert!(coordinator.is_failed(&a));

    h.pinning.set_fail_submits(false);
    coordinator.retry_pin().await.unwrap();
    assert!(coordinator.failed_pins().is_empty());
    assert!(coordinator.succeeded_pins().contains(&a));
    assert!(coordinator.is_pinned(&a));
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repinning_existing_name_pins_again() {
    let h = Harness::new();
    let a = h.put(b"again").await;
    let coordinator = h.coordinator().await;
    h.pinning.set_fail_submits(true);
    coordinator.pin_cid("a", &a).await.unwrap();
    idle(&coordinator).await;
    assert!(coordinator.is_failed(&a));

    h.pinning.set_fail_submits(false);
    let submits = h.pinning.submits();
    let root = coordinator.bucket().root();
    coordinator.pin_cid("a", &a).await.unwrap();
    idle(&coordinator).await;

    assert_eq!(coordinator.bucket().root(), root);
    assert_eq!(h.pinning.submits(), submits + 1);
    assert!(!coordinator.is_failed(&a));
    assert!(coordinator.succeeded_pins().contains(&a));
    assert!(coordinator.is_pinned(&a));
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_check_error_marks_pin_failed() {
    let h = Harness::new();
    let a = h.put(b"bad token").await;
    let coordinator = h.coordinator().await;
    h.pinning.set_fail_status(true);

    coordinator.pin_cid("a", &a).await.unwrap();
    idle(&coordinator).await;

    assert_eq!(h.pinning.status_calls().len(), 1);
    assert!(coordinator.failed_pins().contains(&a));
    assert!(!coordinator.succeeded_pins().contains(&a));
    assert!(!coordinator.is_pinned(&a));

    h.pinning.set_fail_status(false);
    coordinator.retry_pin().await.unwrap();
    assert!(coordinator.succeeded_pins().contains(&a));
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_only_touches_unpinned_content() {
    let h = Harness::new();
    let a = h.put(b"already pinned").await;
    let b = h.put(b"not yet pinned").await;
    let coordinator = h.coordinator().await;
    coordinator.pin_cid("a", &a).await.unwrap();
    idle(&coordinator).await;
    assert!(coordinator.is_pinned(&a));

    h.pinning.set_fail_submits(true);
    coordinator.pin_cid("b", &b).await.unwrap();
    idle(&coordinator).await;
    assert_eq!(coordinator.bucket().unpinned_cids(), vec![b.clone()]);
    assert!(coordinator.is_failed(&b));

    assert!(coordinator.retry_pin().await.is_err());
    assert!(coordinator.is_failed(&b));
    assert!(!coordinator.is_failed(&a));
    assert!(coordinator.is_pinned(&a));

    h.pinning.set_fail_submits(false);
    coordinator.retry_pin().await.unwrap();
    assert!(coordinator.failed_pins().is_empty());
    assert!(coordinator.is_pinned(&a));
    assert!(coordinator.is_pinned(&b));
    assert!(coordinator.succeeded_pins().contains(&b));
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn provisioning_pin_failure_marks_unpinned_content_failed() {
    let h = Harness::new();
    let a = h.put(b"left behind").await;
    h.pinning.set_fail_submits(true);
    {
        let first = h.coordinator().await;
        first.pin_cid("a", &a).await.unwrap();
        idle(&first).await;
        first.shutdown().await;
    }

    let reopened = h.coordinator().await;
    idle(&reopened).await;
    assert!(reopened.is_queued(&a));
    assert!(!reopened.is_pinned(&a));
    assert!(reopened.failed_pins().contains(&a));
    reopened.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reopened_bucket_confirms_already_pinned_root() {
    let h = Harness::new();
    let a = h.put(b"pinned before").await;
    {
        let first = h.coordinator().await;
        first.pin_cid("a", &a).await.unwrap();
        idle(&first).await;
        first.shutdown().await;
    }
    let submits = h.pinning.submits();

    let reopened = h.coordinator().await;
    assert!(reopened.is_pinned(&a));
    idle(&reopened).await;
    assert_eq!(h.pinning.submits(), submits);
    reopened.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn storage_usage_and_limit() {
    let h = Harness::new();
    let blob = h.put(&[9u8; 2048]).await;
    let coordinator = h.coordinator().await;
    assert_eq!(coordinator.storage_limit(), 500_000_000);

    coordinator.pin_cid("one", &blob).await.unwrap();
    coordinator.pin_cid("two", &blob).await.unwrap();

    let used = coordinator.storage_used().unwrap();
    assert!(used > 2048);
    assert!(used < 2 * 2048);
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_publishes_empty_bucket() {
    let h = Harness::new();
    let a = h.put(b"to be cleared").await;
    let coordinator = h.coordinator().await;
    coordinator.pin_cid("a", &a).await.unwrap();
    idle(&coordinator).await;

    coordinator.reset().await.unwrap();
    idle(&coordinator).await;
    assert!(link_names(coordinator.bucket()).is_empty());
    assert!(!coordinator.is_queued(&a));
    coordinator.shutdown().await;

    let reopened = h.coordinator().await;
    assert!(link_names(reopened.bucket()).is_empty());
    assert_eq!(reopened.bucket().root(), coordinator.bucket().root());
    reopened.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_is_ordered_after_earlier_pins() {
    let h = Harness::new();
    let b = h.put(b"queued before reset").await;
    let coordinator = h.coordinator().await;

    let (pinned, reset) = tokio::join!(coordinator.pin_cid("b", &b), coordinator.reset());
    pinned.unwrap();
    reset.unwrap();
    idle(&coordinator).await;

    assert!(!coordinator.is_queued(&b));
    assert!(link_names(coordinator.bucket()).is_empty());
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pin_after_shutdown_is_rejected() {
    let h = Harness::new();
    let a = h.put(b"late").await;
    let coordinator = h.coordinator().await;
    coordinator.shutdown().await;
    assert!(coordinator.pin_cid("a", &a).await.is_err());
}
