use crate::integration::support::{link_names, Harness, RecordingObjects};
use pinset::store::ObjectStore;
use pinset::types::ContentId;
use pinset::PinsetError;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Publish a bucket holding `a` and leave its graph with the pinning service.
async fn published_bucket(h: &Harness) -> ContentId {
    let a = h.put(b"remote parcel").await;
    let coordinator = h.coordinator().await;
    coordinator.pin_cid("a", &a).await.unwrap();
    coordinator
        .wait_for_idle(Some(Duration::from_secs(60)))
        .await
        .unwrap();
    coordinator.shutdown().await;
    a
}

#[tokio::test(start_paused = true)]
async fn slow_link_lookup_falls_back_to_archive_import() {
    let h = Harness::new();
    let a = published_bucket(&h).await;

    let slow = Arc::new(RecordingObjects::with_slow_lookups(
        1,
        Duration::from_secs(10),
    ));
    let bucket = h.bucket_with_objects(slow.clone());
    let start = Instant::now();
    bucket.fetch_or_provision_bucket(None).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(10));
    assert_eq!(link_names(&bucket), vec!["a"]);
    assert!(bucket.is_queued(&a));
    assert!(bucket.is_pinned(&a));

    let root = bucket.root().unwrap();
    let local = slow.get_links(&root).await.unwrap();
    assert_eq!(local.len(), 1);
    bucket.shutdown().await;
}

#[tokio::test]
async fn missing_local_graph_is_imported() {
    let h = Harness::new();
    published_bucket(&h).await;

    let bucket = h.bucket_with_objects(Arc::new(RecordingObjects::new()));
    bucket.fetch_or_provision_bucket(None).await.unwrap();
    assert_eq!(link_names(&bucket), vec!["a"]);
    bucket.shutdown().await;
}

#[tokio::test]
async fn unresolvable_root_fails_provisioning() {
    let h = Harness::new();
    let a = h.put(b"never submitted").await;
    let bucket = h.bucket();
    bucket.fetch_or_provision_bucket(None).await.unwrap();
    bucket.add_cid("a", &a).await.unwrap();

    let stranger = h.bucket_with_objects(Arc::new(RecordingObjects::new()));
    let result = stranger.fetch_or_provision_bucket(None).await;
    assert!(matches!(result, Err(PinsetError::Store(_))));
    assert!(stranger.root().is_none());
}

#[tokio::test]
async fn removing_unknown_name_leaves_bucket_unchanged() {
    let h = Harness::new();
    let a = h.put(b"kept").await;
    let bucket = h.bucket();
    bucket.fetch_or_provision_bucket(None).await.unwrap();
    bucket.add_cid("a", &a).await.unwrap();
    let root = bucket.root();
    let submits = h.pinning.submits();

    assert!(bucket.remove_cid("ghost").await.is_err());
    assert_eq!(bucket.root(), root);
    assert_eq!(link_names(&bucket), vec!["a"]);
    assert_eq!(h.pinning.submits(), submits);
    bucket.shutdown().await;
}

#[tokio::test]
async fn removal_survives_submission_failure() {
    let h = Harness::new();
    let a = h.put(b"one").await;
    let b = h.put(b"two").await;
    let bucket = h.bucket();
    bucket.fetch_or_provision_bucket(None).await.unwrap();
    bucket.add_cid("a", &a).await.unwrap();
    bucket.add_cid("b", &b).await.unwrap();

    h.pinning.set_fail_submits(true);
    bucket.remove_cid("a").await.unwrap();
    assert_eq!(link_names(&bucket), vec!["b"]);
    assert!(bucket.pinned_links().is_none());
    bucket.shutdown().await;
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize, usize),
    Remove(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, 0..3usize).prop_map(|(name, blob)| Op::Add(name, blob)),
        (0..4usize).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn bucket_matches_sorted_map_model(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new();
            let mut blobs = Vec::new();
            for i in 0..3u8 {
                blobs.push(h.put(&[i; 32]).await);
            }
            let bucket = h.bucket();
            bucket.fetch_or_provision_bucket(None).await.unwrap();
            let mut model: BTreeMap<String, ContentId> = BTreeMap::new();

            for op in &ops {
                match op {
                    Op::Add(name, blob) => {
                        let name = format!("p{}", name);
                        let added = bucket.add_cid(&name, &blobs[*blob]).await.unwrap();
                        prop_assert_eq!(added, !model.contains_key(&name));
                        model.entry(name).or_insert_with(|| blobs[*blob].clone());
                    }
                    Op::Remove(name) => {
                        let name = format!("p{}", name);
                        let result = bucket.remove_cid(&name).await;
                        prop_assert_eq!(result.is_ok(), model.remove(&name).is_some());
                    }
                }

                let queued: Vec<(String, ContentId)> = bucket
                    .queued_links()
                    .unwrap()
                    .iter()
                    .map(|l| (l.name.clone(), l.cid.clone()))
                    .collect();
                let expected: Vec<(String, ContentId)> = model
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                prop_assert_eq!(&queued, &expected);

                let stored = h.objects.get_links(&bucket.root().unwrap()).await.unwrap();
                let stored: Vec<String> = stored.into_iter().map(|l| l.name).collect();
                prop_assert_eq!(stored, model.keys().cloned().collect::<Vec<_>>());
            }
            bucket.shutdown().await;
            Ok(())
        })?;
    }
}
