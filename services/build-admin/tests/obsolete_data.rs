//! Retention sweeps and deferred index-version deletion.

mod common;

use std::sync::Arc;

use buildadmin_server::cleanup::ObsoleteDataCollector;
use buildadmin_server::job::{JobHandle, MockJob};
use buildadmin_server::registry::JobRegistry;
use buildadmin_server::store::{
    counters_dir, generation_dir, status_path, CoordinationStore, MemoryStore,
};
use chrono::{DateTime, Duration, Utc};

use common::gc_config;

struct Fixture {
    collector: ObsoleteDataCollector,
    registry: Arc<JobRegistry>,
    store: Arc<MemoryStore>,
}

fn fixture(reserve_generations: usize, reserve_indices: usize) -> Fixture {
    let registry = Arc::new(JobRegistry::new());
    let store = Arc::new(MemoryStore::new());
    let collector = ObsoleteDataCollector::new(
        gc_config(reserve_generations, reserve_indices),
        registry.clone(),
        store.clone(),
    );
    Fixture {
        collector,
        registry,
        store,
    }
}

async fn stopped(f: &Fixture, id: &str, stopped_at: DateTime<Utc>) -> Arc<MockJob> {
    let job = Arc::new(MockJob::stopped_at(id, stopped_at));
    let build_id = job.build_id().clone();
    let dir = generation_dir(&build_id);
    f.store.write(&status_path(&build_id), b"{}").await.unwrap();
    f.store
        .write(&format!("{}/docs", counters_dir(&build_id)), b"42")
        .await
        .unwrap();
    f.store.write(&format!("{dir}/config"), b"/c").await.unwrap();
    f.store.write(&format!("{dir}/checkpoint"), b"7").await.unwrap();
    f.registry.insert_history(job.clone());
    job
}

/// Five stopped generations of one family, oldest first.
async fn five_generations(f: &Fixture, now: DateTime<Utc>) -> Vec<Arc<MockJob>> {
    let mut jobs = Vec::new();
    for generation in 1..=5 {
        let at = now - Duration::hours(10 - i64::from(generation));
        jobs.push(stopped(f, &format!("shop:orders:{generation}"), at).await);
    }
    jobs
}

#[tokio::test]
async fn keeps_newest_generations_and_purges_the_rest() {
    let f = fixture(3, 1);
    let now = Utc::now();
    let jobs = five_generations(&f, now).await;

    let index = f.collector.clean_obsolete_index(now).await;
    assert_eq!(index.deleted, 4);
    assert!(!jobs[4].is_index_deleted());

    let metadata = f.collector.clear_stopped_generations(now).await;
    let purged: Vec<String> = metadata.purged.iter().map(ToString::to_string).collect();
    assert_eq!(purged, vec!["shop:orders:1", "shop:orders:2"]);
    assert!(metadata.refused.is_empty());
    assert_eq!(metadata.trimmed, 3);

    for job in &jobs[..2] {
        let build_id = job.build_id();
        assert!(f.registry.get(build_id, true).is_none());
        assert!(!f.store.exists(&status_path(build_id)).await.unwrap());
        assert_eq!(job.counters_cleared(), 1);
    }
    for job in &jobs[2..] {
        let build_id = job.build_id();
        assert!(f.registry.get(build_id, true).is_some());
        let mut children = f.store.list(&generation_dir(build_id)).await.unwrap();
        children.sort();
        assert_eq!(children, vec!["counters", "status"]);
    }
}

#[tokio::test]
async fn metadata_outlives_an_index_that_cannot_be_deleted() {
    let f = fixture(3, 1);
    let now = Utc::now();
    let jobs = five_generations(&f, now).await;
    jobs[0].set_index_deletable(false);

    let index = f.collector.clean_obsolete_index(now).await;
    assert_eq!(index.deleted, 3);
    assert_eq!(index.failed, 1);

    let metadata = f.collector.clear_stopped_generations(now).await;
    assert_eq!(metadata.refused, vec![jobs[0].build_id().clone()]);
    assert_eq!(metadata.purged, vec![jobs[1].build_id().clone()]);
    assert!(f.registry.get(jobs[0].build_id(), true).is_some());
    assert!(f.store.exists(&status_path(jobs[0].build_id())).await.unwrap());

    jobs[0].set_index_deletable(true);
    f.collector.clean_obsolete_index(now).await;
    let metadata = f.collector.clear_stopped_generations(now).await;
    assert_eq!(metadata.purged, vec![jobs[0].build_id().clone()]);
}

#[tokio::test]
async fn families_are_retained_independently() {
    let f = fixture(2, 1);
    let now = Utc::now();
    for generation in 1..=3 {
        let at = now - Duration::minutes(10 - i64::from(generation));
        stopped(&f, &format!("shop:orders:{generation}"), at).await;
        stopped(&f, &format!("shop:users:{generation}"), at).await;
    }

    f.collector.clean_obsolete_index(now).await;
    let metadata = f.collector.clear_stopped_generations(now).await;
    let purged: Vec<String> = metadata.purged.iter().map(ToString::to_string).collect();
    assert_eq!(purged.len(), 2);
    assert!(purged.contains(&"shop:orders:1".to_string()));
    assert!(purged.contains(&"shop:users:1".to_string()));
}

#[tokio::test]
async fn deferred_deletions_run_in_submission_order() {
    let f = fixture(3, 1);
    let job = Arc::new(MockJob::parse("shop:orders:9"));
    f.registry.insert_active(job.clone());

    for version in [5, 3, 8, 1] {
        assert!(f.collector.clean_versions(job.build_id(), "east", version));
    }
    assert_eq!(f.collector.deletions().len(), 4);
    assert!(job.cleaned_versions().is_empty());

    assert_eq!(f.collector.deletions().drain().await, 4);
    let versions: Vec<u64> = job.cleaned_versions().into_iter().map(|(_, v)| v).collect();
    assert_eq!(versions, vec![5, 3, 8, 1]);
    assert!(f.collector.deletions().is_empty());
}

#[tokio::test]
async fn clean_versions_for_unknown_generation_is_rejected() {
    let f = fixture(3, 1);
    let unknown = common::id("shop:orders:404");
    assert!(!f.collector.clean_versions(&unknown, "east", 1));
    assert!(f.collector.deletions().is_empty());
}
