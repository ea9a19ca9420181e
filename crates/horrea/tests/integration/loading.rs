/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! End-to-end loading behavior: fan-out coverage, block partitioning,
//! degraded paths, failure isolation, and ambient-context propagation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use horrea::{
    Datasource, LoadError, LoaderConfig, LoadingService, ReceiptStatus, SourceError, WorkloadError,
};
use parking_lot::Mutex;

use crate::fixtures::{init_logging, CountingContext, MemorySource, RecordingPersister};

fn service_with(block_size: usize, sink: Arc<RecordingPersister>) -> LoadingService<u64> {
    let config = LoaderConfig::builder().block_size(block_size).build();
    LoadingService::with_config(config, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_all_completes_cleanly_across_fanout_races() {
    init_logging();

    // a double seal would panic inside a fan-out task and surface as a
    // task failure, so a clean completion also proves single sealing
    for k in [1usize, 3, 10, 50] {
        let sink = Arc::new(RecordingPersister::default());
        let service = service_with(7, sink.clone());

        let mut counts = Vec::new();
        for i in 0..k {
            let count = 10 + (i * 3) % 25;
            counts.push(count);
            service.register_source(Arc::new(
                MemorySource::new(&format!("source-{i}"), count)
                    .with_read_delay(Duration::from_millis(5)),
            ));
        }

        let receipt = service.load_all().await.unwrap();
        receipt.wait_until_completion().await.unwrap();

        assert!(
            receipt.captured_failures().is_empty(),
            "no child may fail with {k} healthy datasources"
        );
        assert_eq!(receipt.status(), ReceiptStatus::Completed);
        // the composite plus one child receipt per datasource
        assert_eq!(service.registry().len(), k + 1);

        for (i, count) in counts.iter().enumerate() {
            let expected: Vec<u64> = (0..*count as u64).collect();
            assert_eq!(
                sink.items_for(&format!("source-{i}")),
                expected,
                "datasource source-{i} must be fully and exactly persisted"
            );
        }
    }
}

#[tokio::test]
async fn test_block_partitioning_matches_plan_end_to_end() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(100_000, sink.clone());

    let receipt = service
        .load_one(Arc::new(MemorySource::new("bulk", 250_000)))
        .await
        .unwrap();
    receipt.wait_until_completion().await.unwrap();

    assert_eq!(sink.block_sizes("bulk"), vec![50_000, 100_000, 100_000]);
    let items = sink.items_for("bulk");
    assert_eq!(items.len(), 250_000);
    assert_eq!(items.first(), Some(&0));
    assert_eq!(items.last(), Some(&249_999));
}

#[tokio::test]
async fn test_global_item_cap_truncates_final_block() {
    let sink = Arc::new(RecordingPersister::default());
    let config = LoaderConfig::builder()
        .block_size(100_000)
        .max_items(120_000)
        .build();
    let service = LoadingService::with_config(config, sink.clone());

    let receipt = service
        .load_one(Arc::new(MemorySource::new("capped", 250_000)))
        .await
        .unwrap();
    receipt.wait_until_completion().await.unwrap();

    assert_eq!(sink.block_sizes("capped"), vec![20_000, 100_000]);
    let items = sink.items_for("capped");
    assert_eq!(items.len(), 120_000);
    assert_eq!(items.last(), Some(&119_999));
}

#[tokio::test]
async fn test_uncountable_source_falls_back_to_single_read() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(1_000, sink.clone());

    let receipt = service
        .load_one(Arc::new(MemorySource::new("opaque", 12_345).uncountable()))
        .await
        .unwrap();
    receipt.wait_until_completion().await.unwrap();

    // block size 1000 would mean 13 blocks; the fallback is one read
    assert_eq!(sink.block_sizes("opaque"), vec![12_345]);
    assert_eq!(receipt.status(), ReceiptStatus::Completed);
}

#[tokio::test]
async fn test_supplementary_artifact_loads_once_per_job() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(10, sink.clone());

    let source = MemorySource::new("annotated", 25).with_supplementary(b"ontology-export");
    let receipt = service.load_one(Arc::new(source)).await.unwrap();
    receipt.wait_until_completion().await.unwrap();

    assert_eq!(sink.block_sizes("annotated"), vec![5, 10, 10]);
    // once per datasource job, never once per block
    assert_eq!(sink.supplement_count("annotated"), 1);
}

#[tokio::test]
async fn test_failing_block_does_not_abort_siblings() {
    init_logging();
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(10, sink.clone());

    let source = MemorySource::new("patchy", 30).failing_at(10);
    let receipt = service.load_one(Arc::new(source)).await.unwrap();

    let err = receipt.wait_until_completion().await.unwrap_err();
    match err {
        LoadError::Workload(WorkloadError::TasksFailed { failures, .. }) => {
            assert_eq!(failures.len(), 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // the two healthy blocks still landed
    assert_eq!(sink.block_sizes("patchy"), vec![10, 10]);
    assert_eq!(receipt.status(), ReceiptStatus::Failed);
}

#[tokio::test]
async fn test_persist_failure_recorded_per_block() {
    let sink = Arc::new(RecordingPersister::default());
    sink.fail_persists_for("rejected");
    let service = service_with(5, sink.clone());

    let receipt = service
        .load_one(Arc::new(MemorySource::new("rejected", 10)))
        .await
        .unwrap();

    let err = receipt.wait_until_completion().await.unwrap_err();
    match err {
        LoadError::Workload(WorkloadError::TasksFailed { failures, .. }) => {
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(sink.block_sizes("rejected").is_empty());
}

#[tokio::test]
async fn test_load_items_partitions_like_a_datasource() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(5, sink.clone());

    let items: Vec<u64> = (0..23).collect();
    let receipt = service
        .load_items_named(items, "inline-batch")
        .await
        .unwrap();
    receipt.wait_until_completion().await.unwrap();

    assert_eq!(sink.block_sizes("inline-batch"), vec![3, 5, 5, 5, 5]);
    let expected: Vec<u64> = (0..23).collect();
    assert_eq!(sink.items_for("inline-batch"), expected);
}

#[tokio::test]
async fn test_update_items_partitions_identically() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(5, sink.clone());

    let items: Vec<u64> = (0..12).collect();
    let receipt = service
        .update_items(items, horrea::UpdateDescriptor::new("retag"))
        .await
        .unwrap();
    receipt.wait_until_completion().await.unwrap();

    assert_eq!(sink.update_sizes(), vec![2, 5, 5]);
}

/// Datasource that records the ambient-context value visible during each
/// read.
struct ProbeSource {
    ctx: Arc<CountingContext>,
    seen: Mutex<Vec<Option<String>>>,
    count: usize,
}

#[async_trait]
impl Datasource<u64> for ProbeSource {
    fn name(&self) -> &str {
        "probe"
    }

    async fn count(&self) -> Result<usize, SourceError> {
        Ok(self.count)
    }

    async fn read_block(&self, limit: usize, offset: usize) -> Result<Vec<u64>, SourceError> {
        self.seen.lock().push(self.ctx.current());
        let end = (offset + limit).min(self.count);
        Ok((offset as u64..end as u64).collect())
    }

    async fn read_all(&self) -> Result<Vec<u64>, SourceError> {
        self.seen.lock().push(self.ctx.current());
        Ok((0..self.count as u64).collect())
    }
}

fn serialized_context_service(
    ctx: Arc<CountingContext>,
    sink: Arc<RecordingPersister>,
) -> LoadingService<u64> {
    // one worker per pool serializes install/clear pairs, so the shared
    // provider state observes one task at a time
    let config = LoaderConfig::builder()
        .source_concurrency(1)
        .block_concurrency(1)
        .block_size(2)
        .build();
    let service = LoadingService::with_config(config, sink);
    service.set_ambient_context(ctx);
    service
}

#[tokio::test]
async fn test_ambient_context_wraps_every_task() {
    let ctx = Arc::new(CountingContext::default());
    let service = serialized_context_service(ctx.clone(), Arc::new(RecordingPersister::default()));

    let probe = Arc::new(ProbeSource {
        ctx: ctx.clone(),
        seen: Mutex::new(Vec::new()),
        count: 6,
    });
    let receipt = service.load_one(probe.clone()).await.unwrap();
    receipt.wait_until_completion().await.unwrap();

    let seen = probe.seen.lock().clone();
    assert_eq!(seen.len(), 3);
    assert!(
        seen.iter()
            .all(|value| value.as_deref() == Some("caller-identity")),
        "the captured context must be visible inside every task body"
    );
    assert_eq!(ctx.installs(), 3);
    assert_eq!(ctx.clears(), 3);
    assert_eq!(ctx.current(), None);
}

#[tokio::test]
async fn test_ambient_context_cleared_when_tasks_fail() {
    let ctx = Arc::new(CountingContext::default());
    let sink = Arc::new(RecordingPersister::default());
    let service = serialized_context_service(ctx.clone(), sink);

    let source = MemorySource::new("half-broken", 4).failing_at(0);
    let receipt = service.load_one(Arc::new(source)).await.unwrap();
    assert!(receipt.wait_until_completion().await.is_err());

    assert_eq!(ctx.installs(), 2);
    assert_eq!(ctx.clears(), 2);
    assert_eq!(ctx.current(), None);
}
