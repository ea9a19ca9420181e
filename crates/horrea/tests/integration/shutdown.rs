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

//! Graceful shutdown behavior: rejection of new jobs, draining in-flight
//! blocks within the grace period, and abortion past it.

use std::sync::Arc;
use std::time::Duration;

use horrea::{
    LoadError, LoaderConfig, LoadingService, ReceiptStatus, ServiceStatus, UpdateDescriptor,
};
use serial_test::serial;
use tokio::time::timeout;

use crate::fixtures::{init_logging, MemorySource, RecordingPersister};

#[tokio::test]
async fn test_shutdown_rejects_every_entry_point() {
    init_logging();
    let config = LoaderConfig::builder()
        .shutdown_grace(Duration::from_millis(50))
        .build();
    let service: LoadingService<u64> =
        LoadingService::with_config(config, Arc::new(RecordingPersister::default()));
    service.register_source(Arc::new(MemorySource::new("late", 3)));

    assert_eq!(service.status(), ServiceStatus::Running);
    service.shutdown().await;
    assert_eq!(service.status(), ServiceStatus::ShutDown);

    let err = service.load_all().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot load datasources: loading service has been shut down"
    );

    let err = service
        .load_one(Arc::new(MemorySource::new("late", 3)))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot load a datasource: loading service has been shut down"
    );

    let err = service.load_items(vec![1, 2, 3]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot load data items: loading service has been shut down"
    );

    let err = service
        .update_items(vec![1, 2, 3], UpdateDescriptor::new("noop"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot update data items: loading service has been shut down"
    );

    // a second shutdown only observes already-closed pools
    service.shutdown().await;
    assert_eq!(service.status(), ServiceStatus::ShutDown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_inflight_blocks_drain_within_grace() {
    init_logging();
    let sink = Arc::new(RecordingPersister::default());
    let config = LoaderConfig::builder()
        .block_size(2)
        .shutdown_grace(Duration::from_secs(2))
        .build();
    let service = LoadingService::with_config(config, sink.clone());

    let source =
        MemorySource::new("draining", 4).with_fixed_read_delay(Duration::from_millis(100));
    let receipt = service.load_one(Arc::new(source)).await.unwrap();

    // let both block tasks claim their run slots before closing the pool
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.shutdown().await;

    assert_eq!(service.status(), ServiceStatus::ShutDown);
    timeout(Duration::from_secs(1), receipt.wait_until_completion())
        .await
        .expect("a drained job must not block its waiters")
        .expect("blocks that finish within the grace period must succeed");
    assert!(receipt.is_complete());
    assert_eq!(sink.block_sizes("draining"), vec![2, 2]);
    assert_eq!(sink.items_for("draining"), vec![0, 1, 2, 3]);
    assert_eq!(receipt.status(), ReceiptStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_tasks_beyond_grace_are_aborted_and_waiters_released() {
    init_logging();
    let sink = Arc::new(RecordingPersister::default());
    let config = LoaderConfig::builder()
        .block_size(10)
        .shutdown_grace(Duration::from_millis(50))
        .build();
    let service = LoadingService::with_config(config, sink.clone());

    let source = MemorySource::new("glacier", 5).with_fixed_read_delay(Duration::from_secs(5));
    let receipt = service.load_one(Arc::new(source)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    service.shutdown().await;

    let err = timeout(Duration::from_secs(1), receipt.wait_until_completion())
        .await
        .expect("an aborted job must not block its waiters")
        .unwrap_err();
    match err {
        LoadError::Workload(horrea::WorkloadError::TasksFailed { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].message.contains("aborted during shutdown"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(service.status(), ServiceStatus::ShutDown);
    assert_eq!(receipt.status(), ReceiptStatus::Failed);
    assert!(sink.block_sizes("glacier").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_queued_tasks_beyond_capacity_are_dropped() {
    init_logging();
    let sink = Arc::new(RecordingPersister::default());
    let config = LoaderConfig::builder()
        .block_concurrency(1)
        .block_size(2)
        .shutdown_grace(Duration::from_millis(50))
        .build();
    let service = LoadingService::with_config(config, sink);

    // three blocks against a single run slot: one runs, two queue
    let source =
        MemorySource::new("backlog", 6).with_fixed_read_delay(Duration::from_millis(500));
    let receipt = service.load_one(Arc::new(source)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    service.shutdown().await;

    let err = timeout(Duration::from_secs(1), receipt.wait_until_completion())
        .await
        .expect("dropped tasks must still count toward completion")
        .unwrap_err();
    match err {
        LoadError::Workload(horrea::WorkloadError::TasksFailed { failures, .. }) => {
            assert_eq!(failures.len(), 3);
            let dropped = failures
                .iter()
                .filter(|f| f.message.contains("dropped before start"))
                .count();
            let aborted = failures
                .iter()
                .filter(|f| f.message.contains("aborted during shutdown"))
                .count();
            assert_eq!(dropped, 2);
            assert_eq!(aborted, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(service.status(), ServiceStatus::ShutDown);
}
