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

//! Receipt lifecycle through the service: composite aggregation, failure
//! reporting modes, status projection, and registry queries.

use std::sync::Arc;
use std::time::Duration;

use horrea::{LoadError, LoaderConfig, LoadingService, ReceiptStatus};
use tokio::time::timeout;

use crate::fixtures::{init_logging, MemorySource, RecordingPersister};

fn service_with(block_size: usize, sink: Arc<RecordingPersister>) -> LoadingService<u64> {
    let config = LoaderConfig::builder().block_size(block_size).build();
    LoadingService::with_config(config, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_composite_completes_only_after_slowest_source() {
    init_logging();
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(10, sink.clone());
    service.register_source(Arc::new(MemorySource::new("fast", 2)));
    service.register_source(Arc::new(
        MemorySource::new("slow", 2).with_fixed_read_delay(Duration::from_millis(200)),
    ));

    let receipt = service.load_all().await.unwrap();

    // the slow read holds the composite open
    assert!(
        timeout(Duration::from_millis(50), receipt.wait_until_completion())
            .await
            .is_err(),
        "composite must not complete while a child is still reading"
    );

    timeout(Duration::from_secs(5), receipt.wait_until_completion())
        .await
        .expect("composite must complete once the slow child does")
        .unwrap();

    assert_eq!(sink.items_for("slow"), vec![0, 1]);
    assert_eq!(receipt.status(), ReceiptStatus::Completed);
}

#[tokio::test]
async fn test_scheduling_failure_rethrown_from_composite() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(10, sink.clone());
    service.register_source(Arc::new(MemorySource::new("alpha", 10)));
    service.register_source(Arc::new(MemorySource::new("omega", 10).broken_count()));

    let receipt = service.load_all().await.unwrap();
    let err = receipt.wait_until_completion().await.unwrap_err();

    match err {
        LoadError::SchedulingFailed { datasource, .. } => assert_eq!(datasource, "omega"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(receipt.captured_failures().len(), 1);

    // the sibling datasource keeps loading independently of the report
    let alpha = receipt
        .children()
        .into_iter()
        .find(|child| child.datasource_name() == "alpha")
        .expect("alpha child receipt");
    alpha.wait_until_completion().await.unwrap();
    let expected: Vec<u64> = (0..10).collect();
    assert_eq!(sink.items_for("alpha"), expected);
    assert_eq!(receipt.status(), ReceiptStatus::Failed);
}

#[tokio::test]
async fn test_capture_mode_records_failures_and_completes() {
    let sink = Arc::new(RecordingPersister::default());
    let config = LoaderConfig::builder()
        .block_size(10)
        .rethrow_child_failures(false)
        .build();
    let service = LoadingService::with_config(config, sink.clone());
    service.register_source(Arc::new(MemorySource::new("alpha", 10)));
    service.register_source(Arc::new(MemorySource::new("omega", 10).broken_count()));

    let receipt = service.load_all().await.unwrap();
    receipt
        .wait_until_completion()
        .await
        .expect("capture mode reports success and records the failures");

    let captured = receipt.captured_failures();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].error.contains("omega"));
    assert_eq!(receipt.status(), ReceiptStatus::Failed);

    let expected: Vec<u64> = (0..10).collect();
    assert_eq!(sink.items_for("alpha"), expected);
}

#[tokio::test]
async fn test_receipt_status_progresses_to_completed() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(10, sink);

    let source = MemorySource::new("steady", 20).with_fixed_read_delay(Duration::from_millis(100));
    let receipt = service.load_one(Arc::new(source)).await.unwrap();

    // the workload starts before the entry point returns
    assert_eq!(receipt.status(), ReceiptStatus::Running);
    assert_eq!(
        service.receipt_status(receipt.id()),
        Some(ReceiptStatus::Running)
    );

    receipt.wait_until_completion().await.unwrap();
    assert_eq!(receipt.status(), ReceiptStatus::Completed);
    assert!(receipt.completed_at().is_some());
    assert_eq!(service.receipt_status(9_999), None);
}

#[tokio::test]
async fn test_scheduling_failure_receipt_raises_immediately() {
    let service = service_with(10, Arc::new(RecordingPersister::default()));

    let receipt = service
        .load_one(Arc::new(MemorySource::new("hopeless", 10).broken_count()))
        .await
        .unwrap();

    let result = timeout(Duration::from_millis(50), receipt.wait_until_completion())
        .await
        .expect("a failed receipt must never block its waiters");
    assert!(matches!(result, Err(LoadError::SchedulingFailed { .. })));
    assert!(receipt.is_complete());
    assert_eq!(receipt.status(), ReceiptStatus::Failed);
}

#[tokio::test]
async fn test_registry_evicts_only_terminal_receipts() {
    let sink = Arc::new(RecordingPersister::default());
    let service = service_with(10, sink);

    let done = service
        .load_one(Arc::new(MemorySource::new("quick", 5)))
        .await
        .unwrap();
    done.wait_until_completion().await.unwrap();

    let slow_source =
        MemorySource::new("dawdler", 5).with_fixed_read_delay(Duration::from_millis(300));
    let pending = service.load_one(Arc::new(slow_source)).await.unwrap();

    assert_eq!(service.registry().len(), 2);
    assert_eq!(service.registry().evict_completed(), 1);
    assert!(service.registry().get(done.id()).is_none());
    assert!(service.registry().get(pending.id()).is_some());

    pending.wait_until_completion().await.unwrap();
    assert_eq!(service.registry().evict_completed(), 1);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_receipt_summary_serializes_for_status_endpoints() {
    let service = service_with(10, Arc::new(RecordingPersister::default()));

    let receipt = service
        .load_one(Arc::new(MemorySource::new("exportable", 5)))
        .await
        .unwrap();
    receipt.wait_until_completion().await.unwrap();

    let summary = serde_json::to_value(receipt.summary()).unwrap();
    assert_eq!(summary["id"], receipt.id());
    assert_eq!(summary["datasource"], "exportable");
    assert_eq!(summary["load_type"], "datasource");
    assert_eq!(summary["status"], "completed");
    assert!(!summary["completed_at"].is_null());

    let rendered = receipt.to_string();
    assert!(rendered.contains("datasource = 'exportable'"));
    assert!(rendered.contains("status = completed"));
}
