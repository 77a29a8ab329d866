use std::collections::HashMap;
use std::time::Duration;

use codeact::batch::{AwaitRequest, BatchOrchestrator, BatchStatus, SubmitResponse};
use codeact::errors::CodeactError;
use codeact::ops::Operation;
use codeact_test_utils::builders::{BatchRequestBuilder, ConfigBuilder, write_file};
use codeact_test_utils::fake_backend::{ScriptedBackend, Step};
use codeact_test_utils::{init_tracing, with_timeout};

fn ops(n: usize) -> Vec<Operation> {
    (0..n).map(|i| write_file(&format!("f{i}.txt"), "x")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_keep_independent_results() {
    init_tracing();
    let cfg = ConfigBuilder::new().build();
    let mut backend = ScriptedBackend::new();
    for i in 0..3 {
        backend = backend.at(i, Step::Delay(Duration::from_millis(30)));
    }
    let orchestrator = BatchOrchestrator::new(cfg.config.clone(), backend.clone());

    let mut ids = Vec::new();
    for n in 1..=4 {
        let response = orchestrator
            .submit(BatchRequestBuilder::new(ops(n)).asynchronous().build())
            .await
            .unwrap();
        let SubmitResponse::Async(ack) = response else {
            panic!("expected async ack");
        };
        ids.push((ack.batch_id, n));
        assert!(orchestrator.active_count() <= ids.len());
    }

    for (id, n) in &ids {
        let snapshot = with_timeout(orchestrator.await_batch(AwaitRequest {
            batch_id: id.clone(),
            timeout: None,
            kill_on_timeout: false,
        }))
        .await
        .unwrap();

        assert_eq!(snapshot.status, BatchStatus::Completed);
        assert_eq!(snapshot.operations_total, *n);
        let indexes: Vec<usize> = snapshot.results.iter().map(|r| r.operation_index).collect();
        assert_eq!(indexes, (0..*n).collect::<Vec<_>>());
    }

    // Per batch, dispatch order is strictly sequential.
    let mut per_batch: HashMap<String, Vec<usize>> = HashMap::new();
    for (batch, index) in backend.executed() {
        per_batch.entry(batch).or_default().push(index);
    }
    for (id, n) in &ids {
        assert_eq!(per_batch[id], (0..*n).collect::<Vec<_>>());
    }
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test]
async fn concurrency_limit_rejects_extra_batches() {
    init_tracing();
    let cfg = ConfigBuilder::new().max_concurrent_batches(2).build();
    let backend = ScriptedBackend::new().at(0, Step::UntilCancelled);
    let orchestrator =
        BatchOrchestrator::with_kill_grace(cfg.config.clone(), backend, Duration::from_millis(100));

    for _ in 0..2 {
        orchestrator
            .submit(BatchRequestBuilder::new(ops(1)).asynchronous().build())
            .await
            .unwrap();
    }

    let err = orchestrator
        .submit(BatchRequestBuilder::new(ops(1)).asynchronous().build())
        .await
        .unwrap_err();
    assert!(matches!(err, CodeactError::Validation(msg) if msg.contains("concurrent")));
    assert_eq!(orchestrator.registered_count(), 2);

    with_timeout(orchestrator.kill_all_before_shutdown()).await;
}
