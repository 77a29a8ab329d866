use proptest::prelude::*;

use codeact::batch::{BatchOrchestrator, BatchStatus, SubmitResponse};
use codeact::ops::Operation;
use codeact_test_utils::builders::{BatchRequestBuilder, ConfigBuilder, write_file};
use codeact_test_utils::fake_backend::{ScriptedBackend, Step};

fn ops(n: usize) -> Vec<Operation> {
    (0..n).map(|i| write_file(&format!("f{i}.txt"), "x")).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn first_failure_stops_the_batch(
        (n, k) in (1usize..8).prop_flat_map(|n| (Just(n), 0..n)),
        fail in any::<bool>(),
    ) {
        let cfg = ConfigBuilder::new().build();
        let mut backend = ScriptedBackend::new();
        if fail {
            backend = backend.at(k, Step::Fail("boom".into()));
        }
        let orchestrator = BatchOrchestrator::new(cfg.config.clone(), backend.clone());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let response = rt
            .block_on(orchestrator.submit(BatchRequestBuilder::new(ops(n)).build()))
            .unwrap();
        let SubmitResponse::Sync(snapshot) = response else {
            panic!("sync submission returned an ack");
        };

        let attempted = if fail { k + 1 } else { n };
        prop_assert_eq!(snapshot.operations_total, n);
        prop_assert_eq!(snapshot.operations_completed, attempted);
        prop_assert_eq!(snapshot.results.len(), attempted);
        prop_assert_eq!(backend.executed_indexes(), (0..attempted).collect::<Vec<_>>());
        for (i, result) in snapshot.results.iter().enumerate() {
            prop_assert_eq!(result.operation_index, i);
        }

        if fail {
            prop_assert_eq!(snapshot.status, BatchStatus::Failed);
            prop_assert!(snapshot.results[k].is_error());
            let error = snapshot.error.unwrap_or_default();
            prop_assert!(error.contains("boom"), "error was {}", error);
        } else {
            prop_assert_eq!(snapshot.status, BatchStatus::Completed);
            prop_assert!(snapshot.error.is_none());
        }

        // Sync batches are gone once they return.
        prop_assert_eq!(orchestrator.registered_count(), 0);
    }
}

#[tokio::test]
async fn panicking_operation_is_recorded_as_its_error_result() {
    let cfg = ConfigBuilder::new().build();
    let backend = ScriptedBackend::new().at(1, Step::Panic("backend exploded".into()));
    let orchestrator = BatchOrchestrator::new(cfg.config.clone(), backend.clone());

    let response = orchestrator
        .submit(BatchRequestBuilder::new(ops(3)).build())
        .await
        .unwrap();
    let SubmitResponse::Sync(snapshot) = response else {
        panic!("sync submission returned an ack");
    };

    assert_eq!(snapshot.status, BatchStatus::Failed);
    assert_eq!(snapshot.operations_completed, 2);
    assert_eq!(snapshot.results.len(), 2);
    assert_eq!(backend.executed_indexes(), vec![0, 1]);

    let failed = &snapshot.results[1];
    assert!(failed.is_error());
    assert_eq!(failed.operation_index, 1);
    let message = failed.error.as_deref().unwrap();
    assert!(message.starts_with("Unexpected error: "), "{message}");
    assert!(message.contains("backend exploded"), "{message}");

    let batch_error = snapshot.error.unwrap();
    assert!(batch_error.starts_with("Operation 1 (file_write) failed"), "{batch_error}");
}
