//! Transient faults below the retry budget are absorbed: the pipeline still
//! reaches its terminal success state.

use std::sync::Arc;
use std::time::Duration;
use treemove::pipeline::{Mode, PipelineOptions, Relocation, RelocationRequest};
use treemove::privileges::PermissionOracle;
use treemove::store::MemoryStore;

fn relocation(store: Arc<MemoryStore>) -> Relocation {
    let oracle = Arc::clone(&store) as Arc<dyn PermissionOracle>;
    // One worker keeps execution in enqueue order, so the injected fault
    // budget is the only source of failures.
    Relocation::new(store, oracle).with_options(PipelineOptions {
        workers: 1,
        retry_attempts: 3,
        retry_delay: Duration::from_millis(2),
        ..PipelineOptions::default()
    })
}

fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_container("/content");
    store.add_container("/content/a");
    store.add_leaf("/content/a/doc1");
    store.add_container("/content/a/sub");
    store.add_leaf("/content/a/sub/doc2");
    store.add_container("/content/b");
    store
}

#[test]
fn transient_create_failures_are_retried() {
    let store = seeded();
    store.fail_next_creates("/content/b/a/sub", 2);

    let report = relocation(Arc::clone(&store))
        .start_work(RelocationRequest::new(
            "/content/a",
            "/content/b",
            "flaky-create",
            Mode::Move,
        ))
        .unwrap()
        .wait();

    assert!(report.is_done(), "failures: {:?}", report.failures);
    assert!(store.contains("/content/b/a/sub/doc2"));
    assert!(!store.contains("/content/a"));
}

#[test]
fn transient_move_failures_are_retried() {
    let store = seeded();
    store.fail_next_moves("/content/b/a/doc1", 2);
    store.fail_next_moves("/content/b/a/sub/doc2", 1);

    let report = relocation(Arc::clone(&store))
        .start_work(RelocationRequest::new(
            "/content/a",
            "/content/b",
            "flaky-move",
            Mode::Move,
        ))
        .unwrap()
        .wait();

    assert!(report.is_done(), "failures: {:?}", report.failures);
    assert!(store.contains("/content/b/a/doc1"));
    assert!(store.contains("/content/b/a/sub/doc2"));
    assert!(!store.contains("/content/a"));
}
