//! Phase-3 failures are recorded but never silently compensated: the
//! pipeline aborts and the split state (destination skeleton plus whatever
//! leaves already moved) is left for diagnostics or a re-run.

use std::sync::Arc;
use std::time::Duration;
use treemove::pipeline::{
    Mode, PipelineOptions, PipelineState, Relocation, RelocationRequest,
};
use treemove::privileges::PermissionOracle;
use treemove::store::MemoryStore;

fn relocation(store: Arc<MemoryStore>) -> Relocation {
    let oracle = Arc::clone(&store) as Arc<dyn PermissionOracle>;
    Relocation::new(store, oracle).with_options(PipelineOptions {
        workers: 1,
        retry_attempts: 2,
        retry_delay: Duration::from_millis(5),
        ..PipelineOptions::default()
    })
}

#[test]
fn failed_leaf_move_aborts_without_rollback() {
    let store = Arc::new(MemoryStore::new());
    store.add_container("/content");
    store.add_container("/content/a");
    store.add_leaf("/content/a/doc1");
    store.add_leaf("/content/a/doc2");
    store.add_container("/content/b");
    store.fail_next_moves("/content/b/a/doc2", 10);

    let report = relocation(Arc::clone(&store))
        .start_work(RelocationRequest::new(
            "/content/a",
            "/content/b",
            "migrate-fail",
            Mode::Move,
        ))
        .unwrap()
        .wait();

    assert_eq!(report.state, PipelineState::Aborted);
    assert_eq!(report.failed_phase, Some(PipelineState::Migrate));

    // The destination skeleton survives: no silent auto-rollback.
    assert!(store.contains("/content/b/a"));
    // doc1 may or may not have moved before the failure was recorded, but
    // doc2 must still be at the source.
    assert!(store.contains("/content/a/doc2"));
    assert!(
        store.contains("/content/a/doc1") || store.contains("/content/b/a/doc1"),
        "doc1 must exist on exactly one side: {:?}",
        store.paths()
    );
    assert!(!(store.contains("/content/a/doc1") && store.contains("/content/b/a/doc1")));
    // Source containers survive a failed migration; cleanup never ran.
    assert!(store.contains("/content/a"));
}
