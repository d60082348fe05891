//! Cooperative halt: a signal can stop the pipeline between phases, repeated
//! halt requests are harmless, and a halted run never mutates the store past
//! the phase it was stopped in.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use treemove::pipeline::{
    Mode, PipelineOptions, PipelineState, Relocation, RelocationRequest,
};
use treemove::privileges::{PermissionOracle, PrivilegeSet};
use treemove::store::{MemoryStore, Store, StoreError};

/// Delegating oracle that makes the permission phase slow enough to halt into.
struct SlowOracle {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl PermissionOracle for SlowOracle {
    fn has_privileges(&self, path: &Path, set: &PrivilegeSet) -> Result<bool, StoreError> {
        thread::sleep(self.delay);
        self.inner.has_privileges(path, set)
    }
}

fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_container("/content");
    store.add_container("/content/a");
    for i in 0..6 {
        store.add_leaf(format!("/content/a/doc{i}"));
    }
    store.add_container("/content/b");
    store
}

#[test]
fn halt_during_permission_phase_aborts_before_mutation() {
    let store = seeded();
    let oracle = Arc::new(SlowOracle {
        inner: Arc::clone(&store),
        delay: Duration::from_millis(100),
    }) as Arc<dyn PermissionOracle>;
    let dyn_store = Arc::clone(&store) as Arc<dyn Store>;

    let handle = Relocation::new(dyn_store, oracle)
        .with_options(PipelineOptions {
            workers: 2,
            ..PipelineOptions::default()
        })
        .start_work(RelocationRequest::new(
            "/content/a",
            "/content/b",
            "halted-run",
            Mode::Move,
        ))
        .unwrap();

    thread::sleep(Duration::from_millis(20));
    // Repeated requests from several holders must all be safe.
    handle.halt();
    handle.halt();
    let halter = handle.halter();
    halter.halt();
    assert!(halter.is_halted());

    let report = handle.wait();
    assert_eq!(report.state, PipelineState::Aborted);
    assert!(report.failed_phase.is_some());
    assert!(
        report
            .failures
            .iter()
            .any(|f| f.error.to_string().contains("halted before completion")),
        "failures: {:?}",
        report.failures
    );

    // The halt landed while permission checks were still draining, so no
    // destination container may exist.
    assert!(!store.contains("/content/b/a"), "paths: {:?}", store.paths());
    assert!(store.contains("/content/a/doc0"));
}

#[test]
fn halt_after_completion_is_a_noop() {
    let store = seeded();
    let oracle = Arc::clone(&store) as Arc<dyn PermissionOracle>;
    let dyn_store = Arc::clone(&store) as Arc<dyn Store>;

    let handle = Relocation::new(dyn_store, oracle)
        .start_work(RelocationRequest::new(
            "/content/a",
            "/content/b",
            "finished-run",
            Mode::Move,
        ))
        .unwrap();
    let halter = handle.halter();

    let report = handle.wait();
    assert!(report.is_done(), "failures: {:?}", report.failures);

    // Late signal delivery after the pipeline is already done.
    halter.halt();
    halter.halt();
    assert!(halter.is_halted());
    assert!(store.contains("/content/b/a/doc0"));
}
