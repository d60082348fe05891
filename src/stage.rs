//! A named, resolver-scoped, bounded-concurrency unit-of-work queue.
//!
//! One stage backs one pipeline phase. Units are enqueued during traversal
//! and run on the stage's own worker pool; `wait` is the phase barrier and
//! returns the outcome only after every scheduled unit has completed. Each
//! unit receives a [`Resolver`] guard that releases on every exit path.
//!
//! `close_resolvers` is the terminal latch: it is idempotent and causes any
//! later `schedule` call to drop its unit, which is how a cooperative halt
//! stops a pipeline without interrupting in-flight work.

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tracing::debug;

use crate::store::Store;

/// One node-level error accumulated by a stage.
#[derive(Debug)]
pub struct Failure {
    pub path: Option<PathBuf>,
    pub error: anyhow::Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {:#}", path.display(), self.error),
            None => write!(f, "{:#}", self.error),
        }
    }
}

#[derive(Debug)]
pub enum StageOutcome {
    Success,
    Failed(Vec<Failure>),
}

#[derive(Default)]
struct Progress {
    scheduled: u64,
    completed: u64,
}

struct StageInner {
    name: String,
    failures: Mutex<Vec<Failure>>,
    progress: Mutex<Progress>,
    barrier: Condvar,
    closed: AtomicBool,
    open_resolvers: AtomicUsize,
}

impl StageInner {
    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, Vec<Failure>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Stage {
    store: Arc<dyn Store>,
    pool: rayon::ThreadPool,
    inner: Arc<StageInner>,
}

impl Stage {
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>, width: usize) -> Result<Self> {
        let name = name.into();
        let thread_prefix = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width.max(1))
            .thread_name(move |i| format!("{thread_prefix}-{i}"))
            .build()
            .with_context(|| format!("build worker pool for stage '{name}'"))?;
        Ok(Self {
            store,
            pool,
            inner: Arc::new(StageInner {
                name,
                failures: Mutex::new(Vec::new()),
                progress: Mutex::new(Progress::default()),
                barrier: Condvar::new(),
                closed: AtomicBool::new(false),
                open_resolvers: AtomicUsize::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue one unit of work. The unit runs on the stage pool with its
    /// own scoped resolver; an error becomes a [`Failure`] against `path`.
    /// Units scheduled after `close_resolvers` are dropped.
    pub fn schedule<F>(&self, path: Option<PathBuf>, unit: F)
    where
        F: FnOnce(&Resolver) -> Result<()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!(stage = %self.inner.name, "stage closed; dropping unit");
            return;
        }
        self.inner.progress().scheduled += 1;

        let inner = Arc::clone(&self.inner);
        let store = Arc::clone(&self.store);
        self.pool.spawn(move || {
            let result = {
                let resolver = Resolver::open(store, Arc::clone(&inner));
                unit(&resolver)
            };
            if let Err(error) = result {
                inner.failures().push(Failure { path, error });
            }
            let mut progress = inner.progress();
            progress.completed += 1;
            drop(progress);
            inner.barrier.notify_all();
        });
    }

    /// Phase barrier: block until every scheduled unit has completed, then
    /// report success or the accumulated failures.
    pub fn wait(&self) -> StageOutcome {
        let mut progress = self.inner.progress();
        while progress.completed < progress.scheduled {
            progress = self
                .inner
                .barrier
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(progress);

        let failures = mem::take(&mut *self.inner.failures());
        if failures.is_empty() {
            StageOutcome::Success
        } else {
            debug!(stage = %self.inner.name, count = failures.len(), "stage completed with failures");
            StageOutcome::Failed(failures)
        }
    }

    /// Terminal teardown. Returns true only on the first call; repeated
    /// calls are harmless no-ops.
    pub fn close_resolvers(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        if first {
            debug!(stage = %self.inner.name, "stage resolvers closed");
        }
        first
    }

    /// Resolvers currently held by in-flight units.
    pub fn open_resolver_count(&self) -> usize {
        self.inner.open_resolvers.load(Ordering::SeqCst)
    }
}

/// Scoped store handle held by exactly one unit of work; released on drop.
pub struct Resolver {
    store: Arc<dyn Store>,
    inner: Arc<StageInner>,
}

impl Resolver {
    fn open(store: Arc<dyn Store>, inner: Arc<StageInner>) -> Self {
        inner.open_resolvers.fetch_add(1, Ordering::SeqCst);
        Self { store, inner }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
}

impl Deref for Resolver {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.inner.open_resolvers.fetch_sub(1, Ordering::SeqCst);
    }
}
