//! Four-phase relocation orchestrator.
//!
//! Moves an entire subtree from a source location to a destination location
//! while holding permission invariants and surviving partial failure:
//!
//! 1. `VALIDATE_ACL`  — privilege check over the full source subtree; nothing
//!    is mutated, so a failure here simply aborts.
//! 2. `BUILD_DEST`    — create a destination container for every source
//!    container, parents before children. Failure triggers the rollback
//!    compensator, which deletes whatever was built.
//! 3. `MIGRATE`       — atomically move every leaf to its mapped path.
//! 4. `CLEANUP`       — delete the now-empty source containers.
//!
//! Phases 3 and 4 are deliberately not auto-compensated; their failures are
//! recorded and the pipeline aborts with diagnostics. Re-running the same
//! relocation is safe: already-built containers, already-moved leaves and
//! already-removed source containers are all skipped.
//!
//! The caller thread never blocks: `start_work` validates synchronously and
//! hands back a handle to the background driver, which walks an explicit
//! state machine with a full barrier between phases.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::errors::RelocateError;
use crate::privileges::{CONTAINER_PRIVILEGES, LEAF_PRIVILEGES, PermissionOracle, PrivilegeSet};
use crate::retry::retry;
use crate::stage::{Failure, Stage, StageOutcome};
use crate::store::{ContainerTypes, NodeType, Store, StoreError};
use crate::traverse::{TraversalOrder, TreeWalk};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How the destination path in a request is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    /// Destination is the full new path of the relocated subtree.
    Rename,
    /// Destination is the new parent; the source's own name is appended.
    #[default]
    Move,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rename" => Some(Mode::Rename),
            "move" => Some(Mode::Move),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Rename => "rename",
            Mode::Move => "move",
        })
    }
}

#[derive(Clone, Debug)]
pub struct RelocationRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Label used in diagnostics and worker thread names.
    pub process_name: String,
    pub mode: Mode,
}

impl RelocationRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        process_name: impl Into<String>,
        mode: Mode,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            process_name: process_name.into(),
            mode,
        }
    }
}

/// States of the relocation state machine. `Done` and `Aborted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ValidateAcl,
    BuildDest,
    Migrate,
    Cleanup,
    RollbackBuild,
    Done,
    Aborted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PipelineState::Init => "init",
            PipelineState::ValidateAcl => "validate-acl",
            PipelineState::BuildDest => "build-dest",
            PipelineState::Migrate => "migrate",
            PipelineState::Cleanup => "cleanup",
            PipelineState::RollbackBuild => "rollback-build",
            PipelineState::Done => "done",
            PipelineState::Aborted => "aborted",
        })
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Worker-pool width, shared by every stage.
    pub workers: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub container_types: ContainerTypes,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            container_types: ContainerTypes::default(),
        }
    }
}

/// Final word from a finished pipeline. There is no partial-success status:
/// either every phase completed or the run is `Aborted` with diagnostics.
#[derive(Debug)]
pub struct PipelineReport {
    pub state: PipelineState,
    /// The phase whose failure ended the run, if any.
    pub failed_phase: Option<PipelineState>,
    pub failures: Vec<Failure>,
}

impl PipelineReport {
    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }
}

/// Lets a signal handler request a halt after the handle has been consumed.
#[derive(Clone, Debug)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    /// Idempotent: repeated requests are no-ops.
    pub fn halt(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            debug!("pipeline halt requested");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    join: Option<JoinHandle<PipelineReport>>,
    halt: HaltSignal,
}

impl PipelineHandle {
    /// Request a cooperative halt: no further units are enqueued, in-flight
    /// units finish naturally. Safe to call any number of times.
    pub fn halt(&self) {
        self.halt.halt();
    }

    pub fn halter(&self) -> HaltSignal {
        self.halt.clone()
    }

    /// Block until the pipeline reaches a terminal state.
    pub fn wait(mut self) -> PipelineReport {
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|_| PipelineReport {
                state: PipelineState::Aborted,
                failed_phase: None,
                failures: vec![Failure {
                    path: None,
                    error: anyhow!("pipeline driver thread panicked"),
                }],
            }),
            None => PipelineReport {
                state: PipelineState::Aborted,
                failed_phase: None,
                failures: Vec::new(),
            },
        }
    }
}

/// Entry point: owns the store handle, the oracle and the tuning options for
/// exactly one relocation.
pub struct Relocation {
    store: Arc<dyn Store>,
    oracle: Arc<dyn PermissionOracle>,
    options: PipelineOptions,
}

impl Relocation {
    pub fn new(store: Arc<dyn Store>, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self {
            store,
            oracle,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the request synchronously, then launch the pipeline and
    /// return immediately. Validation failures mean nothing was touched and
    /// no stage was created.
    pub fn start_work(self, request: RelocationRequest) -> Result<PipelineHandle, RelocateError> {
        let destination = self.validate(&request)?;
        info!(
            process = %request.process_name,
            source = %request.source.display(),
            destination = %destination.display(),
            mode = %request.mode,
            "relocation validated; starting pipeline"
        );

        let halt = HaltSignal(Arc::new(AtomicBool::new(false)));
        let driver = Driver {
            store: self.store,
            oracle: self.oracle,
            walk: TreeWalk::new(
                self.options.container_types.clone(),
                TraversalOrder::BreadthFirst,
            ),
            options: self.options,
            source: request.source,
            destination,
            process_name: request.process_name,
            halt: halt.clone(),
        };
        let join = thread::Builder::new()
            .name(format!("{}-driver", driver.process_name))
            .spawn(move || driver.run())?;
        Ok(PipelineHandle {
            join: Some(join),
            halt,
        })
    }

    /// Synchronous preconditions. Resolves the effective destination once;
    /// it is never recomputed mid-pipeline.
    fn validate(&self, request: &RelocationRequest) -> Result<PathBuf, RelocateError> {
        let source = &request.source;
        let destination = &request.destination;

        if source.as_os_str().is_empty() {
            return Err(RelocateError::MissingSource(source.clone()));
        }
        if destination.as_os_str().is_empty() {
            return Err(RelocateError::MissingDestinationParent(destination.clone()));
        }
        if destination.starts_with(source) {
            return Err(RelocateError::DestinationInsideSource {
                source_path: source.clone(),
                destination: destination.clone(),
            });
        }
        if self.store.node_type(source)?.is_none() {
            return Err(RelocateError::MissingSource(source.clone()));
        }

        let (resolved, parent) = match request.mode {
            Mode::Move => {
                let name = source
                    .file_name()
                    .ok_or_else(|| RelocateError::SourceWithoutName(source.clone()))?;
                (destination.join(name), destination.clone())
            }
            Mode::Rename => {
                let parent = destination
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| RelocateError::MissingDestinationParent(destination.clone()))?;
                (destination.clone(), parent)
            }
        };
        // Re-check nesting against the *resolved* destination: in move mode
        // appending the source name can land the destination back inside the
        // source (e.g. moving a node into its own parent resolves to the
        // source itself), and cleanup would then delete the relocated content.
        if resolved.starts_with(source) {
            return Err(RelocateError::DestinationInsideSource {
                source_path: source.clone(),
                destination: resolved,
            });
        }
        if self.store.node_type(&parent)?.is_none() {
            return Err(RelocateError::MissingDestinationParent(parent));
        }
        Ok(resolved)
    }
}

struct Stages {
    validate: Stage,
    build: Stage,
    migrate: Stage,
    cleanup: Stage,
}

impl Stages {
    fn all(&self) -> [&Stage; 4] {
        [&self.validate, &self.build, &self.migrate, &self.cleanup]
    }
}

struct Driver {
    store: Arc<dyn Store>,
    oracle: Arc<dyn PermissionOracle>,
    walk: TreeWalk,
    options: PipelineOptions,
    source: PathBuf,
    destination: PathBuf,
    process_name: String,
    halt: HaltSignal,
}

impl Driver {
    fn run(self) -> PipelineReport {
        let stages = match self.create_stages() {
            Ok(stages) => stages,
            Err(error) => {
                error!(process = %self.process_name, error = %error, "failed to create pipeline stages");
                return PipelineReport {
                    state: PipelineState::Aborted,
                    failed_phase: Some(PipelineState::Init),
                    failures: vec![Failure { path: None, error }],
                };
            }
        };

        let mut failures: Vec<Failure> = Vec::new();
        let mut failed_phase: Option<PipelineState> = None;
        let mut state = PipelineState::ValidateAcl;

        let terminal = loop {
            if let PipelineState::Done | PipelineState::Aborted = state {
                break state;
            }
            if self.halt.is_halted() {
                warn!(process = %self.process_name, phase = %state, "halt requested between phases");
                failed_phase.get_or_insert(state);
                failures.push(Failure {
                    path: None,
                    error: RelocateError::Interrupted.into(),
                });
                break PipelineState::Aborted;
            }

            state = match state {
                PipelineState::ValidateAcl => {
                    match self.run_phase(&stages.validate, |d, s| d.enqueue_acl_checks(s)) {
                        StageOutcome::Success => PipelineState::BuildDest,
                        StageOutcome::Failed(found) => {
                            // Nothing was mutated yet; abort outright.
                            failed_phase = Some(PipelineState::ValidateAcl);
                            failures.extend(found);
                            PipelineState::Aborted
                        }
                    }
                }
                PipelineState::BuildDest => {
                    match self.run_phase(&stages.build, |d, s| d.enqueue_builds(s)) {
                        StageOutcome::Success => PipelineState::Migrate,
                        StageOutcome::Failed(found) => {
                            failed_phase = Some(PipelineState::BuildDest);
                            failures.extend(found);
                            PipelineState::RollbackBuild
                        }
                    }
                }
                PipelineState::Migrate => {
                    match self.run_phase(&stages.migrate, |d, s| d.enqueue_migrations(s)) {
                        StageOutcome::Success => PipelineState::Cleanup,
                        StageOutcome::Failed(found) => {
                            // Known gap: leaves may now exist on both sides.
                            // Recorded, never silently compensated.
                            failed_phase = Some(PipelineState::Migrate);
                            failures.extend(found);
                            PipelineState::Aborted
                        }
                    }
                }
                PipelineState::Cleanup => {
                    match self.run_phase(&stages.cleanup, |d, s| d.enqueue_cleanups(s)) {
                        StageOutcome::Success => PipelineState::Done,
                        StageOutcome::Failed(found) => {
                            failed_phase = Some(PipelineState::Cleanup);
                            failures.extend(found);
                            PipelineState::Aborted
                        }
                    }
                }
                PipelineState::RollbackBuild => {
                    self.run_rollback(&mut failures);
                    PipelineState::Aborted
                }
                // Terminal and Init states never re-enter the transition match.
                other => break other,
            };
        };

        // Terminal teardown, idempotent per stage.
        for stage in stages.all() {
            stage.close_resolvers();
        }

        if terminal == PipelineState::Done {
            info!(
                process = %self.process_name,
                source = %self.source.display(),
                destination = %self.destination.display(),
                "relocation completed"
            );
        } else {
            error!(
                process = %self.process_name,
                failed_phase = failed_phase.map(|p| p.to_string()).unwrap_or_default(),
                failure_count = failures.len(),
                "relocation aborted"
            );
            for failure in &failures {
                error!(process = %self.process_name, %failure, "pipeline failure");
            }
        }

        PipelineReport {
            state: terminal,
            failed_phase,
            failures,
        }
    }

    fn create_stages(&self) -> Result<Stages> {
        let width = self.options.workers;
        Ok(Stages {
            validate: self.stage("validate-acl", width)?,
            build: self.stage("build-dest", width)?,
            migrate: self.stage("migrate", width)?,
            cleanup: self.stage("cleanup", width)?,
        })
    }

    fn stage(&self, label: &str, width: usize) -> Result<Stage> {
        Stage::new(
            format!("{}-{label}", self.process_name),
            Arc::clone(&self.store),
            width,
        )
    }

    /// Run one phase: enqueue all units via traversal, then block on the
    /// stage barrier. A traversal error is itself a phase failure.
    fn run_phase<F>(&self, stage: &Stage, enqueue: F) -> StageOutcome
    where
        F: FnOnce(&Self, &Stage) -> Result<()>,
    {
        debug!(process = %self.process_name, stage = %stage.name(), "entering phase");
        let enqueue_error = enqueue(self, stage).err();
        let outcome = stage.wait();
        match enqueue_error {
            None => outcome,
            Some(error) => {
                let mut found = match outcome {
                    StageOutcome::Success => Vec::new(),
                    StageOutcome::Failed(found) => found,
                };
                found.push(Failure { path: None, error });
                StageOutcome::Failed(found)
            }
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.halt.is_halted() {
            Err(RelocateError::Interrupted.into())
        } else {
            Ok(())
        }
    }

    /// Literal re-basing of a source-subtree path onto the destination root.
    fn map_destination(&self, node: &Path) -> Result<PathBuf> {
        let rel = node.strip_prefix(&self.source).map_err(|_| {
            anyhow!(
                "node '{}' is outside the source subtree '{}'",
                node.display(),
                self.source.display()
            )
        })?;
        if rel.as_os_str().is_empty() {
            Ok(self.destination.clone())
        } else {
            Ok(self.destination.join(rel))
        }
    }

    /// Phase 1: one privilege check per node, container set for containers,
    /// leaf set for everything else.
    fn enqueue_acl_checks(&self, stage: &Stage) -> Result<()> {
        let mut enter = |path: &Path, _depth: usize| {
            self.ensure_live()?;
            self.schedule_acl_check(stage, path, &CONTAINER_PRIVILEGES);
            Ok(())
        };
        let mut visit = |path: &Path, _depth: usize| {
            self.ensure_live()?;
            self.schedule_acl_check(stage, path, &LEAF_PRIVILEGES);
            Ok(())
        };
        self.walk
            .walk(self.store.as_ref(), &self.source, &mut enter, &mut visit)
    }

    fn schedule_acl_check(&self, stage: &Stage, path: &Path, set: &'static PrivilegeSet) {
        let oracle = Arc::clone(&self.oracle);
        let path = path.to_path_buf();
        stage.schedule(Some(path.clone()), move |_resolver| {
            if oracle.has_privileges(&path, set)? {
                Ok(())
            } else {
                Err(RelocateError::InsufficientPrivileges {
                    path,
                    set: set.name(),
                }
                .into())
            }
        });
    }

    /// Phase 2: create a destination container for every source container.
    /// Breadth-first enqueue order puts parents before children.
    fn enqueue_builds(&self, stage: &Stage) -> Result<()> {
        let attempts = self.options.retry_attempts;
        let delay = self.options.retry_delay;
        let mut enter = |path: &Path, _depth: usize| {
            self.ensure_live()?;
            let kind = self
                .store
                .node_type(path)?
                .unwrap_or(NodeType::Folder);
            let mapped = self.map_destination(path)?;
            stage.schedule(Some(mapped.clone()), move |resolver| {
                retry(attempts, delay, || {
                    resolver.create_container(&mapped, kind)?;
                    Ok(())
                })
            });
            Ok(())
        };
        let mut visit = |_path: &Path, _depth: usize| self.ensure_live();
        self.walk
            .walk(self.store.as_ref(), &self.source, &mut enter, &mut visit)
    }

    /// Phase 3: move every leaf to its mapped destination path. A leaf that
    /// already vanished from the source but exists at the destination was
    /// moved by an earlier run and is skipped.
    fn enqueue_migrations(&self, stage: &Stage) -> Result<()> {
        let attempts = self.options.retry_attempts;
        let delay = self.options.retry_delay;
        let mut enter = |_path: &Path, _depth: usize| self.ensure_live();
        let mut visit = |path: &Path, _depth: usize| {
            self.ensure_live()?;
            let from = path.to_path_buf();
            let to = self.map_destination(path)?;
            stage.schedule(Some(from.clone()), move |resolver| {
                retry(attempts, delay, || match resolver.move_leaf(&from, &to) {
                    Ok(()) => Ok(()),
                    Err(StoreError::NotFound(_)) if resolver.node_type(&to)?.is_some() => {
                        debug!(from = %from.display(), to = %to.display(), "leaf already migrated");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                })
            });
            Ok(())
        };
        self.walk
            .walk(self.store.as_ref(), &self.source, &mut enter, &mut visit)
    }

    /// Phase 4: delete the emptied source containers. Top-down order is safe
    /// because `delete` removes remaining descendants and tolerates nodes an
    /// ancestor's delete already took.
    fn enqueue_cleanups(&self, stage: &Stage) -> Result<()> {
        // A leaf source was moved wholesale in the previous phase, taking the
        // root itself with it; there are no emptied containers to remove.
        if self.store.node_type(&self.source)?.is_none() {
            debug!(source = %self.source.display(), "source already gone; nothing to clean up");
            return Ok(());
        }
        let attempts = self.options.retry_attempts;
        let delay = self.options.retry_delay;
        let mut enter = |path: &Path, _depth: usize| {
            self.ensure_live()?;
            let doomed = path.to_path_buf();
            stage.schedule(Some(doomed.clone()), move |resolver| {
                retry(attempts, delay, || {
                    resolver.delete(&doomed)?;
                    Ok(())
                })
            });
            Ok(())
        };
        let mut visit = |path: &Path, _depth: usize| {
            // Leaves were all moved in phase 3; one appearing here means the
            // store changed underneath us.
            warn!(path = %path.display(), "unexpected leaf in source tree during cleanup");
            self.ensure_live()
        };
        self.walk
            .walk(self.store.as_ref(), &self.source, &mut enter, &mut visit)
    }

    /// Compensator for phase-2 failures: walk the destination subtree with
    /// both callbacks mapped to delete. Best effort; residual nodes are
    /// logged when the compensator itself fails.
    fn run_rollback(&self, failures: &mut Vec<Failure>) {
        info!(
            process = %self.process_name,
            destination = %self.destination.display(),
            "rolling back partially built destination"
        );
        match self.store.node_type(&self.destination) {
            Ok(None) => {
                debug!(destination = %self.destination.display(), "destination absent; nothing to roll back");
                return;
            }
            Err(error) => {
                failures.push(Failure {
                    path: Some(self.destination.clone()),
                    error: error.into(),
                });
                return;
            }
            Ok(Some(_)) => {}
        }

        let stage = match self.stage("rollback-build", self.options.workers) {
            Ok(stage) => stage,
            Err(error) => {
                failures.push(Failure { path: None, error });
                return;
            }
        };

        let schedule_delete = |path: &Path| {
            let doomed = path.to_path_buf();
            stage.schedule(Some(doomed.clone()), move |resolver| {
                resolver.delete(&doomed)?;
                Ok(())
            });
        };
        let walk_result = self.walk.walk(
            self.store.as_ref(),
            &self.destination,
            &mut |path, _| {
                schedule_delete(path);
                Ok(())
            },
            &mut |path, _| {
                schedule_delete(path);
                Ok(())
            },
        );

        let outcome = stage.wait();
        stage.close_resolvers();

        let rollback_failed = walk_result.is_err() || matches!(outcome, StageOutcome::Failed(_));
        if let Err(error) = walk_result {
            failures.push(Failure { path: None, error });
        }
        if let StageOutcome::Failed(found) = outcome {
            failures.extend(found);
        }
        if rollback_failed {
            self.log_residual_nodes();
        }
    }

    /// After a failed rollback, name every node still present under the
    /// destination so an operator can finish the job by hand.
    fn log_residual_nodes(&self) {
        let log_node = |path: &Path| {
            error!(
                process = %self.process_name,
                path = %path.display(),
                "residual destination node left by failed rollback"
            );
        };
        if self.store.node_type(&self.destination).ok().flatten().is_none() {
            return;
        }
        let _ = self.walk.walk(
            self.store.as_ref(),
            &self.destination,
            &mut |path, _| {
                log_node(path);
                Ok(())
            },
            &mut |path, _| {
                log_node(path);
                Ok(())
            },
        );
    }
}
