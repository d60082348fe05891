//! Core library for `treemove`.
//!
//! Relocates an entire subtree of a hierarchical store from a source location
//! to a destination location through a four-phase, retryable pipeline:
//! validate permissions over the whole subtree, build the destination
//! container skeleton, migrate every leaf, then remove the emptied source
//! containers. A phase-2 failure rolls the destination back; the pipeline
//! reports either full completion or an abort with accumulated diagnostics.
//!
//! The store is a trait seam: a filesystem backend ships for the CLI, and an
//! in-memory backend with fault injection supports deterministic testing.

pub mod config;
pub mod errors;
pub mod output;
pub mod pipeline;
pub mod privileges;
pub mod retry;
pub mod shutdown;
pub mod stage;
pub mod store;
pub mod traverse;

pub use config::{Config, LogLevel};
pub use errors::RelocateError;
pub use pipeline::{
    HaltSignal, Mode, PipelineHandle, PipelineOptions, PipelineReport, PipelineState, Relocation,
    RelocationRequest,
};
pub use privileges::{
    CONTAINER_PRIVILEGES, LEAF_PRIVILEGES, PermissionOracle, Privilege, PrivilegeSet,
};
pub use retry::retry;
pub use stage::{Failure, Resolver, Stage, StageOutcome};
pub use store::{ContainerTypes, FsStore, MemoryStore, NodeType, Store, StoreError};
pub use traverse::{TraversalOrder, TreeWalk};
