//! Hierarchical store abstraction: the seam the pipeline mutates through.

mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Closed set of node type tags. Classification is by value comparison
/// against a [`ContainerTypes`] set, never by inspecting type names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Unordered folder-like container.
    Folder,
    /// Ordered folder-like container.
    OrderedFolder,
    /// Anything that is not structural scaffolding: documents, assets, etc.
    Item,
}

/// Injectable set of node types treated as containers during traversal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerTypes(Vec<NodeType>);

impl ContainerTypes {
    pub fn new(types: impl IntoIterator<Item = NodeType>) -> Self {
        Self(types.into_iter().collect())
    }

    pub fn contains(&self, kind: NodeType) -> bool {
        self.0.contains(&kind)
    }
}

impl Default for ContainerTypes {
    fn default() -> Self {
        Self(vec![NodeType::Folder, NodeType::OrderedFolder])
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(PathBuf),

    #[error("node already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("{op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("injected fault: {op} '{path}'")]
    Injected { op: &'static str, path: PathBuf },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Minimal surface the relocation pipeline needs from a hierarchical store.
///
/// Contract notes:
/// - `create_container` on an already-existing node succeeds, so a retried
///   or re-run build phase cannot wedge on its own earlier progress.
/// - `delete` removes the node *and any remaining descendants*; deleting an
///   absent node succeeds, so concurrent top-down deletion and re-runs are
///   safe.
/// - `move_leaf` moves a single item atomically where the backend allows it.
pub trait Store: Send + Sync + 'static {
    /// Type of the node at `path`, or `None` if nothing exists there.
    fn node_type(&self, path: &Path) -> Result<Option<NodeType>, StoreError>;

    /// Direct children of `path` in a stable (name-sorted) order.
    fn children(&self, path: &Path) -> Result<Vec<(PathBuf, NodeType)>, StoreError>;

    fn create_container(&self, path: &Path, kind: NodeType) -> Result<(), StoreError>;

    fn move_leaf(&self, from: &Path, to: &Path) -> Result<(), StoreError>;

    fn delete(&self, path: &Path) -> Result<(), StoreError>;
}
