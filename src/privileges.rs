//! Privilege vocabulary and the permission oracle contract.
//!
//! The relocation pipeline checks every node of the source subtree before it
//! mutates anything. Containers need the full structural set (read, write,
//! remove children, remove the node itself); leaves are moved wholesale and
//! therefore need `All`.

use std::fmt;
use std::path::Path;

use crate::store::StoreError;

/// A single capability token understood by the permission oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Privilege {
    Read,
    Write,
    RemoveChildNodes,
    RemoveNode,
    /// Shorthand for "every capability on this node".
    All,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Privilege::Read => "read",
            Privilege::Write => "write",
            Privilege::RemoveChildNodes => "remove-child-nodes",
            Privilege::RemoveNode => "remove-node",
            Privilege::All => "all",
        };
        f.write_str(s)
    }
}

/// Named, ordered set of privileges required for one class of node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrivilegeSet {
    name: &'static str,
    privileges: &'static [Privilege],
}

impl PrivilegeSet {
    pub const fn new(name: &'static str, privileges: &'static [Privilege]) -> Self {
        Self { name, privileges }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn privileges(&self) -> &'static [Privilege] {
        self.privileges
    }
}

/// Required on every container node of the source subtree.
pub const CONTAINER_PRIVILEGES: PrivilegeSet = PrivilegeSet::new(
    "container",
    &[
        Privilege::Read,
        Privilege::Write,
        Privilege::RemoveChildNodes,
        Privilege::RemoveNode,
    ],
);

/// Required on every leaf node of the source subtree.
pub const LEAF_PRIVILEGES: PrivilegeSet = PrivilegeSet::new("leaf", &[Privilege::All]);

/// Decides whether the acting principal holds a privilege set on a node.
///
/// Checked synchronously inside the worker executing that node's phase-1
/// unit; a failing check becomes a stage failure, never a panic.
pub trait PermissionOracle: Send + Sync + 'static {
    fn has_privileges(&self, path: &Path, set: &PrivilegeSet) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sets_have_expected_shape() {
        assert_eq!(CONTAINER_PRIVILEGES.name(), "container");
        assert_eq!(CONTAINER_PRIVILEGES.privileges().len(), 4);
        assert!(
            CONTAINER_PRIVILEGES
                .privileges()
                .contains(&Privilege::RemoveNode)
        );
        assert_eq!(LEAF_PRIVILEGES.privileges(), &[Privilege::All]);
    }
}
