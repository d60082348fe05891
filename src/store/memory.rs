//! In-memory store backend.
//!
//! Useful as a deterministic backend for exercising the pipeline: it carries
//! an explicit ACL table, supports injecting a bounded number of failures on
//! specific create/move targets, and records every mutating or checking
//! operation in an ordered log so tests can assert phase barriers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::privileges::{PermissionOracle, Privilege, PrivilegeSet};
use crate::store::{NodeType, Store, StoreError};

/// One recorded store interaction, in global order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Check(PathBuf),
    Create(PathBuf),
    Move(PathBuf, PathBuf),
    Delete(PathBuf),
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<PathBuf, NodeType>,
    denied: HashMap<PathBuf, HashSet<Privilege>>,
    fail_creates: HashMap<PathBuf, u32>,
    fail_moves: HashMap<PathBuf, u32>,
    log: Vec<Op>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn add_node(&self, path: impl Into<PathBuf>, kind: NodeType) {
        self.lock().nodes.insert(path.into(), kind);
    }

    pub fn add_container(&self, path: impl Into<PathBuf>) {
        self.add_node(path, NodeType::Folder);
    }

    pub fn add_leaf(&self, path: impl Into<PathBuf>) {
        self.add_node(path, NodeType::Item);
    }

    /// Deny one privilege on one node; everything else stays granted.
    pub fn deny(&self, path: impl Into<PathBuf>, privilege: Privilege) {
        self.lock()
            .denied
            .entry(path.into())
            .or_default()
            .insert(privilege);
    }

    /// Fail the next `n` `create_container` calls targeting `path`.
    pub fn fail_next_creates(&self, path: impl Into<PathBuf>, n: u32) {
        self.lock().fail_creates.insert(path.into(), n);
    }

    /// Fail the next `n` `move_leaf` calls whose destination is `path`.
    pub fn fail_next_moves(&self, path: impl Into<PathBuf>, n: u32) {
        self.lock().fail_moves.insert(path.into(), n);
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.lock().nodes.contains_key(path.as_ref())
    }

    /// Number of nodes at or under `root`.
    pub fn count_under(&self, root: impl AsRef<Path>) -> usize {
        let root = root.as_ref();
        self.lock()
            .nodes
            .keys()
            .filter(|p| *p == root || p.starts_with(root))
            .count()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// Drain the ordered operation log.
    pub fn take_log(&self) -> Vec<Op> {
        std::mem::take(&mut self.lock().log)
    }

    fn take_injected(map: &mut HashMap<PathBuf, u32>, path: &Path) -> bool {
        if let Some(remaining) = map.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }
}

impl Store for MemoryStore {
    fn node_type(&self, path: &Path) -> Result<Option<NodeType>, StoreError> {
        Ok(self.lock().nodes.get(path).copied())
    }

    fn children(&self, path: &Path) -> Result<Vec<(PathBuf, NodeType)>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, k)| (p.clone(), *k))
            .collect())
    }

    fn create_container(&self, path: &Path, kind: NodeType) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if Self::take_injected(&mut inner.fail_creates, path) {
            return Err(StoreError::Injected {
                op: "create container",
                path: path.to_path_buf(),
            });
        }
        if inner.nodes.contains_key(path) {
            return Ok(());
        }
        match path.parent() {
            Some(parent) if inner.nodes.contains_key(parent) => {}
            _ => return Err(StoreError::NotFound(path.parent().unwrap_or(path).to_path_buf())),
        }
        inner.nodes.insert(path.to_path_buf(), kind);
        inner.log.push(Op::Create(path.to_path_buf()));
        Ok(())
    }

    fn move_leaf(&self, from: &Path, to: &Path) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if Self::take_injected(&mut inner.fail_moves, to) {
            return Err(StoreError::Injected {
                op: "move leaf",
                path: to.to_path_buf(),
            });
        }
        if !inner.nodes.contains_key(from) {
            return Err(StoreError::NotFound(from.to_path_buf()));
        }
        if inner.nodes.contains_key(to) {
            return Err(StoreError::AlreadyExists(to.to_path_buf()));
        }
        // A leaf moves together with any children it happens to have.
        let moved: Vec<(PathBuf, NodeType)> = inner
            .nodes
            .iter()
            .filter(|(p, _)| *p == from || p.starts_with(from))
            .map(|(p, k)| (p.clone(), *k))
            .collect();
        for (p, _) in &moved {
            inner.nodes.remove(p);
        }
        for (p, k) in moved {
            let rebased = if p == from {
                to.to_path_buf()
            } else {
                to.join(p.strip_prefix(from).expect("prefix checked above"))
            };
            inner.nodes.insert(rebased, k);
        }
        inner.log.push(Op::Move(from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let doomed: Vec<PathBuf> = inner
            .nodes
            .keys()
            .filter(|p| *p == path || p.starts_with(path))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }
        for p in doomed {
            inner.nodes.remove(&p);
        }
        inner.log.push(Op::Delete(path.to_path_buf()));
        Ok(())
    }
}

impl PermissionOracle for MemoryStore {
    fn has_privileges(&self, path: &Path, set: &PrivilegeSet) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.log.push(Op::Check(path.to_path_buf()));
        let held = match inner.denied.get(path) {
            None => true,
            Some(denied) => set.privileges().iter().all(|p| match p {
                Privilege::All => denied.is_empty(),
                other => !denied.contains(other) && !denied.contains(&Privilege::All),
            }),
        };
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privileges::{CONTAINER_PRIVILEGES, LEAF_PRIVILEGES};

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_container("/content");
        store.add_container("/content/a");
        store.add_leaf("/content/a/doc1");
        store
    }

    #[test]
    fn children_are_direct_only() {
        let store = seeded();
        store.add_leaf("/content/a/doc1/embedded");
        let kids = store.children(Path::new("/content")).unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].0, PathBuf::from("/content/a"));
    }

    #[test]
    fn move_leaf_carries_descendants() {
        let store = seeded();
        store.add_leaf("/content/a/doc1/embedded");
        store.add_container("/content/b");
        store
            .move_leaf(Path::new("/content/a/doc1"), Path::new("/content/b/doc1"))
            .unwrap();
        assert!(store.contains("/content/b/doc1"));
        assert!(store.contains("/content/b/doc1/embedded"));
        assert!(!store.contains("/content/a/doc1"));
    }

    #[test]
    fn injected_create_failures_are_bounded() {
        let store = seeded();
        store.fail_next_creates("/content/x", 2);
        let p = Path::new("/content/x");
        assert!(store.create_container(p, NodeType::Folder).is_err());
        assert!(store.create_container(p, NodeType::Folder).is_err());
        store.create_container(p, NodeType::Folder).unwrap();
        assert!(store.contains("/content/x"));
    }

    #[test]
    fn denied_privilege_fails_only_matching_set() {
        let store = seeded();
        store.deny("/content/a", Privilege::RemoveNode);
        let a = Path::new("/content/a");
        assert!(!store.has_privileges(a, &CONTAINER_PRIVILEGES).unwrap());
        // Leaf set asks for All, which a partial denial also blocks.
        assert!(!store.has_privileges(a, &LEAF_PRIVILEGES).unwrap());
        let doc = Path::new("/content/a/doc1");
        assert!(store.has_privileges(doc, &LEAF_PRIVILEGES).unwrap());
    }

    #[test]
    fn delete_is_recursive_and_tolerates_absence() {
        let store = seeded();
        store.delete(Path::new("/content/a")).unwrap();
        assert!(!store.contains("/content/a/doc1"));
        store.delete(Path::new("/content/a")).unwrap();
    }
}
