//! Subtree traversal with container/leaf classification.
//!
//! Containers (per the injected [`ContainerTypes`] set) get the enter
//! callback and are recursed into; every other child gets the visit callback
//! and is terminal from the traversal's point of view, even when the backend
//! happens to hold children beneath it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::store::{ContainerTypes, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    /// Parents before children, level by level. The relocation pipeline
    /// always uses this so destination parents exist before their children.
    #[default]
    BreadthFirst,
    DepthFirst,
}

/// Reusable walk configuration; callbacks are supplied per walk.
#[derive(Clone, Debug)]
pub struct TreeWalk {
    containers: ContainerTypes,
    order: TraversalOrder,
}

impl TreeWalk {
    pub fn new(containers: ContainerTypes, order: TraversalOrder) -> Self {
        Self { containers, order }
    }

    pub fn order(&self) -> TraversalOrder {
        self.order
    }

    /// Walk the subtree rooted at `root`.
    ///
    /// `on_enter` fires once per container, before its descendants;
    /// `on_visit` fires once per non-container child. A root that is itself
    /// a leaf gets a single `on_visit`. Either callback may stop the walk by
    /// returning an error.
    pub fn walk(
        &self,
        store: &dyn Store,
        root: &Path,
        on_enter: &mut dyn FnMut(&Path, usize) -> Result<()>,
        on_visit: &mut dyn FnMut(&Path, usize) -> Result<()>,
    ) -> Result<()> {
        let root_kind = store
            .node_type(root)?
            .ok_or_else(|| StoreError::NotFound(root.to_path_buf()))?;
        if !self.containers.contains(root_kind) {
            return on_visit(root, 0);
        }

        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
        queue.push_back((root.to_path_buf(), 0));

        while let Some((path, depth)) = queue.pop_front() {
            on_enter(&path, depth)?;
            let children = store.children(&path)?;
            match self.order {
                TraversalOrder::BreadthFirst => {
                    for (child, kind) in children {
                        if self.containers.contains(kind) {
                            queue.push_back((child, depth + 1));
                        } else {
                            on_visit(&child, depth + 1)?;
                        }
                    }
                }
                TraversalOrder::DepthFirst => {
                    for (child, kind) in children.into_iter().rev() {
                        if self.containers.contains(kind) {
                            queue.push_front((child, depth + 1));
                        } else {
                            on_visit(&child, depth + 1)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ContainerTypes, MemoryStore, NodeType};
    use anyhow::bail;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_container("/r");
        store.add_container("/r/a");
        store.add_container("/r/a/aa");
        store.add_leaf("/r/a/doc");
        store.add_container("/r/b");
        store.add_leaf("/r/top");
        store
    }

    fn collect(
        store: &MemoryStore,
        order: TraversalOrder,
    ) -> (Vec<(String, usize)>, Vec<(String, usize)>) {
        let walk = TreeWalk::new(ContainerTypes::default(), order);
        let mut entered = Vec::new();
        let mut visited = Vec::new();
        walk.walk(
            store,
            Path::new("/r"),
            &mut |p, d| {
                entered.push((p.display().to_string(), d));
                Ok(())
            },
            &mut |p, d| {
                visited.push((p.display().to_string(), d));
                Ok(())
            },
        )
        .unwrap();
        (entered, visited)
    }

    #[test]
    fn breadth_first_enters_by_level() {
        let store = seeded();
        let (entered, visited) = collect(&store, TraversalOrder::BreadthFirst);
        let names: Vec<&str> = entered.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["/r", "/r/a", "/r/b", "/r/a/aa"]);
        assert_eq!(entered[0].1, 0);
        assert_eq!(entered[3].1, 2);
        assert!(visited.contains(&("/r/top".to_string(), 1)));
        assert!(visited.contains(&("/r/a/doc".to_string(), 2)));
    }

    #[test]
    fn depth_first_enters_branch_before_sibling() {
        let store = seeded();
        let (entered, _) = collect(&store, TraversalOrder::DepthFirst);
        let names: Vec<&str> = entered.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["/r", "/r/a", "/r/a/aa", "/r/b"]);
    }

    #[test]
    fn leaf_children_are_not_recursed() {
        let store = seeded();
        // A leaf with its own children: traversal must still treat it as terminal.
        store.add_node("/r/top/inside", NodeType::Item);
        let (entered, visited) = collect(&store, TraversalOrder::BreadthFirst);
        assert!(!entered.iter().any(|(p, _)| p == "/r/top"));
        assert!(!visited.iter().any(|(p, _)| p == "/r/top/inside"));
        assert!(visited.iter().any(|(p, _)| p == "/r/top"));
    }

    #[test]
    fn leaf_root_gets_single_visit() {
        let store = seeded();
        let walk = TreeWalk::new(ContainerTypes::default(), TraversalOrder::BreadthFirst);
        let mut visits = 0;
        walk.walk(
            &store,
            Path::new("/r/top"),
            &mut |_, _| bail!("must not enter a leaf root"),
            &mut |_, _| {
                visits += 1;
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(visits, 1);
    }

    #[test]
    fn missing_root_errors() {
        let store = seeded();
        let walk = TreeWalk::new(ContainerTypes::default(), TraversalOrder::BreadthFirst);
        let err = walk
            .walk(&store, Path::new("/gone"), &mut |_, _| Ok(()), &mut |_, _| Ok(()))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn callback_error_stops_walk() {
        let store = seeded();
        let walk = TreeWalk::new(ContainerTypes::default(), TraversalOrder::BreadthFirst);
        let mut entered = 0;
        let result = walk.walk(
            &store,
            Path::new("/r"),
            &mut |_, _| {
                entered += 1;
                if entered == 2 { bail!("stop here") } else { Ok(()) }
            },
            &mut |_, _| Ok(()),
        );
        assert!(result.is_err());
        assert_eq!(entered, 2);
    }
}
