//! Filesystem-backed store: directories are containers, files are leaves.
//!
//! Moves try an atomic rename first and fall back to copy+remove when the
//! rename fails (typically a cross-filesystem move). Privilege checks are
//! best-effort probes against permission bits, which is what a local
//! filesystem can actually answer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::privileges::{PermissionOracle, Privilege, PrivilegeSet};
use crate::store::{NodeType, Store, StoreError};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Store backend over the local filesystem. Paths are used as given; the
/// caller owns any jail/base-path policy.
#[derive(Debug, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }

    fn classify(meta: &fs::Metadata) -> NodeType {
        if meta.file_type().is_dir() {
            NodeType::Folder
        } else {
            NodeType::Item
        }
    }

    /// Can the current user write to (and remove entries from) `path`?
    fn is_writable(path: &Path) -> Result<bool, StoreError> {
        let meta = fs::symlink_metadata(path)
            .map_err(|e| StoreError::io("stat node", path, e))?;
        #[cfg(unix)]
        {
            Ok(meta.permissions().mode() & 0o200 != 0)
        }
        #[cfg(not(unix))]
        {
            Ok(!meta.permissions().readonly())
        }
    }

    fn is_readable(path: &Path) -> Result<bool, StoreError> {
        let meta = fs::symlink_metadata(path)
            .map_err(|e| StoreError::io("stat node", path, e))?;
        if meta.file_type().is_dir() {
            Ok(fs::read_dir(path).is_ok())
        } else {
            Ok(fs::File::open(path).is_ok())
        }
    }

    fn parent_writable(path: &Path) -> Result<bool, StoreError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Self::is_writable(parent),
            _ => Ok(false),
        }
    }
}

impl Store for FsStore {
    fn node_type(&self, path: &Path) -> Result<Option<NodeType>, StoreError> {
        match fs::symlink_metadata(path) {
            Ok(meta) => Ok(Some(Self::classify(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io("stat node", path, e)),
        }
    }

    fn children(&self, path: &Path) -> Result<Vec<(PathBuf, NodeType)>, StoreError> {
        let mut out = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                // Cleanup and rollback delete whole subtrees on the worker
                // pool while the driver is still enumerating them; a
                // container that vanished underneath us has no children,
                // mirroring `delete` on an absent node.
                Err(e) if e.io_error().map(|ioe| ioe.kind()) == Some(io::ErrorKind::NotFound) => {
                    continue;
                }
                Err(e) => {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("walk loop"));
                    return Err(StoreError::io("list children", path, source));
                }
            };
            let kind = if entry.file_type().is_dir() {
                NodeType::Folder
            } else {
                NodeType::Item
            };
            out.push((entry.into_path(), kind));
        }
        Ok(out)
    }

    fn create_container(&self, path: &Path, kind: NodeType) -> Result<(), StoreError> {
        debug!(path = %path.display(), ?kind, "creating container");
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            // Already built (earlier attempt or a resumed run).
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(StoreError::io("create container", path, e)),
        }
    }

    fn move_leaf(&self, from: &Path, to: &Path) -> Result<(), StoreError> {
        if fs::symlink_metadata(from).is_err() {
            return Err(StoreError::NotFound(from.to_path_buf()));
        }
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "atomic rename failed, falling back to copy+remove"
                );
                fs::copy(from, to).map_err(|e| StoreError::io("copy leaf", to, e))?;
                fs::remove_file(from).map_err(|e| StoreError::io("remove source leaf", from, e))?;
                Ok(())
            }
        }
    }

    fn delete(&self, path: &Path) -> Result<(), StoreError> {
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io("stat node", path, e)),
        };
        let result = if meta.file_type().is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            // An ancestor's subtree delete may have raced us.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("delete node", path, e)),
        }
    }
}

impl PermissionOracle for FsStore {
    fn has_privileges(&self, path: &Path, set: &PrivilegeSet) -> Result<bool, StoreError> {
        for privilege in set.privileges() {
            let held = match privilege {
                Privilege::Read => Self::is_readable(path)?,
                Privilege::Write | Privilege::RemoveChildNodes => Self::is_writable(path)?,
                Privilege::RemoveNode => Self::parent_writable(path)?,
                Privilege::All => {
                    Self::is_readable(path)?
                        && Self::is_writable(path)?
                        && Self::parent_writable(path)?
                }
            };
            if !held {
                debug!(path = %path.display(), %privilege, "privilege not held");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privileges::{CONTAINER_PRIVILEGES, LEAF_PRIVILEGES};
    use tempfile::tempdir;

    #[test]
    fn node_type_distinguishes_dirs_and_files() {
        let td = tempdir().unwrap();
        let dir = td.path().join("d");
        let file = td.path().join("f.txt");
        fs::create_dir(&dir).unwrap();
        fs::write(&file, b"x").unwrap();

        let store = FsStore::new();
        assert_eq!(store.node_type(&dir).unwrap(), Some(NodeType::Folder));
        assert_eq!(store.node_type(&file).unwrap(), Some(NodeType::Item));
        assert_eq!(store.node_type(&td.path().join("missing")).unwrap(), None);
    }

    #[test]
    fn children_sorted_by_name() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("b.txt"), b"b").unwrap();
        fs::create_dir(td.path().join("a")).unwrap();
        fs::write(td.path().join("c.txt"), b"c").unwrap();

        let store = FsStore::new();
        let names: Vec<String> = store
            .children(td.path())
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b.txt", "c.txt"]);
    }

    #[test]
    fn children_of_absent_path_is_empty() {
        let td = tempdir().unwrap();
        let store = FsStore::new();
        // Concurrent subtree deletion can remove a container between its
        // scheduling and its enumeration.
        let kids = store.children(&td.path().join("vanished")).unwrap();
        assert!(kids.is_empty());
    }

    #[test]
    fn create_container_is_idempotent() {
        let td = tempdir().unwrap();
        let store = FsStore::new();
        let dir = td.path().join("new");
        store.create_container(&dir, NodeType::Folder).unwrap();
        store.create_container(&dir, NodeType::Folder).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn delete_absent_node_is_ok() {
        let td = tempdir().unwrap();
        let store = FsStore::new();
        store.delete(&td.path().join("nothing")).unwrap();
    }

    #[test]
    fn move_leaf_renames_file() {
        let td = tempdir().unwrap();
        let from = td.path().join("src.txt");
        let to = td.path().join("dst.txt");
        fs::write(&from, b"payload").unwrap();

        let store = FsStore::new();
        store.move_leaf(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "payload");
    }

    #[cfg(unix)]
    #[test]
    fn oracle_denies_write_on_readonly_dir() {
        let td = tempdir().unwrap();
        let dir = td.path().join("locked");
        fs::create_dir(&dir).unwrap();
        let mut perms = fs::metadata(&dir).unwrap().permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&dir, perms).unwrap();

        let store = FsStore::new();
        assert!(!store.has_privileges(&dir, &CONTAINER_PRIVILEGES).unwrap());

        let mut restore = fs::metadata(&dir).unwrap().permissions();
        restore.set_mode(0o755);
        fs::set_permissions(&dir, restore).unwrap();
        assert!(store.has_privileges(&dir, &CONTAINER_PRIVILEGES).unwrap());
    }

    #[test]
    fn oracle_grants_all_on_ordinary_file() {
        let td = tempdir().unwrap();
        let file = td.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        let store = FsStore::new();
        assert!(store.has_privileges(&file, &LEAF_PRIVILEGES).unwrap());
    }
}
