use std::collections::HashMap;
use std::sync::Mutex;

/// The fixed inode of the mount root, matching FUSE's convention.
pub const ROOT_INO: u64 = 1;

/// A path<->inode table.
///
/// The remote FTP protocol has no inode numbers of its own -- everything is
/// addressed by path -- so the dispatcher fabricates one inode per distinct
/// virtual path it has seen via `lookup`, the same bridging technique most
/// path-based FUSE filesystems use. Metadata caching across opens is
/// delegated to an external collaborator per spec §1's Non-goals; this
/// table exists purely to satisfy the FUSE kernel interface's inode
/// requirement, not as a cache of file contents or attributes.
#[derive(Default)]
pub struct InodeTable {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            inner: Mutex::new(Inner {
                paths: HashMap::new(),
                inos: HashMap::new(),
                next: ROOT_INO + 1,
            }),
        };
        table
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .paths
            .insert(ROOT_INO, "/".to_string());
        table
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inos
            .insert("/".to_string(), ROOT_INO);
        table
    }

    /// Returns the inode for `path`, allocating a fresh one if this path
    /// hasn't been looked up before.
    pub fn intern(&self, path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&ino) = inner.inos.get(path) {
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.inos.insert(path.to_string(), ino);
        inner.paths.insert(ino, path.to_string());
        ino
    }

    pub fn path(&self, ino: u64) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .paths
            .get(&ino)
            .cloned()
    }

    /// Builds the child path for `name` under the directory at `parent_ino`
    /// and interns it, returning both the inode and path.
    pub fn intern_child(&self, parent_ino: u64, name: &str) -> Option<(u64, String)> {
        let parent = self.path(parent_ino)?;
        let child_path = join(&parent, name);
        let ino = self.intern(&child_path);
        Some((ino, child_path))
    }

    /// Re-points `path`'s inode at a new path, used after a successful
    /// rename so subsequent lookups of the old inode resolve correctly.
    pub fn rename(&self, from: &str, to: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ino) = inner.inos.remove(from) {
            inner.inos.insert(to.to_string(), ino);
            inner.paths.insert(ino, to.to_string());
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO).as_deref(), Some("/"));
    }

    #[test]
    fn interning_the_same_path_twice_returns_the_same_inode() {
        let table = InodeTable::new();
        let a = table.intern("/dir/file.txt");
        let b = table.intern("/dir/file.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn intern_child_joins_under_the_parent_path() {
        let table = InodeTable::new();
        let (_ino, path) = table.intern_child(ROOT_INO, "file.txt").unwrap();
        assert_eq!(path, "/file.txt");
    }

    #[test]
    fn rename_repoints_the_existing_inode() {
        let table = InodeTable::new();
        let ino = table.intern("/d1/f");
        table.rename("/d1/f", "/d2/f");
        assert_eq!(table.path(ino).as_deref(), Some("/d2/f"));
        assert_eq!(table.intern("/d2/f"), ino);
    }
}
