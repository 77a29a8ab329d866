// src/fs/mock.rs

use super::FileSystem;
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

/// In-memory filesystem that also counts mutations, so tests can assert
/// that a rejected operation touched nothing.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    mutations: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a directory without counting it as a mutation.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut entries = self.entries.lock();
        Self::insert_dir_chain(&mut entries, path.as_ref());
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.entries.lock().get(path.as_ref()) {
            Some(MockEntry::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Paths written, created or removed so far, in order.
    pub fn mutations(&self) -> Vec<PathBuf> {
        self.mutations.lock().clone()
    }

    fn insert_dir_chain(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            entries
                .entry(ancestor.to_path_buf())
                .or_insert(MockEntry::Dir);
        }
    }

    fn record(&self, path: &Path) {
        self.mutations.lock().push(path.to_path_buf());
    }
}

impl FileSystem for MockFileSystem {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            if let Some(parent) = path.parent() {
                Self::insert_dir_chain(&mut entries, parent);
            }
            if matches!(entries.get(path), Some(MockEntry::Dir)) {
                return Err(anyhow!("cannot write {:?}: is a directory", path));
            }
            entries.insert(path.to_path_buf(), MockEntry::File(contents.to_vec()));
        }
        self.record(path);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            if matches!(entries.get(path), Some(MockEntry::File(_))) {
                return Err(anyhow!("cannot create dir {:?}: is a file", path));
            }
            Self::insert_dir_chain(&mut entries, path);
        }
        self.record(path);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            match entries.get(path) {
                Some(MockEntry::File(_)) => {
                    entries.remove(path);
                }
                _ => return Err(anyhow!("no such file {:?}", path)),
            }
        }
        self.record(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.lock().get(path), Some(MockEntry::Dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_parents_and_records_mutation() {
        let fs = MockFileSystem::new();
        fs.write(Path::new("/ws/a/b.txt"), b"hi").unwrap();

        assert!(fs.is_dir(Path::new("/ws/a")));
        assert_eq!(fs.read("/ws/a/b.txt").as_deref(), Some(&b"hi"[..]));
        assert_eq!(fs.mutations(), vec![PathBuf::from("/ws/a/b.txt")]);
    }

    #[test]
    fn pre_populated_dirs_are_not_mutations() {
        let fs = MockFileSystem::new();
        fs.add_dir("/ws");
        assert!(fs.exists(Path::new("/ws")));
        assert!(fs.mutations().is_empty());
        assert!(fs.remove_file(Path::new("/ws/missing")).is_err());
    }
}
