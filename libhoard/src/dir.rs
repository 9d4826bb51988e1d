use crate::error::{HoardError, HoardResult, HoardResultExt};
use crate::file::unix_now;
use crate::node::{DirRef, Node};
use crate::obj::{FileMode, Tree, TreeEntry};
use crate::path::TreePath;
use crate::storage::Storage;
use crate::Oid;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct DirEntry {
    pub mode: FileMode,
    pub node: Node,
}

/// a directory: an immutable base tree shadowed by an insertion-ordered
/// overlay of pending changes
pub struct Directory {
    storage: Storage,
    base: Tree,
    // locally modified/added entries which will belong to our tree when we
    // flush ourselves
    overlay: IndexMap<String, DirEntry>,
    mtime: i64,
}

impl Directory {
    pub fn new(storage: Storage) -> Self {
        Self { storage, base: Tree::default(), overlay: IndexMap::new(), mtime: unix_now() }
    }

    pub fn from_tree_oid(storage: Storage, oid: Oid) -> HoardResult<Self> {
        let base = storage.read_tree(oid)?;
        Ok(Self { storage, base, overlay: IndexMap::new(), mtime: unix_now() })
    }

    pub fn into_ref(self) -> DirRef {
        Arc::new(Mutex::new(self))
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn set_mtime(&mut self, mtime: i64) {
        self.mtime = mtime;
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// number of entries visible through overlay and base
    pub fn len(&self) -> u64 {
        self.names().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// the single-level child `name`; a base-tree hit is memoized into the
    /// overlay so later mutations through the returned node are observed
    pub fn entry(&mut self, name: &str) -> HoardResult<DirEntry> {
        if let Some(entry) = self.overlay.get(name) {
            return Ok(entry.clone());
        }
        let tree_entry = match self.base.entry(name) {
            Some(entry) => entry.clone(),
            None => bail!(HoardError::NoChild(name.to_owned())),
        };
        let node = Node::from_oid(self.storage.clone(), tree_entry.mode, tree_entry.oid)?;
        let entry = DirEntry { mode: tree_entry.mode, node };
        self.overlay.insert(name.to_owned(), entry.clone());
        Ok(entry)
    }

    pub fn has(&self, name: &str) -> bool {
        self.overlay.contains_key(name) || self.base.entry(name).is_some()
    }

    pub fn insert(&mut self, name: &str, mode: FileMode, node: Node) {
        self.overlay.insert(name.to_owned(), DirEntry { mode, node });
        self.mtime = unix_now();
    }

    /// change the mode of an existing entry in place
    pub fn chmod(&mut self, name: &str, mode: FileMode) -> HoardResult<()> {
        let entry = self.entry(name)?;
        self.overlay.insert(name.to_owned(), DirEntry { mode, node: entry.node });
        self.mtime = unix_now();
        Ok(())
    }

    /// remove `name` from the overlay and the base so the next flush records
    /// the absence
    pub fn remove(&mut self, name: &str) -> HoardResult<()> {
        let in_overlay = self.overlay.shift_remove(name).is_some();
        let in_base = self.base.remove_entry(name).is_some();
        if !in_overlay && !in_base {
            bail!(HoardError::NoChild(name.to_owned()));
        }
        self.mtime = unix_now();
        Ok(())
    }

    /// visible names in iteration order: overlay first (insertion order),
    /// then base-tree entries not shadowed (sort order)
    pub fn names(&self) -> Vec<String> {
        let mut names = self.overlay.keys().cloned().collect::<Vec<_>>();
        for entry in &self.base.entries {
            if !self.overlay.contains_key(&entry.name) {
                names.push(entry.name.clone());
            }
        }
        names
    }

    /// `(name, mode)` pairs in the same order as [`Self::names`]
    pub fn entries(&self) -> Vec<(String, FileMode)> {
        let mut entries = self
            .overlay
            .iter()
            .map(|(name, entry)| (name.clone(), entry.mode))
            .collect::<Vec<_>>();
        for entry in &self.base.entries {
            if !self.overlay.contains_key(&entry.name) {
                entries.push((entry.name.clone(), entry.mode));
            }
        }
        entries
    }

    /// blob blocks referenced by files directly in this directory
    pub fn list_blobs(&mut self) -> HoardResult<Vec<Oid>> {
        let mut blobs = vec![];
        for (name, mode) in self.entries() {
            if mode.is_blob() {
                blobs.extend(self.entry(&name)?.node.block_oids());
            }
        }
        Ok(blobs)
    }

    /// blob blocks referenced by files anywhere in this subtree
    pub fn list_blobs_recursive(&mut self) -> HoardResult<Vec<Oid>> {
        let mut blobs = vec![];
        for (name, mode) in self.entries() {
            let entry = self.entry(&name)?;
            if mode.is_tree() {
                match &entry.node {
                    Node::Directory(dir) => blobs.extend(dir.lock().list_blobs_recursive()?),
                    node => bail!("tree entry `{}` resolved to non-directory `{:?}`", name, node),
                }
            } else {
                blobs.extend(entry.node.block_oids());
            }
        }
        Ok(blobs)
    }

    /// flush: store dirty children and write a new tree combining the overlay
    /// with untouched base entries
    pub fn store(&mut self) -> HoardResult<Oid> {
        let mut tree = self.base.clone();
        for (name, entry) in &self.overlay {
            let oid = entry.node.store()?;
            tree.add_entry(TreeEntry::new(entry.mode, name.clone(), oid));
        }
        self.storage.put_obj(&tree)
    }
}

/// resolve `path` starting at `dir`; `/` resolves to `dir` itself
///
/// a mid-path non-directory fails with `NotDirectory` without touching the
/// terminal object
pub fn lookup(dir: &DirRef, path: &TreePath) -> HoardResult<(FileMode, Node)> {
    let mut current = dir.clone();
    let components = path.components();
    for (idx, name) in components.iter().enumerate() {
        let entry = current.lock().entry(name)?;
        if idx + 1 == components.len() {
            return Ok((entry.mode, entry.node));
        }
        current = match entry.node {
            Node::Directory(next) => next,
            _ => bail!(HoardError::NotDirectory(name.clone())),
        };
    }
    Ok((FileMode::TREE, Node::Directory(current)))
}

/// create the parent chain of `path` as needed (like `mkdir -p`) and return
/// the directory that will own the final component
pub fn mkdirs(dir: &DirRef, path: &TreePath) -> HoardResult<DirRef> {
    let mut current = dir.clone();
    for name in path.components() {
        let entry = {
            let mut locked = current.lock();
            match locked.entry(name) {
                Ok(entry) => entry,
                Err(err) if err.is_lookup_err() => {
                    let storage = locked.storage.clone();
                    let node = Node::new_dir(storage);
                    locked.insert(name, FileMode::TREE, node.clone());
                    DirEntry { mode: FileMode::TREE, node }
                }
                Err(err) => return Err(err),
            }
        };
        current = match entry.node {
            Node::Directory(next) => next,
            _ => bail!(HoardError::NotDirectory(name.clone())),
        };
    }
    Ok(current)
}

/// `mkdir -p` the parent chain, then overwrite the final component
pub fn insert_at(dir: &DirRef, path: &TreePath, mode: FileMode, node: Node) -> HoardResult<()> {
    let (parent, name) = match path.split_last() {
        Some(split) => split,
        None => bail!("cannot overwrite the root directory"),
    };
    let owner = mkdirs(dir, &parent)?;
    owner.lock().insert(name, mode, node);
    Ok(())
}

/// remove the entry at `path`; fails with `NoChild` if absent
pub fn remove_at(dir: &DirRef, path: &TreePath) -> HoardResult<()> {
    let (parent, name) = match path.split_last() {
        Some(split) => split,
        None => bail!("cannot remove the root directory"),
    };
    let (_, node) = lookup(dir, &parent)?;
    match node {
        Node::Directory(parent_dir) => parent_dir.lock().remove(name),
        _ => bail!(HoardError::NotDirectory(parent.to_string())),
    }
}

#[cfg(test)]
mod tests;
