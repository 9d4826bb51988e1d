use crate::dir::Directory;
use crate::error::HoardResult;
use crate::file::{File, Symlink};
use crate::obj::FileMode;
use crate::storage::Storage;
use crate::Oid;
use parking_lot::Mutex;
use std::sync::Arc;

pub type FileRef = Arc<Mutex<File>>;
pub type DirRef = Arc<Mutex<Directory>>;
pub type SymlinkRef = Arc<Mutex<Symlink>>;

/// the polymorphic child slot of a directory entry
///
/// handles are shared: the same node may be reachable both through the tree
/// and through an open file handle, and writes through either must be seen by
/// the other
#[derive(Clone)]
pub enum Node {
    File(FileRef),
    Directory(DirRef),
    Symlink(SymlinkRef),
}

impl Node {
    pub fn new_file(storage: Storage) -> Self {
        Node::File(Arc::new(Mutex::new(File::new(storage))))
    }

    pub fn new_dir(storage: Storage) -> Self {
        Node::Directory(Arc::new(Mutex::new(Directory::new(storage))))
    }

    pub fn new_symlink(storage: Storage, target: &str) -> HoardResult<Self> {
        Ok(Node::Symlink(Arc::new(Mutex::new(Symlink::new(storage, target)?))))
    }

    /// mode-driven constructor over a stored object
    pub fn from_oid(storage: Storage, mode: FileMode, oid: Oid) -> HoardResult<Self> {
        Ok(match mode {
            FileMode::TREE =>
                Node::Directory(Arc::new(Mutex::new(Directory::from_tree_oid(storage, oid)?))),
            FileMode::LINK =>
                Node::Symlink(Arc::new(Mutex::new(Symlink::from_manifest(storage, oid)?))),
            FileMode::REG | FileMode::EXEC =>
                Node::File(Arc::new(Mutex::new(File::from_manifest(storage, oid)?))),
        })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(..))
    }

    pub fn as_file(&self) -> Option<&FileRef> {
        match self {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_dir(&self) -> Option<&DirRef> {
        match self {
            Node::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&SymlinkRef> {
        match self {
            Node::Symlink(link) => Some(link),
            _ => None,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Node::File(file) => file.lock().len(),
            Node::Directory(dir) => dir.lock().len(),
            Node::Symlink(link) => link.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mtime(&self) -> i64 {
        match self {
            Node::File(file) => file.lock().mtime(),
            Node::Directory(dir) => dir.lock().mtime(),
            Node::Symlink(link) => link.lock().mtime(),
        }
    }

    /// flush the node (and, for directories, its dirty children) into the
    /// object store, returning the stored oid
    pub fn store(&self) -> HoardResult<Oid> {
        match self {
            Node::File(file) => file.lock().store(),
            Node::Directory(dir) => dir.lock().store(),
            Node::Symlink(link) => link.lock().store(),
        }
    }

    /// blocks referenced by this node (empty for directories)
    pub fn block_oids(&self) -> Vec<Oid> {
        match self {
            Node::File(file) => file.lock().block_oids(),
            Node::Symlink(link) => link.lock().block_oids(),
            Node::Directory(..) => vec![],
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Node::File(..) => "File",
            Node::Directory(..) => "Directory",
            Node::Symlink(..) => "Symlink",
        };
        write!(f, "<{}>", kind)
    }
}
