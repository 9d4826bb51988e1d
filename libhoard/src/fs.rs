use crate::boxes::HoardBox;
use crate::error::{HoardError, HoardGenericError, HoardResult};
use crate::file::unix_now;
use crate::node::Node;
use crate::obj::FileMode;
use crate::path::TreePath;
use std::sync::Arc;

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EACCES: i32 = 13;
pub const ENOTDIR: i32 = 20;
pub const EINVAL: i32 = 22;
pub const EROFS: i32 = 30;

/// every operation resolves to data or an integer error code; a binding must
/// never see a language-level error
pub type FsResult<T> = Result<T, i32>;

/// translate a core error into the errno a kernel binding reports
pub fn errno_of(err: &HoardGenericError) -> i32 {
    match err.downcast_ref::<HoardError>() {
        Some(HoardError::NoChild(..) | HoardError::NoRecord(..)) => ENOENT,
        Some(HoardError::NotDirectory(..)) => ENOTDIR,
        Some(HoardError::ReadOnly) => EROFS,
        Some(HoardError::FetchError(..)) => EIO,
        Some(_) | None => EIO,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileAttr {
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub nlink: u32,
}

/// the path-based surface a userspace filesystem binding drives; errors are
/// already translated to error codes
pub struct BoxFs {
    hoard_box: Arc<HoardBox>,
    start_time: i64,
}

impl BoxFs {
    pub fn new(hoard_box: Arc<HoardBox>) -> Self {
        Self { hoard_box, start_time: unix_now() }
    }

    fn run<T>(&self, f: impl FnOnce() -> HoardResult<T>) -> FsResult<T> {
        f().map_err(|err| {
            let errno = errno_of(&err);
            debug!("fs error (errno {}): {}", errno, err);
            errno
        })
    }

    fn get(&self, path: &str) -> FsResult<(FileMode, Node)> {
        let path = self.parse(path)?;
        self.run(|| self.hoard_box.get(&path))
    }

    fn parse(&self, path: &str) -> FsResult<TreePath> {
        path.parse().map_err(|_| EINVAL)
    }

    pub fn access(&self, path: &str, write: bool) -> FsResult<()> {
        self.get(path)?;
        if write && !self.hoard_box.is_writable() {
            return Err(EACCES);
        }
        Ok(())
    }

    pub fn getattr(&self, path: &str) -> FsResult<FileAttr> {
        let (mode, node) = self.get(path)?;
        let ctime = match self.run(|| self.hoard_box.head_oid())? {
            Some(head) => self
                .run(|| Ok(self.hoard_box.storage().read_commit(head)?.commit_time()))?,
            None => self.start_time,
        };
        let mode = match mode {
            // directories carry no permissions of their own in the tree
            FileMode::TREE => mode.as_u32() | 0o750,
            FileMode::LINK => mode.as_u32() | 0o777,
            FileMode::REG | FileMode::EXEC => mode.as_u32(),
        };
        Ok(FileAttr { mode, size: node.len(), mtime: node.mtime(), ctime, nlink: 1 })
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let (_, node) = self.get(path)?;
        match node {
            Node::Directory(dir) => {
                let mut names = vec![".".to_owned(), "..".to_owned()];
                names.extend(dir.lock().names());
                Ok(names)
            }
            _ => Err(ENOTDIR),
        }
    }

    pub fn open(&self, path: &str) -> FsResult<u64> {
        let (mode, node) = self.get(path)?;
        Ok(self.hoard_box.open_handle(mode, node))
    }

    pub fn create(&self, path: &str, mode: u32) -> FsResult<u64> {
        let mode = FileMode::from_mode_t(mode).map_err(|_| EINVAL)?;
        if !mode.is_file() {
            return Err(EINVAL);
        }
        let tree_path = self.parse(path)?;
        let node = Node::new_file(self.hoard_box.storage().clone());
        self.run(|| self.hoard_box.set(&tree_path, mode, node.clone()))?;
        Ok(self.hoard_box.open_handle(mode, node))
    }

    /// only regular files can be made through mknod
    pub fn mknod(&self, path: &str, mode: u32) -> FsResult<u64> {
        match FileMode::from_mode_t(mode) {
            Ok(mode) if mode.is_file() => self.create(path, mode.as_u32()),
            _ => Err(EINVAL),
        }
    }

    pub fn mkdir(&self, path: &str) -> FsResult<()> {
        let tree_path = self.parse(path)?;
        let node = Node::new_dir(self.hoard_box.storage().clone());
        self.run(|| self.hoard_box.set(&tree_path, FileMode::TREE, node))
    }

    pub fn read(&self, fd: u64, offset: u64, size: u64) -> FsResult<Vec<u8>> {
        let handle = self.run(|| self.hoard_box.handle(fd))?;
        match &handle.node {
            Node::File(file) => self.run(|| file.lock().read_at(offset, size)),
            Node::Symlink(link) =>
                self.run(|| Ok(link.lock().target()?.into_bytes())),
            Node::Directory(..) => Err(EINVAL),
        }
    }

    pub fn write(&self, fd: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        if !self.hoard_box.is_writable() {
            return Err(EROFS);
        }
        let handle = self.run(|| self.hoard_box.handle(fd))?;
        match &handle.node {
            Node::File(file) => self.run(|| file.lock().write_at(offset, data)),
            _ => Err(EINVAL),
        }
    }

    pub fn truncate(&self, fd: u64, size: u64) -> FsResult<()> {
        if !self.hoard_box.is_writable() {
            return Err(EROFS);
        }
        let handle = self.run(|| self.hoard_box.handle(fd))?;
        match &handle.node {
            Node::File(file) => self.run(|| file.lock().truncate(size)),
            _ => Err(EINVAL),
        }
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let tree_path = self.parse(path)?;
        self.run(|| self.hoard_box.del(&tree_path))
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.unlink(path)
    }

    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let (mode, node) = self.get(old)?;
        let old_path = self.parse(old)?;
        let new_path = self.parse(new)?;
        self.run(|| {
            self.hoard_box.set(&new_path, mode, node)?;
            self.hoard_box.del(&old_path)
        })
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let mode = FileMode::from_mode_t(mode).map_err(|_| EINVAL)?;
        let (_, node) = self.get(path)?;
        let tree_path = self.parse(path)?;
        self.run(|| self.hoard_box.set(&tree_path, mode, node))
    }

    /// hard links are not supported
    pub fn link(&self, _target: &str, _source: &str) -> FsResult<()> {
        Err(EPERM)
    }

    pub fn symlink(&self, target: &str, link: &str) -> FsResult<()> {
        let tree_path = self.parse(link)?;
        self.run(|| {
            let node = Node::new_symlink(self.hoard_box.storage().clone(), target)?;
            self.hoard_box.set(&tree_path, FileMode::LINK, node)
        })
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        let (_, node) = self.get(path)?;
        match node {
            Node::Symlink(link) => self.run(|| link.lock().target()),
            _ => Err(EINVAL),
        }
    }

    /// set the modification time; `atime` is not tracked
    pub fn utimens(&self, path: &str, _atime: Option<i64>, mtime: Option<i64>) -> FsResult<()> {
        if !self.hoard_box.is_writable() {
            return Err(EROFS);
        }
        let (_, node) = self.get(path)?;
        let mtime = mtime.unwrap_or_else(unix_now);
        match node {
            Node::File(file) => file.lock().set_mtime(mtime),
            Node::Directory(dir) => dir.lock().set_mtime(mtime),
            Node::Symlink(..) => {}
        }
        Ok(())
    }

    /// flush the handle's node into the object store
    pub fn fsync(&self, fd: u64) -> FsResult<()> {
        let handle = self.run(|| self.hoard_box.handle(fd))?;
        self.run(|| handle.node.store().map(|_| ()))
    }

    pub fn release(&self, fd: u64) -> FsResult<()> {
        self.hoard_box.release_handle(fd);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
