use crate::error::HoardResult;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

const LOCK_FILE_EXT: &str = "lock";

bitflags! {
    pub struct LockfileFlags: u8 {
        const SET_READONLY = 1;
    }
}

/// guards a file by writing through a `<path>.lock` sibling that is atomically
/// renamed over the target on commit
#[derive(Debug)]
pub struct Lockfile {
    // the lockfile itself; all writes go here, never to the target
    lockfile: File,
    flags: LockfileFlags,
    path: PathBuf,
    lockfile_path: PathBuf,
}

impl Write for Lockfile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lockfile.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lockfile.flush()
    }
}

impl Lockfile {
    // consumers of this api should never hold the lockfile directly,
    // they should go through `with_mut` below
    fn open(path: impl AsRef<Path>, flags: LockfileFlags) -> HoardResult<Self> {
        let path = path.as_ref();
        assert!(!path.exists() || path.is_file(), "cannot create lock on symlinks or directories");
        let lockfile_path = path.with_extension(LOCK_FILE_EXT);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lockfile = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lockfile_path)
            .or_else(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => Err(err).with_context(|| {
                    format!(
                        "failed to lock file `{}` (`{}` already exists)",
                        path.display(),
                        lockfile_path.display()
                    )
                }),
                _ => Err(err)
                    .with_context(|| format!("failed to create file `{}`", path.display())),
            })?;

        Ok(Self { lockfile, flags, lockfile_path, path: path.to_path_buf() })
    }

    /// runs a function with write access to the lockfile; if the closure
    /// returns an `Err` the transaction is rolled back, otherwise it is
    /// committed to disk
    pub fn with_mut<R>(
        path: impl AsRef<Path>,
        flags: LockfileFlags,
        f: impl FnOnce(&mut Self) -> HoardResult<R>,
    ) -> HoardResult<R> {
        let mut lockfile = Self::open(path, flags)?;
        match f(&mut lockfile) {
            Ok(r) => {
                lockfile.commit()?;
                Ok(r)
            }
            Err(err) => {
                lockfile.rollback()?;
                Err(err)
            }
        }
    }

    fn commit(mut self) -> HoardResult<()> {
        self.lockfile.flush()?;
        if self.flags.contains(LockfileFlags::SET_READONLY) {
            let mut permissions = self.lockfile.metadata()?.permissions();
            permissions.set_readonly(true);
            self.lockfile.set_permissions(permissions)?;
        }
        // the target may be a readonly object committed by a previous run
        if self.path.exists() {
            let mut permissions = std::fs::metadata(&self.path)?.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                std::fs::set_permissions(&self.path, permissions)?;
            }
        }
        std::fs::rename(&self.lockfile_path, &self.path)?;
        Ok(())
    }

    fn rollback(self) -> HoardResult<()> {
        std::fs::remove_file(&self.lockfile_path)?;
        Ok(())
    }
}
