use crate::error::HoardResult;
use crate::lockfile::{Lockfile, LockfileFlags};
use crate::Oid;
use parking_lot::Mutex;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// the serialized configuration document
pub const CONFIG_REF: &str = "refs/tags/config";
/// a blob containing this storage's uuid
pub const ID_REF: &str = "refs/tags/id";
/// prefix under which box heads are published per storage id
pub const STORAGES_PREFIX: &str = "refs/storages/";
/// prefix anchoring every stored file block
pub const BLOBS_PREFIX: &str = "refs/blobs/";

/// the head of box `name` as seen by storage `id`
pub fn box_ref(id: &str, name: &str) -> String {
    format!("{}{}/{}", STORAGES_PREFIX, id, name)
}

/// reachability anchor for a stored blob
pub fn blob_ref(oid: Oid) -> String {
    format!("{}{}", BLOBS_PREFIX, oid)
}

/// mapping of ref names to hashes, one file per ref under `<storage>/refs/…`
pub struct RefDb {
    /// the storage directory (ref names already start with `refs/`)
    root: PathBuf,
    // serializes in-process compare-and-swap sequences
    cas_lock: Mutex<()>,
}

fn validate_ref_name(name: &str) -> HoardResult<()> {
    ensure!(name.starts_with("refs/"), "ref name `{}` must start with `refs/`", name);
    ensure!(
        name.split('/').all(|component| !component.is_empty() && component != ".."),
        "invalid ref name `{}`",
        name
    );
    Ok(())
}

impl RefDb {
    pub fn new(root: PathBuf) -> HoardResult<Self> {
        std::fs::create_dir_all(root.join("refs"))?;
        Ok(Self { root, cas_lock: Mutex::default() })
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    // reads need no lock: writers replace the file atomically via rename
    pub fn read(&self, name: &str) -> HoardResult<Option<Oid>> {
        validate_ref_name(name)?;
        let path = self.ref_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(Oid::from_str(&contents)?))
    }

    /// durable before returning; the ref file is written through a lockfile
    pub fn write(&self, name: &str, oid: Oid) -> HoardResult<()> {
        trace!("RefDb::write(name: {}, oid: {})", name, oid);
        validate_ref_name(name)?;
        Lockfile::with_mut(self.ref_path(name), LockfileFlags::empty(), |lockfile| {
            Ok(writeln!(lockfile, "{}", oid)?)
        })
    }

    /// atomic compare-and-swap against concurrent updaters in this process;
    /// returns whether the swap happened
    pub fn set_if_equals(
        &self,
        name: &str,
        expected: Option<Oid>,
        new: Oid,
    ) -> HoardResult<bool> {
        let _guard = self.cas_lock.lock();
        if self.read(name)? != expected {
            return Ok(false);
        }
        self.write(name, new)?;
        Ok(true)
    }

    pub fn delete(&self, name: &str) -> HoardResult<()> {
        validate_ref_name(name)?;
        let path = self.ref_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn exists(&self, name: &str) -> HoardResult<bool> {
        validate_ref_name(name)?;
        Ok(self.ref_path(name).exists())
    }

    /// enumerate `(name, oid)` pairs for every ref whose name starts with `prefix`
    pub fn iter_prefix(&self, prefix: &str) -> HoardResult<Vec<(String, Oid)>> {
        let mut refs = vec![];
        self.collect_refs(&self.root.join("refs"), &mut refs)?;
        refs.retain(|(name, _)| name.starts_with(prefix));
        refs.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(refs)
    }

    pub fn all(&self) -> HoardResult<Vec<(String, Oid)>> {
        self.iter_prefix("refs/")
    }

    fn collect_refs(&self, dir: &Path, out: &mut Vec<(String, Oid)>) -> HoardResult<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_refs(&path, out)?;
            } else if path.extension() != Some("lock".as_ref()) {
                // skip stray `.lock` files from interrupted writes
                let name = path
                    .strip_prefix(&self.root)?
                    .to_str()
                    .ok_or_else(|| anyhow!("non-utf8 ref name `{}`", path.display()))?
                    .to_owned();
                let contents = std::fs::read_to_string(&path)?;
                out.push((name, Oid::from_str(&contents)?));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn temp_refdb() -> HoardResult<(tempfile::TempDir, RefDb)> {
        let dir = tempfile::tempdir()?;
        let refdb = RefDb::new(dir.path().to_path_buf())?;
        Ok((dir, refdb))
    }

    #[test]
    fn write_then_read_ref() -> HoardResult<()> {
        let (_dir, refdb) = temp_refdb()?;
        let oid = hash_bytes(b"x");
        refdb.write("refs/storages/someid/master", oid)?;
        assert_eq!(refdb.read("refs/storages/someid/master")?, Some(oid));
        assert_eq!(refdb.read("refs/storages/someid/other")?, None);
        Ok(())
    }

    #[test]
    fn set_if_equals_semantics() -> HoardResult<()> {
        let (_dir, refdb) = temp_refdb()?;
        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");

        assert!(refdb.set_if_equals("refs/tags/t", None, a)?);
        // stale expectation must fail
        assert!(!refdb.set_if_equals("refs/tags/t", None, b)?);
        assert!(refdb.set_if_equals("refs/tags/t", Some(a), b)?);
        assert_eq!(refdb.read("refs/tags/t")?, Some(b));
        Ok(())
    }

    #[test]
    fn prefix_enumeration() -> HoardResult<()> {
        let (_dir, refdb) = temp_refdb()?;
        let oid = hash_bytes(b"x");
        refdb.write("refs/storages/id1/master", oid)?;
        refdb.write("refs/storages/id2/master", oid)?;
        refdb.write("refs/blobs/aaaa", oid)?;

        let storages = refdb.iter_prefix(STORAGES_PREFIX)?;
        assert_eq!(storages.len(), 2);
        assert_eq!(storages[0].0, "refs/storages/id1/master");

        assert_eq!(refdb.all()?.len(), 3);
        Ok(())
    }

    #[test]
    fn rejects_traversal() {
        let (_dir, refdb) = temp_refdb().unwrap();
        assert!(refdb.read("refs/../../etc/passwd").is_err());
        assert!(refdb.read("heads/master").is_err());
    }
}
