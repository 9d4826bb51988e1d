use crate::error::{HoardError, HoardResult, HoardResultExt};
use crate::hash;
use crate::lockfile::{Lockfile, LockfileFlags};
use crate::obj::{self, ObjHeader, ObjKind, WritableObject};
use crate::Oid;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{prelude::*, BufReader};
use std::path::PathBuf;
use std::str::FromStr;

/// content-addressed store of loose zlib-compressed objects
pub struct Odb {
    /// path to `<storage>/objects`
    objects_path: PathBuf,
}

impl Odb {
    pub fn new(objects_path: PathBuf) -> HoardResult<Self> {
        std::fs::create_dir_all(&objects_path)?;
        Ok(Self { objects_path })
    }

    // this should be infallible as it is used by write
    // in particular, this should *not* check for the existence of the path
    fn obj_path(&self, oid: Oid) -> PathBuf {
        let (dir, file) = oid.split();
        self.objects_path.join(dir).join(file)
    }

    fn locate_obj(&self, oid: Oid) -> HoardResult<PathBuf> {
        let path = self.obj_path(oid);
        if path.exists() { Ok(path) } else { Err(anyhow!(HoardError::ObjectNotFound(oid))) }
    }

    fn read_stream(&self, oid: Oid) -> HoardResult<impl BufRead> {
        let reader = File::open(self.locate_obj(oid)?)?;
        Ok(BufReader::new(ZlibDecoder::new(reader)))
    }

    pub fn read(&self, oid: Oid) -> HoardResult<ObjKind> {
        trace!("Odb::read(oid: {})", oid);
        let mut stream = self.read_stream(oid)?;
        let ObjHeader { obj_type, size } = obj::read_obj_header(&mut stream)?;
        ObjKind::deserialize_sized(obj_type, &mut stream, size)
    }

    pub fn read_header(&self, oid: Oid) -> HoardResult<ObjHeader> {
        let mut stream = self.read_stream(oid)?;
        obj::read_obj_header(&mut stream)
    }

    /// idempotent; the same bytes always land at the same path
    pub fn write(&self, obj: &dyn WritableObject) -> HoardResult<Oid> {
        let bytes = obj.serialize_with_headers()?;
        let oid = hash::hash_bytes(&bytes);
        let path = self.obj_path(oid);

        if path.exists() {
            #[cfg(debug_assertions)]
            {
                let mut buf = vec![];
                ZlibDecoder::new(File::open(path)?).read_to_end(&mut buf)?;
                assert_eq!(buf, bytes, "same hash, different contents :O");
            }
        } else {
            let written = Lockfile::with_mut(&path, LockfileFlags::SET_READONLY, |lockfile| {
                Ok(ZlibEncoder::new(lockfile, Compression::default()).write_all(&bytes)?)
            });
            // losing the lock race means another writer is storing the same
            // bytes at this path
            if written.is_err() && !path.exists() {
                written?;
            }
        }

        Ok(oid)
    }

    /// copy the raw compressed object file from another store
    pub fn copy_from(&self, other: &Odb, oid: Oid) -> HoardResult<()> {
        if self.exists(oid)? {
            return Ok(());
        }
        let src = other.locate_obj(oid)?;
        let dst = self.obj_path(oid);
        Lockfile::with_mut(&dst, LockfileFlags::SET_READONLY, |lockfile| {
            let mut reader = File::open(&src)?;
            std::io::copy(&mut reader, lockfile)?;
            Ok(())
        })
    }

    pub fn exists(&self, oid: Oid) -> HoardResult<bool> {
        match self.locate_obj(oid) {
            Ok(..) => Ok(true),
            Err(err) if err.is_not_found_err() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// enumerate every oid in the store
    pub fn oids(&self) -> HoardResult<Vec<Oid>> {
        let mut oids = vec![];
        if !self.objects_path.exists() {
            return Ok(oids);
        }
        for entry in std::fs::read_dir(&self.objects_path)? {
            let entry = entry?;
            let dir_name = entry.file_name();
            let dir_name = match dir_name.to_str() {
                Some(name) if name.len() == 2 => name,
                _ => continue,
            };
            for file in std::fs::read_dir(entry.path())? {
                let file = file?;
                if let Some(file_name) = file.file_name().to_str() {
                    if let Ok(oid) = Oid::from_str(&format!("{}{}", dir_name, file_name)) {
                        oids.push(oid);
                    }
                }
            }
        }
        Ok(oids)
    }
}
