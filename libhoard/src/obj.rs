mod blob;
mod commit;
mod tree;

pub use blob::*;
pub use commit::*;
pub use tree::*;

use crate::error::{HoardError, HoardGenericError, HoardResult};
use crate::hash::Oid;
use crate::io::BufReadExt;
use crate::serialize::{DeserializeSized, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::io::{BufRead, Write};
use std::str::FromStr;

#[derive(PartialEq, Debug)]
pub struct ObjHeader {
    pub obj_type: ObjType,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ObjType {
    Commit,
    Tree,
    Blob,
}

impl Display for ObjType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjType::Commit => "commit",
            ObjType::Tree => "tree",
            ObjType::Blob => "blob",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ObjType {
    type Err = HoardGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(ObjType::Commit),
            "tree" => Ok(ObjType::Tree),
            "blob" => Ok(ObjType::Blob),
            _ => bail!("unknown object type `{}`", s),
        }
    }
}

/// the mode of a tree entry; values are the canonical git modes
#[allow(non_camel_case_types)]
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum FileMode {
    REG  = 0o100644,
    EXEC = 0o100755,
    LINK = 0o120000,
    TREE = 0o40000,
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let n = self.as_u32();
        if f.alternate() { write!(f, "{:o}", n) } else { write!(f, "{:06o}", n) }
    }
}

impl Debug for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FileMode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_link(self) -> bool {
        matches!(self, FileMode::LINK)
    }

    pub fn is_file(self) -> bool {
        matches!(self, FileMode::EXEC | FileMode::REG)
    }

    pub fn is_blob(self) -> bool {
        matches!(self, FileMode::EXEC | FileMode::REG | FileMode::LINK)
    }

    pub fn is_tree(self) -> bool {
        matches!(self, FileMode::TREE)
    }

    pub fn try_new(u: u32) -> HoardResult<Self> {
        match u {
            0o100644 => Ok(FileMode::REG),
            0o100755 => Ok(FileMode::EXEC),
            0o120000 => Ok(FileMode::LINK),
            0o40000 => Ok(FileMode::TREE),
            _ => bail!("invalid filemode `{:06o}`", u),
        }
    }

    pub fn new(u: u32) -> Self {
        Self::try_new(u).unwrap_or_else(|_| panic!("invalid filemode `{:06o}`", u))
    }

    /// canonicalize an arbitrary posix `mode_t` into a git filemode
    pub fn from_mode_t(mode: u32) -> HoardResult<Self> {
        const S_IFMT: u32 = 0o170000;
        const S_IFDIR: u32 = 0o40000;
        const S_IFREG: u32 = 0o100000;
        const S_IFLNK: u32 = 0o120000;
        match mode & S_IFMT {
            S_IFDIR => Ok(FileMode::TREE),
            S_IFLNK => Ok(FileMode::LINK),
            S_IFREG | 0 =>
                if mode & 0o111 != 0 { Ok(FileMode::EXEC) } else { Ok(FileMode::REG) },
            _ => bail!("unsupported file type in mode `{:06o}`", mode),
        }
    }

    pub fn infer_obj_type(self) -> ObjType {
        match self {
            Self::TREE => ObjType::Tree,
            Self::EXEC | Self::REG | Self::LINK => ObjType::Blob,
        }
    }
}

impl FromStr for FileMode {
    type Err = HoardGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(u32::from_str_radix(s, 8)?)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum ObjKind {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl ObjKind {
    pub fn obj_type(&self) -> ObjType {
        match self {
            ObjKind::Blob(..) => ObjType::Blob,
            ObjKind::Tree(..) => ObjType::Tree,
            ObjKind::Commit(..) => ObjType::Commit,
        }
    }

    pub fn deserialize_sized(
        obj_type: ObjType,
        reader: &mut impl BufRead,
        size: u64,
    ) -> HoardResult<Self> {
        match obj_type {
            ObjType::Commit => Commit::deserialize_sized(reader, size).map(Self::Commit),
            ObjType::Tree => Tree::deserialize_sized(reader, size).map(Self::Tree),
            ObjType::Blob => Blob::deserialize_sized(reader, size).map(Self::Blob),
        }
    }

    pub fn try_into_blob(self, oid: Oid) -> HoardResult<Blob> {
        match self {
            Self::Blob(blob) => Ok(blob),
            obj => bail!(HoardError::BadObjectType(oid, obj.obj_type())),
        }
    }

    pub fn try_into_tree(self, oid: Oid) -> HoardResult<Tree> {
        match self {
            Self::Tree(tree) => Ok(tree),
            obj => bail!(HoardError::BadObjectType(oid, obj.obj_type())),
        }
    }

    pub fn try_into_commit(self, oid: Oid) -> HoardResult<Commit> {
        match self {
            Self::Commit(commit) => Ok(commit),
            obj => bail!(HoardError::BadObjectType(oid, obj.obj_type())),
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob(..))
    }
}

impl Serialize for ObjKind {
    fn serialize(&self, writer: &mut dyn Write) -> HoardResult<()> {
        match self {
            ObjKind::Blob(blob) => blob.serialize(writer),
            ObjKind::Tree(tree) => tree.serialize(writer),
            ObjKind::Commit(commit) => commit.serialize(writer),
        }
    }
}

impl WritableObject for ObjKind {
    fn obj_ty(&self) -> ObjType {
        self.obj_type()
    }
}

pub trait WritableObject: Serialize {
    fn obj_ty(&self) -> ObjType;

    /// serialize objects with the header of `<type> <size>\0`
    fn serialize_with_headers(&self) -> HoardResult<Vec<u8>> {
        let mut buf = vec![];
        write!(buf, "{} ", self.obj_ty())?;
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        write!(buf, "{}\0", bytes.len())?;
        buf.extend_from_slice(&bytes);
        Ok(buf)
    }
}

pub(crate) fn read_obj_header(reader: &mut impl BufRead) -> HoardResult<ObjHeader> {
    let obj_type = reader.read_ascii_until(0x20)?;
    let size = reader.read_ascii_until::<u64>(0x00)?;
    Ok(ObjHeader { obj_type, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_obj_header() -> HoardResult<()> {
        let mut reader = std::io::BufReader::new(&b"blob 5\0hello"[..]);
        let header = read_obj_header(&mut reader)?;
        assert_eq!(header, ObjHeader { obj_type: ObjType::Blob, size: 5 });
        Ok(())
    }

    #[test]
    fn canonicalize_mode_t() -> HoardResult<()> {
        assert_eq!(FileMode::from_mode_t(0o100644)?, FileMode::REG);
        assert_eq!(FileMode::from_mode_t(0o100755)?, FileMode::EXEC);
        assert_eq!(FileMode::from_mode_t(0o644)?, FileMode::REG);
        assert_eq!(FileMode::from_mode_t(0o40755)?, FileMode::TREE);
        assert_eq!(FileMode::from_mode_t(0o120777)?, FileMode::LINK);
        Ok(())
    }
}
