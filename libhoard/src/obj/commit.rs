use crate::error::HoardResult;
use crate::hash::Oid;
use crate::obj::{ObjType, WritableObject};
use crate::serialize::{DeserializeSized, Serialize};
use crate::signature::HoardSignature;
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::io::{prelude::*, BufRead};

/// root-tree hash, ordered parent hashes and metadata
#[derive(PartialEq, Clone, Debug)]
pub struct Commit {
    pub tree: Oid,
    pub parents: SmallVec<[Oid; 2]>,
    pub author: HoardSignature,
    pub committer: HoardSignature,
    pub message: String,
}

impl Commit {
    pub fn commit_time(&self) -> i64 {
        self.committer.time.epoch_secs()
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut buf = vec![];
        self.serialize(&mut buf).map_err(|_| fmt::Error)?;
        write!(f, "{}", String::from_utf8_lossy(&buf))
    }
}

impl Serialize for Commit {
    fn serialize(&self, writer: &mut dyn Write) -> HoardResult<()> {
        writeln!(writer, "tree {}", self.tree)?;
        for parent in &self.parents {
            writeln!(writer, "parent {}", parent)?;
        }
        writeln!(writer, "author {}", self.author)?;
        writeln!(writer, "committer {}", self.committer)?;
        writeln!(writer)?;
        write!(writer, "{}", self.message)?;
        Ok(())
    }
}

impl DeserializeSized for Commit {
    fn deserialize_sized(r: &mut impl BufRead, size: u64) -> HoardResult<Self> {
        let mut lines = r.take(size).lines();

        let mut tree = None;
        let mut parents = SmallVec::new();
        let mut author = None;
        let mut committer = None;

        for line in &mut lines {
            let line = line?;
            // everything after the blank line is the message
            if line.is_empty() {
                break;
            }
            // continuation lines belong to attributes we don't keep (e.g. gpgsig)
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) =
                line.split_once(' ').ok_or_else(|| anyhow!("malformed commit line `{}`", line))?;
            match key {
                "tree" => tree = Some(value.parse()?),
                "parent" => parents.push(value.parse()?),
                "author" => author = Some(value.parse()?),
                "committer" => committer = Some(value.parse()?),
                // tolerate attributes we don't understand
                _ => continue,
            }
        }

        let message = lines.collect::<Result<Vec<_>, _>>()?.join("\n");

        Ok(Self {
            tree: tree.ok_or_else(|| anyhow!("commit missing `tree` attribute"))?,
            parents,
            author: author.ok_or_else(|| anyhow!("commit missing `author` attribute"))?,
            committer: committer.ok_or_else(|| anyhow!("commit missing `committer` attribute"))?,
            message,
        })
    }
}

impl WritableObject for Commit {
    fn obj_ty(&self) -> ObjType {
        ObjType::Commit
    }
}
