use crate::error::HoardResult;
use crate::hash::{Oid, OID_SIZE};
use crate::io::BufReadExt;
use crate::obj::{FileMode, ObjType, WritableObject};
use crate::serialize::{Deserialize, DeserializeSized, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::io::{prelude::*, BufRead};

/// sorted sequence of `(name, mode, child-hash)`
#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct Tree {
    pub entries: BTreeSet<TreeEntry>,
}

impl Tree {
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<TreeEntry> {
        let entry = self.entry(name)?.clone();
        self.entries.take(&entry)
    }

    /// insert an entry, replacing any entry of the same name
    pub fn add_entry(&mut self, entry: TreeEntry) {
        self.entries.replace(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Tree {
    fn serialize(&self, writer: &mut dyn Write) -> HoardResult<()> {
        for entry in &self.entries {
            entry.serialize(writer)?;
        }
        Ok(())
    }
}

impl DeserializeSized for Tree {
    fn deserialize_sized(r: &mut impl BufRead, size: u64) -> HoardResult<Self> {
        let mut take = r.take(size);
        let mut tree = Self::default();
        while !take.is_at_eof()? {
            let entry = TreeEntry::deserialize(&mut take)?;
            tree.entries.insert(entry);
        }
        Ok(tree)
    }
}

impl WritableObject for Tree {
    fn obj_ty(&self) -> ObjType {
        ObjType::Tree
    }
}

#[derive(PartialEq, Debug, Clone, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub oid: Oid,
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_name().cmp(&other.sort_name())
    }
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<String>, oid: Oid) -> Self {
        Self { mode, name: name.into(), oid }
    }

    // git sorts directories as if their name had a trailing slash
    // i.e. `index.rs` < `index/`
    fn sort_name(&self) -> String {
        if self.mode == FileMode::TREE { format!("{}/", self.name) } else { self.name.clone() }
    }
}

impl Deserialize for TreeEntry {
    fn deserialize(r: &mut impl BufRead) -> HoardResult<Self> {
        let mut buf = vec![];
        let i = r.read_until(0x20, &mut buf)?;
        let mode: FileMode = std::str::from_utf8(&buf[..i - 1])?.parse()?;

        let j = r.read_until(0x00, &mut buf)?;
        let name = std::str::from_utf8(&buf[i..i + j - 1])?.to_owned();

        let mut oid_bytes = [0; OID_SIZE];
        r.read_exact(&mut oid_bytes)?;
        Ok(Self { mode, name, oid: Oid::new(oid_bytes) })
    }
}

impl Serialize for TreeEntry {
    fn serialize(&self, writer: &mut dyn Write) -> HoardResult<()> {
        // use alternate display impl to not pad an extra 0
        write!(writer, "{:#}", self.mode)?;
        writer.write_all(b" ")?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b"\0")?;
        writer.write_all(self.oid.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn entry(mode: FileMode, name: &str) -> TreeEntry {
        TreeEntry::new(mode, name, hash_bytes(name.as_bytes()))
    }

    #[test]
    fn serialize_then_parse_tree() -> HoardResult<()> {
        let mut tree = Tree::default();
        tree.add_entry(entry(FileMode::REG, "a"));
        tree.add_entry(entry(FileMode::TREE, "dir"));
        tree.add_entry(entry(FileMode::LINK, "link"));

        let mut bytes = vec![];
        tree.serialize(&mut bytes)?;
        let parsed = Tree::deserialize_from_slice(&bytes)?;
        assert_eq!(tree, parsed);
        Ok(())
    }

    #[test]
    fn tree_entry_sort_order_puts_files_before_subdirectory_contents() {
        let mut tree = Tree::default();
        tree.add_entry(entry(FileMode::TREE, "index"));
        tree.add_entry(entry(FileMode::REG, "index.rs"));
        let names = tree.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["index.rs", "index"]);
    }

    #[test]
    fn add_entry_replaces_same_name() {
        let mut tree = Tree::default();
        tree.add_entry(entry(FileMode::REG, "a"));
        tree.add_entry(TreeEntry::new(FileMode::REG, "a", hash_bytes(b"other")));
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.entry("a").unwrap().oid, hash_bytes(b"other"));
    }
}
