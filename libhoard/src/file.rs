use crate::error::HoardResult;
use crate::split;
use crate::storage::Storage;
use crate::Oid;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// the serialized block list of a file, stored as a blob
///
/// the concatenation of the blocks, in order, equals the file's logical
/// content
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Manifest {
    pub blocks: Vec<(u64, String)>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> HoardResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn block_oids(&self) -> HoardResult<Vec<Oid>> {
        self.blocks.iter().map(|(_, hex)| Oid::from_str(hex)).collect()
    }
}

#[derive(Debug, Clone)]
enum Block {
    /// contents live in the object store
    Stored { size: u64, oid: Oid },
    /// contents loaded from the store, unmodified
    Cached { oid: Oid, bytes: Vec<u8> },
    /// contents modified in memory since the last flush
    Dirty { bytes: Vec<u8> },
}

impl Block {
    fn len(&self) -> u64 {
        match self {
            Block::Stored { size, .. } => *size,
            Block::Cached { bytes, .. } | Block::Dirty { bytes } => bytes.len() as u64,
        }
    }

    fn oid(&self) -> Option<Oid> {
        match self {
            Block::Stored { oid, .. } | Block::Cached { oid, .. } => Some(*oid),
            Block::Dirty { .. } => None,
        }
    }
}

/// a rope over content-defined blocks; a flat vector is plenty since files
/// rarely have more than a few thousand blocks
#[derive(Debug, Default, Clone)]
struct Rope {
    blocks: Vec<Block>,
}

impl Rope {
    fn len(&self) -> u64 {
        self.blocks.iter().map(Block::len).sum()
    }

    /// index of the block containing `offset` and the offset within it;
    /// `(len(blocks), 0)` when `offset` is at or past the end
    fn locate(&self, offset: u64) -> (usize, u64) {
        let mut start = 0;
        for (idx, block) in self.blocks.iter().enumerate() {
            let end = start + block.len();
            if offset < end {
                return (idx, offset - start);
            }
            start = end;
        }
        (self.blocks.len(), 0)
    }

    fn materialize(&mut self, storage: &Storage, idx: usize) -> HoardResult<&Vec<u8>> {
        if let Block::Stored { oid, size } = self.blocks[idx] {
            let bytes = storage.read_blob(oid)?;
            ensure_eq!(bytes.len() as u64, size, "block `{}` has wrong size", oid);
            self.blocks[idx] = Block::Cached { oid, bytes };
        }
        match &self.blocks[idx] {
            Block::Cached { bytes, .. } | Block::Dirty { bytes } => Ok(bytes),
            Block::Stored { .. } => unreachable!(),
        }
    }

    fn read_at(&mut self, storage: &Storage, offset: u64, n: u64) -> HoardResult<Vec<u8>> {
        let len = self.len();
        if offset >= len {
            return Ok(vec![]);
        }
        let n = n.min(len - offset) as usize;
        let (mut idx, mut off) = self.locate(offset);
        let mut out = Vec::with_capacity(n);
        while out.len() < n && idx < self.blocks.len() {
            let bytes = self.materialize(storage, idx)?;
            let take = (n - out.len()).min(bytes.len() - off as usize);
            out.extend_from_slice(&bytes[off as usize..off as usize + take]);
            off = 0;
            idx += 1;
        }
        Ok(out)
    }

    fn write_at(&mut self, storage: &Storage, offset: u64, data: &[u8]) -> HoardResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = self.len();
        if offset >= len {
            // writing past the end zero-fills the gap like posix does
            if offset > len {
                self.blocks.push(Block::Dirty { bytes: vec![0; (offset - len) as usize] });
            }
            self.blocks.push(Block::Dirty { bytes: data.to_vec() });
            return Ok(());
        }

        let end = offset + data.len() as u64;
        let (first_idx, first_off) = self.locate(offset);

        let mut merged = Vec::with_capacity(first_off as usize + data.len());
        if first_off > 0 {
            let bytes = self.materialize(storage, first_idx)?;
            merged.extend_from_slice(&bytes[..first_off as usize]);
        }
        merged.extend_from_slice(data);

        // consume fully covered blocks, keeping the tail of the last one
        let mut idx = first_idx;
        let mut block_start = offset - first_off;
        while idx < self.blocks.len() && block_start < end {
            let block_end = block_start + self.blocks[idx].len();
            if block_end > end {
                let bytes = self.materialize(storage, idx)?;
                merged.extend_from_slice(&bytes[(end - block_start) as usize..]);
            }
            block_start = block_end;
            idx += 1;
        }

        self.blocks.splice(first_idx..idx, std::iter::once(Block::Dirty { bytes: merged }));
        Ok(())
    }

    fn truncate(&mut self, storage: &Storage, size: u64) -> HoardResult<()> {
        let len = self.len();
        if size >= len {
            if size > len {
                self.blocks.push(Block::Dirty { bytes: vec![0; (size - len) as usize] });
            }
            return Ok(());
        }
        if size == 0 {
            self.blocks.clear();
            return Ok(());
        }
        let (idx, off) = self.locate(size);
        if off == 0 {
            self.blocks.truncate(idx);
        } else {
            let bytes = self.materialize(storage, idx)?;
            let kept = bytes[..off as usize].to_vec();
            self.blocks.truncate(idx);
            self.blocks.push(Block::Dirty { bytes: kept });
        }
        Ok(())
    }
}

/// a manifest-backed file: lazily loaded blocks, in-memory mutation and a
/// flush that re-splits only from the lowest modified offset onward
pub struct File {
    storage: Storage,
    rope: Rope,
    pos: u64,
    /// lowest byte offset modified since the last flush
    lmo: Option<u64>,
    mtime: i64,
    /// oid of the stored manifest while the rope is clean
    manifest_oid: Option<Oid>,
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl File {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            rope: Rope::default(),
            pos: 0,
            lmo: None,
            mtime: unix_now(),
            manifest_oid: None,
        }
    }

    /// reconstruct a file from its stored manifest blob
    pub fn from_manifest(storage: Storage, oid: Oid) -> HoardResult<Self> {
        let manifest = Manifest::parse(&storage.read_blob(oid)?)?;
        let blocks = manifest
            .blocks
            .iter()
            .map(|(size, hex)| Ok(Block::Stored { size: *size, oid: Oid::from_str(hex)? }))
            .collect::<HoardResult<Vec<_>>>()?;
        Ok(Self {
            storage,
            rope: Rope { blocks },
            pos: 0,
            lmo: None,
            mtime: unix_now(),
            manifest_oid: Some(oid),
        })
    }

    pub fn len(&self) -> u64 {
        self.rope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn set_mtime(&mut self, mtime: i64) {
        self.mtime = mtime;
    }

    pub fn seek(&mut self, offset: u64) {
        self.pos = offset;
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn read(&mut self, n: u64) -> HoardResult<Vec<u8>> {
        let out = self.read_at(self.pos, n)?;
        self.pos += out.len() as u64;
        Ok(out)
    }

    pub fn read_at(&mut self, offset: u64, n: u64) -> HoardResult<Vec<u8>> {
        let storage = self.storage.clone();
        self.rope.read_at(&storage, offset, n)
    }

    pub fn read_all(&mut self) -> HoardResult<Vec<u8>> {
        self.read_at(0, self.len())
    }

    pub fn write(&mut self, data: &[u8]) -> HoardResult<usize> {
        let pos = self.pos;
        let n = self.write_at(pos, data)?;
        self.pos += n as u64;
        Ok(n)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> HoardResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let storage = self.storage.clone();
        // a write past the end modifies everything from the old end onward
        let modified_from = offset.min(self.len());
        self.rope.write_at(&storage, offset, data)?;
        self.touch(modified_from);
        Ok(data.len())
    }

    pub fn truncate(&mut self, size: u64) -> HoardResult<()> {
        if size == self.len() {
            return Ok(());
        }
        let storage = self.storage.clone();
        let modified_from = size.min(self.len());
        self.rope.truncate(&storage, size)?;
        self.touch(modified_from);
        Ok(())
    }

    fn touch(&mut self, offset: u64) {
        self.lmo = Some(self.lmo.map_or(offset, |lmo| lmo.min(offset)));
        self.mtime = unix_now();
        self.manifest_oid = None;
    }

    /// blocks currently referenced by this file; dirty blocks have no oid yet
    pub fn block_oids(&self) -> Vec<Oid> {
        self.rope.blocks.iter().filter_map(Block::oid).collect()
    }

    /// the number of leading blocks a flush would preserve
    #[cfg(test)]
    pub(crate) fn unchanged_prefix_blocks(&self) -> usize {
        match self.lmo {
            Some(lmo) => self.rope.locate(lmo).0,
            None => self.rope.blocks.len(),
        }
    }

    /// flush the file: preserve blocks before the one containing the lowest
    /// modified offset, re-split the rest, store the blocks and the manifest,
    /// and anchor every referenced block under `refs/blobs/`
    pub fn store(&mut self) -> HoardResult<Oid> {
        let lmo = match self.lmo {
            Some(lmo) => lmo,
            None => match self.manifest_oid {
                Some(oid) => return Ok(oid),
                // a fresh file that was never written still needs its manifest stored
                None => 0,
            },
        };

        let storage = self.storage.clone();
        let (keep_idx, _) = self.rope.locate(lmo);

        let mut manifest_blocks = Vec::with_capacity(self.rope.blocks.len());
        for block in &self.rope.blocks[..keep_idx] {
            match block.oid() {
                Some(oid) => manifest_blocks.push((block.len(), oid)),
                None => bug!("dirty block below the lowest modified offset"),
            }
        }

        let mut tail = vec![];
        for idx in keep_idx..self.rope.blocks.len() {
            tail.extend_from_slice(self.rope.materialize(&storage, idx)?);
        }

        let mut new_blocks = self.rope.blocks[..keep_idx].to_vec();
        for chunk in split::split(&tail) {
            let oid = storage.put_blob(chunk.to_vec())?;
            manifest_blocks.push((chunk.len() as u64, oid));
            new_blocks.push(Block::Cached { oid, bytes: chunk.to_vec() });
        }
        self.rope.blocks = new_blocks;

        for &(_, oid) in &manifest_blocks {
            storage.anchor_blob(oid)?;
        }

        let manifest = Manifest {
            blocks: manifest_blocks.into_iter().map(|(size, oid)| (size, oid.to_hex())).collect(),
        };
        let oid = storage.put_blob(serde_json::to_vec(&manifest)?)?;

        self.lmo = None;
        self.manifest_oid = Some(oid);
        trace!("File::store() -> {}", oid);
        Ok(oid)
    }
}

/// a symlink is a file whose content is the link target
pub struct Symlink {
    file: File,
}

impl Symlink {
    pub fn new(storage: Storage, target: &str) -> HoardResult<Self> {
        let mut file = File::new(storage);
        file.write_at(0, target.as_bytes())?;
        Ok(Self { file })
    }

    pub fn from_manifest(storage: Storage, oid: Oid) -> HoardResult<Self> {
        Ok(Self { file: File::from_manifest(storage, oid)? })
    }

    pub fn target(&mut self) -> HoardResult<String> {
        Ok(String::from_utf8_lossy(&self.file.read_all()?).into_owned())
    }

    pub fn set_target(&mut self, target: &str) -> HoardResult<()> {
        self.file.truncate(0)?;
        self.file.write_at(0, target.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    pub fn mtime(&self) -> i64 {
        self.file.mtime()
    }

    pub fn block_oids(&self) -> Vec<Oid> {
        self.file.block_oids()
    }

    pub fn store(&mut self) -> HoardResult<Oid> {
        self.file.store()
    }
}
