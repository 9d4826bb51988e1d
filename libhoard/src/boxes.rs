use crate::dir::{insert_at, lookup, remove_at};
use crate::error::{HoardError, HoardErrorExt, HoardResult};
use crate::node::{DirRef, Node};
use crate::obj::FileMode;
use crate::path::TreePath;
use crate::record::{self, Record, AUTO_COMMIT_MESSAGE, MERGE_COMMIT_MESSAGE};
use crate::refs::{self, STORAGES_PREFIX};
use crate::storage::Storage;
use crate::Oid;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// an open file handle; cleared wholesale when a fast-forward replaces head
#[derive(Clone)]
pub struct OpenHandle {
    pub mode: FileMode,
    pub node: Node,
}

struct BoxInner {
    /// the in-flight working record, lazily created on first mutation
    working: Option<Record>,
    /// a past record pinned for read-only viewing
    view: Option<Record>,
    handles: FxHashMap<u64, OpenHandle>,
    next_fd: u64,
}

/// a named branch head: holds the single in-flight working record and
/// serializes every head transition under one lock
pub struct HoardBox {
    storage: Storage,
    name: String,
    // guards the working record, head transitions and the handle table;
    // nothing in here takes another box's lock
    inner: Mutex<BoxInner>,
}

impl HoardBox {
    pub(crate) fn new(storage: Storage, name: String) -> Self {
        Self {
            storage,
            name,
            inner: Mutex::new(BoxInner {
                working: None,
                view: None,
                handles: FxHashMap::default(),
                next_fd: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn ref_name(&self) -> HoardResult<String> {
        Ok(refs::box_ref(self.storage.id()?, &self.name))
    }

    /// the committed head as read from `refs/storages/<self-id>/<name>`
    pub fn head_oid(&self) -> HoardResult<Option<Oid>> {
        self.storage.refdb()?.read(&self.ref_name()?)
    }

    pub fn head(&self) -> HoardResult<Record> {
        match self.head_oid()? {
            Some(oid) => Record::from_oid(self.storage.clone(), oid),
            None => bail!(HoardError::NoRecord(self.name.clone())),
        }
    }

    /// `false` while pinned on a past record via [`Self::checkout`]
    pub fn is_writable(&self) -> bool {
        self.inner.lock().view.is_none()
    }

    /// pin the box on a past record for read-only viewing, or return to the
    /// live head with `None`
    pub fn checkout(&self, record: Option<Oid>) -> HoardResult<()> {
        // seal pending changes first so nothing silently disappears
        self.commit()?;
        let mut inner = self.inner.lock();
        inner.view = match record {
            Some(oid) => Some(Record::from_oid(self.storage.clone(), oid)?),
            None => None,
        };
        inner.handles.clear();
        inner.working = None;
        Ok(())
    }

    fn working<'a>(&self, inner: &'a mut BoxInner) -> HoardResult<&'a mut Record> {
        if inner.working.is_none() {
            let record = match self.head_oid()? {
                Some(head) =>
                    Record::child_of(self.storage.clone(), head, AUTO_COMMIT_MESSAGE)?,
                None => Record::new(self.storage.clone()),
            };
            inner.working = Some(record);
        }
        Ok(inner.working.as_mut().unwrap_or_else(|| bug!("working record just created")))
    }

    /// the root directory this box currently exposes
    pub fn root(&self) -> HoardResult<DirRef> {
        let mut inner = self.inner.lock();
        if let Some(view) = &inner.view {
            return Ok(view.root());
        }
        Ok(self.working(&mut inner)?.root())
    }

    fn ensure_writable(&self) -> HoardResult<()> {
        ensure!(self.is_writable(), HoardError::ReadOnly);
        Ok(())
    }

    // ===== path-level tree api =====

    pub fn get(&self, path: &TreePath) -> HoardResult<(FileMode, Node)> {
        lookup(&self.root()?, path)
    }

    pub fn set(&self, path: &TreePath, mode: FileMode, node: Node) -> HoardResult<()> {
        self.ensure_writable()?;
        insert_at(&self.root()?, path, mode, node)
    }

    pub fn del(&self, path: &TreePath) -> HoardResult<()> {
        self.ensure_writable()?;
        remove_at(&self.root()?, path)
    }

    // ===== open file handles =====

    pub fn open_handle(&self, mode: FileMode, node: Node) -> u64 {
        let mut inner = self.inner.lock();
        let fd = inner.next_fd;
        inner.next_fd += 1;
        inner.handles.insert(fd, OpenHandle { mode, node });
        fd
    }

    pub fn handle(&self, fd: u64) -> HoardResult<OpenHandle> {
        self.inner
            .lock()
            .handles
            .get(&fd)
            .cloned()
            .ok_or_else(|| anyhow!("unknown file handle `{}`", fd))
    }

    pub fn release_handle(&self, fd: u64) {
        self.inner.lock().handles.remove(&fd);
    }

    // ===== commit & head transitions =====

    /// seal the working record into an immutable commit and advance the ref;
    /// returns the new head oid, or `None` when there was nothing to commit
    pub fn commit(&self) -> HoardResult<Option<Oid>> {
        let mut inner = self.inner.lock();
        let mut working = match inner.working.take() {
            Some(working) => working,
            None => return Ok(None),
        };

        let working_tree = working.store_root()?;

        let head = self.head_oid()?;
        // a virgin box whose working record was only ever read has nothing
        // to seal
        if head.is_none() && working.parents().is_empty() && working_tree == Oid::EMPTY_TREE {
            return Ok(None);
        }

        // discard the working record unless its tree differs from head's and
        // from every parent's
        let mut known_trees = vec![];
        if let Some(head) = head {
            known_trees.push(self.storage.read_commit(head)?.tree);
        }
        for &parent in working.parents() {
            known_trees.push(self.storage.read_commit(parent)?.tree);
        }
        if known_trees.contains(&working_tree) {
            debug!("HoardBox::commit() :: tree unchanged, discarding working record");
            return Ok(None);
        }

        working.update_timestamp();
        let oid = working.store()?;
        info!("HoardBox::commit() :: box `{}` -> {}", self.name, oid);
        self.set_head_inner(&mut inner, oid, 0)?;
        self.storage.notify_sync();
        Ok(Some(oid))
    }

    /// move the head to the stored record `candidate` per the head-setter
    /// rules: initialize, no-op, fast-forward, reject rewinds, or merge
    pub fn set_head(&self, candidate: Oid) -> HoardResult<()> {
        let mut inner = self.inner.lock();
        self.set_head_inner(&mut inner, candidate, 0)
    }

    fn set_head_inner(
        &self,
        inner: &mut BoxInner,
        candidate: Oid,
        attempt: u32,
    ) -> HoardResult<()> {
        let storage = &self.storage;
        let ref_name = self.ref_name()?;
        let head = storage.refdb()?.read(&ref_name)?;

        let (expected, new_head, reset_handles) = match head {
            None => (None, candidate, false),
            Some(head) if head == candidate => return Ok(()),
            Some(head) if record::is_ancestor_of(storage, head, candidate)? => {
                // fast-forward; open handles hold stale state
                (Some(head), candidate, true)
            }
            Some(head) if record::is_ancestor_of(storage, candidate, head)? =>
                bail!(HoardError::CannotGoBackInTime),
            Some(head) => {
                // divergent: synthesize a merge record from head
                let mut merged =
                    Record::child_of(storage.clone(), head, MERGE_COMMIT_MESSAGE)?;
                merged.merge(candidate)?;
                merged.update_timestamp();
                let merged_oid = merged.store()?;
                debug!(
                    "HoardBox::set_head() :: merged `{}` and `{}` into `{}`",
                    head, candidate, merged_oid
                );
                (Some(head), merged_oid, true)
            }
        };

        if storage.refdb()?.set_if_equals(&ref_name, expected, new_head)? {
            if reset_handles {
                inner.handles.clear();
            }
            return Ok(());
        }

        // the ref moved underneath us; re-read head and re-run the merge
        // path, but only once
        ensure!(attempt == 0, "box `{}` head keeps moving concurrently", self.name);
        self.set_head_inner(inner, candidate, attempt + 1)
    }

    /// adopt the records published for this box name by any storage, most
    /// recent `commit_time` first; rewinds and unrelated histories are
    /// skipped, everything else fast-forwards or merges
    pub fn update_from_remotes(&self) -> HoardResult<()> {
        let storage = &self.storage;
        let suffix = format!("/{}", self.name);
        let mut candidates = vec![];
        for (ref_name, oid) in storage.refdb()?.iter_prefix(STORAGES_PREFIX)? {
            if !ref_name.ends_with(&suffix) {
                continue;
            }
            let commit_time = storage.read_commit(oid)?.commit_time();
            candidates.push((commit_time, oid));
        }
        // commit times have second granularity, so ties are common; the oid
        // tie-break only makes the order deterministic
        candidates.sort_by_key(|&(commit_time, oid)| std::cmp::Reverse((commit_time, oid)));
        candidates.dedup_by_key(|&mut (_, oid)| oid);

        for (_, candidate) in candidates {
            match self.set_head(candidate) {
                Ok(()) => {}
                Err(err) => match err.try_into_hoard_error() {
                    Ok(
                        skip @ (HoardError::CannotGoBackInTime | HoardError::UnrelatedHistories),
                    ) => {
                        info!(
                            "box `{}` skipping remote record `{}`: {}",
                            self.name, candidate, skip
                        );
                        continue;
                    }
                    Ok(other) => return Err(anyhow!(other)),
                    Err(err) => return Err(err),
                },
            }
        }

        if let Some(head) = self.head_oid()? {
            if storage.config()?.box_options(&self.name).prefetch {
                if let Err(err) = storage.fetch_blobs_for(head) {
                    warn!("box `{}` blob prefetch failed: {}", self.name, err);
                }
            }
        }
        Ok(())
    }

    /// newest-first first-parent history of the head:
    /// `(oid, commit-time, message)`
    pub fn log(&self) -> HoardResult<Vec<(Oid, i64, String)>> {
        let mut entries = vec![];
        let mut cursor = self.head_oid()?;
        while let Some(oid) = cursor {
            let commit = self.storage.read_commit(oid)?;
            entries.push((oid, commit.commit_time(), commit.message.clone()));
            cursor = commit.parents.first().copied();
        }
        Ok(entries)
    }
}

/// commits a box every `interval`; stops when dropped
pub struct TimeCommitter {
    stop_tx: crossbeam_channel::Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TimeCommitter {
    pub fn spawn(hoard_box: Arc<HoardBox>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let handle = std::thread::Builder::new()
            .name(format!("hoard-committer-{}", hoard_box.name()))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if let Err(err) = hoard_box.commit() {
                            warn!("periodic commit of `{}` failed: {}", hoard_box.name(), err);
                        }
                    }
                }
            })
            .unwrap_or_else(|err| panic!("failed to spawn committer thread: {}", err));
        Self { stop_tx, handle: Some(handle) }
    }
}

impl Drop for TimeCommitter {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests;
