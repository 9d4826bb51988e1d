use crate::boxes::HoardBox;
use crate::config::HoardConfig;
use crate::dir::Directory;
use crate::error::{HoardError, HoardResult, HoardResultExt};
use crate::obj::{Blob, Commit, ObjKind, Tree, WritableObject};
use crate::odb::Odb;
use crate::refs::{self, RefDb, CONFIG_REF, ID_REF, STORAGES_PREFIX};
use crate::remote::Remote;
use crate::signature::HoardSignature;
use crate::sync::{SyncEvent, Syncer};
use crate::Oid;
use crossbeam_channel::{Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const OBJECTS_DIR: &str = "objects";

/// a cheap copyable handle over a storage context
///
/// every component receives one of these explicitly; there are no global
/// singletons
#[derive(Clone)]
pub struct Storage {
    ctxt: Arc<StorageCtxt>,
}

impl PartialEq for Storage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ctxt, &other.ctxt)
    }
}

pub struct StorageCtxt {
    path: PathBuf,
    odb_cell: OnceCell<Odb>,
    refdb_cell: OnceCell<RefDb>,
    id_cell: OnceCell<String>,
    signature_cell: OnceCell<(String, String)>,
    boxes: RwLock<FxHashMap<String, Arc<HoardBox>>>,
    remotes: RwLock<Vec<Remote>>,
    sync_tx: Sender<SyncEvent>,
    sync_rx: Receiver<SyncEvent>,
}

impl Deref for Storage {
    type Target = StorageCtxt;

    fn deref(&self) -> &Self::Target {
        &self.ctxt
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.path).finish_non_exhaustive()
    }
}

impl StorageCtxt {
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn odb(&self) -> HoardResult<&Odb> {
        self.odb_cell.get_or_try_init(|| Odb::new(self.path.join(OBJECTS_DIR)))
    }

    pub fn refdb(&self) -> HoardResult<&RefDb> {
        self.refdb_cell.get_or_try_init(|| RefDb::new(self.path.clone()))
    }
}

impl Storage {
    /// open (creating as needed) the storage at `path` and register the
    /// remotes found in its configuration
    pub fn open(path: impl AsRef<Path>) -> HoardResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let (sync_tx, sync_rx) = crossbeam_channel::unbounded();
        let storage = Self {
            ctxt: Arc::new(StorageCtxt {
                path,
                odb_cell: OnceCell::new(),
                refdb_cell: OnceCell::new(),
                id_cell: OnceCell::new(),
                signature_cell: OnceCell::new(),
                boxes: RwLock::default(),
                remotes: RwLock::default(),
                sync_tx,
                sync_rx,
            }),
        };
        // force the layout into existence early so failures surface here
        storage.odb()?;
        storage.refdb()?;
        for (name, options) in storage.config()?.remotes {
            storage.register_remote(Remote::new(name, options.url, options.weight)?);
        }
        info!("opened storage `{}` with id {}", storage.path().display(), storage.id()?);
        Ok(storage)
    }

    /// the per-user default storage directory per the xdg base-dir convention
    pub fn default_path() -> PathBuf {
        dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("hoard")
    }

    /// the uuid persisted at `refs/tags/id`, generated on first access
    pub fn id(&self) -> HoardResult<&str> {
        self.id_cell.get_or_try_init(|| self.load_or_generate_id()).map(String::as_str)
    }

    fn load_or_generate_id(&self) -> HoardResult<String> {
        match self.refdb()?.read(ID_REF)? {
            Some(oid) => {
                let bytes = self.read_blob_local(oid)?;
                Ok(String::from_utf8(bytes)?.trim().to_owned())
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let oid = self.put_blob(id.clone().into_bytes())?;
                self.refdb()?.write(ID_REF, oid)?;
                Ok(id)
            }
        }
    }

    /// the author identity used for auto-commits
    pub fn signature(&self) -> HoardSignature {
        let (name, email) = self.signature_cell.get_or_init(|| {
            let user = whoami::username();
            let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_owned());
            (user.clone(), format!("{}@{}", user, host))
        });
        HoardSignature::new(name.clone(), email.clone())
    }

    pub fn committer_signature(&self) -> HoardSignature {
        HoardSignature::new("hoard", "hoard@localhost")
    }

    // ===== object access =====

    /// read an object, routing a local miss to the remotes in descending
    /// weight order; a fetched blob is anchored under `refs/blobs/`
    pub fn get(&self, oid: Oid) -> HoardResult<ObjKind> {
        match self.odb()?.read(oid) {
            Ok(obj) => Ok(obj),
            Err(err) if err.is_not_found_err() => self.fetch_object(oid),
            Err(err) => Err(err),
        }
    }

    fn fetch_object(&self, oid: Oid) -> HoardResult<ObjKind> {
        debug!("Storage::fetch_object(oid: {})", oid);
        // push/fetch may re-enter here while already holding the read lock
        let remotes = self.remotes.read_recursive();
        for remote in remotes.iter() {
            match remote.fetch_oids(self, &[oid]) {
                Ok(()) => match self.odb()?.read(oid) {
                    Ok(obj) => {
                        if obj.is_blob() {
                            self.anchor_blob(oid)?;
                        }
                        return Ok(obj);
                    }
                    Err(err) => {
                        warn!("remote `{}` claimed success but `{}` is still missing: {}", remote.name(), oid, err);
                        continue;
                    }
                },
                Err(err) => {
                    warn!("fetching `{}` from remote `{}` failed: {}", oid, remote.name(), err);
                    continue;
                }
            }
        }
        bail!(HoardError::FetchError(oid))
    }

    pub fn has(&self, oid: Oid) -> HoardResult<bool> {
        self.odb()?.exists(oid)
    }

    pub fn put_obj(&self, obj: &dyn WritableObject) -> HoardResult<Oid> {
        self.odb()?.write(obj)
    }

    pub fn put_blob(&self, bytes: Vec<u8>) -> HoardResult<Oid> {
        self.put_obj(&Blob::new(bytes))
    }

    pub fn read_blob(&self, oid: Oid) -> HoardResult<Vec<u8>> {
        Ok(self.get(oid)?.try_into_blob(oid)?.into_bytes())
    }

    /// like [`Self::read_blob`] but never touches the network
    fn read_blob_local(&self, oid: Oid) -> HoardResult<Vec<u8>> {
        Ok(self.odb()?.read(oid)?.try_into_blob(oid)?.into_bytes())
    }

    pub fn read_tree(&self, oid: Oid) -> HoardResult<Tree> {
        self.get(oid)?.try_into_tree(oid)
    }

    pub fn read_commit(&self, oid: Oid) -> HoardResult<Commit> {
        self.get(oid)?.try_into_commit(oid)
    }

    /// anchor a blob under `refs/blobs/<hash>` so it stays reachable and
    /// enumerable
    pub fn anchor_blob(&self, oid: Oid) -> HoardResult<()> {
        let name = refs::blob_ref(oid);
        if !self.refdb()?.exists(&name)? {
            self.refdb()?.write(&name, oid)?;
        }
        Ok(())
    }

    // ===== boxes =====

    /// get or create the box named `name`
    pub fn open_box(&self, name: &str) -> HoardResult<Arc<HoardBox>> {
        ensure!(
            !name.is_empty() && !name.contains('/') && !name.starts_with('.'),
            "invalid box name `{}`",
            name
        );
        if let Some(existing) = self.boxes.read().get(name) {
            return Ok(Arc::clone(existing));
        }
        let mut boxes = self.boxes.write();
        // racing openers may have created it while we upgraded the lock
        if let Some(existing) = boxes.get(name) {
            return Ok(Arc::clone(existing));
        }
        let hoard_box = Arc::new(HoardBox::new(self.clone(), name.to_owned()));
        boxes.insert(name.to_owned(), Arc::clone(&hoard_box));
        Ok(hoard_box)
    }

    pub fn open_boxes(&self) -> Vec<Arc<HoardBox>> {
        self.boxes.read().values().cloned().collect()
    }

    /// box names known to this storage, whether open or only present as refs
    pub fn list_boxes(&self) -> HoardResult<Vec<String>> {
        let prefix = format!("{}{}/", STORAGES_PREFIX, self.id()?);
        let mut names = self
            .refdb()?
            .iter_prefix(&prefix)?
            .into_iter()
            .map(|(name, _)| name[prefix.len()..].to_owned())
            .collect::<Vec<_>>();
        for name in self.boxes.read().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    // ===== configuration =====

    pub fn config(&self) -> HoardResult<HoardConfig> {
        match self.refdb()?.read(CONFIG_REF)? {
            Some(oid) => HoardConfig::parse(&self.read_blob_local(oid)?),
            None => Ok(HoardConfig::default()),
        }
    }

    pub fn set_config(&self, config: &HoardConfig) -> HoardResult<()> {
        let oid = self.put_blob(config.to_bytes()?)?;
        self.refdb()?.write(CONFIG_REF, oid)
    }

    pub fn with_config(&self, f: impl FnOnce(&mut HoardConfig)) -> HoardResult<()> {
        let mut config = self.config()?;
        f(&mut config);
        self.set_config(&config)
    }

    // ===== remotes =====

    /// add a remote and persist it in the configuration
    pub fn add_remote(&self, name: &str, url: &str, weight: i32) -> HoardResult<()> {
        ensure!(
            !self.remotes.read().iter().any(|remote| remote.name() == name),
            "remote `{}` already exists",
            name
        );
        self.register_remote(Remote::new(name.to_owned(), url.to_owned(), weight)?);
        self.with_config(|config| {
            config.remotes.insert(
                name.to_owned(),
                crate::config::RemoteOptions { url: url.to_owned(), weight },
            );
        })
    }

    fn register_remote(&self, remote: Remote) {
        let mut remotes = self.remotes.write();
        remotes.push(remote);
        // selection order across remotes is descending by weight
        remotes.sort_by_key(|remote| std::cmp::Reverse(remote.weight()));
    }

    pub fn remove_remote(&self, name: &str) -> HoardResult<()> {
        let mut remotes = self.remotes.write();
        let len_before = remotes.len();
        remotes.retain(|remote| remote.name() != name);
        ensure!(remotes.len() < len_before, "remote `{}` does not exist", name);
        drop(remotes);
        self.with_config(|config| {
            config.remotes.remove(name);
        })
    }

    /// `(name, url, weight)` of every remote in selection order
    pub fn list_remotes(&self) -> Vec<(String, String, i32)> {
        self.remotes
            .read()
            .iter()
            .map(|remote| (remote.name().to_owned(), remote.url().to_owned(), remote.weight()))
            .collect()
    }

    // ===== synchronisation =====

    /// for each remote, republish our box heads, pass through refs of other
    /// storages, and anchor every reachable blob
    pub fn push(&self) -> HoardResult<()> {
        let remotes = self.remotes.read();
        for remote in remotes.iter() {
            debug!("Storage::push() :: remote = {}", remote.name());
            if let Err(err) = remote.push(self, &|their_refs| self.determine_push_refs(their_refs)) {
                // the syncer will retry on its next trigger
                warn!("push to remote `{}` failed: {}", remote.name(), err);
            }
        }
        Ok(())
    }

    fn determine_push_refs(
        &self,
        their_refs: &indexmap::IndexMap<String, Oid>,
    ) -> HoardResult<indexmap::IndexMap<String, Oid>> {
        let self_id = self.id()?.to_owned();
        let own_prefix = format!("{}{}/", STORAGES_PREFIX, self_id);
        let mut new_refs = their_refs.clone();
        let mut exported_heads = vec![];
        for (name, oid) in self.refdb()?.iter_prefix(STORAGES_PREFIX)? {
            if name.starts_with(&own_prefix) {
                // our own box heads are republished unconditionally; nobody
                // else ever advances them
                exported_heads.push(oid);
                new_refs.insert(name, oid);
            } else if self.advances(their_refs.get(&name).copied(), oid)? {
                // pass through refs of other storages, but never rewind a
                // copy the peer already holds
                new_refs.insert(name, oid);
            }
        }
        // every blob reachable from an exported head that we currently anchor
        for head in exported_heads {
            for block in self.reachable_blocks(head)? {
                let anchor = refs::blob_ref(block);
                if self.refdb()?.exists(&anchor)? {
                    new_refs.insert(anchor, block);
                }
            }
        }
        Ok(new_refs)
    }

    /// whether replacing `current` with `candidate` moves a head ref forward
    /// in the ancestor order; heads are monotone, so anything else is a stale
    /// copy
    fn advances(&self, current: Option<Oid>, candidate: Oid) -> HoardResult<bool> {
        let current = match current {
            None => return Ok(true),
            Some(current) if current == candidate => return Ok(false),
            Some(current) => current,
        };
        // an unverifiable candidate is skipped rather than trusted
        Ok(self.has(current)?
            && self.has(candidate)?
            && crate::record::is_ancestor_of(self, current, candidate)?)
    }

    /// blob blocks reachable through the manifests of the record `head`
    pub fn reachable_blocks(&self, head: Oid) -> HoardResult<Vec<Oid>> {
        let tree = self.read_commit(head)?.tree;
        let mut root = Directory::from_tree_oid(self.clone(), tree)?;
        root.list_blobs_recursive()
    }

    /// record every peer ref under `refs/storages/` locally, except our own
    pub fn fetch(&self) -> HoardResult<()> {
        let self_id = self.id()?.to_owned();
        let own_prefix = format!("{}{}/", STORAGES_PREFIX, self_id);
        let remotes = self.remotes.read();
        for remote in remotes.iter() {
            debug!("Storage::fetch() :: remote = {}", remote.name());
            let fetched = remote.fetch(self, &|peer_refs| {
                peer_refs
                    .iter()
                    .filter(|(name, _)| {
                        name.starts_with(STORAGES_PREFIX) && !name.starts_with(&own_prefix)
                    })
                    .map(|(_, oid)| *oid)
                    .collect()
            });
            match fetched {
                Ok(peer_refs) =>
                    for (name, oid) in peer_refs {
                        if name.starts_with(STORAGES_PREFIX)
                            && !name.starts_with(&own_prefix)
                            && self.advances(self.refdb()?.read(&name)?, oid)?
                        {
                            self.refdb()?.write(&name, oid)?;
                        }
                    },
                Err(err) => warn!("fetch from remote `{}` failed: {}", remote.name(), err),
            }
        }
        Ok(())
    }

    /// resolve every blob reachable from any known head, pulling missing
    /// blocks from the remotes
    pub fn fetch_blobs(&self) -> HoardResult<()> {
        for (name, head) in self.refdb()?.iter_prefix(STORAGES_PREFIX)? {
            if let Err(err) = self.fetch_blobs_for(head) {
                warn!("prefetching blobs for `{}` failed: {}", name, err);
            }
        }
        Ok(())
    }

    pub fn fetch_blobs_for(&self, head: Oid) -> HoardResult<()> {
        for block in self.reachable_blocks(head)? {
            if !self.has(block)? {
                self.get(block)?;
            }
        }
        Ok(())
    }

    /// wake the syncer for an immediate push
    pub fn notify_sync(&self) {
        let _ = self.sync_tx.send(SyncEvent::MustSync);
    }

    pub(crate) fn sync_events(&self) -> Receiver<SyncEvent> {
        self.sync_rx.clone()
    }

    pub(crate) fn sync_sender(&self) -> Sender<SyncEvent> {
        self.sync_tx.clone()
    }

    /// launch the background syncer for this storage
    pub fn start_syncer(&self, interval: Duration) -> Syncer {
        Syncer::spawn(self.clone(), interval)
    }
}
