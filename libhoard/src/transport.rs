use crate::error::{HoardError, HoardResult};
use crate::obj::ObjKind;
use crate::odb::Odb;
use crate::refs::RefDb;
use crate::storage::Storage;
use crate::Oid;
use git_url_parse::{GitUrl, Scheme};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use std::path::PathBuf;

pub type PeerRefs = IndexMap<String, Oid>;
/// given the peer's refs, choose the hashes to transfer
pub type WantSelector<'a> = &'a dyn Fn(&PeerRefs) -> Vec<Oid>;
/// given the peer's refs, build the desired post-push ref map
pub type WantBuilder<'a> = &'a dyn Fn(&PeerRefs) -> HoardResult<PeerRefs>;

/// the seam where a wire-protocol client plugs in: given a peer and a
/// ref-selection predicate, transfer missing reachable objects
pub trait Transport: Send + Sync {
    /// enumerate the peer's refs
    fn refs(&self) -> HoardResult<PeerRefs>;

    /// transfer the closure of the selected hashes into the local object
    /// store; returns the peer's refs as advertised during the exchange
    fn fetch(&self, storage: &Storage, selector: WantSelector<'_>) -> HoardResult<PeerRefs>;

    /// transfer any reachable objects the peer lacks and update its refs
    fn push(&self, storage: &Storage, build: WantBuilder<'_>) -> HoardResult<()>;
}

/// build a transport for `url`; bare paths and `file://` urls get the local
/// transport, everything else is a wire scheme we do not speak
pub fn connect(url: &str) -> HoardResult<Box<dyn Transport>> {
    if !url.contains("://") {
        return Ok(Box::new(FileTransport::new(PathBuf::from(url))));
    }
    let parsed = GitUrl::parse(url).map_err(|err| anyhow!("invalid remote url `{}`: {}", url, err))?;
    match parsed.scheme {
        Scheme::File | Scheme::Unspecified => Ok(Box::new(FileTransport::new(PathBuf::from(parsed.path)))),
        scheme => bail!("unsupported remote scheme `{}` (url `{}`)", scheme, url),
    }
}

/// peer storage reached through the filesystem; operates on the peer's
/// object store and refs directly
pub struct FileTransport {
    path: PathBuf,
    odb_cell: OnceCell<Odb>,
    refdb_cell: OnceCell<RefDb>,
}

impl FileTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path, odb_cell: OnceCell::new(), refdb_cell: OnceCell::new() }
    }

    fn peer_odb(&self) -> HoardResult<&Odb> {
        self.odb_cell.get_or_try_init(|| Odb::new(self.path.join("objects")))
    }

    fn peer_refdb(&self) -> HoardResult<&RefDb> {
        self.refdb_cell.get_or_try_init(|| RefDb::new(self.path.clone()))
    }

    /// copy the missing reachable closure of `roots` from `src` into `dst`
    fn copy_closure(src: &Odb, dst: &Odb, roots: &[Oid]) -> HoardResult<usize> {
        let mut stack = roots.to_vec();
        let mut copied = 0;
        while let Some(oid) = stack.pop() {
            if oid.is_unknown() || dst.exists(oid)? {
                continue;
            }
            match src.read(oid)? {
                ObjKind::Commit(commit) => {
                    stack.push(commit.tree);
                    stack.extend(commit.parents.iter().copied());
                }
                ObjKind::Tree(tree) => stack.extend(tree.entries.iter().map(|entry| entry.oid)),
                ObjKind::Blob(..) => {}
            }
            dst.copy_from(src, oid)?;
            copied += 1;
        }
        Ok(copied)
    }
}

impl Transport for FileTransport {
    fn refs(&self) -> HoardResult<PeerRefs> {
        Ok(self.peer_refdb()?.all()?.into_iter().collect())
    }

    fn fetch(&self, storage: &Storage, selector: WantSelector<'_>) -> HoardResult<PeerRefs> {
        let peer_refs = self.refs()?;
        let wants = selector(&peer_refs);
        let copied = Self::copy_closure(self.peer_odb()?, storage.odb()?, &wants)?;
        debug!("FileTransport::fetch() :: copied {} objects from `{}`", copied, self.path.display());
        Ok(peer_refs)
    }

    fn push(&self, storage: &Storage, build: WantBuilder<'_>) -> HoardResult<()> {
        let peer_refs = self.refs()?;
        let new_refs = build(&peer_refs)?;

        let changed = new_refs
            .iter()
            .filter(|(name, oid)| peer_refs.get(*name) != Some(*oid))
            .map(|(name, oid)| (name.clone(), *oid))
            .collect::<Vec<_>>();

        let wants = changed.iter().map(|(_, oid)| *oid).collect::<Vec<_>>();
        let copied = Self::copy_closure(storage.odb()?, self.peer_odb()?, &wants)?;
        debug!("FileTransport::push() :: copied {} objects to `{}`", copied, self.path.display());

        let mut failures = vec![];
        for (name, oid) in changed {
            let expected = peer_refs.get(&name).copied();
            match self.peer_refdb()?.set_if_equals(&name, expected, oid) {
                Ok(true) => {}
                Ok(false) => failures.push((name, "ref moved concurrently".to_owned())),
                Err(err) => failures.push((name, err.to_string())),
            }
        }
        if !failures.is_empty() {
            bail!(HoardError::UpdateRefsError(failures));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::Blob;
    use crate::test_utils::*;

    #[test]
    fn bare_path_gets_file_transport() -> HoardResult<()> {
        assert!(connect("/tmp/somewhere").is_ok());
        assert!(connect("file:///tmp/somewhere").is_ok());
        Ok(())
    }

    #[test]
    fn wire_schemes_are_rejected() {
        assert!(connect("ssh://host/path").is_err());
        assert!(connect("git://host/path").is_err());
    }

    #[test]
    fn fetch_copies_closure() -> HoardResult<()> {
        let (_d1, local) = temp_storage()?;
        let (_d2, peer) = temp_storage()?;

        let oid = commit_file(&peer, "master", "/a", b"shared")?;

        let transport = FileTransport::new(peer.path().to_path_buf());
        let peer_refs = transport.fetch(&local, &|_| vec![oid])?;
        assert!(peer_refs.values().any(|&r| r == oid));
        assert!(local.has(oid)?);
        // the commit's tree and the manifest blob must have come along
        let tree = local.read_commit(oid)?.tree;
        assert!(local.has(tree)?);
        Ok(())
    }

    #[test]
    fn push_updates_refs_and_objects() -> HoardResult<()> {
        let (_d1, local) = temp_storage()?;
        let (_d2, peer) = temp_storage()?;

        let oid = commit_file(&local, "master", "/a", b"pushed")?;
        let name = crate::refs::box_ref(local.id()?, "master");

        let transport = FileTransport::new(peer.path().to_path_buf());
        transport.push(&local, &|their_refs| {
            let mut new_refs = their_refs.clone();
            new_refs.insert(name.clone(), oid);
            Ok(new_refs)
        })?;

        assert_eq!(peer.refdb()?.read(&name)?, Some(oid));
        assert!(peer.has(oid)?);
        Ok(())
    }

    #[test]
    fn push_detects_concurrent_ref_moves() -> HoardResult<()> {
        use crate::error::{HoardError, HoardErrorExt};

        let (_d1, local) = temp_storage()?;
        let (_d2, peer) = temp_storage()?;

        let a = local.put_obj(&Blob::new(b"a".to_vec()))?;
        let c = peer.put_obj(&Blob::new(b"c".to_vec()))?;

        let transport = FileTransport::new(peer.path().to_path_buf());
        let res = transport.push(&local, &|_| {
            // the ref moves on the peer after its refs were advertised
            peer.refdb()?.write("refs/tags/t", c)?;
            let mut new_refs = PeerRefs::new();
            new_refs.insert("refs/tags/t".to_owned(), a);
            Ok(new_refs)
        });

        let err = res.unwrap_err().try_into_hoard_error()?;
        assert!(matches!(err, HoardError::UpdateRefsError(failures) if failures.len() == 1));
        // the peer keeps the value it moved to
        assert_eq!(peer.refdb()?.read("refs/tags/t")?, Some(c));
        Ok(())
    }
}
