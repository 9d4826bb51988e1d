use crate::error::HoardResult;
use crate::refs::ID_REF;
use crate::storage::Storage;
use crate::transport::{self, PeerRefs, Transport, WantBuilder, WantSelector};
use crate::Oid;
use std::fmt::{self, Debug, Formatter};

/// a peer storage identified by url and assigned an integer weight; higher
/// weights are consulted first
pub struct Remote {
    name: String,
    url: String,
    weight: i32,
    transport: Box<dyn Transport>,
}

impl Remote {
    pub fn new(name: String, url: String, weight: i32) -> HoardResult<Self> {
        let transport = transport::connect(&url)?;
        Ok(Self { name, url, weight, transport })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    /// enumerate the peer's refs
    pub fn refs(&self) -> HoardResult<PeerRefs> {
        self.transport.refs()
    }

    /// the peer's uuid from its `refs/tags/id` blob, fetching it if needed
    pub fn id(&self, storage: &Storage) -> HoardResult<String> {
        let peer_refs = self.refs()?;
        let oid = peer_refs
            .get(ID_REF)
            .copied()
            .ok_or_else(|| anyhow!("remote `{}` has no identity blob", self.name))?;
        if !storage.has(oid)? {
            self.fetch_oids(storage, &[oid])?;
        }
        Ok(String::from_utf8(storage.read_blob(oid)?)?.trim().to_owned())
    }

    pub fn fetch(&self, storage: &Storage, selector: WantSelector<'_>) -> HoardResult<PeerRefs> {
        self.transport.fetch(storage, selector)
    }

    /// transfer the given hashes (and their closures) from the peer
    pub fn fetch_oids(&self, storage: &Storage, oids: &[Oid]) -> HoardResult<()> {
        let oids = oids.to_vec();
        self.transport.fetch(storage, &move |_refs| oids.clone())?;
        Ok(())
    }

    pub fn push(&self, storage: &Storage, build: WantBuilder<'_>) -> HoardResult<()> {
        self.transport.push(storage, build)
    }
}

impl Debug for Remote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Remote {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
    }
}

impl PartialOrd for Remote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.weight.partial_cmp(&other.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn remotes_order_by_weight() -> HoardResult<()> {
        let a = Remote::new("a".to_owned(), "/tmp/a".to_owned(), 50)?;
        let b = Remote::new("b".to_owned(), "/tmp/b".to_owned(), 100)?;
        assert!(a < b);
        Ok(())
    }

    #[test]
    fn peer_identity_blob() -> HoardResult<()> {
        let (_d1, local) = temp_storage()?;
        let (_d2, peer) = temp_storage()?;
        let peer_id = peer.id()?.to_owned();

        let remote = Remote::new("peer".to_owned(), peer.path().display().to_string(), 100)?;
        assert_eq!(remote.id(&local)?, peer_id);
        Ok(())
    }
}
