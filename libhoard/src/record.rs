use crate::dir::Directory;
use crate::error::{HoardError, HoardResult};
use crate::merge::merge_tree_changes;
use crate::node::DirRef;
use crate::obj::Commit;
use crate::signature::HoardTime;
use crate::storage::Storage;
use crate::tree_diff::diff_trees;
use crate::Oid;
use indexmap::IndexSet;

pub const AUTO_COMMIT_MESSAGE: &str = "hoard auto-commit";
pub const MERGE_COMMIT_MESSAGE: &str = "hoard merge";
pub const VIRTUAL_MERGE_MESSAGE: &str = "hoard virtual merge base";

/// a commit under assembly: a root directory, an ordered parent set and
/// metadata; immutable once stored
pub struct Record {
    storage: Storage,
    commit: Commit,
    root: DirRef,
    parents: IndexSet<Oid>,
    /// set once stored; any mutation must go through a fresh working copy
    oid: Option<Oid>,
}

impl Record {
    /// a brand new record with an empty root
    pub fn new(storage: Storage) -> Self {
        let commit = Commit {
            tree: Oid::UNKNOWN,
            parents: smallvec![],
            author: storage.signature(),
            committer: storage.committer_signature(),
            message: AUTO_COMMIT_MESSAGE.to_owned(),
        };
        let root = Directory::new(storage.clone()).into_ref();
        Self { storage, commit, root, parents: IndexSet::new(), oid: None }
    }

    /// load the stored record `oid`
    pub fn from_oid(storage: Storage, oid: Oid) -> HoardResult<Self> {
        let commit = storage.read_commit(oid)?;
        let root = Directory::from_tree_oid(storage.clone(), commit.tree)?.into_ref();
        let parents = commit.parents.iter().copied().collect();
        Ok(Self { storage, commit, root, parents, oid: Some(oid) })
    }

    /// a mutable working copy of the stored record `head` whose parent set
    /// starts as `{head}`
    pub fn child_of(storage: Storage, head: Oid, message: &str) -> HoardResult<Self> {
        let head_commit = storage.read_commit(head)?;
        let root = Directory::from_tree_oid(storage.clone(), head_commit.tree)?.into_ref();
        let commit = Commit {
            tree: Oid::UNKNOWN,
            parents: smallvec![],
            author: storage.signature(),
            committer: storage.committer_signature(),
            message: message.to_owned(),
        };
        let mut parents = IndexSet::new();
        parents.insert(head);
        Ok(Self { storage, commit, root, parents, oid: None })
    }

    pub fn root(&self) -> DirRef {
        self.root.clone()
    }

    /// the stored oid; `None` while the record has never been stored
    pub fn oid(&self) -> Option<Oid> {
        self.oid
    }

    pub fn parents(&self) -> &IndexSet<Oid> {
        &self.parents
    }

    pub fn add_parent(&mut self, parent: Oid) {
        self.parents.insert(parent);
    }

    pub fn message(&self) -> &str {
        &self.commit.message
    }

    pub fn commit_time(&self) -> i64 {
        self.commit.commit_time()
    }

    pub fn update_timestamp(&mut self) {
        let now = HoardTime::now();
        self.commit.author.time = now;
        self.commit.committer.time = now;
    }

    /// flush the root tree and store the commit, returning its oid
    pub fn store(&mut self) -> HoardResult<Oid> {
        self.commit.tree = self.root.lock().store()?;
        self.commit.parents = self.parents.iter().copied().collect();
        let oid = self.storage.put_obj(&self.commit)?;
        self.oid = Some(oid);
        trace!("Record::store() -> {}", oid);
        Ok(oid)
    }

    /// flush the root tree without storing the commit itself
    pub fn store_root(&mut self) -> HoardResult<Oid> {
        let tree = self.root.lock().store()?;
        self.commit.tree = tree;
        Ok(tree)
    }

    /// merge the stored record `other` into this one: three-way apply its
    /// changes since the common base onto our root and append it as a parent
    pub fn merge(&mut self, other: Oid) -> HoardResult<()> {
        debug!("Record::merge(other: {})", other);
        let storage = self.storage.clone();
        let other_commit = storage.read_commit(other)?;
        let their_parents = other_commit.parents.iter().copied().collect();

        let ancestors = find_common_ancestors_of_sets(&storage, &self.parents, &their_parents)?;
        ensure!(!ancestors.is_empty(), HoardError::UnrelatedHistories);

        let base = self.resolve_merge_base(ancestors)?;
        let base_tree = storage.read_commit(base)?.tree;

        let changes = diff_trees(&storage, Some(base_tree), other_commit.tree)?;
        merge_tree_changes(&storage, &self.root, &changes)?;
        self.parents.insert(other);
        Ok(())
    }

    /// collapse a common-ancestor set into a single base, recursively merging
    /// criss-cross ancestors into a virtual record
    fn resolve_merge_base(&mut self, ancestors: IndexSet<Oid>) -> HoardResult<Oid> {
        let mut iter = ancestors.into_iter();
        let first = iter.next().unwrap_or_else(|| bug!("empty ancestor set"));
        let rest = iter.collect::<Vec<_>>();
        if rest.is_empty() {
            return Ok(first);
        }
        debug!("Record::resolve_merge_base :: criss-cross over {} ancestors", 1 + rest.len());
        let mut base =
            Record::child_of(self.storage.clone(), first, VIRTUAL_MERGE_MESSAGE)?;
        for ancestor in rest {
            base.merge(ancestor)?;
        }
        base.store()
    }

    /// `true` iff `other` is an ancestor of this record
    pub fn is_child_of(&self, other: Oid) -> HoardResult<bool> {
        for level in AncestorLevels::new(self.storage.clone(), self.parents.clone()) {
            if level?.contains(&other) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// breadth-first ancestor traversal yielding one parent set per level;
/// restartable because the parent graph is immutable
pub struct AncestorLevels {
    storage: Storage,
    frontier: IndexSet<Oid>,
    seen: IndexSet<Oid>,
}

impl AncestorLevels {
    pub fn new(storage: Storage, seeds: IndexSet<Oid>) -> Self {
        Self { storage, frontier: seeds, seen: IndexSet::new() }
    }

    /// the levels of the ancestors of the stored record `oid`, starting with
    /// its parent set
    pub fn of(storage: Storage, oid: Oid) -> HoardResult<Self> {
        let commit = storage.read_commit(oid)?;
        Ok(Self::new(storage, commit.parents.iter().copied().collect()))
    }
}

impl Iterator for AncestorLevels {
    type Item = HoardResult<IndexSet<Oid>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frontier.is_empty() {
            return None;
        }
        let level = std::mem::take(&mut self.frontier);
        for &oid in &level {
            self.seen.insert(oid);
        }
        let mut next = IndexSet::new();
        for &oid in &level {
            let commit = match self.storage.read_commit(oid) {
                Ok(commit) => commit,
                Err(err) => return Some(Err(err)),
            };
            for parent in commit.parents {
                if !self.seen.contains(&parent) {
                    next.insert(parent);
                }
            }
        }
        self.frontier = next;
        Some(Ok(level))
    }
}

/// `true` iff `ancestor` is reachable from `descendant` through parents
/// (strict: a record is not its own ancestor)
pub fn is_ancestor_of(storage: &Storage, ancestor: Oid, descendant: Oid) -> HoardResult<bool> {
    for level in AncestorLevels::of(storage.clone(), descendant)? {
        if level?.contains(&ancestor) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// walk `b`'s ancestor levels outward and return the first non-empty
/// intersection with `a`'s ancestry; a set of size > 1 is a criss-cross
pub fn find_common_ancestors(storage: &Storage, a: Oid, b: Oid) -> HoardResult<IndexSet<Oid>> {
    let ours = AncestorLevels::of(storage.clone(), a)?.collect::<HoardResult<Vec<_>>>()?;
    let their_seeds = storage.read_commit(b)?.parents.iter().copied().collect();
    find_common_ancestors_inner(storage, &ours, their_seeds)
}

/// like [`find_common_ancestors`] but over explicit parent sets, for records
/// that are not stored yet
pub fn find_common_ancestors_of_sets(
    storage: &Storage,
    our_parents: &IndexSet<Oid>,
    their_parents: &IndexSet<Oid>,
) -> HoardResult<IndexSet<Oid>> {
    let ours = AncestorLevels::new(storage.clone(), our_parents.clone())
        .collect::<HoardResult<Vec<_>>>()?;
    find_common_ancestors_inner(storage, &ours, their_parents.clone())
}

fn find_common_ancestors_inner(
    storage: &Storage,
    our_levels: &[IndexSet<Oid>],
    their_seeds: IndexSet<Oid>,
) -> HoardResult<IndexSet<Oid>> {
    for their_level in AncestorLevels::new(storage.clone(), their_seeds) {
        let their_level = their_level?;
        for our_level in our_levels {
            let common = our_level & &their_level;
            if !common.is_empty() {
                return Ok(common);
            }
        }
    }
    Ok(IndexSet::new())
}
