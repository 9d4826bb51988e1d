use crate::dir::{insert_at, lookup, remove_at};
use crate::error::{HoardResult, HoardResultExt};
use crate::file::File;
use crate::node::{DirRef, Node};
use crate::path::TreePath;
use crate::storage::Storage;
use crate::tree_diff::{ChangeEntry, TreeChange};
use crate::Oid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    /// the textual merge produced conflicts; `content` carries the
    /// conflict-marked result
    #[error("{conflicts} conflict(s)")]
    Conflict { conflicts: usize, content: Vec<u8> },
    #[error("cannot merge binary content")]
    Binary,
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

/// three-way text merge of `ours` and `theirs` over `base`
pub fn merge_file(base: &[u8], ours: &[u8], theirs: &[u8]) -> Result<Vec<u8>, MergeError> {
    if is_binary(base) || is_binary(ours) || is_binary(theirs) {
        return Err(MergeError::Binary);
    }
    diffy::MergeOptions::new()
        .set_conflict_style(diffy::ConflictStyle::Merge)
        .merge_bytes(base, ours, theirs)
        .map_err(|content| {
            let conflicts = content
                .windows(7)
                .filter(|window| *window == b"<<<<<<<")
                .count()
                .max(1);
            MergeError::Conflict { conflicts, content }
        })
}

/// apply a base→incoming tree diff to `root`
///
/// every change is either accepted, kept as the locally modified version, or
/// materialized as `<path>.<hex>` siblings; user content is never silently
/// discarded and no error from the content layer escapes
pub fn merge_tree_changes(
    storage: &Storage,
    root: &DirRef,
    changes: &[TreeChange],
) -> HoardResult<()> {
    for change in changes {
        debug!("merge_tree_changes :: {:?}", change);
        match change {
            TreeChange::Delete { old } => apply_delete(root, old)?,
            TreeChange::Modify { old, new } => apply_modify(storage, root, old, new)?,
            TreeChange::Add { new } => apply_add(storage, root, new)?,
            TreeChange::Rename { old, new } => {
                apply_add(storage, root, new)?;
                apply_delete(root, old)?;
            }
        }
    }
    Ok(())
}

/// delete only if the local version is still the base version
fn apply_delete(root: &DirRef, old: &ChangeEntry) -> HoardResult<()> {
    let node = match lookup(root, &old.path) {
        Ok((_, node)) => node,
        // already gone on our side too
        Err(err) if err.is_lookup_err() => return Ok(()),
        Err(err) => return Err(err),
    };
    if node.store()? == old.oid {
        match remove_at(root, &old.path) {
            Ok(()) => {}
            Err(err) if err.is_lookup_err() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn apply_modify(
    storage: &Storage,
    root: &DirRef,
    old: &ChangeEntry,
    new: &ChangeEntry,
) -> HoardResult<()> {
    let node = match lookup(root, &old.path) {
        Ok((_, node)) => node,
        Err(err) if err.is_lookup_err() => {
            // locally missing: take the incoming version
            let node = Node::from_oid(storage.clone(), new.mode, new.oid)?;
            return insert_at(root, &new.path, new.mode, node);
        }
        Err(err) => return Err(err),
    };

    let local_oid = node.store()?;
    if local_oid == old.oid {
        // untouched locally, accept the incoming version
        let node = Node::from_oid(storage.clone(), new.mode, new.oid)?;
        return insert_at(root, &new.path, new.mode, node);
    }
    if local_oid == new.oid {
        return Ok(());
    }

    // both sides changed: try a three-way text merge over file contents
    let file = match node.as_file() {
        Some(file) => file,
        // kind conflict (e.g. file vs symlink): keep ours, surface theirs
        None => return store_both_versions(storage, root, old, new),
    };
    let base_content = read_version(storage, old.oid)?;
    let incoming_content = read_version(storage, new.oid)?;
    let local_content = file.lock().read_all()?;

    match merge_file(&base_content, &local_content, &incoming_content) {
        Ok(merged) => {
            let mut file = file.lock();
            file.truncate(0)?;
            file.write_at(0, &merged)?;
        }
        Err(MergeError::Conflict { content, .. }) => {
            store_both_versions(storage, root, old, new)?;
            let mut file = file.lock();
            file.truncate(0)?;
            file.write_at(0, &content)?;
        }
        Err(MergeError::Binary) => {
            store_both_versions(storage, root, old, new)?;
        }
    }
    Ok(())
}

fn apply_add(storage: &Storage, root: &DirRef, new: &ChangeEntry) -> HoardResult<()> {
    let node = match lookup(root, &new.path) {
        Ok((_, node)) => node,
        Err(err) if err.is_lookup_err() => {
            let node = Node::from_oid(storage.clone(), new.mode, new.oid)?;
            match insert_at(root, &new.path, new.mode, node) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_lookup_err() => {
                    // a local file occupies a directory position in the
                    // incoming path; keep ours and log the dropped entry
                    warn!("cannot place incoming `{}`: {}", new.path, err);
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        Err(err) => return Err(err),
    };
    if node.store()? != new.oid {
        // the path exists with different content: surface theirs as a sibling
        insert_sibling(storage, root, new)?;
    }
    Ok(())
}

/// materialize both the base and the incoming version next to the conflicted
/// path, named `<path>.<hex-hash>`
fn store_both_versions(
    storage: &Storage,
    root: &DirRef,
    old: &ChangeEntry,
    new: &ChangeEntry,
) -> HoardResult<()> {
    insert_sibling(storage, root, old)?;
    insert_sibling(storage, root, new)?;
    Ok(())
}

fn insert_sibling(storage: &Storage, root: &DirRef, version: &ChangeEntry) -> HoardResult<()> {
    let path = version.path.with_suffix(&version.oid.to_hex());
    let node = Node::from_oid(storage.clone(), version.mode, version.oid)?;
    insert_at(root, &path, version.mode, node)
}

/// the logical content of a stored file version
fn read_version(storage: &Storage, oid: Oid) -> HoardResult<Vec<u8>> {
    File::from_manifest(storage.clone(), oid)?.read_all()
}
