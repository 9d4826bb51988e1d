use crate::error::HoardResult;
use crate::obj::{FileMode, Tree};
use crate::path::TreePath;
use crate::storage::Storage;
use crate::Oid;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    pub path: TreePath,
    pub mode: FileMode,
    pub oid: Oid,
}

/// a blob-level change between two trees; directories are implied by the
/// paths of the entries under them
#[derive(Debug, Clone, PartialEq)]
pub enum TreeChange {
    Add { new: ChangeEntry },
    Modify { old: ChangeEntry, new: ChangeEntry },
    Delete { old: ChangeEntry },
    Rename { old: ChangeEntry, new: ChangeEntry },
}

/// rename-aware diff between `base` and `other` (`None` means the empty tree)
pub fn diff_trees(storage: &Storage, base: Option<Oid>, other: Oid) -> HoardResult<Vec<TreeChange>> {
    let base_tree = match base {
        Some(oid) => storage.read_tree(oid)?,
        None => Tree::default(),
    };
    let other_tree = storage.read_tree(other)?;
    let mut changes = vec![];
    diff_tree_contents(storage, &TreePath::ROOT, &base_tree, &other_tree, &mut changes)?;
    detect_renames(&mut changes);
    trace!("diff_trees(base: {:?}, other: {}) -> {} changes", base, other, changes.len());
    Ok(changes)
}

fn by_name(tree: &Tree) -> BTreeMap<&str, &crate::obj::TreeEntry> {
    tree.entries.iter().map(|entry| (entry.name.as_str(), entry)).collect()
}

fn diff_tree_contents(
    storage: &Storage,
    path: &TreePath,
    base: &Tree,
    other: &Tree,
    changes: &mut Vec<TreeChange>,
) -> HoardResult<()> {
    let base_entries = by_name(base);
    let other_entries = by_name(other);

    for (name, base_entry) in &base_entries {
        let child_path = path.join(name);
        match other_entries.get(name) {
            None => emit_side(storage, &child_path, base_entry.mode, base_entry.oid, changes, Side::Deleted)?,
            Some(other_entry) => match (base_entry.mode.is_tree(), other_entry.mode.is_tree()) {
                (true, true) => {
                    if base_entry.oid != other_entry.oid {
                        let base_child = storage.read_tree(base_entry.oid)?;
                        let other_child = storage.read_tree(other_entry.oid)?;
                        diff_tree_contents(storage, &child_path, &base_child, &other_child, changes)?;
                    }
                }
                (false, false) => {
                    if base_entry.oid != other_entry.oid || base_entry.mode != other_entry.mode {
                        changes.push(TreeChange::Modify {
                            old: ChangeEntry {
                                path: child_path.clone(),
                                mode: base_entry.mode,
                                oid: base_entry.oid,
                            },
                            new: ChangeEntry {
                                path: child_path,
                                mode: other_entry.mode,
                                oid: other_entry.oid,
                            },
                        });
                    }
                }
                // a typechange is a delete of one kind and an add of the other
                (true, false) | (false, true) => {
                    emit_side(storage, &child_path, base_entry.mode, base_entry.oid, changes, Side::Deleted)?;
                    emit_side(storage, &child_path, other_entry.mode, other_entry.oid, changes, Side::Added)?;
                }
            },
        }
    }

    for (name, other_entry) in &other_entries {
        if !base_entries.contains_key(name) {
            let child_path = path.join(name);
            emit_side(storage, &child_path, other_entry.mode, other_entry.oid, changes, Side::Added)?;
        }
    }

    Ok(())
}

#[derive(Copy, Clone)]
enum Side {
    Added,
    Deleted,
}

/// emit adds or deletes for a whole subtree (or a single blob)
fn emit_side(
    storage: &Storage,
    path: &TreePath,
    mode: FileMode,
    oid: Oid,
    changes: &mut Vec<TreeChange>,
    side: Side,
) -> HoardResult<()> {
    if mode.is_tree() {
        let tree = storage.read_tree(oid)?;
        for entry in &tree.entries {
            emit_side(storage, &path.join(&entry.name), entry.mode, entry.oid, changes, side)?;
        }
        return Ok(());
    }
    let entry = ChangeEntry { path: path.clone(), mode, oid };
    changes.push(match side {
        Side::Added => TreeChange::Add { new: entry },
        Side::Deleted => TreeChange::Delete { old: entry },
    });
    Ok(())
}

/// pair a delete with an add of identical content into a rename
fn detect_renames(changes: &mut Vec<TreeChange>) {
    let mut result = Vec::with_capacity(changes.len());
    let mut pending_deletes: Vec<ChangeEntry> = vec![];
    let mut pending_adds: Vec<ChangeEntry> = vec![];

    for change in changes.drain(..) {
        match change {
            TreeChange::Delete { old } => pending_deletes.push(old),
            TreeChange::Add { new } => pending_adds.push(new),
            other => result.push(other),
        }
    }

    for add in pending_adds {
        let matched = pending_deletes
            .iter()
            .position(|del| del.oid == add.oid && del.mode == add.mode);
        match matched {
            Some(idx) => {
                let old = pending_deletes.remove(idx);
                result.push(TreeChange::Rename { old, new: add });
            }
            None => result.push(TreeChange::Add { new: add }),
        }
    }
    result.extend(pending_deletes.into_iter().map(|old| TreeChange::Delete { old }));

    *changes = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::{insert_at, remove_at, Directory};
    use crate::node::Node;
    use crate::test_utils::*;

    fn tree_with(storage: &Storage, files: &[(&str, &[u8])]) -> HoardResult<Oid> {
        let root = Directory::new(storage.clone()).into_ref();
        for (path, content) in files {
            let node = Node::new_file(storage.clone());
            node.as_file().unwrap().lock().write_at(0, content)?;
            insert_at(&root, &(*path).into(), FileMode::REG, node)?;
        }
        let oid = root.lock().store()?;
        Ok(oid)
    }

    #[test]
    fn identical_trees_have_no_changes() -> HoardResult<()> {
        let (_dir, storage) = temp_storage()?;
        let a = tree_with(&storage, &[("/x", b"1"), ("/sub/y", b"2")])?;
        let b = tree_with(&storage, &[("/x", b"1"), ("/sub/y", b"2")])?;
        assert_eq!(a, b);
        assert!(diff_trees(&storage, Some(a), b)?.is_empty());
        Ok(())
    }

    #[test]
    fn detects_add_modify_delete() -> HoardResult<()> {
        let (_dir, storage) = temp_storage()?;
        let base = tree_with(&storage, &[("/keep", b"k"), ("/change", b"old"), ("/drop", b"d")])?;
        let other = tree_with(&storage, &[("/keep", b"k"), ("/change", b"new"), ("/fresh", b"f")])?;

        let changes = diff_trees(&storage, Some(base), other)?;
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().any(|change| matches!(
            change,
            TreeChange::Modify { old, .. } if old.path == TreePath::from("/change")
        )));
        assert!(changes.iter().any(|change| matches!(
            change,
            TreeChange::Add { new } if new.path == TreePath::from("/fresh")
        )));
        assert!(changes.iter().any(|change| matches!(
            change,
            TreeChange::Delete { old } if old.path == TreePath::from("/drop")
        )));
        Ok(())
    }

    #[test]
    fn detects_exact_rename() -> HoardResult<()> {
        let (_dir, storage) = temp_storage()?;
        let base = tree_with(&storage, &[("/old-name", b"same content")])?;
        let other = tree_with(&storage, &[("/new/name", b"same content")])?;

        let changes = diff_trees(&storage, Some(base), other)?;
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            TreeChange::Rename { old, new }
                if old.path == TreePath::from("/old-name") && new.path == TreePath::from("/new/name")
        ));
        Ok(())
    }

    #[test]
    fn recurses_into_subtrees() -> HoardResult<()> {
        let (_dir, storage) = temp_storage()?;
        let base = tree_with(&storage, &[("/a/b/c", b"1"), ("/a/b/d", b"2")])?;
        let other = tree_with(&storage, &[("/a/b/c", b"1"), ("/a/b/d", b"2-changed")])?;

        let changes = diff_trees(&storage, Some(base), other)?;
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            TreeChange::Modify { old, .. } if old.path == TreePath::from("/a/b/d")
        ));
        Ok(())
    }

    #[test]
    fn empty_base_is_all_adds() -> HoardResult<()> {
        let (_dir, storage) = temp_storage()?;
        let other = tree_with(&storage, &[("/a", b"1"), ("/b/c", b"2")])?;
        let changes = diff_trees(&storage, None, other)?;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| matches!(change, TreeChange::Add { .. })));
        Ok(())
    }

    #[test]
    fn deleted_directory_emits_per_file_deletes() -> HoardResult<()> {
        let (_dir, storage) = temp_storage()?;
        let base = tree_with(&storage, &[("/d/x", b"different 1"), ("/d/y", b"different 2")])?;
        let root = Directory::from_tree_oid(storage.clone(), base)?.into_ref();
        remove_at(&root, &"/d".into())?;
        let other = root.lock().store()?;

        let changes = diff_trees(&storage, Some(base), other)?;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| matches!(change, TreeChange::Delete { .. })));
        Ok(())
    }
}
