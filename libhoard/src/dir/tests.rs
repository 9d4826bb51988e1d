use super::*;
use crate::error::HoardErrorExt;
use crate::test_utils::*;

fn set_file(root: &DirRef, path: &str, content: &[u8]) -> HoardResult<Node> {
    let storage = root.lock().storage.clone();
    let node = Node::new_file(storage);
    if let Node::File(file) = &node {
        file.lock().write_at(0, content)?;
    }
    insert_at(root, &path.into(), FileMode::REG, node.clone())?;
    Ok(node)
}

#[test]
fn set_then_get() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    set_file(&root, "/a/b/c", b"data")?;

    let (mode, node) = lookup(&root, &"/a/b/c".into())?;
    assert_eq!(mode, FileMode::REG);
    let file = node.as_file().unwrap();
    assert_eq!(file.lock().read_all()?, b"data");
    Ok(())
}

#[test]
fn get_root_resolves_to_self() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    let (mode, node) = lookup(&root, &TreePath::ROOT)?;
    assert_eq!(mode, FileMode::TREE);
    assert!(node.is_dir());
    Ok(())
}

#[test]
fn get_missing_is_no_child() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    let err = lookup(&root, &"/nope".into()).unwrap_err();
    assert_eq!(err.try_into_hoard_error()?, HoardError::NoChild("nope".to_owned()));
    Ok(())
}

#[test]
fn set_then_del_then_get_fails() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    set_file(&root, "/m/k/x", b"")?;
    remove_at(&root, &"/m/k".into())?;

    assert!(lookup(&root, &"/m".into())?.1.is_dir());
    let err = lookup(&root, &"/m/k".into()).unwrap_err();
    assert_eq!(err.try_into_hoard_error()?, HoardError::NoChild("k".to_owned()));
    Ok(())
}

#[test]
fn mid_path_file_is_not_directory() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    set_file(&root, "/a/file", b"x")?;
    let err = lookup(&root, &"/a/file/deeper".into()).unwrap_err();
    assert_eq!(err.try_into_hoard_error()?, HoardError::NotDirectory("file".to_owned()));
    Ok(())
}

#[test]
fn mkdir_p_creates_chain() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    mkdirs(&root, &"/a/b/c".into())?;
    assert!(lookup(&root, &"/a".into())?.1.is_dir());
    assert!(lookup(&root, &"/a/b".into())?.1.is_dir());
    assert!(lookup(&root, &"/a/b/c".into())?.1.is_dir());
    Ok(())
}

#[test]
fn overlay_iterates_before_base() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;

    // store a tree with two entries, then reopen it and add an overlay entry
    let root = Directory::new(storage.clone()).into_ref();
    set_file(&root, "/b", b"1")?;
    set_file(&root, "/a", b"2")?;
    let oid = root.lock().store()?;

    let reopened = Directory::from_tree_oid(storage, oid)?.into_ref();
    set_file(&reopened, "/z", b"3")?;
    let names = reopened.lock().names();
    // overlay (insertion order) first, then base entries in sort order
    assert_eq!(names, vec!["z", "a", "b"]);
    Ok(())
}

#[test]
fn base_hit_is_memoized_into_overlay() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage.clone()).into_ref();
    set_file(&root, "/f", b"old")?;
    let oid = root.lock().store()?;

    let reopened = Directory::from_tree_oid(storage, oid)?.into_ref();
    // mutate through one lookup, observe through another
    let (_, node) = lookup(&reopened, &"/f".into())?;
    node.as_file().unwrap().lock().write_at(0, b"new")?;
    let (_, again) = lookup(&reopened, &"/f".into())?;
    assert_eq!(again.as_file().unwrap().lock().read_all()?, b"new");
    Ok(())
}

#[test]
fn del_of_base_entry_survives_flush() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage.clone()).into_ref();
    set_file(&root, "/keep", b"1")?;
    set_file(&root, "/drop", b"2")?;
    let oid = root.lock().store()?;

    let reopened = Directory::from_tree_oid(storage.clone(), oid)?.into_ref();
    remove_at(&reopened, &"/drop".into())?;
    let new_oid = reopened.lock().store()?;

    let fresh = Directory::from_tree_oid(storage, new_oid)?.into_ref();
    assert!(fresh.lock().has("keep"));
    assert!(!fresh.lock().has("drop"));
    Ok(())
}

#[test]
fn store_then_reload_round_trips() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage.clone()).into_ref();
    set_file(&root, "/a/x", b"ax")?;
    set_file(&root, "/y", b"y")?;
    insert_at(&root, &"/link".into(), FileMode::LINK, Node::new_symlink(storage.clone(), "/y")?)?;
    let oid = root.lock().store()?;

    let reopened = Directory::from_tree_oid(storage, oid)?.into_ref();
    let (_, node) = lookup(&reopened, &"/a/x".into())?;
    assert_eq!(node.as_file().unwrap().lock().read_all()?, b"ax");
    let (mode, link) = lookup(&reopened, &"/link".into())?;
    assert_eq!(mode, FileMode::LINK);
    assert_eq!(link.as_symlink().unwrap().lock().target()?, "/y");
    Ok(())
}

#[test]
fn list_blobs_recursive_finds_all_blocks() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let root = Directory::new(storage).into_ref();
    set_file(&root, "/a", b"contents a")?;
    set_file(&root, "/sub/b", b"contents b")?;
    root.lock().store()?;

    let blobs = root.lock().list_blobs_recursive()?;
    assert_eq!(blobs.len(), 2);
    Ok(())
}
