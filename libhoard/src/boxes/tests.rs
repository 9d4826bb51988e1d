use super::*;
use crate::test_utils::*;

#[test]
fn empty_box_commit_is_a_noop() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    assert_eq!(hoard_box.commit()?, None);
    assert_eq!(hoard_box.head_oid()?, None);
    Ok(())
}

#[test]
fn reading_the_root_does_not_make_a_record() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    // a bare getattr-style read materializes the working record
    hoard_box.root()?;
    assert_eq!(hoard_box.commit()?, None);
    assert_eq!(hoard_box.head_oid()?, None);
    Ok(())
}

#[test]
fn single_file_write_commits_a_record() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/a", b"hello\n")?;
    let head = hoard_box.commit()?.expect("commit must produce a record");

    // the ref now points at the new record
    let ref_name = refs::box_ref(storage.id()?, "master");
    assert_eq!(storage.refdb()?.read(&ref_name)?, Some(head));

    // the root tree carries exactly one regular-file entry `a`
    let tree = storage.read_commit(head)?.tree;
    let tree = storage.read_tree(tree)?;
    let entry = tree.entry("a").expect("entry `a` missing");
    assert_eq!(entry.mode, FileMode::REG);

    // the block holding `hello\n` is anchored under refs/blobs
    let block = crate::hash::hash_bytes(b"blob 6\0hello\n");
    assert!(storage.refdb()?.exists(&refs::blob_ref(block))?);
    Ok(())
}

#[test]
fn unchanged_tree_is_discarded() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/a", b"same")?;
    let first = hoard_box.commit()?;
    assert!(first.is_some());

    // rewriting identical content yields the same tree, so nothing commits
    write_box_file(&hoard_box, "/a", b"same")?;
    assert_eq!(hoard_box.commit()?, None);
    assert_eq!(hoard_box.head_oid()?, first);
    Ok(())
}

#[test]
fn successive_commits_form_a_chain() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;

    let mut heads = vec![];
    for i in 0..3 {
        write_box_file(&hoard_box, "/f", format!("content {}", i).as_bytes())?;
        heads.push(hoard_box.commit()?.expect("commit"));
    }

    // every observed head is a strict descendant of the previous one
    for pair in heads.windows(2) {
        assert!(record::is_ancestor_of(&storage, pair[0], pair[1])?);
        assert!(!record::is_ancestor_of(&storage, pair[1], pair[0])?);
    }

    // and the log walks back in order
    let log = hoard_box.log()?;
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].0, heads[2]);
    assert_eq!(log[2].0, heads[0]);
    Ok(())
}

#[test]
fn rewind_is_rejected() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/f", b"one")?;
    let r1 = hoard_box.commit()?.expect("commit");
    write_box_file(&hoard_box, "/f", b"two")?;
    let r2 = hoard_box.commit()?.expect("commit");

    let err = hoard_box.set_head(r1).unwrap_err();
    assert_eq!(err.try_into_hoard_error()?, HoardError::CannotGoBackInTime);
    assert_eq!(hoard_box.head_oid()?, Some(r2));
    Ok(())
}

#[test]
fn set_head_initializes_and_noops() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let head = commit_file(&storage, "master", "/x", b"1")?;
    let hoard_box = storage.open_box("master")?;

    // same record again is a no-op
    hoard_box.set_head(head)?;
    assert_eq!(hoard_box.head_oid()?, Some(head));
    Ok(())
}

#[test]
fn divergent_set_head_merges() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/base", b"b")?;
    let base = hoard_box.commit()?.expect("commit");

    // one side commits through the box
    write_box_file(&hoard_box, "/ours", b"o")?;
    let ours = hoard_box.commit()?.expect("commit");

    // the other side is a stored record diverging from the same base
    let mut theirs = Record::child_of(storage.clone(), base, AUTO_COMMIT_MESSAGE)?;
    {
        let node = crate::node::Node::new_file(storage.clone());
        node.as_file().unwrap().lock().write_at(0, b"t")?;
        crate::dir::insert_at(&theirs.root(), &"/theirs".into(), FileMode::REG, node)?;
    }
    theirs.update_timestamp();
    let theirs_oid = theirs.store()?;

    hoard_box.set_head(theirs_oid)?;
    let merged = hoard_box.head_oid()?.expect("head");
    assert_ne!(merged, ours);
    assert_ne!(merged, theirs_oid);
    assert!(record::is_ancestor_of(&storage, ours, merged)?);
    assert!(record::is_ancestor_of(&storage, theirs_oid, merged)?);

    assert_eq!(read_box_file(&hoard_box, "/ours")?, b"o");
    assert_eq!(read_box_file(&hoard_box, "/theirs")?, b"t");
    assert_eq!(read_box_file(&hoard_box, "/base")?, b"b");
    Ok(())
}

#[test]
fn unrelated_set_head_is_rejected() -> HoardResult<()> {
    let (_d1, storage) = temp_storage()?;
    let (_d2, other_storage) = temp_storage()?;

    let head = commit_file(&storage, "master", "/x", b"1")?;
    let hoard_box = storage.open_box("master")?;

    // a record with no shared history, transplanted into our object store
    let foreign = commit_file(&other_storage, "master", "/y", b"2")?;
    let transport = crate::transport::FileTransport::new(other_storage.path().to_path_buf());
    use crate::transport::Transport;
    transport.fetch(&storage, &|_| vec![foreign])?;

    let err = hoard_box.set_head(foreign).unwrap_err();
    assert_eq!(err.try_into_hoard_error()?, HoardError::UnrelatedHistories);
    assert_eq!(hoard_box.head_oid()?, Some(head));
    Ok(())
}

#[test]
fn checkout_pins_a_read_only_view() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/f", b"old")?;
    let r1 = hoard_box.commit()?.expect("commit");
    write_box_file(&hoard_box, "/f", b"new")?;
    hoard_box.commit()?.expect("commit");

    hoard_box.checkout(Some(r1))?;
    assert!(!hoard_box.is_writable());
    assert_eq!(read_box_file(&hoard_box, "/f")?, b"old");

    let err = hoard_box.set(&"/f".into(), FileMode::REG, Node::new_file(storage.clone())).unwrap_err();
    assert_eq!(err.try_into_hoard_error()?, HoardError::ReadOnly);

    hoard_box.checkout(None)?;
    assert!(hoard_box.is_writable());
    assert_eq!(read_box_file(&hoard_box, "/f")?, b"new");
    Ok(())
}

#[test]
fn handles_are_monotonic_and_cleared_on_fast_forward() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/f", b"1")?;
    hoard_box.commit()?.expect("commit");

    let (mode, node) = hoard_box.get(&"/f".into())?;
    let fd1 = hoard_box.open_handle(mode, node.clone());
    let fd2 = hoard_box.open_handle(mode, node);
    assert!(fd2 > fd1);
    assert!(hoard_box.handle(fd1).is_ok());

    hoard_box.release_handle(fd1);
    assert!(hoard_box.handle(fd1).is_err());

    // the next commit fast-forwards head and wipes the remaining handles
    write_box_file(&hoard_box, "/f", b"2")?;
    hoard_box.commit()?.expect("commit");
    assert!(hoard_box.handle(fd2).is_err());
    Ok(())
}

#[test]
fn update_from_remotes_prefers_most_recent() -> HoardResult<()> {
    let (_dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    write_box_file(&hoard_box, "/f", b"local")?;
    let local = hoard_box.commit()?.expect("commit");

    // fake a peer's published head that descends from ours with a later time
    let mut remote_record = Record::child_of(storage.clone(), local, AUTO_COMMIT_MESSAGE)?;
    {
        let node = Node::new_file(storage.clone());
        node.as_file().unwrap().lock().write_at(0, b"remote")?;
        crate::dir::insert_at(&remote_record.root(), &"/f".into(), FileMode::REG, node)?;
    }
    remote_record.update_timestamp();
    let remote_oid = remote_record.store()?;
    storage.refdb()?.write(&refs::box_ref("peer-storage-id", "master"), remote_oid)?;

    hoard_box.update_from_remotes()?;
    assert_eq!(hoard_box.head_oid()?, Some(remote_oid));
    Ok(())
}
