use super::*;
use crate::test_utils::*;
use crate::HoardResult;

fn temp_fs() -> HoardResult<(tempfile::TempDir, crate::Storage, BoxFs)> {
    let (dir, storage) = temp_storage()?;
    let hoard_box = storage.open_box("master")?;
    Ok((dir, storage, BoxFs::new(hoard_box)))
}

#[test]
fn create_write_read_through_handles() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    let fd = fs.create("/a", 0o100644).unwrap();
    assert_eq!(fs.write(fd, 0, b"hello"), Ok(5));
    assert_eq!(fs.read(fd, 0, 100), Ok(b"hello".to_vec()));
    fs.fsync(fd).unwrap();
    fs.release(fd).unwrap();
    assert!(fs.read(fd, 0, 1).is_err());

    // reopen by path
    let fd = fs.open("/a").unwrap();
    assert_eq!(fs.read(fd, 1, 2), Ok(b"el".to_vec()));
    Ok(())
}

#[test]
fn missing_paths_are_enoent() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    assert_eq!(fs.open("/missing"), Err(ENOENT));
    assert_eq!(fs.getattr("/missing"), Err(ENOENT));
    assert_eq!(fs.unlink("/missing"), Err(ENOENT));
    Ok(())
}

#[test]
fn mid_path_file_is_enotdir() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    let fd = fs.create("/file", 0o100644).unwrap();
    fs.release(fd).unwrap();
    assert_eq!(fs.open("/file/deeper"), Err(ENOTDIR));
    Ok(())
}

#[test]
fn readdir_lists_dot_entries_first() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    fs.mkdir("/d").unwrap();
    fs.create("/d/x", 0o100644).unwrap();
    let names = fs.readdir("/d").unwrap();
    assert_eq!(names, vec![".", "..", "x"]);
    Ok(())
}

#[test]
fn getattr_modes() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    fs.mkdir("/d").unwrap();
    let fd = fs.create("/f", 0o100755).unwrap();
    fs.write(fd, 0, b"xyz").unwrap();
    fs.symlink("/f", "/l").unwrap();

    assert_eq!(fs.getattr("/d").unwrap().mode, 0o40750);
    let file_attr = fs.getattr("/f").unwrap();
    assert_eq!(file_attr.mode, 0o100755);
    assert_eq!(file_attr.size, 3);
    assert_eq!(fs.getattr("/l").unwrap().mode, 0o120777);
    Ok(())
}

#[test]
fn rename_moves_the_node() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    let fd = fs.create("/from", 0o100644).unwrap();
    fs.write(fd, 0, b"content").unwrap();
    fs.rename("/from", "/sub/to").unwrap();

    assert_eq!(fs.open("/from"), Err(ENOENT));
    let fd = fs.open("/sub/to").unwrap();
    assert_eq!(fs.read(fd, 0, 100), Ok(b"content".to_vec()));
    Ok(())
}

#[test]
fn symlink_and_readlink() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    fs.symlink("/target/elsewhere", "/link").unwrap();
    assert_eq!(fs.readlink("/link").unwrap(), "/target/elsewhere");
    assert_eq!(fs.readlink("/missing"), Err(ENOENT));
    Ok(())
}

#[test]
fn hard_links_are_eperm() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    assert_eq!(fs.link("/a", "/b"), Err(EPERM));
    Ok(())
}

#[test]
fn read_only_view_is_erofs() -> HoardResult<()> {
    let (dir, storage, fs) = temp_fs()?;
    let hoard_box = storage.open_box("master")?;
    let fd = fs.create("/f", 0o100644).unwrap();
    fs.write(fd, 0, b"1").unwrap();
    let head = hoard_box.commit()?.expect("commit");

    hoard_box.checkout(Some(head))?;
    assert_eq!(fs.create("/g", 0o100644), Err(EROFS));
    let fd = fs.open("/f").unwrap();
    assert_eq!(fs.write(fd, 0, b"2"), Err(EROFS));
    assert_eq!(fs.access("/f", true), Err(EACCES));
    hoard_box.checkout(None)?;
    drop(dir);
    Ok(())
}

#[test]
fn chmod_toggles_exec_bit() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    fs.create("/f", 0o100644).unwrap();
    fs.chmod("/f", 0o100755).unwrap();
    assert_eq!(fs.getattr("/f").unwrap().mode, 0o100755);
    Ok(())
}

#[test]
fn utimens_sets_mtime() -> HoardResult<()> {
    let (_dir, _storage, fs) = temp_fs()?;
    fs.create("/f", 0o100644).unwrap();
    fs.utimens("/f", None, Some(12345)).unwrap();
    assert_eq!(fs.getattr("/f").unwrap().mtime, 12345);
    Ok(())
}
