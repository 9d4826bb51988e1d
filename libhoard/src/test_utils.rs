use crate::boxes::HoardBox;
use crate::error::HoardResult;
use crate::node::Node;
use crate::obj::FileMode;
use crate::storage::Storage;
use crate::Oid;
use rand::{Rng, SeedableRng};

/// a storage backed by a throwaway directory; keep the guard alive for the
/// duration of the test
pub fn temp_storage() -> HoardResult<(tempfile::TempDir, Storage)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let storage = Storage::open(dir.path())?;
    Ok((dir, storage))
}

pub fn random_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

pub fn write_box_file(hoard_box: &HoardBox, path: &str, content: &[u8]) -> HoardResult<()> {
    let node = Node::new_file(hoard_box.storage().clone());
    node.as_file()
        .unwrap_or_else(|| unreachable!("just created a file node"))
        .lock()
        .write_at(0, content)?;
    hoard_box.set(&path.into(), FileMode::REG, node)
}

pub fn read_box_file(hoard_box: &HoardBox, path: &str) -> HoardResult<Vec<u8>> {
    let (_, node) = hoard_box.get(&path.into())?;
    match node.as_file() {
        Some(file) => file.lock().read_all(),
        None => bail!("`{}` is not a file", path),
    }
}

/// write `content` at `path` in `box_name` and commit, returning the new head
pub fn commit_file(
    storage: &Storage,
    box_name: &str,
    path: &str,
    content: &[u8],
) -> HoardResult<Oid> {
    let hoard_box = storage.open_box(box_name)?;
    write_box_file(&hoard_box, path, content)?;
    hoard_box.commit()?.ok_or_else(|| anyhow!("commit was unexpectedly a no-op"))
}
