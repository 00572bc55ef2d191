//! Durable block storage with a fingerprint index.
//!
//! [`FileStore`] keeps one JSON file per block (`block_<index>.json`) and
//! rebuilds its in-memory indexes from the directory on open.
//! [`MemoryStore`] is the volatile equivalent used by tests and embedders.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, error, info};

use crate::error::StorageError;
use crate::model::Block;

/// Durable store of blocks keyed by index and by evidence fingerprint.
pub trait BlockStore: Send + Sync {
    /// Store a block. Re-putting identical content is a no-op; different
    /// content under an existing index is a [`StorageError::Conflict`].
    fn put(&self, block: &Block) -> Result<(), StorageError>;

    fn get(&self, index: u64) -> Result<Option<Block>, StorageError>;

    /// Most recently stored block carrying this fingerprint.
    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Block>, StorageError>;

    /// Number of stored blocks.
    fn length(&self) -> Result<u64, StorageError>;

    /// Every stored block, ordered by index.
    fn load_all(&self) -> Result<Vec<Block>, StorageError>;
}

fn note_fingerprint(by_fingerprint: &mut HashMap<String, u64>, block: &Block) {
    if let Some(fp) = block.data().fingerprint() {
        let slot = by_fingerprint.entry(fp.to_string()).or_insert(block.index());
        *slot = (*slot).max(block.index());
    }
}

#[derive(Debug, Default)]
struct FileIndex {
    indices: BTreeSet<u64>,
    by_fingerprint: HashMap<String, u64>,
}

/// Directory of pretty-printed JSON block records.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    index: RwLock<FileIndex>,
}

impl FileStore {
    /// Open (creating if needed) a block directory and index its contents.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        ensure_dir(&dir)?;

        let mut index = FileIndex::default();
        for block in read_blocks(&dir)? {
            note_fingerprint(&mut index.by_fingerprint, &block);
            index.indices.insert(block.index());
        }
        info!(dir = %dir.display(), blocks = index.indices.len(), "opened block store");

        Ok(FileStore {
            dir,
            index: RwLock::new(index),
        })
    }

    fn read(&self, index: u64) -> Result<Block, StorageError> {
        read_block(&block_path(&self.dir, index))
    }
}

impl BlockStore for FileStore {
    fn put(&self, block: &Block) -> Result<(), StorageError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);

        if index.indices.contains(&block.index()) {
            return if &self.read(block.index())? == block {
                debug!(index = block.index(), "block already stored");
                Ok(())
            } else {
                Err(StorageError::Conflict {
                    index: block.index(),
                })
            };
        }

        save_block(&self.dir, block).map_err(|e| {
            error!(index = block.index(), error = %e, "failed to persist block");
            e
        })?;
        index.indices.insert(block.index());
        note_fingerprint(&mut index.by_fingerprint, block);
        Ok(())
    }

    fn get(&self, index: u64) -> Result<Option<Block>, StorageError> {
        let known = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .indices
            .contains(&index);
        if !known {
            return Ok(None);
        }
        self.read(index).map(Some)
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Block>, StorageError> {
        let hit = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_fingerprint
            .get(fingerprint)
            .copied();
        match hit {
            Some(index) => self.read(index).map(Some),
            None => Ok(None),
        }
    }

    fn length(&self) -> Result<u64, StorageError> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        Ok(index.indices.len() as u64)
    }

    fn load_all(&self) -> Result<Vec<Block>, StorageError> {
        read_blocks(&self.dir)
    }
}

/// Ensure that the given directory exists (create recursively if needed).
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Compute the JSON filename for a block index.
pub fn block_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("block_{index}.json"))
}

/// Write a block to `block_<index>.json` via a synced temp file and rename,
/// so a crash never leaves a partial record behind.
pub fn save_block(dir: &Path, block: &Block) -> Result<(), StorageError> {
    ensure_dir(dir)?;
    let path = block_path(dir, block.index());
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(block)?;
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    // Directory fsync is not supported everywhere; the record itself is synced.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

fn read_block(path: &Path) -> Result<Block, StorageError> {
    let buf = fs::read(path)?;
    serde_json::from_slice(&buf).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load all `block_*.json` records and sort by index. A record whose file
/// name disagrees with its `index` field is reported as corrupt.
fn read_blocks(dir: &Path) -> Result<Vec<Block>, StorageError> {
    let mut out = vec![];
    for entry in fs::read_dir(dir)? {
        let p = entry?.path();
        if p.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let Some(named) = p
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("block_"))
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        let block = read_block(&p)?;
        if block.index() != named {
            return Err(StorageError::Corrupt {
                path: p,
                reason: format!("file name says block {named}, record says {}", block.index()),
            });
        }
        out.push(block);
    }
    out.sort_by_key(|b| b.index());
    Ok(out)
}

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: BTreeMap<u64, Block>,
    by_fingerprint: HashMap<String, u64>,
}

/// Volatile [`BlockStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl BlockStore for MemoryStore {
    fn put(&self, block: &Block) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.blocks.get(&block.index()) {
            return if existing == block {
                Ok(())
            } else {
                Err(StorageError::Conflict {
                    index: block.index(),
                })
            };
        }
        note_fingerprint(&mut inner.by_fingerprint, block);
        inner.blocks.insert(block.index(), block.clone());
        Ok(())
    }

    fn get(&self, index: u64) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.blocks.get(&index).cloned())
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .by_fingerprint
            .get(fingerprint)
            .and_then(|i| inner.blocks.get(i))
            .cloned())
    }

    fn length(&self) -> Result<u64, StorageError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.blocks.len() as u64)
    }

    fn load_all(&self) -> Result<Vec<Block>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.blocks.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{CaptureTime, Coordinate};
    use crate::model::{BlockData, EvidencePayload};
    use tempfile::tempdir;

    fn photo_block(index: u64, previous: &str, fp: &str) -> Block {
        Block::new(
            index,
            1_700_000_000_000 + index,
            BlockData::Photo(EvidencePayload {
                fingerprint: fp.to_string(),
                latitude: Coordinate::parse("-33.8568").unwrap(),
                longitude: Coordinate::parse("151.2153").unwrap(),
                timestamp: CaptureTime::Millis(1_699_999_999_000),
            }),
            previous.to_string(),
        )
    }

    fn exercise_store(store: &dyn BlockStore) {
        let genesis = Block::genesis();
        let one = photo_block(1, genesis.hash(), "fp-one");
        store.put(&genesis).unwrap();
        store.put(&one).unwrap();
        assert_eq!(store.length().unwrap(), 2);

        // identical re-put is a no-op
        store.put(&one).unwrap();
        assert_eq!(store.length().unwrap(), 2);

        // different content under the same index is refused
        let other = photo_block(1, genesis.hash(), "fp-other");
        assert!(matches!(
            store.put(&other),
            Err(StorageError::Conflict { index: 1 })
        ));
        assert_eq!(store.get(1).unwrap(), Some(one.clone()));

        assert_eq!(store.find_by_fingerprint("fp-one").unwrap(), Some(one.clone()));
        assert_eq!(store.find_by_fingerprint("fp-missing").unwrap(), None);
        assert_eq!(store.get(7).unwrap(), None);

        // duplicates resolve to the most recent block
        let dup = photo_block(2, one.hash(), "fp-one");
        store.put(&dup).unwrap();
        assert_eq!(store.find_by_fingerprint("fp-one").unwrap(), Some(dup.clone()));

        let all = store.load_all().unwrap();
        assert_eq!(all, vec![genesis, one, dup]);
    }

    #[test]
    fn memory_store_contract() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn file_store_contract() {
        let dir = tempdir().unwrap();
        exercise_store(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn file_store_reopens_with_index() {
        let dir = tempdir().unwrap();
        let genesis = Block::genesis();
        let one = photo_block(1, genesis.hash(), "fp-one");
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put(&genesis).unwrap();
            store.put(&one).unwrap();
        }
        assert!(block_path(dir.path(), 1).exists());
        assert!(!dir.path().join("block_1.json.tmp").exists());

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.length().unwrap(), 2);
        assert_eq!(store.find_by_fingerprint("fp-one").unwrap(), Some(one));
    }

    #[test]
    fn file_store_ignores_leftover_temp_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("block_5.json.tmp"), b"{ half").unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.length().unwrap(), 0);
    }

    #[test]
    fn file_store_reports_corrupt_records() {
        let dir = tempdir().unwrap();
        fs::write(block_path(dir.path(), 0), b"not json").unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(StorageError::Corrupt { .. })
        ));

        let dir = tempdir().unwrap();
        let json = serde_json::to_vec(&Block::genesis()).unwrap();
        fs::write(block_path(dir.path(), 3), json).unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
