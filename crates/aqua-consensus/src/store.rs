//! Per-epoch cache and dataset store.
//!
//! Entries are generated lazily, at most once per epoch: the store hands out
//! a shared slot per epoch and the first caller fills it while later callers
//! for the same epoch block on that slot only. Other epochs are never held up.
//! The least recently used epochs are evicted once more than the configured
//! number are in memory.
//!
//! With a spill directory configured, generated entries are written to disk
//! and reloaded on the next request, and files for epochs older than the
//! on-disk limit are removed.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use primitive_types::H256;
use tracing::{debug, info, trace, warn};

use crate::ethash::{
    self, EPOCH_LENGTH, TEST_CACHE_SIZE, TEST_DATASET_SIZE, generate_cache, generate_dataset,
    seed_hash,
};

/// Revision of the on-disk layout, part of every file name.
const ALGORITHM_REVISION: u32 = 23;

/// Leading words of every spilled file.
const DUMP_MAGIC: [u32; 2] = [0xbaddcafe, 0xfee1dead];

type Slot = Arc<OnceLock<Arc<Vec<u32>>>>;

/// What a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochKind {
    /// Verification cache.
    Cache,
    /// Full mining dataset.
    Dataset,
}

impl EpochKind {
    fn prefix(self) -> &'static str {
        match self {
            EpochKind::Cache => "cache",
            EpochKind::Dataset => "full",
        }
    }
}

/// Generation parameters, shared with background prefetch threads.
#[derive(Debug, Clone)]
struct Generator {
    kind: EpochKind,
    dir: Option<PathBuf>,
    on_disk: usize,
    test: bool,
}

impl Generator {
    fn size(&self, epoch: u64) -> u64 {
        let number = epoch * EPOCH_LENGTH;
        match (self.kind, self.test) {
            (EpochKind::Cache, true) => TEST_CACHE_SIZE,
            (EpochKind::Cache, false) => ethash::cache_size(number),
            (EpochKind::Dataset, true) => TEST_DATASET_SIZE,
            (EpochKind::Dataset, false) => ethash::dataset_size(number),
        }
    }

    fn generate(&self, epoch: u64) -> Arc<Vec<u32>> {
        let seed = seed_hash(epoch * EPOCH_LENGTH);
        let size = self.size(epoch);

        let Some(dir) = &self.dir else {
            return Arc::new(self.build(epoch, size, &seed));
        };
        let path = dir.join(file_name(self.kind, &seed));
        match load(&path, size) {
            Ok(words) => {
                debug!(kind = self.kind.prefix(), epoch, path = %path.display(), "Loaded epoch data from disk");
                return Arc::new(words);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load epoch data, regenerating"),
        }

        let words = self.build(epoch, size, &seed);
        if let Err(e) = fs::create_dir_all(dir).and_then(|_| dump(&path, &words)) {
            warn!(path = %path.display(), error = %e, "Failed to write epoch data");
        }
        self.remove_stale(dir, epoch);
        Arc::new(words)
    }

    fn build(&self, epoch: u64, size: u64, seed: &H256) -> Vec<u32> {
        let start = Instant::now();
        let words = match self.kind {
            EpochKind::Cache => generate_cache(size, seed),
            EpochKind::Dataset => {
                let cache_size = if self.test {
                    TEST_CACHE_SIZE
                } else {
                    ethash::cache_size(epoch * EPOCH_LENGTH)
                };
                generate_dataset(size, &generate_cache(cache_size, seed))
            }
        };
        info!(
            kind = self.kind.prefix(),
            epoch,
            bytes = size,
            elapsed = ?start.elapsed(),
            "Generated epoch data"
        );
        words
    }

    /// Remove files of epochs that fell out of the on-disk window.
    fn remove_stale(&self, dir: &Path, epoch: u64) {
        let Some(last) = epoch.checked_sub(self.on_disk as u64) else {
            return;
        };
        let mut seed = H256::zero();
        for _ in 0..=last {
            let path = dir.join(file_name(self.kind, &seed));
            match fs::remove_file(&path) {
                Ok(()) => trace!(path = %path.display(), "Removed stale epoch data"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale epoch data"),
            }
            seed = aqua_core::crypto::keccak256(seed);
        }
    }
}

/// File name of the spilled entry for `seed`.
pub fn file_name(kind: EpochKind, seed: &H256) -> String {
    format!(
        "{}-R{}-{}",
        kind.prefix(),
        ALGORITHM_REVISION,
        hex::encode(&seed.as_bytes()[..8])
    )
}

fn dump(path: &Path, words: &[u32]) -> io::Result<()> {
    let mut bytes = Vec::with_capacity((words.len() + DUMP_MAGIC.len()) * 4);
    for word in DUMP_MAGIC.iter().chain(words) {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)
}

fn load(path: &Path, size: u64) -> io::Result<Vec<u32>> {
    let bytes = fs::read(path)?;
    let expected = size as usize + DUMP_MAGIC.len() * 4;
    if bytes.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("size mismatch: have {}, want {expected}", bytes.len()),
        ));
    }
    let mut words = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
    if words.next() != Some(DUMP_MAGIC[0]) || words.next() != Some(DUMP_MAGIC[1]) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }
    Ok(words.collect())
}

struct Inner {
    lru: LruCache<u64, Slot>,
    future: Option<(u64, Slot)>,
}

/// Memoising, LRU-bounded store of per-epoch caches or datasets.
pub struct EpochStore {
    generator: Arc<Generator>,
    prefetch: bool,
    inner: Mutex<Inner>,
}

impl EpochStore {
    /// Create a store keeping `in_mem` epochs in memory.
    ///
    /// `dir` enables spilling with `on_disk` files retained. With `prefetch`
    /// the next epoch is generated in the background after every lookup.
    pub fn new(
        kind: EpochKind,
        in_mem: usize,
        dir: Option<PathBuf>,
        on_disk: usize,
        test: bool,
        prefetch: bool,
    ) -> Self {
        let capacity = NonZeroUsize::new(in_mem).unwrap_or(NonZeroUsize::MIN);
        Self {
            generator: Arc::new(Generator {
                kind,
                dir,
                on_disk,
                test,
            }),
            prefetch,
            inner: Mutex::new(Inner {
                lru: LruCache::new(capacity),
                future: None,
            }),
        }
    }

    /// Data of `epoch`, generating (or loading) it on first use.
    pub fn get(&self, epoch: u64) -> Arc<Vec<u32>> {
        let (slot, next) = {
            let mut inner = self.inner.lock();
            let slot = match inner.lru.get(&epoch) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = match inner.future.take() {
                        Some((future, slot)) if future == epoch => slot,
                        other => {
                            inner.future = other;
                            Slot::default()
                        }
                    };
                    if let Some((evicted, _)) = inner.lru.push(epoch, slot.clone()) {
                        if evicted != epoch {
                            trace!(kind = self.generator.kind.prefix(), evicted, "Evicted epoch data");
                        }
                    }
                    slot
                }
            };
            let next_epoch = epoch + 1;
            let next = if self.prefetch
                && !inner.lru.contains(&next_epoch)
                && inner.future.as_ref().map(|(e, _)| *e) != Some(next_epoch)
            {
                let slot = Slot::default();
                inner.future = Some((next_epoch, slot.clone()));
                Some(slot)
            } else {
                None
            };
            (slot, next)
        };

        let generator = &self.generator;
        let data = slot.get_or_init(|| generator.generate(epoch)).clone();

        if let Some(next) = next {
            let generator = Arc::clone(&self.generator);
            std::thread::spawn(move || {
                next.get_or_init(|| generator.generate(epoch + 1));
            });
        }
        data
    }

    /// Epochs currently resident in memory.
    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `epoch` is resident in memory.
    pub fn contains(&self, epoch: u64) -> bool {
        self.inner.lock().lru.contains(&epoch)
    }
}

impl std::fmt::Debug for EpochStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochStore")
            .field("kind", &self.generator.kind)
            .field("resident", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn test_store(in_mem: usize, dir: Option<PathBuf>, on_disk: usize) -> EpochStore {
        EpochStore::new(EpochKind::Cache, in_mem, dir, on_disk, true, false)
    }

    // ------------------------------------------------------------------
    // Memoisation and eviction
    // ------------------------------------------------------------------

    #[test]
    fn same_epoch_is_generated_once() {
        let store = test_store(2, None, 0);
        let a = store.get(0);
        let b = store.get(0);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len() * 4, TEST_CACHE_SIZE as usize);
    }

    #[test]
    fn concurrent_requests_share_one_entry() {
        let store = Arc::new(test_store(2, None, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.get(3))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let store = test_store(2, None, 0);
        store.get(0);
        store.get(1);
        store.get(0);
        store.get(2);
        assert!(store.contains(0));
        assert!(!store.contains(1));
        assert!(store.contains(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn epochs_differ() {
        let store = test_store(2, None, 0);
        assert_ne!(*store.get(0), *store.get(1));
    }

    #[test]
    fn prefetch_fills_next_epoch() {
        let store = EpochStore::new(EpochKind::Cache, 3, None, 0, true, true);
        let first = store.get(5);
        let next = store.get(6);
        let direct = test_store(1, None, 0).get(6);
        assert_eq!(*next, *direct);
        assert_ne!(*first, *next);
    }

    // ------------------------------------------------------------------
    // Disk spill
    // ------------------------------------------------------------------

    #[test]
    fn file_name_uses_seed_prefix() {
        assert_eq!(file_name(EpochKind::Cache, &H256::zero()), "cache-R23-0000000000000000");
        assert_eq!(file_name(EpochKind::Dataset, &H256::repeat_byte(0xab)), "full-R23-abababababababab");
    }

    #[test]
    fn spilled_entry_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let generated = test_store(1, Some(dir.path().to_path_buf()), 2).get(0);
        let path = dir.path().join(file_name(EpochKind::Cache, &H256::zero()));
        assert!(path.exists());

        let reloaded = test_store(1, Some(dir.path().to_path_buf()), 2).get(0);
        assert_eq!(*generated, *reloaded);
    }

    #[test]
    fn corrupt_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(file_name(EpochKind::Cache, &H256::zero()));
        fs::write(&path, b"garbage").unwrap();
        let data = test_store(1, Some(dir.path().to_path_buf()), 2).get(0);
        assert_eq!(*data, *test_store(1, None, 0).get(0));
        assert_eq!(fs::read(&path).unwrap().len(), TEST_CACHE_SIZE as usize + 8);
    }

    #[test]
    fn old_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(1, Some(dir.path().to_path_buf()), 1);
        store.get(0);
        store.get(1);
        let epoch0 = dir.path().join(file_name(EpochKind::Cache, &seed_hash(0)));
        let epoch1 = dir.path().join(file_name(EpochKind::Cache, &seed_hash(EPOCH_LENGTH)));
        assert!(!epoch0.exists());
        assert!(epoch1.exists());
    }
}
