//! FileStore — RecordStore поверх каталога с файлами (один файл на ключ).
//!
//! Поведение:
//! - open() сразу ставит в пул фоновый warm-load: все записи каталога читаются в индекс (DashMap).
//! - Первый get() ждёт warm-load не дольше warm_wait, затем читает напрямую с диска.
//!   Последующие get() не ждут никогда.
//! - put(): индекс, затем tmp + rename (уникальное имя tmp на каждую запись).
//! - clear()/clear_all(): отмена warm-load, чистка индекса, удаление файлов.
//!
//! Гонки с чтением:
//! - warm-load и прямое чтение вставляют в индекс только под read-гейтом и только если
//!   поколение (generation) не сменилось; clear/clear_all меняют поколение под write-гейтом.
//!   Так удалённая запись не «воскресает» из уже прочитанных байт.

use anyhow::{Context, Result};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{file_name_for_key, key_for_file_name, RecordStore};
use crate::consts::TMP_SUFFIX;
use crate::exec::{CancelToken, TaskHandle, WorkerPool};
use crate::metrics::{record_io_error, record_warm_load_timeout, record_warm_loaded};

struct Shared {
    dir: PathBuf,
    index: DashMap<String, Vec<u8>>,
    gate: RwLock<()>,
    generation: AtomicU64,
    tmp_seq: AtomicU64,
}

impl Shared {
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for_key(key))
    }

    /// Insert into the index unless a destructive op happened since `gen` was read.
    fn insert_if_current(&self, key: &str, bytes: Vec<u8>, gen: u64, cancel: Option<&CancelToken>) -> bool {
        let _g = self.gate.read();
        if self.generation.load(Ordering::Acquire) != gen {
            return false;
        }
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return false;
        }
        self.index.entry(key.to_string()).or_insert(bytes);
        true
    }

    fn read_file(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read record {}", path.display())),
        }
    }

    fn write_file(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{}.{}{}", file_name_for_key(key), seq, TMP_SUFFIX));

        let res = (|| -> Result<()> {
            let mut f = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp)
                .with_context(|| format!("open {}", tmp.display()))?;
            f.write_all(bytes)
                .with_context(|| format!("write {}", tmp.display()))?;
            let _ = f.sync_all();
            fs::rename(&tmp, &path)
                .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
            Ok(())
        })();
        if res.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        res
    }

    fn remove_file(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove record {}", path.display())),
        }
    }

    /// Delete every file in the directory (records and temp leftovers).
    fn remove_all_files(&self) -> Result<usize> {
        let mut removed = 0usize;
        let rd = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("read_dir {}", self.dir.display()))
            }
        };
        for entry in rd {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("remove {}", entry.path().display()))
                }
            }
        }
        Ok(removed)
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let rd = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => {
                return Err(e).with_context(|| format!("read_dir {}", self.dir.display()))
            }
        };
        for entry in rd {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(key_for_file_name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn warm_load(&self, cancel: &CancelToken) -> Result<u64> {
        let gen = self.generation.load(Ordering::Acquire);
        let mut loaded = 0u64;
        for key in self.list_keys()? {
            if cancel.is_cancelled() {
                debug!("warm-load: cancelled after {} record(s)", loaded);
                break;
            }
            if self.index.contains_key(&key) {
                continue;
            }
            if let Some(bytes) = self.read_file(&key)? {
                if !self.insert_if_current(&key, bytes, gen, Some(cancel)) {
                    break;
                }
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

/// Filesystem [`RecordStore`] with a background warm-load.
pub struct FileStore {
    shared: Arc<Shared>,
    warm: TaskHandle,
    warm_wait: Duration,
    loaded_or_timed_out: AtomicBool,
}

impl FileStore {
    /// Open (create) the store directory and start the warm-load on `pool`.
    pub fn open(dir: &Path, pool: &WorkerPool, warm_wait: Duration) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create store dir {}", dir.display()))?;
        let shared = Arc::new(Shared {
            dir: dir.to_path_buf(),
            index: DashMap::new(),
            gate: RwLock::new(()),
            generation: AtomicU64::new(0),
            tmp_seq: AtomicU64::new(0),
        });

        let job_shared = shared.clone();
        let warm = pool.submit(move |cancel| match job_shared.warm_load(cancel) {
            Ok(n) => {
                record_warm_loaded(n);
                debug!("warm-load: {} record(s) from {}", n, job_shared.dir.display());
            }
            Err(e) => {
                record_io_error();
                warn!("warm-load failed (falling back to direct reads): {:#}", e);
            }
        });

        Ok(Self {
            shared,
            warm,
            warm_wait,
            loaded_or_timed_out: AtomicBool::new(false),
        })
    }

    /// Open without a warm-load (every get reads the file directly).
    pub fn open_cold(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create store dir {}", dir.display()))?;
        Ok(Self {
            shared: Arc::new(Shared {
                dir: dir.to_path_buf(),
                index: DashMap::new(),
                gate: RwLock::new(()),
                generation: AtomicU64::new(0),
                tmp_seq: AtomicU64::new(0),
            }),
            warm: TaskHandle::completed(),
            warm_wait: Duration::ZERO,
            loaded_or_timed_out: AtomicBool::new(true),
        })
    }

    /// Records currently held in the in-memory index.
    pub fn indexed_len(&self) -> usize {
        self.shared.index.len()
    }

    pub fn is_warm_load_done(&self) -> bool {
        self.warm.is_done()
    }

    /// On-disk size of a record, if present.
    pub fn record_len(&self, key: &str) -> Option<u64> {
        fs::metadata(self.shared.path_for(key)).ok().map(|m| m.len())
    }

    fn wait_for_warm_load(&self) {
        if self.loaded_or_timed_out.load(Ordering::Acquire) {
            return;
        }
        if !self.warm.wait_timeout(self.warm_wait) {
            // Сделали что могли; дальше читаем напрямую.
            record_warm_load_timeout();
            info!(
                "warm-load still running after {:?}, reading records directly",
                self.warm_wait
            );
        }
        self.loaded_or_timed_out.store(true, Ordering::Release);
    }

    /// Cancel the warm-load and invalidate reads that are in flight.
    fn invalidate(&self) {
        self.warm.cancel();
        let _g = self.shared.gate.write();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl RecordStore for FileStore {
    fn put(&self, key: &str, bytes: &[u8]) {
        self.shared.index.insert(key.to_string(), bytes.to_vec());
        if let Err(e) = self.shared.write_file(key, bytes) {
            record_io_error();
            warn!("put {}: {:#}", key, e);
        }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.wait_for_warm_load();

        if let Some(b) = self.shared.index.get(key) {
            return Some(b.value().clone());
        }

        let gen = self.shared.generation.load(Ordering::Acquire);
        match self.shared.read_file(key) {
            Ok(Some(bytes)) => {
                self.shared.insert_if_current(key, bytes.clone(), gen, None);
                Some(bytes)
            }
            Ok(None) => None,
            Err(e) => {
                record_io_error();
                warn!("get {}: {:#}", key, e);
                None
            }
        }
    }

    fn clear(&self, key: &str) {
        self.invalidate();
        self.shared.index.remove(key);
        if let Err(e) = self.shared.remove_file(key) {
            record_io_error();
            warn!("clear {}: {:#}", key, e);
        }
    }

    fn clear_all(&self) {
        self.invalidate();
        self.shared.index.clear();
        match self.shared.remove_all_files() {
            Ok(n) => debug!("clear_all: removed {} file(s) in {}", n, self.shared.dir.display()),
            Err(e) => {
                record_io_error();
                warn!("clear_all: {:#}", e);
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        match self.shared.list_keys() {
            Ok(k) => k,
            Err(e) => {
                record_io_error();
                warn!("keys: {:#}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Instant, SystemTime, UNIX_EPOCH};

    fn unique_dir(prefix: &str) -> PathBuf {
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("qs-file-{}-{}-{}", prefix, std::process::id(), t))
    }

    #[test]
    fn put_get_clear_roundtrip() -> Result<()> {
        let dir = unique_dir("basic");
        let pool = WorkerPool::new("t-file", Duration::from_millis(100));
        let st = FileStore::open(&dir, &pool, Duration::from_millis(500))?;

        st.put("k1", b"hello");
        assert_eq!(st.get("k1").as_deref(), Some(&b"hello"[..]));
        assert_eq!(st.record_len("k1"), Some(5));
        assert_eq!(st.keys(), vec!["k1".to_string()]);

        st.clear("k1");
        assert!(st.get("k1").is_none());
        assert!(!dir.join("k1").exists());
        Ok(())
    }

    #[test]
    fn reopen_warm_loads_existing_records() -> Result<()> {
        let dir = unique_dir("warm");
        let pool = WorkerPool::new("t-warm", Duration::from_millis(100));
        {
            let st = FileStore::open_cold(&dir)?;
            st.put("a", b"1");
            st.put("b", b"22");
        }
        // leftover tmp must not show up as a record
        fs::write(dir.join(format!("a.99{}", TMP_SUFFIX)), b"junk")?;

        let st = FileStore::open(&dir, &pool, Duration::from_secs(5))?;
        assert_eq!(st.get("b").as_deref(), Some(&b"22"[..]));
        assert!(st.is_warm_load_done());
        assert_eq!(st.indexed_len(), 2);
        assert_eq!(st.keys(), vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }

    #[test]
    fn clear_all_removes_everything_and_first_get_is_bounded() -> Result<()> {
        let dir = unique_dir("all");
        let pool = WorkerPool::new("t-all", Duration::from_millis(100));
        let st = FileStore::open(&dir, &pool, Duration::from_millis(200))?;
        st.put("a", b"1");
        st.put("b", b"2");
        st.clear_all();
        let t0 = Instant::now();
        assert!(st.get("a").is_none());
        assert!(st.get("b").is_none());
        assert!(t0.elapsed() < Duration::from_secs(2));
        assert!(st.keys().is_empty());
        Ok(())
    }
}
