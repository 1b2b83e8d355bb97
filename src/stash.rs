//! stash — оркестратор: save / restore / clear / clear_all поверх памяти и диска.
//!
//! Основные свойства:
//! - save() синхронен только относительно MemoryStore; запись на диск — FlushTask в пуле.
//! - restore() потребляет снапшот один раз: токен удаляется из памяти сразу, с диска — в фоне.
//!   Пока фоновое удаление не прошло, токен помечен tombstone и диск для него не читается.
//! - clear() подчиняется политике хранения (lifecycle), clear_all() — нет.
//! - Блокирующие точки: первый durable get (warm_load_wait), уход в фон
//!   (flush_wait) и close() (тот же лимит). save() не ждёт никогда.
//!
//! Порядок блокировок: writer токена → stripe токена → (внутренние блокировки хранилищ).
//! restore() берёт только stripe, а flush держит stripe лишь на проверках, не на put.
//! Lifecycle мьютекс не держится во время ожиданий.

use anyhow::{bail, Result};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{decode, encode};
use crate::config::StashConfig;
use crate::disk::{FileStore, RecordStore};
use crate::exec::{TaskHandle, WorkerPool};
use crate::flush::{FlushContext, FlushTask, FlushTracker, Stripes};
use crate::identity::{token_key, IdentityRegistry};
use crate::lifecycle::{LifecycleEvent, LifecycleState, Reaction};
use crate::memory::MemoryStore;
use crate::metrics::{
    self, record_decode_failure, record_flush_wait_timeout, record_restore_disk_hit,
    record_restore_memory_hit, record_restore_miss, record_save,
};
use crate::report::{LogReporter, Reporter};
use crate::size::{self, SizeTree};
use crate::snapshot::{Carrier, Snapshot};

/// Snapshot offload cache. Share it as `Arc<Stash>` between call sites.
pub struct Stash {
    cfg: StashConfig,
    pool: WorkerPool,
    ctx: Arc<FlushContext>,
    registry: IdentityRegistry,
    flushes: FlushTracker,
    /// token -> number of durable deletes still queued for it
    tombstones: Arc<DashMap<String, usize>>,
    purge_all_pending: Arc<AtomicUsize>,
    purges: Mutex<Vec<TaskHandle>>,
    lifecycle: Mutex<LifecycleState>,
    closed: AtomicBool,
}

impl Stash {
    /// Open a stash backed by a [`FileStore`] in `cfg.dir`. The warm-load of
    /// existing records starts immediately in the background.
    pub fn open(cfg: StashConfig) -> Result<Self> {
        Self::open_with_reporter(cfg, Arc::new(LogReporter::default()))
    }

    pub fn open_with_reporter(cfg: StashConfig, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let pool = WorkerPool::new("quiverstash", cfg.worker_keepalive());
        let store = FileStore::open(&cfg.dir, &pool, cfg.warm_load_wait())?;
        info!("stash opened: {}", cfg);
        Ok(Self::assemble(cfg, pool, Arc::new(store), reporter))
    }

    /// Stash over a caller-supplied durable store.
    pub fn with_store(
        cfg: StashConfig,
        store: Arc<dyn RecordStore>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let pool = WorkerPool::new("quiverstash", cfg.worker_keepalive());
        Self::assemble(cfg, pool, store, reporter)
    }

    fn assemble(
        cfg: StashConfig,
        pool: WorkerPool,
        store: Arc<dyn RecordStore>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let size_limit = if cfg.report_oversized {
            Some(cfg.size_limit_bytes)
        } else {
            None
        };
        let ctx = Arc::new(FlushContext {
            memory: Arc::new(MemoryStore::new()),
            store,
            writers: Arc::new(Stripes::new()),
            stripes: Arc::new(Stripes::new()),
            reporter: Some(reporter),
            size_limit,
        });
        Self {
            cfg,
            pool,
            ctx,
            registry: IdentityRegistry::new(),
            flushes: FlushTracker::new(),
            tombstones: Arc::new(DashMap::new()),
            purge_all_pending: Arc::new(AtomicUsize::new(0)),
            purges: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(LifecycleState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StashConfig {
        &self.cfg
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("QuiverStash is not initialized (stash closed)");
        }
        Ok(())
    }

    // ---------------------- save ----------------------

    /// Offload the carrier's content for `client`. Afterwards the carrier holds
    /// only the token under [`token_key::<T>()`]. Returns the token.
    ///
    /// Returns as soon as the snapshot is in memory; it never waits for the
    /// durable write. A snapshot holding a [`Handle`](crate::Handle) is still
    /// accepted and restorable while the process lives, but it is never
    /// persisted: this is logged with `warn!` right here, and the encode error
    /// reaches the reporter from the flush.
    pub fn save<T, C>(&self, client: &Arc<T>, carrier: &mut C) -> Result<String>
    where
        T: Any + Send + Sync,
        C: Carrier + ?Sized,
    {
        self.ensure_open()?;
        let key = token_key::<T>();
        let token = self.registry.resolve_or_create(client);

        carrier.put_string(&key, &token);
        let snapshot = Arc::new(carrier.to_snapshot());
        if snapshot.has_handles() {
            warn!(
                "save {}: snapshot holds live handles, it stays in memory only and will not survive a restart",
                token
            );
        }
        self.ctx.memory.put(&token, snapshot.clone());

        let (id, batch) = self.flushes.begin(&token);
        let task = FlushTask {
            id,
            token: token.clone(),
            snapshot,
            batch,
        };
        let ctx = self.ctx.clone();
        self.pool.execute(move || {
            task.run(&ctx);
        });

        carrier.clear();
        carrier.put_string(&key, &token);
        record_save();
        debug!("save {}: queued flush {}", token, id);
        Ok(token)
    }

    // ---------------------- restore ----------------------

    /// Take back the snapshot saved for `client`, merging it into `carrier`.
    /// The token comes from the registry, else from the carrier. `None` when
    /// nothing was saved, it was already consumed, or the record is unreadable.
    pub fn restore<T, C>(&self, client: &Arc<T>, carrier: Option<&mut C>) -> Result<Option<Snapshot>>
    where
        T: Any + Send + Sync,
        C: Carrier + ?Sized,
    {
        self.ensure_open()?;
        let token = match self
            .registry
            .resolve_from_carrier(client, carrier.as_deref())
        {
            Some(t) => t,
            None => {
                record_restore_miss();
                return Ok(None);
            }
        };

        let snap = match self.take(&token) {
            Some(s) => s,
            None => {
                record_restore_miss();
                return Ok(None);
            }
        };
        if let Some(c) = carrier {
            c.put_all(&snap);
        }
        Ok(Some(snap))
    }

    /// Memory first, then the durable store. A hit is consumed from both.
    fn take(&self, token: &str) -> Option<Snapshot> {
        if let Some(snap) = self.ctx.memory.remove(token) {
            record_restore_memory_hit();
            self.schedule_purge(token);
            return Some(Arc::try_unwrap(snap).unwrap_or_else(|arc| (*arc).clone()));
        }

        let bytes = {
            let _stripe = self.ctx.stripes.lock(token);
            if self.tombstones.contains_key(token)
                || self.purge_all_pending.load(Ordering::Acquire) > 0
            {
                return None;
            }
            let bytes = self.ctx.store.get(token)?;
            // consumed: later lookups must not see the record again
            *self.tombstones.entry(token.to_string()).or_insert(0) += 1;
            bytes
        };
        self.spawn_purge(token);

        match decode(&bytes) {
            Some(snap) => {
                record_restore_disk_hit();
                Some(snap)
            }
            None => {
                record_decode_failure();
                error!(
                    "record {} ({} bytes) is not a valid snapshot; some state loss may occur",
                    token,
                    bytes.len()
                );
                None
            }
        }
    }

    // ---------------------- clear ----------------------

    /// Forget `client` and purge its data, if the retention policy allows
    /// clearing right now. Returns whether anything was cleared.
    pub fn clear<T: Any + Send + Sync>(&self, client: &Arc<T>) -> Result<bool> {
        self.ensure_open()?;
        if !self.lifecycle.lock().clear_allowed() {
            debug!("clear skipped: not permitted in the current lifecycle phase");
            return Ok(false);
        }
        let token = match self.registry.forget(client) {
            Some(t) => t,
            None => return Ok(false),
        };
        self.ctx.memory.remove(&token);
        self.schedule_purge(&token);
        Ok(true)
    }

    /// Purge memory, registry and the durable store, regardless of policy.
    pub fn clear_all(&self) -> Result<()> {
        self.ensure_open()?;
        self.ctx.memory.clear();
        self.registry.clear();
        self.purge_all_pending.fetch_add(1, Ordering::AcqRel);

        let ctx = self.ctx.clone();
        let pending = self.purge_all_pending.clone();
        let h = self.pool.submit(move |_| {
            let _writers = ctx.writers.lock_all();
            let _all = ctx.stripes.lock_all();
            ctx.store.clear_all();
            // saved after the purge started: put those back
            let mut rewritten = 0usize;
            for (token, snap) in ctx.memory.entries() {
                if let Ok(bytes) = encode(&snap) {
                    ctx.store.put(&token, &bytes);
                    rewritten += 1;
                }
            }
            pending.fetch_sub(1, Ordering::AcqRel);
            debug!("clear_all done, {} fresh record(s) rewritten", rewritten);
        });
        self.track_purge(h);
        info!("clear_all requested");
        Ok(())
    }

    fn schedule_purge(&self, token: &str) {
        *self.tombstones.entry(token.to_string()).or_insert(0) += 1;
        self.spawn_purge(token);
    }

    /// Background durable delete of `token`, releasing one tombstone. Skipped
    /// if the token was saved again meanwhile (its own flush owns the record).
    fn spawn_purge(&self, token: &str) {
        let ctx = self.ctx.clone();
        let tombstones = self.tombstones.clone();
        let token = token.to_string();
        let h = self.pool.submit(move |_| {
            {
                let _stripe = ctx.stripes.lock(&token);
                if !ctx.memory.contains(&token) {
                    ctx.store.clear(&token);
                }
            }
            tombstones.remove_if_mut(&token, |_, n| {
                *n -= 1;
                *n == 0
            });
        });
        self.track_purge(h);
    }

    fn track_purge(&self, h: TaskHandle) {
        let mut p = self.purges.lock();
        p.retain(|h| !h.is_done());
        p.push(h);
    }

    // ---------------------- lifecycle ----------------------

    /// Feed a host lifecycle event into the retention policy.
    pub fn on_lifecycle(&self, ev: LifecycleEvent) -> Result<()> {
        self.ensure_open()?;
        let reaction = self.lifecycle.lock().apply(ev);
        match reaction {
            Reaction::None => {}
            Reaction::ClearAll => {
                info!("cold start without prior state: clearing stale records");
                self.clear_all()?;
            }
            Reaction::AwaitFlushes => {
                self.await_flush_batch(self.cfg.flush_wait());
            }
        }
        Ok(())
    }

    pub fn is_foreground(&self) -> bool {
        self.lifecycle.lock().is_foreground()
    }

    pub fn is_clear_allowed(&self) -> bool {
        self.lifecycle.lock().clear_allowed()
    }

    // ---------------------- waiting ----------------------

    fn await_flush_batch(&self, timeout: Duration) -> bool {
        let t0 = Instant::now();
        let left = self.flushes.await_current(timeout);
        if left.is_empty() {
            debug!("pending flushes drained in {:?}", t0.elapsed());
            return true;
        }
        record_flush_wait_timeout();
        warn!("flushes still pending after {:?}: {:?}", timeout, left);
        false
    }

    /// Wait at most `timeout` for the current flush batch.
    pub fn await_pending_flushes(&self, timeout: Duration) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.await_flush_batch(timeout))
    }

    /// Wait at most `timeout` for queued durable deletes (restore, clear, clear_all).
    pub fn await_background(&self, timeout: Duration) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.await_purges(timeout))
    }

    fn await_purges(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let handles: Vec<TaskHandle> = self.purges.lock().clone();
        for h in handles {
            let left = deadline.saturating_duration_since(Instant::now());
            if !h.wait_timeout(left) {
                return false;
            }
        }
        self.purges.lock().retain(|h| !h.is_done());
        true
    }

    /// Tokens whose flush has not completed yet in the current batch.
    pub fn pending_tokens(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.flushes.pending_tokens())
    }

    // ---------------------- introspection ----------------------

    /// Tokens currently held in memory.
    pub fn memory_tokens(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut t = self.ctx.memory.tokens();
        t.sort();
        Ok(t)
    }

    /// Keys of the persisted records.
    pub fn durable_tokens(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.ctx.store.keys())
    }

    /// Serialized size of `snap` (what its durable record would occupy).
    pub fn byte_len(&self, snap: &Snapshot) -> Result<usize> {
        self.ensure_open()?;
        size::byte_len(snap)
    }

    /// Per-key size breakdown of `snap`.
    pub fn size_tree(&self, label: &str, snap: &Snapshot) -> Result<SizeTree> {
        self.ensure_open()?;
        size::size_tree(label, snap)
    }

    // ---------------------- teardown ----------------------

    /// Wait (bounded) for background work, then refuse further calls.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let wait = self.cfg.flush_wait();
        let t0 = Instant::now();
        let flushed = self.await_flush_batch(wait);
        let purged = self.await_purges(wait.saturating_sub(t0.elapsed()));
        let m = metrics::snapshot();
        info!(
            "stash closed (flushes drained: {}, deletes drained: {}); saves={} memory_hit_ratio={:.2} avg_flush={:.0} B",
            flushed,
            purged,
            m.saves_total,
            m.memory_hit_ratio(),
            m.avg_flush_bytes()
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MapStore {
        map: DashMap<String, Vec<u8>>,
    }

    impl RecordStore for MapStore {
        fn put(&self, key: &str, bytes: &[u8]) {
            self.map.insert(key.to_string(), bytes.to_vec());
        }
        fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.map.get(key).map(|v| v.value().clone())
        }
        fn clear(&self, key: &str) {
            self.map.remove(key);
        }
        fn clear_all(&self) {
            self.map.clear();
        }
        fn keys(&self) -> Vec<String> {
            let mut k: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
            k.sort();
            k
        }
    }

    /// put() parks until open(): a write stuck on a slow disk.
    #[derive(Default)]
    struct StalledStore {
        map: DashMap<String, Vec<u8>>,
        open: Mutex<bool>,
        cv: parking_lot::Condvar,
        entered: AtomicUsize,
    }

    impl StalledStore {
        fn open(&self) {
            *self.open.lock() = true;
            self.cv.notify_all();
        }

        fn wait_entered(&self, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            while self.entered.load(Ordering::SeqCst) == 0 {
                if Instant::now() > deadline {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            true
        }
    }

    impl RecordStore for StalledStore {
        fn put(&self, key: &str, bytes: &[u8]) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.cv.wait(&mut open);
            }
            drop(open);
            self.map.insert(key.to_string(), bytes.to_vec());
        }
        fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.map.get(key).map(|v| v.value().clone())
        }
        fn clear(&self, key: &str) {
            self.map.remove(key);
        }
        fn clear_all(&self) {
            self.map.clear();
        }
        fn keys(&self) -> Vec<String> {
            self.map.iter().map(|e| e.key().clone()).collect()
        }
    }

    struct Screen;

    fn stash_over(store: Arc<MapStore>) -> Stash {
        let cfg = StashConfig::default()
            .with_flush_wait_ms(2000)
            .with_worker_keepalive_ms(200);
        Stash::with_store(cfg, store, Arc::new(LogReporter::default()))
    }

    fn settle(st: &Stash) {
        assert!(st.await_pending_flushes(Duration::from_secs(5)).unwrap());
        assert!(st.await_background(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn save_leaves_only_the_token_in_the_carrier() -> Result<()> {
        let store = Arc::new(MapStore::default());
        let st = stash_over(store.clone());
        let a = Arc::new(Screen);

        let mut carrier = Snapshot::new().with("x", 42i32);
        let token = st.save(&a, &mut carrier)?;
        assert_eq!(carrier.len(), 1);
        assert_eq!(carrier.get_string(&token_key::<Screen>()), Some(token.clone()));

        settle(&st);
        assert_eq!(store.keys(), vec![token]);
        Ok(())
    }

    #[test]
    fn restore_consumes_memory_and_disk() -> Result<()> {
        let store = Arc::new(MapStore::default());
        let st = stash_over(store.clone());
        let a = Arc::new(Screen);

        let mut carrier = Snapshot::new().with("x", 42i32);
        st.save(&a, &mut carrier)?;
        settle(&st);

        let mut out = Snapshot::new();
        let got = st.restore(&a, Some(&mut out))?.expect("restored");
        assert_eq!(got.get("x"), Some(&42i32.into()));
        assert_eq!(out.get("x"), Some(&42i32.into()));

        assert!(st.restore(&a, Some(&mut Snapshot::new()))?.is_none());
        settle(&st);
        assert!(store.keys().is_empty());
        Ok(())
    }

    #[test]
    fn repeated_saves_reuse_the_token_and_keep_latest() -> Result<()> {
        let store = Arc::new(MapStore::default());
        let st = stash_over(store.clone());
        let a = Arc::new(Screen);

        let t1 = st.save(&a, &mut Snapshot::new().with("v", 1i32))?;
        let t2 = st.save(&a, &mut Snapshot::new().with("v", 2i32))?;
        assert_eq!(t1, t2);
        settle(&st);

        let got = st.restore::<_, Snapshot>(&a, None)?.expect("restored");
        assert_eq!(got.get("v"), Some(&2i32.into()));
        Ok(())
    }

    #[test]
    fn clear_respects_retention_policy() -> Result<()> {
        let store = Arc::new(MapStore::default());
        let st = stash_over(store.clone());
        let a = Arc::new(Screen);
        st.save(&a, &mut Snapshot::new().with("k", "v"))?;
        settle(&st);

        // ещё не было create: clear запрещён
        assert!(!st.is_clear_allowed());
        assert!(!st.clear(&a)?);
        st.on_lifecycle(LifecycleEvent::Destroyed { finishing: false })?;
        assert!(!st.clear(&a)?);
        assert_eq!(store.keys().len(), 1);

        st.on_lifecycle(LifecycleEvent::Destroyed { finishing: true })?;
        assert!(st.clear(&a)?);
        assert!(st.memory_tokens()?.is_empty());
        settle(&st);
        assert!(store.keys().is_empty());
        assert!(st.restore::<_, Snapshot>(&a, None)?.is_none());
        Ok(())
    }

    #[test]
    fn clear_all_keeps_snapshots_saved_afterwards() -> Result<()> {
        let store = Arc::new(MapStore::default());
        let st = stash_over(store.clone());
        let a = Arc::new(Screen);
        let b = Arc::new(Screen);

        st.save(&a, &mut Snapshot::new().with("a", 1i32))?;
        settle(&st);
        st.clear_all()?;
        let tb = st.save(&b, &mut Snapshot::new().with("b", 2i32))?;
        settle(&st);

        assert_eq!(store.keys(), vec![tb]);
        assert!(st.restore::<_, Snapshot>(&a, None)?.is_none());
        assert!(st.restore::<_, Snapshot>(&b, None)?.is_some());
        Ok(())
    }

    #[test]
    fn closed_stash_rejects_calls() -> Result<()> {
        let st = stash_over(Arc::new(MapStore::default()));
        let a = Arc::new(Screen);
        st.close()?;
        assert!(st.is_closed());
        let err = st.save(&a, &mut Snapshot::new()).unwrap_err();
        assert!(err.to_string().contains("not initialized"), "{err}");
        assert!(st.restore::<_, Snapshot>(&a, None).is_err());
        assert!(st.clear_all().is_err());
        assert!(st.byte_len(&Snapshot::new()).is_err());
        // повторный close — не ошибка
        st.close()?;
        Ok(())
    }

    #[test]
    fn disk_restore_is_not_held_by_a_stalled_write_on_the_same_stripe() -> Result<()> {
        let store = Arc::new(StalledStore::default());
        let cfg = StashConfig::default()
            .with_flush_wait_ms(5000)
            .with_worker_keepalive_ms(200);
        let st = Arc::new(Stash::with_store(
            cfg,
            store.clone(),
            Arc::new(LogReporter::default()),
        ));
        st.on_lifecycle(LifecycleEvent::Started)?;

        let ta = st.save(&Arc::new(Screen), &mut Snapshot::new().with("a", 1i32))?;
        assert!(store.wait_entered(Duration::from_secs(5)));

        // запись прошлого процесса, попадающая в ту же полосу, что и застрявший flush
        let old = (0u32..)
            .map(|i| format!("old-{i}"))
            .find(|t| Stripes::slot(t) == Stripes::slot(&ta))
            .unwrap();
        store
            .map
            .insert(old.clone(), encode(&Snapshot::new().with("b", 2i32))?);

        let mut carrier = Snapshot::new();
        carrier.put_string(&token_key::<Screen>(), &old);
        let (tx, rx) = std::sync::mpsc::channel();
        let st2 = st.clone();
        std::thread::spawn(move || {
            let r = st2.restore(&Arc::new(Screen), Some(&mut carrier));
            let _ = tx.send(r);
        });

        let res = rx.recv_timeout(Duration::from_secs(2));
        store.open();
        let got = res.map_err(|_| anyhow::anyhow!("restore waited for an unrelated write"))??;
        let got = got.expect("record from disk");
        assert_eq!(got.get("b"), Some(&2i32.into()));

        assert!(st.await_pending_flushes(Duration::from_secs(5))?);
        assert!(st.await_background(Duration::from_secs(5))?);
        assert!(store.get(&ta).is_some());
        assert!(store.get(&old).is_none(), "consumed record is purged");
        Ok(())
    }
}
