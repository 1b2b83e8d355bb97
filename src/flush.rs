//! flush — фоновая запись снапшотов в RecordStore и учёт «пачки» ожидающих задач.
//!
//! FlushTask — сообщение (token, snapshot) без общих изменяемых замыканий. При выполнении
//! задача смотрит на MemoryStore *сейчас*, а не на момент постановки:
//! - в памяти уже другой снапшот для токена → пропускаем (новую запись сделает его задача);
//! - токена в памяти нет (restore/clear успели раньше) → ничего не пишем;
//! - иначе пишем, и если за время записи токен исчез — удаляем только что записанное.
//!
//! FlushBatch — одноразовый счётчик ожидания для текущей пачки. После того как пачка
//! опустела и ожидание отработало, трекер начинает новую; старая не переиспользуется.
//!
//! Stripes — полосатые мьютексы по токену, два набора:
//! - writers сериализует записи одного токена и держится на всё время put;
//! - stripes — короткие проверки «токен ещё в памяти?» вместе с удалением/чтением.
//!   restore и фоновые удаления берут только его, поэтому медленная запись их не держит.
//! Порядок: writers → stripes.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::encode;
use crate::disk::RecordStore;
use crate::memory::MemoryStore;
use crate::metrics::{record_flush_self_cancel, record_flush_write, record_oversized};
use crate::report::{kb, Reporter, SizeExceeded};
use crate::snapshot::Snapshot;

// ---------------------- Stripes ----------------------

const STRIPES: usize = 16;

pub(crate) struct Stripes {
    locks: Vec<Mutex<()>>,
}

impl Stripes {
    pub(crate) fn new() -> Self {
        Self {
            locks: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) fn slot(token: &str) -> usize {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut h);
        (h.finish() as usize) % STRIPES
    }

    pub(crate) fn lock(&self, token: &str) -> MutexGuard<'_, ()> {
        self.locks[Self::slot(token)].lock()
    }

    /// All stripes, always in the same order.
    pub(crate) fn lock_all(&self) -> Vec<MutexGuard<'_, ()>> {
        self.locks.iter().map(|m| m.lock()).collect()
    }
}

// ---------------------- Batch ----------------------

/// Pending flushes of one batch: task id -> token.
pub(crate) struct FlushBatch {
    pending: Mutex<HashMap<u64, String>>,
    cv: Condvar,
}

impl FlushBatch {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        }
    }

    fn add(&self, id: u64, token: &str) {
        self.pending.lock().insert(id, token.to_string());
    }

    pub(crate) fn complete(&self, id: u64) {
        let mut p = self.pending.lock();
        p.remove(&id);
        if p.is_empty() {
            self.cv.notify_all();
        }
    }

    fn is_drained(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn tokens(&self) -> Vec<String> {
        let mut t: Vec<String> = self.pending.lock().values().cloned().collect();
        t.sort();
        t.dedup();
        t
    }

    /// Block until drained or `timeout` elapses. True if drained.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut p = self.pending.lock();
        while !p.is_empty() {
            if self.cv.wait_until(&mut p, deadline).timed_out() {
                return p.is_empty();
            }
        }
        true
    }
}

/// Tracks the current batch and hands out task ids.
pub(crate) struct FlushTracker {
    current: Mutex<Option<Arc<FlushBatch>>>,
    next_id: AtomicU64,
}

impl FlushTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a flush for `token` in the current batch (a fresh one if the
    /// previous batch already drained).
    pub(crate) fn begin(&self, token: &str) -> (u64, Arc<FlushBatch>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut cur = self.current.lock();
        let batch = match cur.as_ref() {
            Some(b) if !b.is_drained() => b.clone(),
            _ => {
                let b = Arc::new(FlushBatch::new());
                *cur = Some(b.clone());
                b
            }
        };
        batch.add(id, token);
        (id, batch)
    }

    /// Wait (bounded) for the current batch. The batch is retired afterwards
    /// so the next flush starts a new one. Returns the tokens still pending
    /// (empty when the batch drained).
    pub(crate) fn await_current(&self, timeout: Duration) -> Vec<String> {
        let batch = match self.current.lock().clone() {
            Some(b) => b,
            None => return Vec::new(),
        };
        let left = if batch.wait(timeout) {
            Vec::new()
        } else {
            batch.tokens()
        };
        let mut cur = self.current.lock();
        if let Some(b) = cur.as_ref() {
            if Arc::ptr_eq(b, &batch) {
                *cur = None;
            }
        }
        left
    }

    pub(crate) fn pending_tokens(&self) -> Vec<String> {
        match self.current.lock().as_ref() {
            Some(b) => b.tokens(),
            None => Vec::new(),
        }
    }
}

// ---------------------- Task ----------------------

/// Outcome of one flush, mostly for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    /// Written, then deleted because the token left memory during the write.
    SelfCancelled,
    /// Nothing written: the token was gone before the write.
    Skipped,
    /// Nothing written: a newer snapshot for the token is in memory.
    Superseded,
    /// Encoding failed (live handle, bad bitmap); memory stays authoritative.
    EncodeFailed,
}

pub(crate) struct FlushContext {
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn RecordStore>,
    pub writers: Arc<Stripes>,
    pub stripes: Arc<Stripes>,
    pub reporter: Option<Arc<dyn Reporter>>,
    pub size_limit: Option<usize>,
}

pub(crate) struct FlushTask {
    pub id: u64,
    pub token: String,
    pub snapshot: Arc<Snapshot>,
    pub batch: Arc<FlushBatch>,
}

impl FlushTask {
    pub(crate) fn run(self, ctx: &FlushContext) -> FlushOutcome {
        let outcome = self.run_inner(ctx);
        debug!("flush {} ({}): {:?}", self.id, self.token, outcome);
        self.batch.complete(self.id);
        outcome
    }

    fn run_inner(&self, ctx: &FlushContext) -> FlushOutcome {
        let _writer = ctx.writers.lock(&self.token);

        {
            let _stripe = ctx.stripes.lock(&self.token);
            if !ctx.memory.holds(&self.token, &self.snapshot) {
                return if ctx.memory.contains(&self.token) {
                    FlushOutcome::Superseded
                } else {
                    FlushOutcome::Skipped
                };
            }
        }

        let bytes = match encode(&self.snapshot) {
            Ok(b) => b,
            Err(e) => {
                warn!("flush {}: snapshot kept in memory only: {:#}", self.token, e);
                if let Some(r) = &ctx.reporter {
                    r.log_error(&e);
                }
                return FlushOutcome::EncodeFailed;
            }
        };

        if let Some(limit) = ctx.size_limit {
            if bytes.len() > limit {
                record_oversized();
                if let Some(r) = &ctx.reporter {
                    r.log_error(&anyhow::Error::new(SizeExceeded {
                        token: self.token.clone(),
                        size: bytes.len(),
                        limit,
                    }));
                }
            }
        }

        ctx.store.put(&self.token, &bytes);
        record_flush_write(bytes.len());

        let _stripe = ctx.stripes.lock(&self.token);
        if !ctx.memory.contains(&self.token) {
            // restore/clear обогнал запись — не оставляем сироту на диске
            ctx.store.clear(&self.token);
            record_flush_self_cancel();
            return FlushOutcome::SelfCancelled;
        }
        if let Some(r) = &ctx.reporter {
            r.log(&format!("snapshot {} saved: {:.1} KB", self.token, kb(bytes.len())));
        }
        FlushOutcome::Written
    }
}
