//! exec — общий неограниченный пул фоновых потоков ("cached pool").
//!
//! - Поток создаётся, когда задач в очереди больше, чем простаивающих воркеров.
//! - Простаивающий воркер завершается после keepalive без работы.
//! - submit() возвращает TaskHandle: кооперативная отмена + ожидание завершения с таймаутом.
//! - Паника внутри задачи ловится и логируется, воркер продолжает работу.
//!
//! Все фоновые операции кэша (warm-load, flush, clear) идут через один пул.

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    jobs: VecDeque<Job>,
    idle: usize,
    workers: usize,
    shutdown: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    cv: Condvar,
    keepalive: Duration,
    name: String,
    next_worker: AtomicU64,
}

/// Shared unbounded worker pool. Clones share the same threads; the pool
/// stops once the last clone is dropped (queued jobs still run).
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    _shutdown: Arc<ShutdownOnDrop>,
}

struct ShutdownOnDrop(Arc<PoolInner>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        let mut st = self.0.state.lock();
        st.shutdown = true;
        drop(st);
        self.0.cv.notify_all();
        debug!("{}: pool shut down", self.0.name);
    }
}

impl WorkerPool {
    pub fn new(name: &str, keepalive: Duration) -> Self {
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                idle: 0,
                workers: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
            keepalive,
            name: name.to_string(),
            next_worker: AtomicU64::new(1),
        });
        Self {
            _shutdown: Arc::new(ShutdownOnDrop(inner.clone())),
            inner,
        }
    }

    /// Queue a fire-and-forget job.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let spawn = {
            let mut st = self.inner.state.lock();
            if st.shutdown {
                debug!("{}: pool is shut down, running job inline", self.inner.name);
                drop(st);
                run_guarded(&self.inner.name, Box::new(f));
                return;
            }
            st.jobs.push_back(Box::new(f));
            if st.jobs.len() > st.idle {
                st.workers += 1;
                true
            } else {
                false
            }
        };
        if spawn {
            self.spawn_worker();
        } else {
            self.inner.cv.notify_one();
        }
    }

    /// Queue a cancellable job; the closure receives its own [`CancelToken`].
    pub fn submit<F>(&self, f: F) -> TaskHandle
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        let state = Arc::new(TaskState::default());
        let token = CancelToken(state.clone());
        self.execute(move || {
            let _done = DoneGuard(token.0.clone());
            if token.is_cancelled() {
                return;
            }
            f(&token);
        });
        TaskHandle { state }
    }

    /// Number of live worker threads (idle included).
    pub fn worker_count(&self) -> usize {
        self.inner.state.lock().workers
    }

    fn spawn_worker(&self) {
        let inner = self.inner.clone();
        let n = inner.next_worker.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", inner.name, n);
        let res = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(inner));
        if let Err(e) = res {
            // Не смогли создать поток — выполним очередь сами, чтобы задача не потерялась.
            error!("{}: spawn worker failed: {e}", self.inner.name);
            let job = {
                let mut st = self.inner.state.lock();
                st.workers = st.workers.saturating_sub(1);
                st.jobs.pop_front()
            };
            if let Some(job) = job {
                run_guarded(&self.inner.name, job);
            }
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let job = {
            let mut st = inner.state.lock();
            loop {
                if let Some(job) = st.jobs.pop_front() {
                    break Some(job);
                }
                if st.shutdown {
                    break None;
                }
                st.idle += 1;
                let timed_out = inner.cv.wait_for(&mut st, inner.keepalive).timed_out();
                st.idle -= 1;
                if timed_out && st.jobs.is_empty() {
                    break None;
                }
            }
        };
        match job {
            Some(job) => run_guarded(&inner.name, job),
            None => {
                let mut st = inner.state.lock();
                st.workers = st.workers.saturating_sub(1);
                return;
            }
        }
    }
}

fn run_guarded(name: &str, job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("{name}: background job panicked");
    }
}

// ---------------------- Task handle ----------------------

#[derive(Default)]
struct TaskState {
    cancelled: AtomicBool,
    done: Mutex<bool>,
    cv: Condvar,
}

struct DoneGuard(Arc<TaskState>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let mut done = self.0.done.lock();
        *done = true;
        self.0.cv.notify_all();
    }
}

/// Cooperative cancellation flag handed to a submitted job.
#[derive(Clone)]
pub struct CancelToken(Arc<TaskState>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }
}

/// Handle to a job queued with [`WorkerPool::submit`].
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    /// A handle that is already finished (nothing to wait for).
    pub fn completed() -> Self {
        let state = Arc::new(TaskState::default());
        *state.done.lock() = true;
        Self { state }
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        *self.state.done.lock()
    }

    /// Block for at most `timeout`. Returns true if the job finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.state.done.lock();
        while !*done {
            if self.state.cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pool_runs_jobs_concurrently_and_grows_on_demand() {
        let pool = WorkerPool::new("test-pool", Duration::from_millis(200));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let started = Arc::new(AtomicUsize::new(0));

        // 4 задачи блокируются на общем «шлагбауме» — пул обязан поднять 4 потока.
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let started = started.clone();
            handles.push(pool.submit(move |_| {
                started.fetch_add(1, Ordering::SeqCst);
                let (m, cv) = &*gate;
                let mut open = m.lock();
                while !*open {
                    cv.wait(&mut open);
                }
            }));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while started.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(started.load(Ordering::SeqCst), 4, "all jobs must run in parallel");
        assert!(pool.worker_count() >= 4);

        {
            let (m, cv) = &*gate;
            *m.lock() = true;
            cv.notify_all();
        }
        for h in &handles {
            assert!(h.wait_timeout(Duration::from_secs(5)));
        }
    }

    #[test]
    fn wait_timeout_is_bounded() {
        let pool = WorkerPool::new("test-timeout", Duration::from_millis(50));
        let h = pool.submit(|tok| {
            while !tok.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
        });
        let t0 = Instant::now();
        assert!(!h.wait_timeout(Duration::from_millis(100)));
        assert!(t0.elapsed() < Duration::from_secs(2));
        h.cancel();
        assert!(h.is_cancelled());
        assert!(h.wait_timeout(Duration::from_secs(5)));
        assert!(h.is_done());
        assert!(TaskHandle::completed().wait_timeout(Duration::ZERO));
    }

    #[test]
    fn panicking_job_does_not_poison_the_pool() {
        let pool = WorkerPool::new("test-panic", Duration::from_millis(50));
        let h = pool.submit(|_| panic!("boom"));
        assert!(h.wait_timeout(Duration::from_secs(5)));
        let ok = Arc::new(AtomicBool::new(false));
        let ok2 = ok.clone();
        let h2 = pool.submit(move |_| ok2.store(true, Ordering::SeqCst));
        assert!(h2.wait_timeout(Duration::from_secs(5)));
        assert!(ok.load(Ordering::SeqCst));
    }
}
