//! Dependency-chained kernel scheduling on a worker thread pool.
//!
//! Jobs are submitted together with the [`JobHandle`]s they depend on and
//! become runnable only once every dependency has completed. Submission never
//! blocks: it returns a new handle immediately. Kernels over a region are
//! split into index batches that run as independent jobs writing disjoint
//! ranges; the returned handle completes when every batch has.
//!
//! A panic poisons the job's handle and, through it, every job that depends
//! on it. Poisoned jobs skip their body, so partial data never feeds a
//! downstream kernel and the failure reaches the handles callers wait on.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::arena::{RegionView, RegionWriter};
use crate::error::EvalError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Number of worker threads. `0` picks `num_cpus - 1` (at least one).
    pub worker_threads: usize,
    /// Number of sample indices handled by one kernel job.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            batch_size: 4096,
        }
    }
}

impl SchedulerConfig {
    /// Worker count after resolving the automatic setting.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HandleInner {
    complete: bool,
    panicked: bool,
    continuations: Vec<Arc<PendingJob>>,
}

#[derive(Default)]
struct HandleState {
    inner: Mutex<HandleInner>,
    done: Condvar,
}

/// Completion future of a scheduled job.
///
/// Cloning is cheap; every clone observes the same completion.
#[derive(Clone)]
pub struct JobHandle(Arc<HandleState>);

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self {
        let handle = Self(Arc::default());
        handle.lock().complete = true;
        handle
    }

    fn pending() -> Self {
        Self(Arc::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleInner> {
        self.0.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` once the job has run.
    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Returns `true` if the job or any job it transitively depends on
    /// panicked.
    pub fn panicked(&self) -> bool {
        self.lock().panicked
    }

    /// Block the calling thread until the job has run.
    ///
    /// Only external consumers wait; nodes never block on each other.
    pub fn wait(&self) {
        let mut inner = self.lock();
        while !inner.complete {
            inner = self
                .0
                .done
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Register `job` to be released when this handle completes. Returns
    /// `false` if the handle is already complete and nothing was registered;
    /// a panicked handle still poisons `job`.
    fn add_continuation(&self, job: &Arc<PendingJob>) -> bool {
        let mut inner = self.lock();
        if inner.complete {
            if inner.panicked {
                job.poison();
            }
            return false;
        }
        inner.continuations.push(Arc::clone(job));
        true
    }

    fn complete(&self, panicked: bool) -> Vec<Arc<PendingJob>> {
        let continuations = {
            let mut inner = self.lock();
            inner.complete = true;
            inner.panicked = panicked;
            std::mem::take(&mut inner.continuations)
        };
        self.0.done.notify_all();
        continuations
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// A job waiting for its dependencies. `remaining` counts unfinished
/// dependencies plus one guard held by the submitting thread.
struct PendingJob {
    remaining: AtomicUsize,
    poisoned: AtomicBool,
    job: Mutex<Option<Job>>,
    handle: JobHandle,
}

impl PendingJob {
    /// Mark that a dependency panicked.
    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

enum Message {
    Run(Arc<PendingJob>),
    Shutdown,
}

struct Shared {
    sender: Sender<Message>,
    in_flight: Mutex<u64>,
    idle: Condvar,
    executed: AtomicU64,
}

impl Shared {
    /// Drop one dependency count; dispatch the job when it reaches zero.
    fn release(&self, pending: Arc<PendingJob>) {
        if pending.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Workers only stop after `wait_idle`, so the channel is open
            // for as long as anything is in flight.
            let _ = self.sender.send(Message::Run(pending));
        }
    }

    fn finish_one(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight -= 1;
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// Shared worker pool that runs kernels once their dependencies complete.
pub struct JobScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    batch_size: usize,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("workers", &self.workers.len())
            .field("batch_size", &self.batch_size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl JobScheduler {
    /// Start the worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Scheduler`] if a worker thread cannot be spawned.
    pub fn new(config: &SchedulerConfig) -> Result<Self, EvalError> {
        let (sender, receiver) = unbounded::<Message>();
        let shared = Arc::new(Shared {
            sender,
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            executed: AtomicU64::new(0),
        });

        let thread_count = config.resolved_worker_threads();
        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let worker = std::thread::Builder::new()
                .name(format!("heightgraph-worker-{index}"))
                .spawn(move || worker_loop(&receiver, &shared))
                .map_err(EvalError::Scheduler)?;
            workers.push(worker);
        }

        tracing::debug!(
            workers = thread_count,
            batch_size = config.batch_size,
            "job scheduler started"
        );

        Ok(Self {
            shared,
            workers,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Submit `job` to run after every handle in `dependencies` completes.
    pub fn schedule_task<F>(&self, dependencies: &[JobHandle], job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = JobHandle::pending();
        let pending = Arc::new(PendingJob {
            remaining: AtomicUsize::new(dependencies.len() + 1),
            poisoned: AtomicBool::new(false),
            job: Mutex::new(Some(Box::new(job))),
            handle: handle.clone(),
        });

        *self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;

        for dependency in dependencies {
            if !dependency.add_continuation(&pending) {
                pending.remaining.fetch_sub(1, Ordering::AcqRel);
            }
        }
        // Drop the submission guard; this dispatches immediately when every
        // dependency had already completed.
        self.shared.release(pending);
        handle
    }

    /// Run `kernel` once per index of the writer's region after every handle
    /// in `dependencies` completes, and hand back the read-only view.
    ///
    /// The kernel is a pure `index -> value` function; the region is split
    /// into batches that may run concurrently on different workers.
    pub fn schedule_kernel<K>(
        &self,
        writer: RegionWriter,
        dependencies: &[JobHandle],
        kernel: K,
    ) -> (JobHandle, RegionView)
    where
        K: Fn(usize) -> f32 + Send + Sync + 'static,
    {
        let length = writer.region().length;
        let (sink, view) = writer.into_parts();
        let kernel = Arc::new(kernel);

        let batches: Vec<JobHandle> = (0..length)
            .step_by(self.batch_size)
            .map(|start| {
                let end = (start + self.batch_size).min(length);
                let kernel = Arc::clone(&kernel);
                let sink = sink.clone();
                self.schedule_task(dependencies, move || {
                    for index in start..end {
                        sink.store(index, kernel(index));
                    }
                })
            })
            .collect();

        (self.combine(&batches), view)
    }

    /// A handle that completes once every handle in `dependencies` has, and
    /// is panicked if any of them is.
    pub fn combine(&self, dependencies: &[JobHandle]) -> JobHandle {
        match dependencies {
            [] => JobHandle::completed(),
            [single] => single.clone(),
            many => self.schedule_task(many, || {}),
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn in_flight(&self) -> u64 {
        *self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Total jobs executed since start.
    pub fn executed_count(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    /// Block until no job is in flight.
    pub fn wait_idle(&self) {
        let mut in_flight = self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *in_flight > 0 {
            in_flight = self
                .shared
                .idle
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        // Every in-flight job only depends on earlier jobs, so this terminates.
        self.wait_idle();
        for _ in &self.workers {
            let _ = self.shared.sender.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(receiver: &Receiver<Message>, shared: &Shared) {
    while let Ok(message) = receiver.recv() {
        let pending = match message {
            Message::Run(pending) => pending,
            Message::Shutdown => break,
        };

        let job = pending
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let panicked = if pending.is_poisoned() {
            tracing::debug!("skipping job downstream of a panicked job");
            true
        } else {
            match job {
                Some(job) => {
                    let failed = catch_unwind(AssertUnwindSafe(job)).is_err();
                    if failed {
                        tracing::error!("kernel panicked; its region holds partial data");
                    }
                    failed
                }
                None => false,
            }
        };

        for continuation in pending.handle.complete(panicked) {
            if panicked {
                continuation.poison();
            }
            shared.release(continuation);
        }
        shared.finish_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn scheduler(threads: usize, batch_size: usize) -> JobScheduler {
        JobScheduler::new(&SchedulerConfig {
            worker_threads: threads,
            batch_size,
        })
        .unwrap()
    }

    #[test]
    fn test_kernel_writes_every_index() {
        let scheduler = scheduler(4, 7);
        let arena = Arena::new(1024);
        let (handle, view) = scheduler.schedule_kernel(arena.allocate(16), &[], |i| i as f32 * 2.0);
        handle.wait();

        let values = view.to_vec();
        assert_eq!(values.len(), 256);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(*v, i as f32 * 2.0);
        }
    }

    #[test]
    fn test_dependent_kernel_sees_upstream_values() {
        let scheduler = scheduler(3, 5);
        let arena = Arena::new(1024);

        let (first, upstream) = scheduler.schedule_kernel(arena.allocate(8), &[], |i| {
            std::thread::sleep(Duration::from_micros(50));
            i as f32
        });
        let source = upstream.clone();
        let (second, downstream) =
            scheduler.schedule_kernel(arena.allocate(8), &[first], move |i| source.get(i) + 1.0);
        second.wait();

        for i in 0..64 {
            assert_eq!(downstream.get(i), i as f32 + 1.0, "index {i}");
        }
    }

    #[test]
    fn test_task_waits_for_all_dependencies() {
        let scheduler = scheduler(4, 64);
        let flags: Vec<Arc<AtomicBool>> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();

        let handles: Vec<JobHandle> = flags
            .iter()
            .enumerate()
            .map(|(n, flag)| {
                let flag = Arc::clone(flag);
                scheduler.schedule_task(&[], move || {
                    std::thread::sleep(Duration::from_millis(5 * (n as u64 + 1)));
                    flag.store(true, Ordering::SeqCst);
                })
            })
            .collect();

        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);
        let check = flags.clone();
        let last = scheduler.schedule_task(&handles, move || {
            seen.store(check.iter().all(|f| f.load(Ordering::SeqCst)), Ordering::SeqCst);
        });
        last.wait();

        assert!(observed.load(Ordering::SeqCst), "ran before a dependency finished");
    }

    #[test]
    fn test_combine_edge_cases() {
        let scheduler = scheduler(1, 64);
        assert!(scheduler.combine(&[]).is_complete());

        let single = scheduler.schedule_task(&[], || {});
        let combined = scheduler.combine(std::slice::from_ref(&single));
        combined.wait();
        assert!(single.is_complete());
    }

    #[test]
    fn test_completed_dependency_dispatches_immediately() {
        let scheduler = scheduler(2, 64);
        let done = JobHandle::completed();
        let handle = scheduler.schedule_task(&[done], || {});
        handle.wait();
        assert!(handle.is_complete());
    }

    #[test]
    fn test_panicking_job_poisons_dependents() {
        let scheduler = scheduler(1, 64);
        let ran = Arc::new(AtomicBool::new(false));
        let failing = scheduler.schedule_task(&[], || panic!("boom"));
        let flag = Arc::clone(&ran);
        let after = scheduler.schedule_task(std::slice::from_ref(&failing), move || {
            flag.store(true, Ordering::SeqCst);
        });
        let last = scheduler.schedule_task(std::slice::from_ref(&after), || {});
        last.wait();
        assert!(failing.panicked());
        assert!(after.panicked());
        assert!(last.panicked());
        assert!(!ran.load(Ordering::SeqCst), "dependent body ran after a panic");
        scheduler.wait_idle();
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_completed_panicked_dependency_poisons_new_job() {
        let scheduler = scheduler(2, 64);
        let failing = scheduler.schedule_task(&[], || panic!("boom"));
        failing.wait();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let after = scheduler.schedule_task(std::slice::from_ref(&failing), move || {
            flag.store(true, Ordering::SeqCst);
        });
        after.wait();
        assert!(after.panicked());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_multi_batch_kernel_panic_marks_handle() {
        let scheduler = scheduler(2, 7);
        let arena = Arena::new(1024);
        let (handle, _view) = scheduler.schedule_kernel(arena.allocate(16), &[], |i| {
            if i == 0 {
                panic!("bad sample");
            }
            i as f32
        });
        handle.wait();
        assert!(handle.panicked());

        let (downstream, _) = scheduler.schedule_kernel(arena.allocate(16), &[handle], |_| 0.0);
        downstream.wait();
        assert!(downstream.panicked());
    }

    #[test]
    fn test_healthy_siblings_stay_clean() {
        let scheduler = scheduler(2, 64);
        let failing = scheduler.schedule_task(&[], || panic!("boom"));
        let healthy = scheduler.schedule_task(&[], || {});
        failing.wait();
        healthy.wait();
        assert!(!healthy.panicked());

        let combined = scheduler.combine(&[failing, healthy.clone()]);
        combined.wait();
        assert!(combined.panicked());
        assert!(!healthy.panicked());
    }

    #[test]
    fn test_wait_idle_and_counters() {
        let scheduler = scheduler(2, 64);
        for _ in 0..20 {
            scheduler.schedule_task(&[], || std::thread::sleep(Duration::from_micros(100)));
        }
        scheduler.wait_idle();
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(scheduler.executed_count(), 20);
    }

    #[test]
    fn test_resolved_worker_threads() {
        let auto = SchedulerConfig::default();
        assert!(auto.resolved_worker_threads() >= 1);
        let fixed = SchedulerConfig {
            worker_threads: 3,
            batch_size: 1,
        };
        assert_eq!(fixed.resolved_worker_threads(), 3);
    }

    #[test]
    fn test_drop_waits_for_pending_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = scheduler(2, 64);
            let first = scheduler.schedule_task(&[], || std::thread::sleep(Duration::from_millis(10)));
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                scheduler.schedule_task(std::slice::from_ref(&first), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
