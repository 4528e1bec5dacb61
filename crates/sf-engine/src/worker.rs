//! Process-wide worker pool for async pipeline offload
//!
//! A small fixed pool of threads draining one crossbeam channel. Jobs are
//! boxed closures; the pipeline hands each job its own result channel, so the
//! pool itself stays fire-and-forget.

use std::sync::OnceLock;
use std::thread;

use crossbeam_channel::{unbounded, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkerPool {
    tx: Sender<Job>,
}

impl WorkerPool {
    fn new(threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        for i in 0..threads {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("sf-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        // a panicking job must not take the worker down
                        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                    }
                })
                .expect("failed to spawn worker thread");
        }
        Self { tx }
    }
}

fn pool() -> &'static WorkerPool {
    static POOL: OnceLock<WorkerPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let threads = num_cpus::get().clamp(1, 4);
        log::debug!("starting worker pool with {threads} threads");
        WorkerPool::new(threads)
    })
}

/// Run a job on the pool.
pub(crate) fn spawn(job: impl FnOnce() + Send + 'static) {
    // the receivers only disappear at process teardown
    let _ = pool().tx.send(Box::new(job));
}
