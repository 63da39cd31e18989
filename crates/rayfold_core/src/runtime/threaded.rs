use std::fmt;
use std::sync::Arc;

use rayfold_error::{DbError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::{Task, TaskScheduler};

/// Scheduler executing tasks on a dedicated thread pool.
#[derive(Clone)]
pub struct ThreadedScheduler {
    pool: Arc<ThreadPool>,
}

impl fmt::Debug for ThreadedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedScheduler")
            .field("num_threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl ThreadedScheduler {
    pub fn try_new(num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(DbError::new("Scheduler requires at least one thread"));
        }

        let pool = ThreadPoolBuilder::new()
            .thread_name(|idx| format!("rayfold_partition_{idx}"))
            .num_threads(num_threads)
            .build()
            .map_err(|e| DbError::with_source("Failed to build thread pool", Box::new(e)))?;

        debug!(num_threads, "created threaded scheduler");

        Ok(ThreadedScheduler {
            pool: Arc::new(pool),
        })
    }
}

impl TaskScheduler for ThreadedScheduler {
    fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn spawn_task(&self, task: Task) {
        self.pool.spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn zero_threads_errors() {
        ThreadedScheduler::try_new(0).unwrap_err();
    }

    #[test]
    fn runs_tasks_on_named_threads() {
        let scheduler = ThreadedScheduler::try_new(2).unwrap();
        assert_eq!(2, scheduler.num_threads());

        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            scheduler.spawn_task(Box::new(move || {
                let name = std::thread::current().name().map(|s| s.to_string());
                tx.send(name).unwrap();
            }));
        }
        std::mem::drop(tx);

        let names: Vec<_> = rx.iter().collect();
        assert_eq!(4, names.len());
        for name in names {
            assert!(name.unwrap().starts_with("rayfold_partition_"));
        }
    }
}
