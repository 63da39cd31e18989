pub mod threaded;

use std::fmt::Debug;

/// A unit of work executed by a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// How partition work gets executed.
///
/// Implementations decide the number of workers. Aggregation only relies on
/// every spawned task eventually running to completion, or being dropped.
pub trait TaskScheduler: Debug + Sync + Send {
    /// Number of worker threads available to this scheduler.
    fn num_threads(&self) -> usize;

    /// Spawn a task.
    ///
    /// This must not block.
    fn spawn_task(&self, task: Task);
}
