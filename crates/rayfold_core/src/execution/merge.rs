use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rayfold_error::{DbError, Result};
use tracing::{debug, warn};

use super::partition_aggregator::PartitionAggregator;
use crate::cancel::CancellationToken;
use crate::functions::AggregateFunction;
use crate::partition::{PartitionEnumerator, Release, ReleaseGuard};
use crate::runtime::TaskScheduler;

/// How partition results are staged before being handed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeConfig {
    /// Yield each result as soon as its partition completes, in completion
    /// order.
    NotBuffered,
    /// Yield results in partition order as soon as every earlier partition has
    /// completed.
    #[default]
    AutoBuffered,
    /// Wait for every partition to complete, then yield results in partition
    /// order.
    FullyBuffered,
}

impl MergeConfig {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotBuffered => "not_buffered",
            Self::AutoBuffered => "auto_buffered",
            Self::FullyBuffered => "fully_buffered",
        }
    }
}

impl fmt::Display for MergeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeConfig {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "not_buffered" => Self::NotBuffered,
            "auto_buffered" => Self::AutoBuffered,
            "fully_buffered" => Self::FullyBuffered,
            other => {
                return Err(DbError::new(format!("Unknown merge config: {other}")));
            }
        })
    }
}

#[derive(Debug)]
enum Slot<S> {
    /// Partition task hasn't completed.
    Pending,
    /// Partition completed. `None` for empty partitions.
    Ready(Option<S>),
    /// Partition failed, error stored on the merge state.
    Failed,
    /// Result handed to the consumer.
    Taken,
}

struct MergeState<A: AggregateFunction, E: Release> {
    slots: Vec<Slot<A::State>>,
    /// Aggregators handed back by completed partition tasks, indexed by
    /// partition.
    aggregators: Vec<Option<ReleaseGuard<PartitionAggregator<A, E>>>>,
    completed: usize,
    completion_order: VecDeque<usize>,
    /// First error observed across all partitions, until surfaced.
    error: Option<DbError>,
}

struct MergeShared<A: AggregateFunction, E: Release> {
    state: Mutex<MergeState<A, E>>,
    cond: Condvar,
}

impl<A, E> MergeShared<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    fn complete(
        &self,
        partition_idx: usize,
        result: Result<Option<A::State>>,
        aggregator: ReleaseGuard<PartitionAggregator<A, E>>,
    ) {
        let mut state = self.state.lock();

        match result {
            Ok(value) => state.slots[partition_idx] = Slot::Ready(value),
            Err(err) => {
                state.slots[partition_idx] = Slot::Failed;
                match state.error.as_mut() {
                    None => state.error = Some(err),
                    Some(first) if !err.is_canceled() => first.push_secondary(err),
                    Some(_) => debug!(partition_idx, %err, "partition stopped after earlier error"),
                }
            }
        }

        state.aggregators[partition_idx] = Some(aggregator);
        state.completed += 1;
        state.completion_order.push_back(partition_idx);

        self.cond.notify_all();
    }
}

/// Work for a single partition, run on the scheduler.
///
/// If the task is dropped without being run, the partition is completed with
/// an error so the merge never waits on it.
struct PartitionTask<A: AggregateFunction, E: Release> {
    partition_idx: usize,
    aggregator: Option<ReleaseGuard<PartitionAggregator<A, E>>>,
    shared: Arc<MergeShared<A, E>>,
    stop: CancellationToken,
}

impl<A, E> PartitionTask<A, E>
where
    A: AggregateFunction,
    E: PartitionEnumerator<Item = A::Input>,
{
    fn run(mut self) {
        let mut aggregator = match self.aggregator.take() {
            Some(aggregator) => aggregator,
            None => return,
        };
        let partition_idx = self.partition_idx;

        let result = match panic::catch_unwind(AssertUnwindSafe(|| aggregator.get_mut().advance()))
        {
            Ok(result) => result,
            Err(payload) => Err(DbError::fault(format!(
                "Partition task panicked: {}",
                panic_message(payload.as_ref())
            ))
            .with_field("partition_idx", partition_idx)),
        };

        let failed = result.is_err();
        self.shared.complete(partition_idx, result, aggregator);

        if failed {
            // Siblings observe this at their next poll.
            self.stop.cancel();
        }
    }
}

impl<A, E> Drop for PartitionTask<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    fn drop(&mut self) {
        if let Some(aggregator) = self.aggregator.take() {
            let err = DbError::fault("Partition task dropped before running")
                .with_field("partition_idx", self.partition_idx);
            self.shared.complete(self.partition_idx, Err(err), aggregator);
            self.stop.cancel();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Single stream over the results of concurrently executing partition
/// aggregators.
///
/// Every aggregator is spawned on the scheduler on creation. Releasing the
/// merged enumerator stops outstanding partitions, waits for all of them, then
/// releases every aggregator in reverse partition order.
pub struct MergedEnumerator<A: AggregateFunction, E: Release> {
    policy: MergeConfig,
    partition_count: usize,
    shared: Arc<MergeShared<A, E>>,
    /// Caller's token.
    cancel: CancellationToken,
    /// Child of the caller's token, canceled to stop all partitions.
    stop: CancellationToken,
    wait_interval: Duration,
    /// Number of partition results consumed, including empty ones.
    consumed: usize,
    finished: bool,
    released: bool,
}

impl<A, E> MergedEnumerator<A, E>
where
    A: AggregateFunction,
    E: PartitionEnumerator<Item = A::Input>,
{
    /// Spawn all partition aggregators and return the merged stream.
    ///
    /// `stop` must be the token the aggregators poll, and a child of
    /// `cancel`.
    pub fn spawn(
        scheduler: &dyn TaskScheduler,
        policy: MergeConfig,
        aggregators: Vec<PartitionAggregator<A, E>>,
        cancel: CancellationToken,
        stop: CancellationToken,
        wait_interval: Duration,
    ) -> ReleaseGuard<Self> {
        let partition_count = aggregators.len();

        let shared = Arc::new(MergeShared {
            state: Mutex::new(MergeState {
                slots: (0..partition_count).map(|_| Slot::Pending).collect(),
                aggregators: (0..partition_count).map(|_| None).collect(),
                completed: 0,
                completion_order: VecDeque::with_capacity(partition_count),
                error: None,
            }),
            cond: Condvar::new(),
        });

        debug!(partitions = partition_count, %policy, "spawning partition aggregators");

        for (partition_idx, aggregator) in aggregators.into_iter().enumerate() {
            let task = PartitionTask {
                partition_idx,
                aggregator: Some(ReleaseGuard::new(aggregator)),
                shared: shared.clone(),
                stop: stop.clone(),
            };
            scheduler.spawn_task(Box::new(move || task.run()));
        }

        ReleaseGuard::new(MergedEnumerator {
            policy,
            partition_count,
            shared,
            cancel,
            stop,
            wait_interval,
            consumed: 0,
            finished: false,
            released: false,
        })
    }

    /// Get the next partition result.
    ///
    /// Results of empty partitions are skipped. Returns the first error
    /// observed in any partition, after which all remaining partitions are
    /// told to stop and no more results are produced.
    pub fn advance(&mut self) -> Result<Option<A::State>> {
        if self.finished {
            return Ok(None);
        }

        let mut state = self.shared.state.lock();

        loop {
            if let Some(err) = state.error.take() {
                self.finished = true;
                self.stop.cancel();
                return Err(err);
            }

            if self.cancel.is_canceled() {
                self.finished = true;
                self.stop.cancel();
                return Err(DbError::canceled());
            }

            if self.consumed == self.partition_count {
                self.finished = true;
                return Ok(None);
            }

            let next = match self.policy {
                MergeConfig::NotBuffered => state.completion_order.pop_front(),
                MergeConfig::AutoBuffered => match state.slots[self.consumed] {
                    Slot::Pending => None,
                    _ => Some(self.consumed),
                },
                MergeConfig::FullyBuffered => {
                    if state.completed == self.partition_count {
                        Some(self.consumed)
                    } else {
                        None
                    }
                }
            };

            let partition_idx = match next {
                Some(idx) => idx,
                None => {
                    self.shared.cond.wait_for(&mut state, self.wait_interval);
                    continue;
                }
            };

            self.consumed += 1;

            match std::mem::replace(&mut state.slots[partition_idx], Slot::Taken) {
                Slot::Ready(Some(value)) => return Ok(Some(value)),
                Slot::Ready(None) => continue,
                other => {
                    self.finished = true;
                    return Err(DbError::new("Partition result in unexpected state")
                        .with_field("partition_idx", partition_idx)
                        .with_field("slot", format!("{other:?}")));
                }
            }
        }
    }
}

impl<A, E> MergedEnumerator<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    pub fn policy(&self) -> MergeConfig {
        self.policy
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Number of partitions that have completed, successfully or not.
    pub fn completed(&self) -> usize {
        self.shared.state.lock().completed
    }
}

impl<A, E> Release for MergedEnumerator<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.finished = true;

        let mut state = self.shared.state.lock();
        if state.completed < self.partition_count {
            debug!(
                completed = state.completed,
                partitions = self.partition_count,
                "stopping outstanding partitions"
            );
            self.stop.cancel();
        }
        while state.completed < self.partition_count {
            self.shared.cond.wait(&mut state);
        }

        let aggregators: Vec<_> = state.aggregators.iter_mut().map(Option::take).collect();
        if let Some(err) = state.error.take() {
            warn!(%err, "partition error not consumed before release");
        }
        std::mem::drop(state);

        let mut first_err: Option<DbError> = None;
        for mut aggregator in aggregators.into_iter().rev().flatten() {
            if let Err(err) = aggregator.release() {
                match first_err.as_mut() {
                    None => first_err = Some(err),
                    Some(first) => first.push_secondary(err),
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<A, E> fmt::Debug for MergedEnumerator<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedEnumerator")
            .field("policy", &self.policy)
            .field("partition_count", &self.partition_count)
            .field("consumed", &self.consumed)
            .field("finished", &self.finished)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
