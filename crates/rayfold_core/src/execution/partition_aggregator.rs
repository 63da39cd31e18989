use std::fmt;
use std::sync::Arc;

use rayfold_error::{DbError, ErrorKind, Result};
use tracing::trace;

use crate::cancel::CancellationState;
use crate::functions::AggregateFunction;
use crate::partition::{PartitionEnumerator, Release, ReleaseGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Partition has not been read from yet.
    NotStarted,
    /// Partition was consumed, or consuming it failed. No more output will be
    /// produced.
    Exhausted,
}

/// Folds an entire partition into a single intermediate value.
///
/// The first call to `advance` drains the source. Every call after that
/// reports no more data, whether the first call succeeded or not.
pub struct PartitionAggregator<A: AggregateFunction, E: Release> {
    partition_idx: usize,
    function: Arc<A>,
    source: ReleaseGuard<E>,
    cancel: CancellationState,
    state: AggregatorState,
}

impl<A, E> PartitionAggregator<A, E>
where
    A: AggregateFunction,
    E: PartitionEnumerator<Item = A::Input>,
{
    pub fn new(
        partition_idx: usize,
        source: E,
        function: Arc<A>,
        cancel: CancellationState,
    ) -> Self {
        PartitionAggregator {
            partition_idx,
            function,
            source: ReleaseGuard::new(source),
            cancel,
            state: AggregatorState::NotStarted,
        }
    }

    pub fn partition_idx(&self) -> usize {
        self.partition_idx
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Produce this partition's intermediate value.
    ///
    /// Returns `Ok(None)` for an empty partition, and on every call after the
    /// first. Cancellation is checked on the first element and then once every
    /// poll interval.
    pub fn advance(&mut self) -> Result<Option<A::State>> {
        if self.state == AggregatorState::Exhausted {
            return Ok(None);
        }
        // Single shot, including when the fold below fails.
        self.state = AggregatorState::Exhausted;

        let partition_idx = self.partition_idx;
        let source = self.source.get_mut();

        let first = match source
            .advance()
            .map_err(|e| source_error(partition_idx, e))?
        {
            Some((first, _key)) => first,
            None => {
                trace!(partition_idx, "partition empty");
                return Ok(None);
            }
        };

        self.cancel
            .check_if_canceled()
            .map_err(|e| e.with_field("partition_idx", partition_idx))?;

        let mut agg_state = self
            .function
            .new_state(first)
            .map_err(|e| e.with_field("partition_idx", partition_idx))?;

        let mut iteration: usize = 1;
        while let Some((element, _key)) = source
            .advance()
            .map_err(|e| source_error(partition_idx, e))?
        {
            if self.cancel.should_poll(iteration) {
                self.cancel
                    .check_if_canceled()
                    .map_err(|e| e.with_field("partition_idx", partition_idx))?;
            }
            iteration = iteration.wrapping_add(1);

            self.function
                .update(&mut agg_state, element)
                .map_err(|e| e.with_field("partition_idx", partition_idx))?;
        }

        trace!(partition_idx, elements = iteration, "partition folded");

        Ok(Some(agg_state))
    }
}

impl<A, E> Release for PartitionAggregator<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    fn release(&mut self) -> Result<()> {
        self.source
            .release()
            .map_err(|e| e.with_field("partition_idx", self.partition_idx))
    }
}

impl<A, E> fmt::Debug for PartitionAggregator<A, E>
where
    A: AggregateFunction,
    E: Release,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionAggregator")
            .field("partition_idx", &self.partition_idx)
            .field("function", &self.function)
            .field("state", &self.state)
            .field("released", &self.source.is_released())
            .finish_non_exhaustive()
    }
}

/// Wrap an error produced by a partition source.
///
/// Cancellation observed by the source is passed through as is.
fn source_error(partition_idx: usize, err: DbError) -> DbError {
    if err.is_canceled() {
        return err.with_field("partition_idx", partition_idx);
    }
    DbError::with_source("Partition source failed", Box::new(err))
        .with_error_kind(ErrorKind::Fault)
        .with_field("partition_idx", partition_idx)
}
