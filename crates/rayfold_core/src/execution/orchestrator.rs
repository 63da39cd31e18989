use std::sync::Arc;

use rayfold_error::{DbError, Result};
use tracing::debug;

use super::merge::{MergeConfig, MergedEnumerator};
use super::partition_aggregator::PartitionAggregator;
use crate::cancel::{CancellationState, CancellationToken};
use crate::config::AggregationConfig;
use crate::functions::AggregateFunction;
use crate::partition::{PartitionEnumerator, ReleaseGuard};
use crate::runtime::TaskScheduler;

/// Runs an aggregate over a set of partitions.
///
/// Each partition is folded on the scheduler, then the intermediate values are
/// combined on the calling thread in partition order.
#[derive(Debug)]
pub struct AggregationOrchestrator<A: AggregateFunction> {
    function: Arc<A>,
    scheduler: Arc<dyn TaskScheduler>,
    cancel: CancellationToken,
    config: AggregationConfig,
}

impl<A> AggregationOrchestrator<A>
where
    A: AggregateFunction,
{
    pub fn new(function: A, scheduler: Arc<dyn TaskScheduler>, cancel: CancellationToken) -> Self {
        AggregationOrchestrator {
            function: Arc::new(function),
            scheduler,
            cancel,
            config: AggregationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn function(&self) -> &A {
        &self.function
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Create the aggregator for a single partition.
    pub fn create_partition_aggregator<E>(
        &self,
        partition_idx: usize,
        source: E,
        function: &Arc<A>,
        cancel: CancellationState,
    ) -> PartitionAggregator<A, E>
    where
        E: PartitionEnumerator<Item = A::Input>,
    {
        PartitionAggregator::new(partition_idx, source, function.clone(), cancel)
    }

    /// Start folding all partitions, returning a stream of per-partition
    /// results ordered according to `merge`.
    pub fn spawn_merged<E>(
        &self,
        partitions: Vec<E>,
        merge: MergeConfig,
    ) -> ReleaseGuard<MergedEnumerator<A, E>>
    where
        E: PartitionEnumerator<Item = A::Input>,
    {
        let stop = self.cancel.child_token();
        let cancel = CancellationState::new(stop.clone(), self.config.poll_interval);

        debug!(
            function = self.function.name(),
            partitions = partitions.len(),
            poll_interval = self.config.poll_interval.mask(),
            "starting aggregation"
        );

        let aggregators = partitions
            .into_iter()
            .enumerate()
            .map(|(idx, source)| {
                self.create_partition_aggregator(idx, source, &self.function, cancel.clone())
            })
            .collect();

        MergedEnumerator::spawn(
            self.scheduler.as_ref(),
            merge,
            aggregators,
            self.cancel.clone(),
            stop,
            self.config.wait_interval,
        )
    }

    /// Fold all partitions and combine their results, without finalizing.
    ///
    /// Returns `None` if no partition produced any data. All partitions are
    /// released before returning, whether or not aggregation succeeded.
    pub fn run_partial<E>(&self, partitions: Vec<E>) -> Result<Option<A::State>>
    where
        E: PartitionEnumerator<Item = A::Input>,
    {
        let mut merged = self.spawn_merged(partitions, MergeConfig::FullyBuffered);

        let result = self.combine_all(merged.get_mut());
        let released = merged.release();

        match (result, released) {
            (Ok(state), Ok(())) => {
                debug!(function = self.function.name(), "aggregation complete");
                Ok(state)
            }
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(mut err), Err(release_err)) => {
                err.push_secondary(release_err);
                Err(err)
            }
        }
    }

    /// Fold and combine all partitions, then produce the final output.
    pub fn run<E>(&self, partitions: Vec<E>) -> Result<A::Output>
    where
        E: PartitionEnumerator<Item = A::Input>,
    {
        let partial = self.run_partial(partitions)?;
        self.function.finalize(partial)
    }

    fn combine_all<E>(&self, merged: &mut MergedEnumerator<A, E>) -> Result<Option<A::State>>
    where
        E: PartitionEnumerator<Item = A::Input>,
    {
        let mut acc: Option<A::State> = None;
        while let Some(state) = merged.advance()? {
            acc = Some(match acc.take() {
                Some(mut prev) => {
                    self.function.combine(&mut prev, state).map_err(|e| {
                        DbError::with_source("Failed to combine partition results", Box::new(e))
                            .with_field("function", self.function.name())
                    })?;
                    prev
                }
                None => state,
            });
        }
        Ok(acc)
    }
}
