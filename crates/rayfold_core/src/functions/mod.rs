pub mod builtin;

use std::fmt::Debug;

use rayfold_error::Result;

/// An aggregation over a single input.
///
/// Elements of a partition are folded into a state with `new_state` and
/// `update`, in the order the partition produces them. States from separate
/// partitions are merged with `combine` in partition order. `finalize`
/// produces the output, receiving `None` if no partition produced any data.
///
/// `combine` is expected to be associative with the fold. For floating point
/// aggregates that only holds approximately, so results may differ in the
/// last bits depending on how the input was partitioned.
pub trait AggregateFunction: Debug + Sync + Send + 'static {
    type Input: Send + 'static;
    type State: Debug + Send + 'static;
    type Output;

    /// Name of the aggregate, used in diagnostics.
    fn name(&self) -> &str;

    /// Create a state from the first element of a partition.
    fn new_state(&self, first: Self::Input) -> Result<Self::State>;

    /// Fold the next element into the state.
    fn update(&self, state: &mut Self::State, input: Self::Input) -> Result<()>;

    /// Merge a state produced by another partition into `state`.
    ///
    /// `other` always comes from a partition with a higher index than all
    /// partitions already merged into `state`.
    fn combine(&self, state: &mut Self::State, other: Self::State) -> Result<()>;

    /// Produce the final output.
    fn finalize(&self, state: Option<Self::State>) -> Result<Self::Output>;
}
