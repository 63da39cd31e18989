use std::fmt;

use rayfold_error::Result;

use crate::functions::AggregateFunction;

/// Aggregate defined by a binary operator and its identity value.
///
/// The same operator folds elements within a partition and combines partition
/// results. Empty input produces the identity.
pub struct FoldAggregate<T, F> {
    name: &'static str,
    identity: T,
    op: F,
}

impl<T, F> FoldAggregate<T, F>
where
    F: Fn(T, T) -> T,
{
    pub const fn new(name: &'static str, identity: T, op: F) -> Self {
        FoldAggregate { name, identity, op }
    }

    pub fn identity(&self) -> &T {
        &self.identity
    }
}

impl<T: fmt::Debug, F> fmt::Debug for FoldAggregate<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FoldAggregate")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl<T, F> AggregateFunction for FoldAggregate<T, F>
where
    T: Clone + fmt::Debug + Sync + Send + 'static,
    F: Fn(T, T) -> T + Sync + Send + 'static,
{
    type Input = T;
    type State = T;
    type Output = T;

    fn name(&self) -> &str {
        self.name
    }

    fn new_state(&self, first: T) -> Result<T> {
        Ok((self.op)(self.identity.clone(), first))
    }

    fn update(&self, state: &mut T, input: T) -> Result<()> {
        *state = (self.op)(state.clone(), input);
        Ok(())
    }

    fn combine(&self, state: &mut T, other: T) -> Result<()> {
        *state = (self.op)(state.clone(), other);
        Ok(())
    }

    fn finalize(&self, state: Option<T>) -> Result<T> {
        Ok(state.unwrap_or_else(|| self.identity.clone()))
    }
}
