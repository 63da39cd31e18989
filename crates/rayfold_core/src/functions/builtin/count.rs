use std::fmt;
use std::marker::PhantomData;

use rayfold_error::{DbError, Result};

use crate::functions::AggregateFunction;

/// Count of inputs, ignoring their values.
pub struct Count<T> {
    _t: PhantomData<fn(T)>,
}

impl<T> fmt::Debug for Count<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Count").finish()
    }
}

impl<T> Count<T> {
    pub const fn new() -> Self {
        Count { _t: PhantomData }
    }
}

impl<T> Default for Count<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn add(left: u64, right: u64) -> Result<u64> {
    left.checked_add(right)
        .ok_or_else(|| DbError::overflow("Integer overflow computing count"))
}

impl<T> AggregateFunction for Count<T>
where
    T: Send + 'static,
{
    type Input = T;
    type State = u64;
    type Output = u64;

    fn name(&self) -> &str {
        "count"
    }

    fn new_state(&self, _first: T) -> Result<u64> {
        Ok(1)
    }

    fn update(&self, state: &mut u64, _input: T) -> Result<()> {
        *state = add(*state, 1)?;
        Ok(())
    }

    fn combine(&self, state: &mut u64, other: u64) -> Result<()> {
        *state = add(*state, other)?;
        Ok(())
    }

    fn finalize(&self, state: Option<u64>) -> Result<u64> {
        Ok(state.unwrap_or(0))
    }
}
