use std::fmt::Debug;
use std::marker::PhantomData;

use num_traits::{CheckedAdd, Float, NumCast, ToPrimitive};
use rayfold_error::{DbError, OptionExt, Result};

use crate::functions::AggregateFunction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvgState<T> {
    pub sum: T,
    pub count: u64,
}

fn inc_count(left: u64, right: u64) -> Result<u64> {
    left.checked_add(right)
        .ok_or_else(|| DbError::overflow("Integer overflow computing average count"))
}

/// Average of floating point inputs. Errors on empty input.
#[derive(Debug, Clone, Copy)]
pub struct AvgFloat<T> {
    _t: PhantomData<T>,
}

impl<T> AvgFloat<T> {
    pub const fn new() -> Self {
        AvgFloat { _t: PhantomData }
    }
}

impl<T> Default for AvgFloat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AggregateFunction for AvgFloat<T>
where
    T: Float + Debug + Sync + Send + 'static,
{
    type Input = T;
    type State = AvgState<T>;
    type Output = T;

    fn name(&self) -> &str {
        "avg"
    }

    fn new_state(&self, first: T) -> Result<Self::State> {
        Ok(AvgState {
            sum: T::zero() + first,
            count: 1,
        })
    }

    fn update(&self, state: &mut Self::State, input: T) -> Result<()> {
        state.sum = state.sum + input;
        state.count = inc_count(state.count, 1)?;
        Ok(())
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> Result<()> {
        state.sum = state.sum + other.sum;
        state.count = inc_count(state.count, other.count)?;
        Ok(())
    }

    fn finalize(&self, state: Option<Self::State>) -> Result<T> {
        let state =
            state.ok_or_else(|| DbError::no_elements("Cannot compute avg of empty input"))?;
        let count = <T as NumCast>::from(state.count).required("count representable as float")?;
        Ok(state.sum / count)
    }
}

/// Average of integer inputs, producing a double.
///
/// The sum is accumulated as an integer and errors on overflow.
#[derive(Debug, Clone, Copy)]
pub struct AvgInt<T> {
    _t: PhantomData<T>,
}

impl<T> AvgInt<T> {
    pub const fn new() -> Self {
        AvgInt { _t: PhantomData }
    }
}

impl<T> Default for AvgInt<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AggregateFunction for AvgInt<T>
where
    T: CheckedAdd + ToPrimitive + Copy + Debug + Sync + Send + 'static,
{
    type Input = T;
    type State = AvgState<T>;
    type Output = f64;

    fn name(&self) -> &str {
        "avg"
    }

    fn new_state(&self, first: T) -> Result<Self::State> {
        Ok(AvgState {
            sum: first,
            count: 1,
        })
    }

    fn update(&self, state: &mut Self::State, input: T) -> Result<()> {
        state.sum = state
            .sum
            .checked_add(&input)
            .ok_or_else(|| DbError::overflow("Integer overflow computing average sum"))?;
        state.count = inc_count(state.count, 1)?;
        Ok(())
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> Result<()> {
        state.sum = state
            .sum
            .checked_add(&other.sum)
            .ok_or_else(|| DbError::overflow("Integer overflow computing average sum"))?;
        state.count = inc_count(state.count, other.count)?;
        Ok(())
    }

    fn finalize(&self, state: Option<Self::State>) -> Result<f64> {
        let state =
            state.ok_or_else(|| DbError::no_elements("Cannot compute avg of empty input"))?;
        let sum = state.sum.to_f64().required("sum representable as double")?;
        Ok(sum / state.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use rayfold_error::ErrorKind;

    use super::*;

    #[test]
    fn avg_float_combines_counts() {
        let avg = AvgFloat::<f64>::new();
        let mut left = avg.new_state(1.0).unwrap();
        avg.update(&mut left, 2.0).unwrap();

        let right = avg.new_state(6.0).unwrap();
        avg.combine(&mut left, right).unwrap();

        assert_eq!(AvgState { sum: 9.0, count: 3 }, left);
        assert_eq!(3.0, avg.finalize(Some(left)).unwrap());
    }

    #[test]
    fn avg_int_produces_double() {
        let avg = AvgInt::<i64>::new();
        let mut state = avg.new_state(1).unwrap();
        avg.update(&mut state, 2).unwrap();
        assert_eq!(1.5, avg.finalize(Some(state)).unwrap());
    }

    #[test]
    fn avg_int_overflow() {
        let avg = AvgInt::<i64>::new();
        let mut state = avg.new_state(i64::MAX).unwrap();
        let err = avg.update(&mut state, 1).unwrap_err();
        assert_eq!(ErrorKind::Overflow, err.kind());
    }

    #[test]
    fn avg_empty_errors() {
        let err = AvgFloat::<f64>::new().finalize(None).unwrap_err();
        assert_eq!(ErrorKind::NoElements, err.kind());
        let err = AvgInt::<i32>::new().finalize(None).unwrap_err();
        assert_eq!(ErrorKind::NoElements, err.kind());
    }
}
