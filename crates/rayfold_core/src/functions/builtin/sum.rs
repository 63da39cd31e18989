use std::fmt::Debug;
use std::marker::PhantomData;

use num_traits::{CheckedAdd, Float, Zero};
use rayfold_error::{DbError, Result};

use crate::functions::AggregateFunction;

/// Sum of floating point inputs.
///
/// Each partition accumulates starting from zero, left to right. Returns zero
/// for empty input.
#[derive(Debug, Clone, Copy)]
pub struct SumFloat<T> {
    _t: PhantomData<T>,
}

impl<T> SumFloat<T> {
    pub const fn new() -> Self {
        SumFloat { _t: PhantomData }
    }
}

impl<T> Default for SumFloat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AggregateFunction for SumFloat<T>
where
    T: Float + Debug + Sync + Send + 'static,
{
    type Input = T;
    type State = T;
    type Output = T;

    fn name(&self) -> &str {
        "sum"
    }

    fn new_state(&self, first: T) -> Result<T> {
        Ok(T::zero() + first)
    }

    fn update(&self, state: &mut T, input: T) -> Result<()> {
        *state = *state + input;
        Ok(())
    }

    fn combine(&self, state: &mut T, other: T) -> Result<()> {
        *state = *state + other;
        Ok(())
    }

    fn finalize(&self, state: Option<T>) -> Result<T> {
        Ok(state.unwrap_or_else(T::zero))
    }
}

/// Sum of integer inputs, erroring on overflow.
#[derive(Debug, Clone, Copy)]
pub struct SumChecked<T> {
    _t: PhantomData<T>,
}

impl<T> SumChecked<T> {
    pub const fn new() -> Self {
        SumChecked { _t: PhantomData }
    }
}

impl<T> Default for SumChecked<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SumChecked<T>
where
    T: CheckedAdd,
{
    fn add(left: &T, right: &T) -> Result<T> {
        left.checked_add(right)
            .ok_or_else(|| DbError::overflow("Integer overflow computing sum"))
    }
}

impl<T> AggregateFunction for SumChecked<T>
where
    T: CheckedAdd + Zero + Copy + Debug + Sync + Send + 'static,
{
    type Input = T;
    type State = T;
    type Output = T;

    fn name(&self) -> &str {
        "sum"
    }

    fn new_state(&self, first: T) -> Result<T> {
        Ok(first)
    }

    fn update(&self, state: &mut T, input: T) -> Result<()> {
        *state = Self::add(state, &input)?;
        Ok(())
    }

    fn combine(&self, state: &mut T, other: T) -> Result<()> {
        *state = Self::add(state, &other)?;
        Ok(())
    }

    fn finalize(&self, state: Option<T>) -> Result<T> {
        Ok(state.unwrap_or_else(T::zero))
    }
}

#[cfg(test)]
mod tests {
    use rayfold_error::ErrorKind;

    use super::*;

    #[test]
    fn sum_float_left_to_right() {
        let sum = SumFloat::<f64>::new();
        let mut state = sum.new_state(1e16).unwrap();
        sum.update(&mut state, 1.0).unwrap();
        sum.update(&mut state, 1.0).unwrap();

        // ((1e16 + 1) + 1) loses both ones, 1e16 + (1 + 1) would not.
        assert_eq!(1e16, state);
        assert_ne!(1e16 + (1.0 + 1.0), state);
    }

    #[test]
    fn sum_float_negative_zero_starts_from_zero() {
        let sum = SumFloat::<f64>::new();
        let state = sum.new_state(-0.0).unwrap();
        assert!(state.is_sign_positive());
    }

    #[test]
    fn sum_float_empty_is_zero() {
        let sum = SumFloat::<f32>::new();
        assert_eq!(0.0, sum.finalize(None).unwrap());
    }

    #[test]
    fn sum_checked_combine() {
        let sum = SumChecked::<i64>::new();
        let mut state = sum.new_state(4).unwrap();
        sum.update(&mut state, 5).unwrap();
        sum.combine(&mut state, 11).unwrap();
        assert_eq!(20, sum.finalize(Some(state)).unwrap());
        assert_eq!(0, sum.finalize(None).unwrap());
    }

    #[test]
    fn sum_checked_overflow() {
        let sum = SumChecked::<i32>::new();
        let mut state = sum.new_state(i32::MAX).unwrap();
        let err = sum.update(&mut state, 1).unwrap_err();
        assert_eq!(ErrorKind::Overflow, err.kind());

        let mut state = sum.new_state(i32::MIN).unwrap();
        let err = sum.combine(&mut state, -1).unwrap_err();
        assert_eq!(ErrorKind::Overflow, err.kind());
    }
}
