use std::fmt::Debug;
use std::marker::PhantomData;

use rayfold_error::{DbError, Result};

use crate::functions::AggregateFunction;

/// Values that can be reduced to a minimum or maximum.
pub trait Extremum: Copy + Debug + Sync + Send + 'static {
    fn min_of(self, other: Self) -> Self;
    fn max_of(self, other: Self) -> Self;
}

macro_rules! impl_extremum_ord {
    ($($t:ty),*) => {
        $(
            impl Extremum for $t {
                fn min_of(self, other: Self) -> Self {
                    Ord::min(self, other)
                }

                fn max_of(self, other: Self) -> Self {
                    Ord::max(self, other)
                }
            }
        )*
    };
}

impl_extremum_ord!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

// NaN is ordered below every other value: a NaN anywhere makes the minimum
// NaN, while the maximum is only NaN if every input is NaN.
macro_rules! impl_extremum_float {
    ($($t:ty),*) => {
        $(
            impl Extremum for $t {
                fn min_of(self, other: Self) -> Self {
                    if self.is_nan() || other.is_nan() {
                        <$t>::NAN
                    } else if other < self {
                        other
                    } else {
                        self
                    }
                }

                fn max_of(self, other: Self) -> Self {
                    if self.is_nan() {
                        other
                    } else if other > self {
                        other
                    } else {
                        self
                    }
                }
            }
        )*
    };
}

impl_extremum_float!(f32, f64);

/// Minimum of inputs. Errors on empty input.
#[derive(Debug, Clone, Copy)]
pub struct Min<T> {
    _t: PhantomData<T>,
}

impl<T> Min<T> {
    pub const fn new() -> Self {
        Min { _t: PhantomData }
    }
}

impl<T> Default for Min<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Extremum> AggregateFunction for Min<T> {
    type Input = T;
    type State = T;
    type Output = T;

    fn name(&self) -> &str {
        "min"
    }

    fn new_state(&self, first: T) -> Result<T> {
        Ok(first)
    }

    fn update(&self, state: &mut T, input: T) -> Result<()> {
        *state = state.min_of(input);
        Ok(())
    }

    fn combine(&self, state: &mut T, other: T) -> Result<()> {
        *state = state.min_of(other);
        Ok(())
    }

    fn finalize(&self, state: Option<T>) -> Result<T> {
        state.ok_or_else(|| DbError::no_elements("Cannot compute min of empty input"))
    }
}

/// Maximum of inputs. Errors on empty input.
#[derive(Debug, Clone, Copy)]
pub struct Max<T> {
    _t: PhantomData<T>,
}

impl<T> Max<T> {
    pub const fn new() -> Self {
        Max { _t: PhantomData }
    }
}

impl<T> Default for Max<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Extremum> AggregateFunction for Max<T> {
    type Input = T;
    type State = T;
    type Output = T;

    fn name(&self) -> &str {
        "max"
    }

    fn new_state(&self, first: T) -> Result<T> {
        Ok(first)
    }

    fn update(&self, state: &mut T, input: T) -> Result<()> {
        *state = state.max_of(input);
        Ok(())
    }

    fn combine(&self, state: &mut T, other: T) -> Result<()> {
        *state = state.max_of(other);
        Ok(())
    }

    fn finalize(&self, state: Option<T>) -> Result<T> {
        state.ok_or_else(|| DbError::no_elements("Cannot compute max of empty input"))
    }
}
