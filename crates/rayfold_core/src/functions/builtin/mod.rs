pub mod avg;
pub mod count;
pub mod fold;
pub mod minmax;
pub mod sum;

pub use avg::{AvgFloat, AvgInt};
pub use count::Count;
pub use fold::FoldAggregate;
pub use minmax::{Max, Min};
pub use sum::{SumChecked, SumFloat};
