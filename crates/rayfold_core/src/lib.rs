//! Partitioned parallel aggregation.
//!
//! Each partition of the input is folded into a single intermediate value on
//! its own worker. The intermediate values are then combined on the calling
//! thread, in partition order, into the final result.
pub mod cancel;
pub mod config;
pub mod execution;
pub mod functions;
pub mod partition;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testutil;
