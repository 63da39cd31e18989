pub mod merge;
pub mod orchestrator;
pub mod partition_aggregator;
