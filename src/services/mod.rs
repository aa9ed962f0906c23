//! Services for run aggregation and processing

pub mod aggregator;
pub mod checkpoint;
pub mod output;
pub mod platform;
pub mod processor;
pub mod runner;

pub use aggregator::Aggregator;
pub use checkpoint::{CheckpointStore, FileCheckpointStore, RemoteCheckpointStore, StateStore};
pub use output::{DatasetSink, JsonlSink, OutputSink, RecordSink};
pub use platform::{ActorRunSource, PlatformClient, RunEnricher, RunSource};
pub use processor::{ProcessOptions, ResumableProcessor, DEFAULT_PARALLEL_CALLS};
pub use runner::{aggregate_actor_runs, AggregateOutcome, PAGE_LIMIT};
