//! Application Layer
//!
//! - `pipeline`: one governed poll/merge/filter/score/notify cycle
//! - `scheduler`: per-feed interval loops with coalescing and shutdown

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{CycleReport, Delivered, EstimatorSettings, Feed, Pipeline, PipelineConfig, Skip};
pub use scheduler::{FeedSnapshot, FeedStatus, FeedWorker, Scheduler, ShutdownHandle};
