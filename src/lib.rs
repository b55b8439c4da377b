//! A lock-step, multi-stage pipeline engine built from blocking primitives.
//!
//! Stages run on their own OS threads and are linked by bounded queues.
//! After every tick all stages meet at a shared barrier, so no stage starts
//! tick *k+1* before every stage has finished tick *k*.
//!
//! # Features
//!
//! - [`TimedBoundedQueue`]: fixed-capacity FIFO with deadline-bounded
//!   blocking push/pop and cooperative shutdown
//! - [`Barrier`]: cyclic N-party rendezvous with a single last arriver per
//!   cycle and party retirement
//! - [`OnceGuard`]: exactly-once initialization under racing first calls
//! - [`StatsAggregator`]: serialized counters and latency percentiles
//! - [`PipelineCoordinator`]: owns one run's queues, barrier and stats,
//!   runs the stage workers and reports a [`PipelineResult`]
//! - Injected [`Clock`] and [`LogSink`] capabilities
//!
//! # Example
//!
//! ```no_run
//! use lockstep_pipeline::PipelineBuilder;
//!
//! let coordinator = PipelineBuilder::new()
//!     .queue_capacity(100)
//!     .seed(42)
//!     .build()?;
//!
//! let result = coordinator.run(1000, 3)?;
//! println!("{}", result.summary());
//! # Ok::<(), lockstep_pipeline::PipelineError>(())
//! ```

pub mod barrier;
pub mod clock;
pub mod config;
pub mod error;
pub mod item;
pub mod once;
pub mod pipeline;
pub mod queue;
pub mod resources;
pub mod sink;
pub mod stage;
pub mod stats;

// Re-exports for convenience
pub use barrier::{Barrier, BarrierParty, BarrierWaitResult};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    PipelineConfig, DEFAULT_CLI_GENERATOR_PAUSE, DEFAULT_QUEUE_CAPACITY, DEFAULT_QUEUE_TIMEOUT,
    DEFAULT_SEED, DEFAULT_STAGE_COUNT, DEFAULT_TICKS,
};
pub use error::{PipelineError, QueueError, Result};
pub use item::{passes_filter, DataItem, DATA_RANGE};
pub use once::{OnceGuard, OnceState};
pub use pipeline::{Bottleneck, PipelineBuilder, PipelineCoordinator, PipelineResult};
pub use queue::{QueueStats, TimedBoundedQueue};
pub use resources::SharedResources;
pub use sink::{
    FileLogSink, LogRecord, LogSink, MemorySink, NullSink, CSV_HEADER, LOG_TITLE,
};
pub use stage::{
    FilterReduce, LookupTransform, PassthroughTransform, Reduction, StageReport, StageRunner,
    StageState, Transform,
};
pub use stats::{PipelineStats, StatsAggregator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
