use crate::barrier::Barrier;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{validate_stage_count, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::item::DataItem;
use crate::once::OnceGuard;
use crate::queue::TimedBoundedQueue;
use crate::resources::SharedResources;
use crate::sink::{FileLogSink, LogRecord, LogSink, NullSink};
use crate::stage::{StageReport, StageRunner, StageState};
use crate::stats::StatsAggregator;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Item count difference past which one stage is reported as lagging
pub const BOTTLENECK_MARGIN: u64 = 50;

/// State shared by the stages of one run
pub struct PipelineContext {
    pub(crate) queues: Vec<Arc<TimedBoundedQueue<DataItem>>>,
    pub(crate) barrier: Barrier,
    pub(crate) init: OnceGuard,
    pub(crate) stats: StatsAggregator,
    pub(crate) resources: SharedResources,
    pub(crate) sink: Arc<dyn LogSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) queue_timeout: Duration,
    pub(crate) generator_pause: Duration,
}

impl PipelineContext {
    pub(crate) fn record(&self, stage: usize, item_id: u64, value: f64, latency_ms: Option<f64>) {
        self.sink.record(&LogRecord {
            stage,
            item_id,
            value,
            timestamp_ms: self.clock.now().as_millis() as u64,
            latency_ms,
        });
    }
}

/// Builder for constructing pipeline coordinators
pub struct PipelineBuilder {
    config: PipelineConfig,
    sink: Option<Arc<dyn LogSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            sink: None,
            clock: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout = timeout;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn generator_pause(mut self, pause: Duration) -> Self {
        self.config.generator_pause = pause;
        self
    }

    /// Write records as CSV to `path`. Ignored if a sink is set explicitly.
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = Some(path.into());
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the coordinator.
    ///
    /// A log file that cannot be created is not an error: records are
    /// discarded instead.
    pub fn build(self) -> Result<PipelineCoordinator> {
        self.config.validate()?;

        let sink: Arc<dyn LogSink> = match (self.sink, &self.config.log_path) {
            (Some(sink), _) => sink,
            (None, Some(path)) => match FileLogSink::create(path) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "log sink unavailable, records will be discarded");
                    Arc::new(NullSink)
                }
            },
            (None, None) => Arc::new(NullSink),
        };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(MonotonicClock::new()),
        };

        Ok(PipelineCoordinator {
            config: self.config,
            sink,
            clock,
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            active_queues: Mutex::new(Vec::new()),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Which stage held the pipeline back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bottleneck {
    Balanced,
    Processing,
    Filtering,
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub generated: u64,
    pub processed: u64,
    pub filtered: u64,
    pub barrier_cycles: u64,
    pub barrier_arrivals: u64,
    pub average_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    /// Sum of processed values of filtered items
    pub accumulated_sum: f64,
    pub elapsed: Duration,
    pub stages: Vec<StageReport>,
}

impl PipelineResult {
    /// Generated items per second of wall time
    pub fn throughput_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.generated as f64 / secs
        }
    }

    /// Share of generated items accepted by the filter, in `0.0..=1.0`
    pub fn filter_ratio(&self) -> f64 {
        if self.generated == 0 {
            0.0
        } else {
            self.filtered as f64 / self.generated as f64
        }
    }

    pub fn bottleneck(&self) -> Bottleneck {
        if self.generated > self.processed + BOTTLENECK_MARGIN {
            Bottleneck::Processing
        } else if self.processed > self.filtered + BOTTLENECK_MARGIN {
            Bottleneck::Filtering
        } else {
            Bottleneck::Balanced
        }
    }

    /// True if every stage ran all of its ticks
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.state == StageState::Drained)
    }

    /// Format the result as a human-readable string
    pub fn summary(&self) -> String {
        format!(
            "Generated: {}, Processed: {}, Filtered: {} ({:.1}%), Barrier cycles: {}, \
             Avg latency: {:.3}ms, P50: {:.3}ms, P99: {:.3}ms, Sum: {:.6}, Elapsed: {:.3}s",
            self.generated,
            self.processed,
            self.filtered,
            self.filter_ratio() * 100.0,
            self.barrier_cycles,
            self.average_latency_ms,
            self.latency_p50_ms,
            self.latency_p99_ms,
            self.accumulated_sum,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Runs lock-step pipelines: generator, processing stage(s), filter/reduce.
///
/// Every run gets fresh queues, barrier, stats and shared resources; the
/// coordinator itself only keeps the configuration and injected capabilities,
/// so independent coordinators can run side by side in one process.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    shutdown: AtomicBool,
    /// Queues of the run in progress, for shutdown from other threads
    active_queues: Mutex<Vec<Arc<TimedBoundedQueue<DataItem>>>>,
}

impl PipelineCoordinator {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        PipelineBuilder::new().config(config).build()
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the run in progress to stop.
    ///
    /// Sets the shutdown flag and wakes every blocked push and pop. Stages
    /// leave their loop at the next queue operation and retire from the
    /// barrier, so the run still returns with partial results. Has no
    /// effect when no run is in progress.
    pub fn request_shutdown(&self) {
        let queues = {
            let active = self.active_queues.lock();
            if !self.is_running() {
                return;
            }
            self.shutdown.store(true, Ordering::SeqCst);
            active.clone()
        };
        // Broadcast outside the registry lock; a run that has since ended
        // only sees its already drained queues shut down.
        for queue in &queues {
            queue.request_shutdown();
        }
        info!("pipeline shutdown requested");
    }

    /// Run `ticks` lock-step ticks over `stage_count` stages and wait for
    /// every stage to finish.
    pub fn run(&self, ticks: u64, stage_count: usize) -> Result<PipelineResult> {
        validate_stage_count(stage_count)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }
        let _running = RunningGuard(self);

        let queues: Vec<_> = (1..stage_count)
            .map(|_| Arc::new(TimedBoundedQueue::new(self.config.queue_capacity)))
            .collect();
        let shutdown_pending = {
            let mut active = self.active_queues.lock();
            *active = queues.clone();
            self.shutdown.load(Ordering::SeqCst)
        };
        // A request may land between claiming the run and installing queues
        if shutdown_pending {
            for queue in &queues {
                queue.request_shutdown();
            }
        }

        let ctx = PipelineContext {
            queues,
            barrier: Barrier::new(stage_count),
            init: OnceGuard::new(),
            stats: StatsAggregator::new(),
            resources: SharedResources::new(self.config.seed),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            queue_timeout: self.config.queue_timeout,
            generator_pause: self.config.generator_pause,
        };
        ctx.init.run(|| ctx.sink.write_header());

        info!(
            ticks,
            stage_count,
            capacity = self.config.queue_capacity,
            seed = self.config.seed,
            "pipeline started"
        );
        let started = Instant::now();
        let reports = self.run_stages(&ctx, ticks, stage_count);
        let elapsed = started.elapsed();

        ctx.sink.flush();
        let stages = reports?;

        let stats = ctx.stats.snapshot();
        let accumulated_sum = stages
            .iter()
            .find_map(|s| s.reduction)
            .map_or(0.0, |r| r.accumulated);
        let result = PipelineResult {
            generated: stats.generated,
            processed: stats.processed,
            filtered: stats.filtered,
            barrier_cycles: stats.barrier_cycles,
            barrier_arrivals: stats.barrier_arrivals,
            average_latency_ms: stats.average_latency_ms(),
            latency_p50_ms: ctx.stats.latency_p50_ms(),
            latency_p99_ms: ctx.stats.latency_p99_ms(),
            accumulated_sum,
            elapsed,
            stages,
        };

        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            generated = result.generated,
            filtered = result.filtered,
            complete = result.is_complete(),
            "pipeline finished"
        );
        Ok(result)
    }

    /// Spawn one scoped thread per stage and join them all
    fn run_stages(
        &self,
        ctx: &PipelineContext,
        ticks: u64,
        stage_count: usize,
    ) -> Result<Vec<StageReport>> {
        crossbeam::thread::scope(|scope| -> Result<Vec<StageReport>> {
            let mut handles = Vec::with_capacity(stage_count);
            for index in 0..stage_count {
                let runner = StageRunner::new(index, stage_count, ctx);
                let spawned = scope
                    .builder()
                    .name(format!("stage-{}", index + 1))
                    .spawn(move |_| runner.run(ticks));

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        // Stages that never start still count as barrier parties.
                        for _ in index..stage_count {
                            ctx.barrier.retire();
                        }
                        self.request_shutdown();
                        return Err(PipelineError::ThreadError(format!(
                            "failed to spawn stage {}: {e}",
                            index + 1
                        )));
                    }
                }
            }

            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle.join().map_err(|_| {
                        PipelineError::ThreadError(format!("stage {} panicked", index + 1))
                    })
                })
                .collect()
        })
        .map_err(|_| PipelineError::ThreadError("stage thread panicked".into()))?
    }
}

/// Ends the run however `run` returns: drops the queue registry and clears
/// both flags under the registry lock
struct RunningGuard<'a>(&'a PipelineCoordinator);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.0.active_queues.lock();
        active.clear();
        self.0.shutdown.store(false, Ordering::SeqCst);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn result(generated: u64, processed: u64, filtered: u64) -> PipelineResult {
        PipelineResult {
            generated,
            processed,
            filtered,
            barrier_cycles: 0,
            barrier_arrivals: 0,
            average_latency_ms: 0.0,
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            accumulated_sum: 0.0,
            elapsed: Duration::from_secs(2),
            stages: Vec::new(),
        }
    }

    #[test]
    fn test_pipeline_builder() {
        let coordinator = PipelineBuilder::new()
            .queue_capacity(10)
            .queue_timeout(Duration::from_millis(200))
            .seed(7)
            .build()
            .unwrap();
        assert_eq!(coordinator.config().queue_capacity, 10);
        assert_eq!(coordinator.config().seed, 7);
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_invalid_config_error() {
        let result = PipelineBuilder::new().queue_capacity(0).build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_too_few_stages_error() {
        let coordinator = PipelineBuilder::new().build().unwrap();
        assert!(matches!(
            coordinator.run(10, 1),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_unwritable_log_path_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = PipelineBuilder::new()
            .log_path(dir.path().join("missing").join("log.txt"))
            .build()
            .unwrap();
        let result = coordinator.run(20, 3).unwrap();
        assert_eq!(result.generated, 20);
    }

    #[test]
    fn test_header_written_once_per_run() {
        let sink = Arc::new(MemorySink::new());
        let coordinator = PipelineBuilder::new()
            .log_sink(sink.clone())
            .build()
            .unwrap();
        coordinator.run(5, 3).unwrap();
        assert_eq!(sink.header_count(), 1);
        coordinator.run(5, 3).unwrap();
        assert_eq!(sink.header_count(), 2);
    }

    #[test]
    fn test_shutdown_without_run_is_noop() {
        let coordinator = PipelineBuilder::new().build().unwrap();
        coordinator.request_shutdown();
        let result = coordinator.run(10, 3).unwrap();
        assert!(result.is_complete());
    }

    #[test]
    fn test_result_analysis() {
        let balanced = result(1000, 1000, 980);
        assert_eq!(balanced.bottleneck(), Bottleneck::Balanced);
        assert_eq!(balanced.throughput_per_sec(), 500.0);
        assert_eq!(balanced.filter_ratio(), 0.98);

        assert_eq!(result(1000, 900, 900).bottleneck(), Bottleneck::Processing);
        assert_eq!(result(1000, 1000, 300).bottleneck(), Bottleneck::Filtering);
        assert_eq!(result(0, 0, 0).filter_ratio(), 0.0);
    }

    #[test]
    fn test_summary_format() {
        let summary = result(10, 10, 5).summary();
        assert!(summary.starts_with("Generated: 10, Processed: 10, Filtered: 5 (50.0%)"));
    }
}
