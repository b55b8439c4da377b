use crate::barrier::BarrierParty;
use crate::error::QueueError;
use crate::item::{passes_filter, DataItem};
use crate::pipeline::PipelineContext;
use crate::queue::TimedBoundedQueue;
use crate::resources::{SharedResources, ValueSource};
use std::hint::black_box;
use std::thread;
use tracing::{debug, info, warn};

/// Barrier cycles between progress events
const PROGRESS_INTERVAL: u64 = 100;

/// Square roots summed per item by [`LookupTransform`] to simulate work
const WORK_ITERATIONS: u32 = 1000;

/// Per-item transformation applied by a stage
pub trait Transform: Send {
    fn apply(&mut self, item: &mut DataItem, resources: &SharedResources);

    fn name(&self) -> &str {
        "transform"
    }
}

/// Leaves items untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTransform;

impl Transform for PassthroughTransform {
    fn apply(&mut self, _item: &mut DataItem, _resources: &SharedResources) {}

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Computes `processed_value` from the lookup table and the raw value
#[derive(Debug, Default, Clone, Copy)]
pub struct LookupTransform;

impl Transform for LookupTransform {
    fn apply(&mut self, item: &mut DataItem, resources: &SharedResources) {
        let raw = item.raw_value as f64;
        let base = resources.lookup(item.raw_value);

        let mut value = base * (raw + 1.0).ln();
        value += (raw * 0.01).sin() * (item.id as f64 * 0.02).cos();
        value = value.abs();

        let work: f64 = (0..WORK_ITERATIONS).map(|i| (i as f64 + raw).sqrt()).sum();
        value += black_box(work) * 1e-6;

        item.processed_value = value;
    }

    fn name(&self) -> &str {
        "lookup"
    }
}

/// Terminal fold: keeps items accepted by the predicate and sums their
/// processed values
#[derive(Clone)]
pub struct FilterReduce {
    predicate: fn(&DataItem) -> bool,
    reduction: Reduction,
}

/// Running accumulator of the filter/reduce stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reduction {
    pub passed: u64,
    pub accumulated: f64,
}

impl FilterReduce {
    pub fn new(predicate: fn(&DataItem) -> bool) -> Self {
        Self {
            predicate,
            reduction: Reduction::default(),
        }
    }

    /// Evaluate `item`, folding it in if it passes. Returns the item's
    /// end-to-end latency as of `now` for accepted items.
    pub fn fold(&mut self, item: &mut DataItem, now: std::time::Duration) -> Option<f64> {
        item.is_valid = (self.predicate)(item);
        if !item.is_valid {
            return None;
        }
        self.reduction.passed += 1;
        self.reduction.accumulated += item.processed_value;
        Some(item.latency_ms(now))
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }
}

impl std::fmt::Debug for FilterReduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterReduce")
            .field("reduction", &self.reduction)
            .finish_non_exhaustive()
    }
}

impl Default for FilterReduce {
    fn default() -> Self {
        Self::new(passes_filter)
    }
}

/// Lifecycle of a stage worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Running,
    /// Left early on a queue timeout or shutdown
    Stopped,
    /// Completed every tick
    Drained,
}

/// Terminal state of one stage after a run
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub index: usize,
    pub name: String,
    pub state: StageState,
    pub ticks_completed: u64,
    /// Set when the stage stopped early
    pub exit: Option<QueueError>,
    /// Only for the filter/reduce stage
    pub reduction: Option<Reduction>,
}

enum Source<'a> {
    Generate { values: ValueSource, next_id: u64 },
    Queue(&'a TimedBoundedQueue<DataItem>),
}

enum Output<'a> {
    Queue(&'a TimedBoundedQueue<DataItem>),
    Reduce(FilterReduce),
}

/// Worker loop of one pipeline stage.
///
/// Stage 0 generates items, the last stage filters and reduces, and the
/// stages in between move items from their upstream queue to their
/// downstream queue. Stage 1 applies [`LookupTransform`]; later middle
/// stages pass items through.
pub struct StageRunner<'a> {
    index: usize,
    name: String,
    ctx: &'a PipelineContext,
    source: Source<'a>,
    transform: Box<dyn Transform>,
    output: Output<'a>,
    state: StageState,
    ticks_completed: u64,
    exit: Option<QueueError>,
}

impl<'a> StageRunner<'a> {
    /// Create the runner of stage `index` out of `stage_count`.
    ///
    /// `ctx` must hold `stage_count - 1` queues.
    pub fn new(index: usize, stage_count: usize, ctx: &'a PipelineContext) -> Self {
        debug_assert!(index < stage_count);
        debug_assert_eq!(ctx.queues.len() + 1, stage_count);

        let last = stage_count - 1;
        let source = if index == 0 {
            Source::Generate {
                values: ctx.resources.value_source(),
                next_id: 0,
            }
        } else {
            Source::Queue(&ctx.queues[index - 1])
        };
        let output = if index == last {
            Output::Reduce(FilterReduce::default())
        } else {
            Output::Queue(&ctx.queues[index])
        };
        let transform: Box<dyn Transform> = if index == 1 {
            Box::new(LookupTransform)
        } else {
            Box::new(PassthroughTransform)
        };
        let name = match index {
            0 => "generator".to_string(),
            i if i == last => "filter-reduce".to_string(),
            1 => "processor".to_string(),
            i => format!("processor-{i}"),
        };

        Self {
            index,
            name,
            ctx,
            source,
            transform,
            output,
            state: StageState::Idle,
            ticks_completed: 0,
            exit: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Run up to `ticks` ticks, meeting the other stages at the barrier after
    /// each one. Returns once the ticks are exhausted or a queue operation
    /// fails.
    pub fn run(mut self, ticks: u64) -> StageReport {
        let ctx = self.ctx;
        ctx.init.run(|| ctx.sink.write_header());

        let party = BarrierParty::new(&ctx.barrier);
        self.state = StageState::Running;
        info!(
            stage = self.index + 1,
            name = %self.name,
            transform = self.transform.name(),
            "stage started"
        );

        for tick in 0..ticks {
            if let Err(reason) = self.step() {
                warn!(stage = self.index + 1, name = %self.name, tick, %reason, "stage stopped early");
                self.state = StageState::Stopped;
                self.exit = Some(reason);
                break;
            }
            self.ticks_completed += 1;

            ctx.stats.record_barrier_arrival();
            let cycle = party.wait();
            if cycle.is_last_arriver() {
                ctx.stats.record_barrier_cycle();
                if (cycle.generation() + 1) % PROGRESS_INTERVAL == 0 {
                    let stats = ctx.stats.snapshot();
                    debug!(
                        cycle = cycle.generation() + 1,
                        generated = stats.generated,
                        processed = stats.processed,
                        filtered = stats.filtered,
                        "pipeline progress"
                    );
                }
            }

            if self.index == 0 && !ctx.generator_pause.is_zero() {
                thread::sleep(ctx.generator_pause);
            }
        }

        if party.leave() {
            ctx.stats.record_barrier_cycle();
        }
        if self.state == StageState::Running {
            self.state = StageState::Drained;
        }
        info!(
            stage = self.index + 1,
            name = %self.name,
            ticks = self.ticks_completed,
            state = ?self.state,
            "stage finished"
        );

        StageReport {
            index: self.index,
            name: self.name,
            state: self.state,
            ticks_completed: self.ticks_completed,
            exit: self.exit,
            reduction: match &self.output {
                Output::Reduce(reducer) => Some(reducer.reduction()),
                Output::Queue(_) => None,
            },
        }
    }

    /// One tick of work: obtain, transform, hand on
    fn step(&mut self) -> Result<(), QueueError> {
        let ctx = self.ctx;
        let stage = self.index + 1;

        let mut item = match &mut self.source {
            Source::Generate { values, next_id } => {
                let item = DataItem::new(*next_id, values.next_value(), ctx.clock.now());
                *next_id += 1;
                item
            }
            Source::Queue(queue) => queue.pop_timeout(ctx.queue_timeout)?,
        };

        self.transform.apply(&mut item, &ctx.resources);

        match &mut self.output {
            Output::Queue(queue) => {
                let id = item.id;
                let value = if self.index == 0 {
                    item.raw_value as f64
                } else {
                    item.processed_value
                };
                queue.push_timeout(item, ctx.queue_timeout)?;
                ctx.record(stage, id, value, None);
            }
            Output::Reduce(reducer) => {
                if let Some(latency_ms) = reducer.fold(&mut item, ctx.clock.now()) {
                    ctx.stats.record_filtered(latency_ms);
                    ctx.record(stage, item.id, item.processed_value, Some(latency_ms));
                }
            }
        }

        match self.index {
            0 => ctx.stats.record_generated(),
            1 => ctx.stats.record_processed(),
            _ => {}
        }
        Ok(())
    }
}
