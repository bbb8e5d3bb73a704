//! Shard dispatcher.
//!
//! Each lane's files are split round-robin into shards; every shard runs on
//! its own thread and feeds its paths to the lane's worker in sequential
//! batches. Each finished batch's stdout is sent downstream immediately, so
//! results stream in shard-interleaved but per-file contiguous order.

mod cancel;
mod shard;
mod worker;

pub use cancel::CancellationToken;
pub use shard::partition;
pub use worker::{WorkerTemplate, TEXT_CONTEXT_LINES};

use crossbeam_channel::Sender;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::lanes::{ChatFlavor, Lane, LaneTuning};
use crate::router::RoutePlan;
use shard::{Shard, ShardOutcome};

/// How often a shard checks on a running worker
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The stdout of one finished batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    pub lane: Lane,
    pub shard: usize,
    pub batch: usize,
    pub stdout: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine itself failed for a whole batch
    Engine,
    /// A preprocessing hook failed for one file
    Extraction,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Engine => "engine",
            FailureKind::Extraction => "extraction",
        })
    }
}

/// One entry of the failure log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub lane: Lane,
    pub shard: usize,
    pub batch: usize,
    pub exit_code: Option<i32>,
    pub paths: Vec<PathBuf>,
    pub detail: String,
}

/// Aggregate result of a dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub shards_started: usize,
    pub batches_run: usize,
    pub failures: Vec<FailureRecord>,
    /// Work stopped early because of cancellation; never counted as failure
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn engine_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Engine)
            .count()
    }

    pub fn extraction_warnings(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Extraction)
            .count()
    }

    fn absorb(&mut self, outcome: ShardOutcome) {
        self.batches_run += outcome.batches_run;
        self.failures.extend(outcome.failures);
        self.cancelled |= outcome.cancelled;
    }
}

/// One lane's share of the work: its files, worker and tuning
#[derive(Debug, Clone)]
pub struct LaneJob {
    pub lane: Lane,
    pub template: WorkerTemplate,
    pub paths: Vec<PathBuf>,
    pub tuning: LaneTuning,
}

impl LaneJob {
    /// Jobs for every non-empty lane of a route plan. Chat files are split
    /// by flavor so transcripts get their own tuning.
    pub fn plan(plan: &RoutePlan, config: &SearchConfig) -> SearchResult<Vec<LaneJob>> {
        let mut jobs = Vec::new();
        for (&lane, files) in &plan.lanes {
            if files.is_empty() {
                continue;
            }
            let template = WorkerTemplate::for_lane(lane, config)?;

            if lane == Lane::Chat {
                for flavor in [ChatFlavor::Messaging, ChatFlavor::Transcript] {
                    let paths: Vec<PathBuf> = files
                        .iter()
                        .filter(|f| f.flavor.unwrap_or(ChatFlavor::Messaging) == flavor)
                        .map(|f| f.path.clone())
                        .collect();
                    if !paths.is_empty() {
                        jobs.push(LaneJob {
                            lane,
                            template: template.clone(),
                            paths,
                            tuning: config.lanes.tuning(lane, Some(flavor)),
                        });
                    }
                }
            } else {
                jobs.push(LaneJob {
                    lane,
                    template,
                    paths: files.iter().map(|f| f.path.clone()).collect(),
                    tuning: config.lanes.tuning(lane, None),
                });
            }
        }
        Ok(jobs)
    }
}

/// Runs lane jobs across shard threads
#[derive(Debug, Clone)]
pub struct Dispatcher {
    jobs: Vec<LaneJob>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(jobs: Vec<LaneJob>) -> Self {
        Self {
            jobs,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs every shard of every job concurrently and blocks until all of
    /// them have stopped. Batch outputs go to `sender` as they complete;
    /// a dropped receiver stops the remaining work like `cancel` does.
    pub fn run(
        &self,
        sender: Sender<BatchOutput>,
        cancel: &CancellationToken,
    ) -> SearchResult<DispatchReport> {
        let mut report = DispatchReport::default();

        thread::scope(|scope| {
            let mut handles = Vec::new();
            for job in &self.jobs {
                let shards = partition(&job.paths, job.tuning.shards);
                debug!(
                    "{} lane: {} files over {} shards, batches of {}",
                    job.lane,
                    job.paths.len(),
                    shards.len(),
                    job.tuning.batch_size
                );
                for (index, paths) in shards.into_iter().enumerate() {
                    let shard = Shard {
                        lane: job.lane,
                        index,
                        template: &job.template,
                        paths,
                        batch_size: job.tuning.batch_size,
                        poll_interval: self.poll_interval,
                    };
                    let sender = sender.clone();
                    handles.push(scope.spawn(move || shard.run(&sender, cancel)));
                }
            }
            drop(sender);

            report.shards_started = handles.len();
            let mut panicked = false;
            for handle in handles {
                match handle.join() {
                    Ok(outcome) => report.absorb(outcome),
                    Err(_) => panicked = true,
                }
            }
            if panicked {
                return Err(SearchError::DispatcherPanicked);
            }
            Ok(())
        })?;

        report.cancelled |= cancel.is_cancelled();
        info!(
            "Dispatch finished: {} batches, {} engine failures, {} extraction warnings{}",
            report.batches_run,
            report.engine_failures(),
            report.extraction_warnings(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }
}
