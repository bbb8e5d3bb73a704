use crossbeam_channel::unbounded;
use std::io::Write;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::dispatch::{CancellationToken, Dispatcher, LaneJob};
use crate::errors::{SearchError, SearchResult};
use crate::format::{Flow, MatchAssembler};
use crate::lanes::Lane;
use crate::logs::RunLogs;
use crate::metrics::SearchMetrics;
use crate::prefilter;
use crate::results::RunSummary;
use crate::router::{self, SkipReason};
use crate::walker;

/// Runs one federated search, writing rendered results to `out`.
///
/// Walks the roots, routes files into lanes, optionally prefilters the chat
/// lane, dispatches the lanes to worker processes on a background thread
/// and assembles their output on the calling thread. When the requested
/// page is complete the dispatcher is cancelled and joined before the run
/// logs are written.
pub fn run<W: Write>(config: &SearchConfig, out: W) -> SearchResult<RunSummary> {
    let start = Instant::now();
    config.validate()?;
    let metrics = SearchMetrics::new();

    let records = walker::enumerate(&config.roots, config.no_ignore)?;
    let mut plan = router::route(records, config);

    if let Some(prefilter) = prefilter::for_config(config, &metrics) {
        if let Some(files) = plan.lanes.get_mut(&Lane::Chat) {
            let dropped = prefilter.retain(files);
            plan.counters.prefiltered += dropped.len();
            plan.skipped
                .extend(dropped.into_iter().map(|path| (SkipReason::Prefiltered, path)));
        }
    }

    let dispatcher = Dispatcher::new(LaneJob::plan(&plan, config)?);
    let cancel = CancellationToken::new();
    let (sender, receiver) = unbounded();
    let mut assembler = MatchAssembler::for_config(out, config, metrics.clone());

    let (report, assembly) = thread::scope(|scope| {
        let dispatcher = &dispatcher;
        let token = &cancel;
        let handle = scope.spawn(move || dispatcher.run(sender, token));

        let mut fed = Ok(());
        for batch in receiver.iter() {
            debug!(
                "Assembling {} lane shard {} batch {}",
                batch.lane, batch.shard, batch.batch
            );
            match assembler.feed_output(&batch.stdout) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    info!("Requested page complete, cancelling workers");
                    cancel.cancel();
                    break;
                }
                Err(e) => {
                    cancel.cancel();
                    fed = Err(e);
                    break;
                }
            }
        }
        drop(receiver);

        let report = handle
            .join()
            .map_err(|_| SearchError::DispatcherPanicked)??;
        fed?;
        Ok::<_, SearchError>((report, assembler.finish()?))
    })?;

    plan.skipped.extend(
        assembly
            .engine_skipped
            .iter()
            .map(|path| (SkipReason::Binary, path.clone())),
    );

    let summary = RunSummary {
        total_matches: assembly.total_matches,
        files_with_matches: assembly.file_counts.len(),
        file_counts: assembly
            .sorted_counts()
            .into_iter()
            .map(|(count, path)| (count, path.to_path_buf()))
            .collect(),
        counters: plan.counters,
        lane_sizes: plan.lane_sizes(),
        engine_failures: report.engine_failures(),
        extraction_warnings: report.extraction_warnings(),
        engine_skipped: assembly.engine_skipped.clone(),
        cancelled: report.cancelled || assembly.stopped,
        elapsed: start.elapsed(),
        log_dir: config.resolved_log_dir(),
        metrics: metrics.get_stats(),
    };
    metrics.log_stats();

    let logs = RunLogs {
        failures: &report.failures,
        skipped: &plan.skipped,
        summary: &summary,
    };
    if let Err(e) = logs.write_to(&summary.log_dir) {
        warn!("Failed to write run logs to {}: {}", summary.log_dir.display(), e);
    }

    info!("{}", summary.describe());
    Ok(summary)
}
