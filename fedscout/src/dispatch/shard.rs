use crossbeam_channel::Sender;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::cancel::CancellationToken;
use super::worker::WorkerTemplate;
use super::{BatchOutput, FailureKind, FailureRecord};
use crate::errors::{SearchError, SearchResult};
use crate::lanes::Lane;

/// Marker the engine prints when a `--pre` hook fails for one file
const PREPROCESSOR_MARKER: &str = "preprocessor command";

/// Splits `items` round-robin into at most `shards` non-empty groups
pub fn partition<T: Clone>(items: &[T], shards: usize) -> Vec<Vec<T>> {
    let shards = shards.max(1).min(items.len().max(1));
    let mut groups: Vec<Vec<T>> = vec![Vec::new(); shards];
    for (i, item) in items.iter().enumerate() {
        groups[i % shards].push(item.clone());
    }
    groups.retain(|g| !g.is_empty());
    groups
}

/// What one shard did before it stopped
#[derive(Debug, Default)]
pub(crate) struct ShardOutcome {
    pub batches_run: usize,
    pub failures: Vec<FailureRecord>,
    pub cancelled: bool,
}

/// How a single worker invocation ended
enum BatchRun {
    Finished {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    Cancelled,
}

/// One shard: its paths, processed in sequential batches by one worker at a time
pub(crate) struct Shard<'a> {
    pub lane: Lane,
    pub index: usize,
    pub template: &'a WorkerTemplate,
    pub paths: Vec<PathBuf>,
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl Shard<'_> {
    pub fn run(self, sender: &Sender<BatchOutput>, cancel: &CancellationToken) -> ShardOutcome {
        let mut outcome = ShardOutcome::default();

        for (batch, paths) in self.paths.chunks(self.batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            trace!(
                "{} shard {} batch {}: {} paths",
                self.lane,
                self.index,
                batch,
                paths.len()
            );
            let run = match spawn_and_wait(self.template, paths, cancel, self.poll_interval) {
                Ok(run) => run,
                Err(e) => {
                    warn!("{} shard {} batch {}: {}", self.lane, self.index, batch, e);
                    outcome.batches_run += 1;
                    outcome.failures.push(FailureRecord {
                        kind: FailureKind::Engine,
                        lane: self.lane,
                        shard: self.index,
                        batch,
                        exit_code: None,
                        paths: paths.to_vec(),
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            let (status, stdout, stderr) = match run {
                BatchRun::Finished {
                    status,
                    stdout,
                    stderr,
                } => (status, stdout, stderr),
                BatchRun::Cancelled => {
                    outcome.cancelled = true;
                    break;
                }
            };
            outcome.batches_run += 1;

            let failures = classify_exit(self.lane, self.index, batch, paths, status, &stderr);
            outcome.failures.extend(failures);

            if stdout.is_empty() {
                continue;
            }
            let output = BatchOutput {
                lane: self.lane,
                shard: self.index,
                batch,
                stdout,
            };
            if sender.send(output).is_err() {
                debug!(
                    "Consumer gone, stopping {} shard {}",
                    self.lane, self.index
                );
                cancel.cancel();
                outcome.cancelled = true;
                break;
            }
        }

        outcome
    }
}

fn spawn_and_wait(
    template: &WorkerTemplate,
    paths: &[PathBuf],
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> SearchResult<BatchRun> {
    let mut child = template
        .command(paths)
        .spawn()
        .map_err(|e| SearchError::engine_spawn(&template.program, e))?;

    // Drain both pipes concurrently so a chatty worker never blocks on a full pipe
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = loop {
        if cancel.is_cancelled() {
            kill(&mut child);
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            return Ok(BatchRun::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(poll_interval),
            Err(e) => {
                kill(&mut child);
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Err(e.into());
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(BatchRun::Finished {
        status,
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buffer) {
                trace!("Worker pipe closed early: {}", e);
            }
        }
        buffer
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        trace!("Worker already exited: {}", e);
    }
    let _ = child.wait();
}

/// Turns a finished batch into failure records.
///
/// Exit 0 (matches) and 1 (no match) are success. Preprocessor complaints on
/// stderr become per-path extraction warnings whatever the exit status; a
/// failing exit with any other cause is one engine failure for the batch.
fn classify_exit(
    lane: Lane,
    shard: usize,
    batch: usize,
    paths: &[PathBuf],
    status: ExitStatus,
    stderr: &[u8],
) -> Vec<FailureRecord> {
    let stderr = String::from_utf8_lossy(stderr);
    let mut failures = Vec::new();
    let mut other_errors = Vec::new();

    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        if line.contains(PREPROCESSOR_MARKER) {
            failures.push(FailureRecord {
                kind: FailureKind::Extraction,
                lane,
                shard,
                batch,
                exit_code: status.code(),
                paths: affected_path(line, paths).into_iter().collect(),
                detail: line.to_string(),
            });
        } else {
            other_errors.push(line);
        }
    }

    let succeeded = matches!(status.code(), Some(0) | Some(1));
    if !succeeded && (failures.is_empty() || !other_errors.is_empty()) {
        warn!(
            "{} shard {} batch {} failed with {}",
            lane, shard, batch, status
        );
        failures.push(FailureRecord {
            kind: FailureKind::Engine,
            lane,
            shard,
            batch,
            exit_code: status.code(),
            paths: paths.to_vec(),
            detail: if other_errors.is_empty() {
                format!("worker exited with {status}")
            } else {
                other_errors.join("\n")
            },
        });
    }

    failures
}

/// The batch path named in an engine diagnostic, preferring the longest match
fn affected_path(line: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .filter(|p| line.contains(&*p.to_string_lossy()))
        .max_by_key(|p| p.as_os_str().len())
        .cloned()
        .or_else(|| {
            line.split(": ")
                .find(|part| Path::new(part).extension().is_some())
                .map(PathBuf::from)
        })
}
