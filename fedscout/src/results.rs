use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::lanes::Lane;
use crate::metrics::MetricsSnapshot;
use crate::router::RouteCounters;

/// Outcome of one federated search run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Submatches found, including those outside the rendered page
    pub total_matches: usize,
    pub files_with_matches: usize,
    /// `(count, path)`, descending by count, ties by path
    #[serde(skip)]
    pub file_counts: Vec<(usize, PathBuf)>,
    pub counters: RouteCounters,
    pub lane_sizes: BTreeMap<Lane, usize>,
    pub engine_failures: usize,
    pub extraction_warnings: usize,
    /// Files the engine reported as binary
    pub engine_skipped: BTreeSet<PathBuf>,
    /// The run stopped early because the requested page was complete
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
    pub log_dir: PathBuf,
    pub metrics: MetricsSnapshot,
}

fn serialize_elapsed<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*elapsed).to_string())
}

impl RunSummary {
    /// 0 when anything matched, 1 otherwise. Warnings never change the status.
    pub fn exit_code(&self) -> i32 {
        if self.total_matches > 0 {
            0
        } else {
            1
        }
    }

    /// One-line human summary for the end of a run
    pub fn describe(&self) -> String {
        let mut line = format!(
            "{} matches in {} files ({} searched, {} skipped) in {}",
            self.total_matches,
            self.files_with_matches,
            self.counters.attempted,
            self.counters.skipped() + self.counters.prefiltered,
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64))
        );
        if self.engine_failures > 0 || self.extraction_warnings > 0 {
            line.push_str(&format!(
                "; {} engine failures, {} extraction warnings",
                self.engine_failures, self.extraction_warnings
            ));
        }
        if self.cancelled {
            line.push_str("; stopped after the requested page");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total_matches: usize) -> RunSummary {
        RunSummary {
            total_matches,
            files_with_matches: total_matches.min(1),
            file_counts: Vec::new(),
            counters: RouteCounters::default(),
            lane_sizes: BTreeMap::new(),
            engine_failures: 0,
            extraction_warnings: 0,
            engine_skipped: BTreeSet::new(),
            cancelled: false,
            elapsed: Duration::from_millis(1500),
            log_dir: PathBuf::from("/tmp/logs"),
            metrics: MetricsSnapshot::default(),
        }
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(summary(3).exit_code(), 0);
        assert_eq!(summary(0).exit_code(), 1);

        let failed = RunSummary {
            engine_failures: 2,
            ..summary(1)
        };
        assert_eq!(failed.exit_code(), 0);
    }

    #[test]
    fn test_describe() {
        let text = RunSummary {
            engine_failures: 1,
            cancelled: true,
            ..summary(4)
        }
        .describe();
        assert!(text.starts_with("4 matches in 1 files"));
        assert!(text.contains("1s 500ms"));
        assert!(text.contains("1 engine failures"));
        assert!(text.ends_with("stopped after the requested page"));
    }

    #[test]
    fn test_serializes_elapsed_as_text() {
        let yaml = serde_yaml::to_string(&summary(2)).unwrap();
        assert!(yaml.contains("elapsed: 1s 500ms"));
        assert!(yaml.contains("total_matches: 2"));
    }
}
