//! Run logs written at the end of a search.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dispatch::FailureRecord;
use crate::errors::SearchResult;
use crate::results::RunSummary;
use crate::router::SkipReason;

pub const FAILURES_LOG: &str = "failures.log";
pub const SKIPPED_LOG: &str = "skipped.log";
pub const FILE_COUNTS: &str = "file_counts.tsv";
pub const MATCH_TOTAL: &str = "match_total.txt";
pub const RUN_SUMMARY: &str = "run_summary.yaml";

const SEPARATOR_WIDTH: usize = 40;

/// Everything that ends up in the log directory
#[derive(Debug)]
pub struct RunLogs<'a> {
    pub failures: &'a [FailureRecord],
    pub skipped: &'a [(SkipReason, PathBuf)],
    pub summary: &'a RunSummary,
}

impl RunLogs<'_> {
    pub fn write_to(&self, dir: &Path) -> SearchResult<()> {
        fs::create_dir_all(dir)?;

        let mut out = BufWriter::new(File::create(dir.join(FAILURES_LOG))?);
        write_failures(&mut out, self.failures)?;
        out.flush()?;

        let mut out = BufWriter::new(File::create(dir.join(SKIPPED_LOG))?);
        for (reason, path) in self.skipped {
            writeln!(out, "{}\t{}", reason, path.display())?;
        }
        out.flush()?;

        let mut out = BufWriter::new(File::create(dir.join(FILE_COUNTS))?);
        for (count, path) in &self.summary.file_counts {
            writeln!(out, "{}\t{}", count, path.display())?;
        }
        out.flush()?;

        fs::write(
            dir.join(MATCH_TOTAL),
            format!("{}\n", self.summary.total_matches),
        )?;

        fs::write(dir.join(RUN_SUMMARY), serde_yaml::to_string(self.summary)?)?;

        info!("Run logs written to {}", dir.display());
        Ok(())
    }
}

/// One block per failure: header, affected paths, detail, separator
pub fn write_failures<W: Write>(out: &mut W, failures: &[FailureRecord]) -> std::io::Result<()> {
    for failure in failures {
        let exit = failure
            .exit_code
            .map_or_else(|| "none".to_string(), |code| code.to_string());
        writeln!(
            out,
            "{} {} {} {} {}",
            failure.kind, failure.lane, failure.shard, failure.batch, exit
        )?;
        for path in &failure.paths {
            writeln!(out, "{}", path.display())?;
        }
        if !failure.detail.is_empty() {
            writeln!(out, "{}", failure.detail.trim_end())?;
        }
        writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH))?;
    }
    Ok(())
}
