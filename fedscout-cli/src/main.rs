use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use fedscout::{
    chat::{self, canonical, ChatNormalizer, NormalizeOptions, PREPROCESS_CHAT, PREPROCESS_ENV},
    format::{render_message, HighlightStyle},
    router,
    walker, EngineConfig, RunSummary, SearchConfig,
};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct CliSearchConfig {
    /// Pattern to search for
    pattern: String,

    /// Files or directories to search
    #[arg(default_value = ".")]
    roots: Vec<PathBuf>,

    /// Configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tokens (or messages in chat mode) of context before each match
    #[arg(short = 'B', long)]
    before: Option<usize>,

    /// Tokens (or messages in chat mode) of context after each match
    #[arg(short = 'A', long)]
    after: Option<usize>,

    /// Start windows at the first token of the match line
    #[arg(long)]
    from_line_start: bool,

    /// Case-insensitive search
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Treat the pattern as a literal string
    #[arg(short = 'F', long)]
    fixed_strings: bool,

    /// Search hidden files and directories
    #[arg(long)]
    hidden: bool,

    /// Do not respect ignore files
    #[arg(long)]
    no_ignore: bool,

    /// Search binary files as text
    #[arg(short = 'a', long)]
    text: bool,

    /// File extensions to include (e.g. txt,md,json)
    #[arg(short = 'e', long)]
    extensions: Option<String>,

    /// File extensions to exclude, replacing the default list
    #[arg(long)]
    exclude_extensions: Option<String>,

    /// Patterns to ignore (glob format)
    #[arg(short = 'g', long)]
    ignore: Vec<String>,

    /// Search chat exports only, normalized into messages
    #[arg(long)]
    chat: bool,

    /// Drop chat files whose raw bytes cannot match
    #[arg(long)]
    prefilter: bool,

    /// Cache normalized chat exports
    #[arg(long)]
    cache: bool,

    /// Chat cache directory (implies --cache)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Leave timestamps out of normalized chat messages
    #[arg(long)]
    drop_timestamps: bool,

    /// One result per matched message instead of one per match
    #[arg(long)]
    merge: bool,

    /// Page of results to show (1-based)
    #[arg(long)]
    page: Option<NonZeroUsize>,

    /// Results per page
    #[arg(long, default_value = "10")]
    page_size: NonZeroUsize,

    /// Only print per-file match counts
    #[arg(short = 'c', long)]
    count: bool,

    /// Match highlighting (ansi|brackets|none)
    #[arg(long, default_value = "ansi")]
    highlight: String,

    /// Search engine program
    #[arg(long)]
    engine: Option<String>,

    /// Directory for run logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Search files, documents and chat exports
    Search(Box<CliSearchConfig>),

    /// Print a chat export as normalized messages
    Normalize {
        /// Chat export to read
        path: PathBuf,

        /// Render `{text, sender, timestamp}` instead of canonical lines
        #[arg(long)]
        pretty: bool,

        /// Leave timestamps out
        #[arg(long)]
        drop_timestamps: bool,
    },

    /// Show which lane each file would be searched in
    Classify {
        /// Files or directories to classify
        #[arg(default_value = ".")]
        roots: Vec<PathBuf>,

        /// Classify as a chat-mode search would
        #[arg(long)]
        chat: bool,

        /// Include hidden files and directories
        #[arg(long)]
        hidden: bool,

        /// Do not respect ignore files
        #[arg(long)]
        no_ignore: bool,
    },
}

fn main() -> ExitCode {
    // Invoked by the engine as `--pre` hook: one path argument, text on stdout
    if std::env::var(PREPROCESS_ENV).as_deref() == Ok(PREPROCESS_CHAT) {
        return preprocess();
    }

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn preprocess() -> ExitCode {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: {} <path>", PREPROCESS_ENV);
        return ExitCode::from(2);
    };
    let normalizer = ChatNormalizer::new(NormalizeOptions::from_env());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match normalizer.normalize_to(&path, &mut out) {
        Ok(_) => ExitCode::SUCCESS,
        Err(fedscout::SearchError::IoError(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_highlight(value: &str) -> anyhow::Result<HighlightStyle> {
    match value.to_lowercase().as_str() {
        "ansi" => Ok(HighlightStyle::Ansi),
        "brackets" => Ok(HighlightStyle::Brackets),
        "none" => Ok(HighlightStyle::None),
        other => bail!("unknown highlight style '{}'", other),
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => {
            let args = *args;
            let cli_config = SearchConfig {
                pattern: args.pattern,
                roots: args.roots,
                context_before: args.before,
                context_after: args.after,
                from_line_start: args.from_line_start,
                case_insensitive: args.ignore_case,
                literal: args.fixed_strings,
                include_hidden: args.hidden,
                no_ignore: args.no_ignore,
                binary_as_text: args.text,
                extensions: args.extensions.as_deref().map(split_list),
                exclude_extensions: args
                    .exclude_extensions
                    .as_deref()
                    .map(split_list)
                    .unwrap_or_else(fedscout::config::default_exclude_extensions),
                ignore_patterns: args.ignore,
                chat: args.chat,
                chat_prefilter: args.prefilter,
                chat_cache: args.cache || args.cache_dir.is_some(),
                chat_cache_dir: args.cache_dir,
                keep_timestamps: !args.drop_timestamps,
                merge: args.merge,
                page: args.page,
                page_size: args.page_size,
                counts_only: args.count,
                highlight: parse_highlight(&args.highlight)?,
                log_dir: args.log_dir,
                log_level: args.log_level,
                engine: EngineConfig {
                    program: args
                        .engine
                        .unwrap_or_else(|| EngineConfig::default().program),
                    ..EngineConfig::default()
                },
                ..SearchConfig::default()
            };

            let mut config = SearchConfig::load_from(args.config.as_deref())
                .context("failed to load configuration")?
                .merge_with_cli(cli_config);
            init_tracing(&config.log_level);

            if config.engine.chat_hook.is_none() {
                config.engine.chat_hook = Some(
                    std::env::current_exe().context("cannot locate the fedscout executable")?,
                );
            }

            let stdout = io::stdout();
            let summary = fedscout::run(&config, stdout.lock())?;
            if config.counts_only {
                print_counts(&summary)?;
            }
            print_summary(&summary);
            Ok(ExitCode::from(summary.exit_code() as u8))
        }
        Commands::Normalize {
            path,
            pretty,
            drop_timestamps,
        } => {
            init_tracing("warn");
            let normalizer = ChatNormalizer::new(NormalizeOptions {
                keep_timestamps: !drop_timestamps,
                cache_dir: None,
            });
            let parsed = chat::parse_file(&path)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if pretty {
                for message in &parsed.messages {
                    let line = canonical::encode(message, !drop_timestamps);
                    writeln!(out, "{}", render_message(&line, &[], HighlightStyle::None))?;
                }
            } else {
                out.write_all(normalizer.render(&parsed.messages).as_bytes())?;
            }
            out.flush()?;
            eprintln!(
                "{} {} messages as {}",
                path.display().to_string().blue(),
                parsed.messages.len(),
                parsed.format.to_string().green()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Classify {
            roots,
            chat,
            hidden,
            no_ignore,
        } => {
            init_tracing("warn");
            let config = SearchConfig {
                roots,
                chat,
                include_hidden: hidden,
                no_ignore,
                ..SearchConfig::default()
            };
            let records = walker::enumerate(&config.roots, config.no_ignore)?;
            let plan = router::route(records, &config);

            let stdout = io::stdout();
            let mut out = stdout.lock();
            for (lane, files) in &plan.lanes {
                for file in files {
                    match file.flavor {
                        Some(flavor) => writeln!(out, "{} ({:?})\t{}", lane, flavor, file.path.display())?,
                        None => writeln!(out, "{}\t{}", lane, file.path.display())?,
                    }
                }
            }
            for (reason, path) in &plan.skipped {
                writeln!(out, "skip:{}\t{}", reason, path.display())?;
            }
            out.flush()?;

            let counters = plan.counters;
            eprintln!(
                "{} files: {} attempted, {} skipped",
                counters.seen,
                counters.attempted,
                counters.skipped()
            );
            for (lane, size) in plan.lane_sizes() {
                eprintln!("  {}: {}", lane.to_string().blue(), size);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_counts(summary: &RunSummary) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (count, path) in &summary.file_counts {
        writeln!(out, "{}\t{}", count, path.display())?;
    }
    out.flush()
}

fn print_summary(summary: &RunSummary) {
    eprintln!(
        "\n{} {}",
        "Done:".green().bold(),
        summary.describe()
    );
    if summary.engine_failures > 0 || summary.extraction_warnings > 0 {
        eprintln!(
            "{} see {}",
            "warnings:".yellow(),
            summary.log_dir.join(fedscout::logs::FAILURES_LOG).display()
        );
    }
}
