use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::chat::NormalizeOptions;
use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::lanes::Lane;

/// Radius, in lines, the engine is asked to report around text matches
pub const TEXT_CONTEXT_LINES: usize = 2;

/// Everything needed to start one worker for a lane, minus the paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTemplate {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerTemplate {
    /// Builds the worker invocation for `lane` from the run configuration
    pub fn for_lane(lane: Lane, config: &SearchConfig) -> SearchResult<Self> {
        let engine = &config.engine;
        let mut env = Vec::new();
        let (program, mut args) = match lane {
            Lane::PlainText => (engine.program.clone(), Vec::new()),
            Lane::RichDocument => (engine.rich_program.clone(), Vec::new()),
            Lane::Spreadsheet => (engine.program.clone(), pre_hook(&engine.spreadsheet_hook)),
            Lane::SlideDeck => (engine.program.clone(), pre_hook(&engine.slide_deck_hook)),
            Lane::LegacyDoc => (engine.program.clone(), pre_hook(&engine.legacy_doc_hook)),
            Lane::Chat => {
                let hook = engine.chat_hook.as_ref().ok_or_else(|| {
                    SearchError::config_error("chat search needs a chat normalizer executable")
                })?;
                env = NormalizeOptions {
                    keep_timestamps: config.keep_timestamps,
                    cache_dir: config.resolved_cache_dir(),
                }
                .to_env();
                (engine.program.clone(), pre_hook(&hook.display().to_string()))
            }
        };

        args.push("--json".to_string());
        args.push("--no-config".to_string());
        args.push(if config.case_insensitive { "-i" } else { "-s" }.to_string());
        if config.literal {
            args.push("-F".to_string());
        }
        if config.include_hidden {
            args.push("--hidden".to_string());
        }
        if config.no_ignore {
            args.push("--no-ignore".to_string());
        }
        if config.binary_as_text {
            args.push("-a".to_string());
        }

        if lane == Lane::Chat {
            let (before, after) = config.resolved_context();
            args.extend(["-B".to_string(), before.to_string()]);
            args.extend(["-A".to_string(), after.to_string()]);
        } else {
            args.extend(["-C".to_string(), TEXT_CONTEXT_LINES.to_string()]);
        }

        args.extend(["-e".to_string(), config.pattern.clone()]);

        Ok(Self { program, args, env })
    }

    /// Command for one batch: template arguments, `--`, then the paths
    pub fn command(&self, paths: &[PathBuf]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--")
            .args(paths)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

fn pre_hook(hook: &str) -> Vec<String> {
    vec!["--pre".to_string(), hook.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{PREPROCESS_CHAT, PREPROCESS_ENV, TIMESTAMPS_ENV};

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_plain_template() {
        let config = SearchConfig {
            case_insensitive: true,
            literal: true,
            ..SearchConfig::new("-dash")
        };
        let template = WorkerTemplate::for_lane(Lane::PlainText, &config).unwrap();
        assert_eq!(template.program, "rg");
        assert!(template.args.contains(&"--json".to_string()));
        assert!(template.args.contains(&"-i".to_string()));
        assert!(template.args.contains(&"-F".to_string()));
        assert!(!template.args.contains(&"--pre".to_string()));
        let c = position(&template.args, "-C");
        assert_eq!(template.args[c + 1], "2");
        // Patterns starting with a dash stay a pattern
        let e = position(&template.args, "-e");
        assert_eq!(template.args[e + 1], "-dash");
        assert!(template.env.is_empty());
    }

    #[test]
    fn test_converter_lanes_use_pre_hooks() {
        let config = SearchConfig::new("total");
        let sheet = WorkerTemplate::for_lane(Lane::Spreadsheet, &config).unwrap();
        let pre = position(&sheet.args, "--pre");
        assert_eq!(sheet.args[pre + 1], "xlsx2csv");

        let rich = WorkerTemplate::for_lane(Lane::RichDocument, &config).unwrap();
        assert_eq!(rich.program, "rga");
    }

    #[test]
    fn test_chat_template() {
        let mut config = SearchConfig {
            chat: true,
            keep_timestamps: false,
            context_after: Some(3),
            ..SearchConfig::new("hello")
        };
        assert!(WorkerTemplate::for_lane(Lane::Chat, &config).is_err());

        config.engine.chat_hook = Some(PathBuf::from("/usr/local/bin/fedscout"));
        let template = WorkerTemplate::for_lane(Lane::Chat, &config).unwrap();
        let pre = position(&template.args, "--pre");
        assert_eq!(template.args[pre + 1], "/usr/local/bin/fedscout");
        let b = position(&template.args, "-B");
        assert_eq!(template.args[b + 1], "1");
        let a = position(&template.args, "-A");
        assert_eq!(template.args[a + 1], "3");
        assert!(template
            .env
            .contains(&(PREPROCESS_ENV.to_string(), PREPROCESS_CHAT.to_string())));
        assert!(template
            .env
            .contains(&(TIMESTAMPS_ENV.to_string(), "drop".to_string())));
    }

    #[test]
    fn test_command_places_paths_after_separator() {
        let template = WorkerTemplate {
            program: "rg".to_string(),
            args: vec!["--json".to_string()],
            env: Vec::new(),
        };
        let cmd = template.command(&[PathBuf::from("-weird.txt")]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["--json", "--", "-weird.txt"]);
    }
}
