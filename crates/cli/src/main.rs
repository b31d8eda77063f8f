//! Hacxgent CLI — the main entry point.
//!
//! Modes:
//! - interactive (default) — read prompts from the terminal, stream answers
//! - programmatic (`-p`)   — run one prompt under turn/price budgets and exit

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "hacxgent",
    about = "Hacxgent — a coding assistant agent in your terminal",
    version
)]
pub struct Cli {
    /// Initial prompt for the interactive session
    #[arg(value_name = "PROMPT")]
    initial_prompt: Option<String>,

    /// Run a single prompt non-interactively and exit (reads stdin when TEXT is omitted)
    #[arg(
        short,
        long,
        value_name = "TEXT",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    prompt: Option<String>,

    /// Maximum assistant turns in programmatic mode
    #[arg(long, value_name = "N", requires = "prompt")]
    max_turns: Option<u32>,

    /// Maximum cost in dollars in programmatic mode
    #[arg(long, value_name = "DOLLARS", requires = "prompt")]
    max_price: Option<f64>,

    /// Output format for programmatic mode
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Only expose these tools (exact names or `prefix*`); repeatable
    #[arg(long = "enabled-tools", value_name = "TOOL")]
    enabled_tools: Vec<String>,

    /// Agent profile: default, auto-approve or plan
    #[arg(long, value_name = "NAME")]
    agent: Option<String>,

    /// Continue the most recent saved session
    #[arg(short = 'c', long = "continue", conflicts_with = "resume")]
    continue_session: bool,

    /// Resume a saved session by id (or id prefix)
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// Config file to use instead of ~/.hacxgent/config.toml
    #[arg(long, value_name = "PATH", env = "HACXGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Only the final answer
    Text,
    /// Every message as one JSON array at the end
    Json,
    /// One JSON message per line as it is committed
    Streaming,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so programmatic output on stdout stays parseable
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.prompt.clone() {
        Some(prompt) => commands::run::run(&cli, prompt).await,
        None => commands::agent::run(&cli).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_is_interactive() {
        let cli = Cli::try_parse_from(["hacxgent"]).unwrap();
        assert!(cli.prompt.is_none());
        assert_eq!(cli.output, OutputFormat::Text);
        assert!(!cli.continue_session);
    }

    #[test]
    fn prompt_without_text_reads_stdin() {
        let cli = Cli::try_parse_from(["hacxgent", "-p"]).unwrap();
        assert_eq!(cli.prompt.as_deref(), Some(""));
    }

    #[test]
    fn programmatic_flags() {
        let cli = Cli::try_parse_from([
            "hacxgent",
            "-p",
            "list the files",
            "--max-turns",
            "3",
            "--max-price",
            "0.5",
            "--output",
            "streaming",
            "--enabled-tools",
            "list_directory",
            "--enabled-tools",
            "read_*",
        ])
        .unwrap();
        assert_eq!(cli.prompt.as_deref(), Some("list the files"));
        assert_eq!(cli.max_turns, Some(3));
        assert_eq!(cli.max_price, Some(0.5));
        assert_eq!(cli.output, OutputFormat::Streaming);
        assert_eq!(cli.enabled_tools, vec!["list_directory", "read_*"]);
    }

    #[test]
    fn budgets_need_programmatic_mode() {
        assert!(Cli::try_parse_from(["hacxgent", "--max-turns", "3"]).is_err());
    }

    #[test]
    fn continue_and_resume_conflict() {
        assert!(Cli::try_parse_from(["hacxgent", "-c", "--resume", "abc"]).is_err());
        let cli = Cli::try_parse_from(["hacxgent", "--resume", "abc"]).unwrap();
        assert_eq!(cli.resume.as_deref(), Some("abc"));
    }
}
