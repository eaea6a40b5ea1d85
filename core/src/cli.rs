use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::coordinator::{self, Coordinator};
use crate::types::{ExecuteOptions, ExecutionResult, LogKind};

#[derive(Parser)]
#[command(name = "scratchpad")]
#[command(about = "Scratchpad - run JavaScript snippets with per-line results", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script and print its logs and result
    Run {
        /// Script file, or `-` for stdin
        file: PathBuf,

        /// Timeout in milliseconds (default: from config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Always run in the subprocess backend
        #[arg(long)]
        force_subprocess: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the instrumented script for an external host, as JSON
    Prepare {
        /// Script file, or `-` for stdin
        file: PathBuf,
    },

    /// Show which backends can run scripts
    Backends,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Logs go to stderr so stdout stays parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Commands::Run {
            file,
            timeout_ms,
            force_subprocess,
            json,
        } => {
            let mut builder = Config::builder();
            if let Some(path) = &cli.config {
                builder = builder.config_path(path);
            }
            if force_subprocess {
                builder = builder.force_subprocess(true);
            }
            let config = builder.build()?;
            let script = read_script(&file)?;

            let coordinator = Coordinator::new(config);
            let token = CancellationToken::new();
            let on_interrupt = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let mut options = ExecuteOptions::new().cancellation(token);
            if let Some(ms) = timeout_ms {
                options = options.timeout(Duration::from_millis(ms));
            }
            let result = coordinator.execute(&script, options).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Prepare { file } => {
            let script = read_script(&file)?;
            let prepared = coordinator::prepare_for_external_host(&script);
            println!("{}", serde_json::to_string_pretty(&prepared)?);
        }

        Commands::Backends => {
            let mut builder = Config::builder();
            if let Some(path) = &cli.config {
                builder = builder.config_path(path);
            }
            let coordinator = Coordinator::new(builder.build()?);

            for report in coordinator.backends() {
                let status = if report.available { "available" } else { "unavailable" };
                println!("{:<10} | {:<11} | {}", report.kind, status, report.detail);
            }
        }
    }

    Ok(())
}

fn read_script(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut script = String::new();
        std::io::stdin()
            .read_to_string(&mut script)
            .context("Failed to read script from stdin")?;
        return Ok(script);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn print_result(result: &ExecutionResult) {
    for entry in &result.logs {
        let line = entry
            .line
            .map(|line| format!("[line {line}]"))
            .unwrap_or_else(|| "[line ?]".to_string());
        match entry.kind {
            LogKind::Result => println!("{line} => {}", entry.message),
            LogKind::Warn | LogKind::Error => eprintln!("{line} {}", entry.message),
            LogKind::Log | LogKind::Info => println!("{line} {}", entry.message),
        }
    }

    match (&result.value, &result.error) {
        (Some(value), _) if !value.is_undefined() => println!("{value}"),
        (_, Some(error)) => {
            eprintln!("Error:");
            eprintln!("  {}", error.replace('\n', "\n  "));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from([
            "scratchpad",
            "--config",
            "pad.toml",
            "run",
            "-",
            "--timeout-ms",
            "250",
            "--json",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("pad.toml")));
        let Commands::Run {
            file,
            timeout_ms,
            force_subprocess,
            json,
        } = cli.command
        else {
            unreachable!()
        };
        assert_eq!(file, PathBuf::from("-"));
        assert_eq!(timeout_ms, Some(250));
        assert!(!force_subprocess);
        assert!(json);
    }

    #[test]
    fn test_read_script_missing_file() {
        let error = read_script(Path::new("/definitely/not/here.js")).unwrap_err();
        assert!(error.to_string().contains("Failed to read"));
    }
}
