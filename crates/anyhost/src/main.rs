//! anyhost CLI
//!
//! Runs shell commands on this host, or on the remote host from the config file

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhost_exec::{CommandRunner, ConnectionConfig, ExecError, InterruptHandler, Runner};
use clap::Parser;
use color_eyre::Result;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, LogFormat};

/// A command failed
const FAILED: i32 = 1;
/// The remote host could not be reached or logged into
const UNREACHABLE: i32 = 2;
/// A termination signal arrived
const INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "anyhost")]
#[command(about = "Run shell commands locally or over SSH", long_about = None)]
struct Cli {
    /// Commands to run, in order
    #[arg(required = true)]
    commands: Vec<String>,

    /// Config file (default: $ANYHOST_CONFIG, ./anyhost.toml, /etc/anyhost/anyhost.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore the configured remote host
    #[arg(long)]
    local: bool,

    /// Give up on each command, cleanup included, after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Print one JSON record per command
    #[arg(long)]
    json: bool,

    /// Keep going after a failed command
    #[arg(short, long)]
    keep_going: bool,

    /// Command to run when SIGHUP, SIGINT or SIGTERM arrives
    #[arg(long, value_name = "COMMAND")]
    on_interrupt: Option<String>,
}

/// How `run_all` reports and when it stops
#[derive(Debug, Clone, Default)]
struct RunOptions {
    timeout: Option<Duration>,
    json: bool,
    keep_going: bool,
}

impl From<&Cli> for RunOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            timeout: cli.timeout.map(Duration::from_secs),
            json: cli.json,
            keep_going: cli.keep_going,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    command: &'a str,
    mode: String,
    ok: bool,
    output: Option<String>,
    error: Option<String>,
    stderr: Option<String>,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.log.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Remote target unless `--local` was given
fn select_remote(config: &Config, local: bool) -> Option<Arc<ConnectionConfig>> {
    if local {
        None
    } else {
        config.remote.clone().map(Arc::new)
    }
}

fn exit_code(err: &ExecError) -> i32 {
    if err.is_connection_error() {
        UNREACHABLE
    } else {
        FAILED
    }
}

async fn run_one(
    runner: &Runner,
    command: &str,
    timeout: Option<Duration>,
) -> Result<String, ExecError> {
    match timeout {
        Some(limit) => runner.run_with_timeout(command, limit).await,
        None => runner.run(command).await,
    }
}

/// Run `commands` in order, writing outputs to `out` and errors to `err`
///
/// Returns the exit code of the last failure, or 0.
async fn run_all<W: Write, E: Write>(
    runner: &Runner,
    commands: &[String],
    opts: &RunOptions,
    out: &mut W,
    err: &mut E,
) -> Result<i32> {
    let mut code = 0;

    for command in commands {
        let result = run_one(runner, command, opts.timeout).await;

        if opts.json {
            let report = Report {
                command,
                mode: runner.mode().to_string(),
                ok: result.is_ok(),
                output: result.as_ref().ok().cloned(),
                error: result.as_ref().err().map(ToString::to_string),
                stderr: result
                    .as_ref()
                    .err()
                    .and_then(ExecError::stderr)
                    .map(str::to_string),
            };
            writeln!(out, "{}", serde_json::to_string(&report)?)?;
        }

        match result {
            Ok(output) => {
                if !opts.json && !output.is_empty() {
                    writeln!(out, "{output}")?;
                }
            }
            Err(e) => {
                if !opts.json {
                    writeln!(err, "anyhost: {e}")?;
                }
                code = exit_code(&e);
                if !opts.keep_going {
                    break;
                }
            }
        }
    }

    Ok(code)
}

/// Cleanup for the interrupt handler
///
/// Runs the cleanup command through `runner` under the same per-command
/// limit, then wakes whoever waits on `interrupted`.
fn cleanup_action(
    rt: Handle,
    runner: Arc<Runner>,
    cleanup: Option<String>,
    timeout: Option<Duration>,
    interrupted: Arc<Notify>,
) -> impl Fn() -> Result<(), ExecError> + Send + Sync + 'static {
    move || {
        let outcome = match &cleanup {
            Some(command) => rt
                .block_on(run_one(&runner, command, timeout))
                .map(|output| {
                    info!(command = %command, output = %output, "cleanup command finished");
                }),
            None => Ok(()),
        };
        interrupted.notify_one();
        outcome
    }
}

/// Drive `work` until it finishes or `interrupted` fires
async fn run_until_interrupted<F>(work: F, interrupted: &Notify) -> Result<i32>
where
    F: Future<Output = Result<i32>>,
{
    tokio::select! {
        code = work => code,
        () = interrupted.notified() => {
            warn!("interrupted");
            Ok(INTERRUPTED)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    init_tracing(&config);

    let runner = Arc::new(Runner::new(select_remote(&config, cli.local)));
    info!(mode = %runner.mode(), "runner ready");

    let opts = RunOptions::from(&cli);
    let interrupted = Arc::new(Notify::new());
    let handler = InterruptHandler::install(cleanup_action(
        Handle::current(),
        Arc::clone(&runner),
        cli.on_interrupt.clone(),
        opts.timeout,
        Arc::clone(&interrupted),
    ))?;

    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    let code = run_until_interrupted(
        run_all(&runner, &cli.commands, &opts, &mut out, &mut err),
        &interrupted,
    )
    .await?;

    handler.stop().await;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| (*c).to_string()).collect()
    }

    async fn run(list: &[&str], opts: &RunOptions) -> (i32, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run_all(&Runner::local(), &commands(list), opts, &mut out, &mut err)
            .await
            .unwrap();
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_json_records_success_and_failure() {
        let opts = RunOptions {
            json: true,
            keep_going: true,
            ..RunOptions::default()
        };
        let (code, out, err) = run(&["echo hi", "echo bad >&2; exit 3"], &opts).await;

        assert_eq!(code, FAILED);
        assert!(err.is_empty());

        let records: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0]["command"], "echo hi");
        assert_eq!(records[0]["mode"], "local");
        assert_eq!(records[0]["ok"], true);
        assert_eq!(records[0]["output"], "hi");
        assert!(records[0]["error"].is_null());
        assert!(records[0]["stderr"].is_null());

        assert_eq!(records[1]["ok"], false);
        assert!(records[1]["output"].is_null());
        assert_eq!(records[1]["stderr"], "bad");
        assert_eq!(
            records[1]["error"],
            "executing echo bad >&2; exit 3 : bad [exit status: 3]"
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let (code, out, err) = run(&["false", "echo after"], &RunOptions::default()).await;

        assert_eq!(code, FAILED);
        assert!(out.is_empty());
        assert!(err.starts_with("anyhost: executing false : "));
    }

    #[tokio::test]
    async fn test_keep_going_runs_remaining_commands() {
        let opts = RunOptions {
            keep_going: true,
            ..RunOptions::default()
        };
        let (code, out, _) = run(&["false", "echo after"], &opts).await;

        assert_eq!(code, FAILED);
        assert_eq!(out, "after\n");
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let (code, out, err) = run(&["echo one", "true", "echo two"], &RunOptions::default()).await;

        assert_eq!(code, 0);
        assert_eq!(out, "one\ntwo\n");
        assert!(err.is_empty());
    }

    #[test]
    fn test_connection_errors_exit_unreachable() {
        assert_eq!(
            exit_code(&ExecError::ConnectionFailed("refused".into())),
            UNREACHABLE
        );
        assert_eq!(exit_code(&ExecError::NotConnected), FAILED);
    }

    #[test]
    fn test_local_flag_ignores_remote() {
        let config = Config::parse(
            r#"
            [remote]
            host = "nas.lan"
            password = "pw"
            "#,
        )
        .unwrap();

        assert!(select_remote(&config, true).is_none());
        assert_eq!(
            Runner::new(select_remote(&config, true)).mode().to_string(),
            "local"
        );
        assert_eq!(
            Runner::new(select_remote(&config, false)).mode().to_string(),
            "remote"
        );
    }

    #[tokio::test]
    async fn test_interrupt_returns_interrupted() {
        let interrupted = Notify::new();
        interrupted.notify_one();

        let mut out = Vec::new();
        let mut err = Vec::new();
        let cmds = commands(&["sleep 5"]);
        let opts = RunOptions::default();
        let runner = Runner::local();
        let work = run_all(&runner, &cmds, &opts, &mut out, &mut err);

        let code = tokio::time::timeout(
            Duration::from_secs(2),
            run_until_interrupted(work, &interrupted),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(code, INTERRUPTED);
        assert!(out.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cleanup_runs_command_and_notifies() {
        let marker = std::env::temp_dir().join(format!("anyhost_cleanup_{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);

        let interrupted = Arc::new(Notify::new());
        let action = cleanup_action(
            Handle::current(),
            Arc::new(Runner::local()),
            Some(format!("touch {}", marker.display())),
            None,
            Arc::clone(&interrupted),
        );

        let outcome = tokio::task::spawn_blocking(action).await.unwrap();

        assert!(outcome.is_ok());
        assert!(marker.exists());
        tokio::time::timeout(Duration::from_secs(1), interrupted.notified())
            .await
            .unwrap();

        std::fs::remove_file(&marker).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cleanup_honours_timeout() {
        let interrupted = Arc::new(Notify::new());
        let action = cleanup_action(
            Handle::current(),
            Arc::new(Runner::local()),
            Some("sleep 5".to_string()),
            Some(Duration::from_millis(100)),
            Arc::clone(&interrupted),
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::task::spawn_blocking(action),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(outcome, Err(ExecError::Timeout { .. })));
        tokio::time::timeout(Duration::from_secs(1), interrupted.notified())
            .await
            .unwrap();
    }
}
