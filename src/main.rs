/*!
 * reclone CLI - Command Line Interface
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use anyhow::Context;
use clap::{Parser, ValueEnum};
use reclone::{
    backend::{MySqlConnector, SshConnector},
    cli_progress::CliProgressRenderer,
    cli_style::{
        self, info_box, print_banner, print_error, print_info, print_success, print_warning,
        section_header, sessions_table, summary_table, Icons, Theme,
    },
    clone::{CloneReport, CloneState, Orchestrator, PreflightIssue},
    config::{CloneConfig, LogLevel},
    error::{CloneError, EXIT_FATAL},
    events::EventPublisher,
    logging,
};
use reclone_core_interface::{DbConnector, RemoteConnector};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "reclone")]
#[command(
    version,
    about = "Rebuild a MySQL instance from a healthy donor with the clone plugin",
    long_about = None
)]
struct Cli {
    /// Donor host
    #[arg(long, value_name = "HOST", required_unless_present = "config")]
    source_host: Option<String>,

    /// Donor port [default: 33306]
    #[arg(long, value_name = "PORT")]
    source_port: Option<u16>,

    #[arg(long, value_name = "USER")]
    source_user: Option<String>,

    #[arg(long, value_name = "PASSWORD")]
    source_password: Option<String>,

    /// Host whose data will be replaced
    #[arg(long, value_name = "HOST", required_unless_present = "config")]
    target_host: Option<String>,

    /// Target port [default: 33306]
    #[arg(long, value_name = "PORT")]
    target_port: Option<u16>,

    #[arg(long, value_name = "USER")]
    target_user: Option<String>,

    #[arg(long, value_name = "PASSWORD")]
    target_password: Option<String>,

    /// Proceed even if the target has active sessions
    #[arg(long)]
    force: bool,

    /// TOML configuration file; command-line values take precedence
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SSH login for the progress watcher [default: local user]
    #[arg(long, value_name = "USER")]
    ssh_user: Option<String>,

    /// SSH port [default: 22]
    #[arg(long, value_name = "PORT")]
    ssh_port: Option<u16>,

    /// SSH private key [default: SSH agent]
    #[arg(long, value_name = "FILE")]
    ssh_key: Option<PathBuf>,

    /// Do not start the progress watcher on the target host
    #[arg(long)]
    no_watcher: bool,

    /// Run the pre-flight checks only
    #[arg(long)]
    preflight_only: bool,

    /// Reconnect attempts after the target restarts [default: 30]
    #[arg(long, value_name = "N")]
    reconnect_attempts: Option<u32>,

    /// Seconds between reconnect attempts [default: 2]
    #[arg(long, value_name = "SECS")]
    reconnect_interval: Option<u64>,

    /// Seconds between progress polls [default: 2]
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Give up monitoring after this many seconds [default: never]
    #[arg(long, value_name = "SECS")]
    monitor_timeout: Option<u64>,

    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Debug logging and per-attempt output
    #[arg(short, long)]
    verbose: bool,

    /// Print the final report as JSON instead of the interactive display
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e), None);
            e.downcast_ref::<CloneError>()
                .map(CloneError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CloneConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CloneConfig::default(),
    };
    apply_overrides(&cli, &mut config);

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    config.validate()?;

    let connector: Arc<dyn DbConnector> =
        Arc::new(MySqlConnector::new(config.reconnect.connect_timeout()));
    let remote: Option<Arc<dyn RemoteConnector>> = if config.watcher.enabled {
        Some(Arc::new(SshConnector::from_settings(&config.ssh)))
    } else {
        None
    };

    let (events, renderer) = if cli.json {
        (EventPublisher::noop(), None)
    } else {
        print_banner();
        print_plan(&config);
        let (publisher, subscriber) = EventPublisher::unbounded();
        let renderer = CliProgressRenderer::new(subscriber, config.verbose).spawn();
        (publisher, Some(renderer))
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let orchestrator = Orchestrator::new(
        config,
        connector,
        remote,
        events,
        CancellationToken::new(),
    );

    let report = runtime.block_on(async {
        let cancel = orchestrator.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        orchestrator.run().await
    });

    // Dropping the orchestrator closes the event channel and stops the renderer
    drop(orchestrator);
    if let Some(handle) = renderer {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => print_warning(&format!("Progress display failed: {}", e)),
            Err(_) => print_warning("Progress display thread panicked"),
        }
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_report(&report);
    }

    Ok(report.exit_code)
}

/// Command-line values win over the configuration file
fn apply_overrides(cli: &Cli, config: &mut CloneConfig) {
    if let Some(host) = &cli.source_host {
        config.source.host = host.clone();
    }
    if let Some(port) = cli.source_port {
        config.source.port = port;
    }
    if let Some(user) = &cli.source_user {
        config.source.user = user.clone();
    }
    if let Some(password) = &cli.source_password {
        config.source.password = SecretString::from(password.clone());
    }

    if let Some(host) = &cli.target_host {
        config.target.host = host.clone();
    }
    if let Some(port) = cli.target_port {
        config.target.port = port;
    }
    if let Some(user) = &cli.target_user {
        config.target.user = user.clone();
    }
    if let Some(password) = &cli.target_password {
        config.target.password = SecretString::from(password.clone());
    }

    if cli.ssh_user.is_some() {
        config.ssh.user = cli.ssh_user.clone();
    }
    if let Some(port) = cli.ssh_port {
        config.ssh.port = port;
    }
    if cli.ssh_key.is_some() {
        config.ssh.key_path = cli.ssh_key.clone();
    }

    if cli.force {
        config.preflight.force = true;
    }
    if cli.no_watcher {
        config.watcher.enabled = false;
    }
    if cli.preflight_only {
        config.preflight_only = true;
    }

    if let Some(attempts) = cli.reconnect_attempts {
        config.reconnect.attempts = attempts;
    }
    if let Some(interval) = cli.reconnect_interval {
        config.reconnect.interval_secs = interval;
    }
    if let Some(interval) = cli.poll_interval {
        config.monitor.poll_interval_secs = interval;
    }
    if cli.monitor_timeout.is_some() {
        config.monitor.timeout_secs = cli.monitor_timeout;
    }

    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
}

fn print_plan(config: &CloneConfig) {
    let source = format!("Source:  {}", config.source);
    let target = format!("Target:  {}  (data will be replaced)", config.target);
    let retry = format!(
        "Reconnect: {} attempts every {}s after {}s",
        config.reconnect.attempts, config.reconnect.interval_secs, config.reconnect.initial_wait_secs
    );
    let monitor = match config.monitor.timeout_secs {
        Some(secs) => format!(
            "Monitor: every {}s, give up after {}",
            config.monitor.poll_interval_secs,
            cli_style::format_duration(secs as f64)
        ),
        None => format!("Monitor: every {}s, no deadline", config.monitor.poll_interval_secs),
    };
    info_box("Clone Plan", &[&source, &target, &retry, &monitor]);

    if config.preflight.force {
        print_warning("--force: active sessions on the target will not stop the clone");
    }
    if config.preflight_only {
        print_info("Pre-flight only; nothing will be changed");
    }
    println!();
}

fn print_report(report: &CloneReport) {
    if let Some(preflight) = &report.preflight {
        for issue in &preflight.issues {
            if let PreflightIssue::ActiveSessions { sessions } = issue {
                section_header("Active Sessions on Target");
                println!("{}", sessions_table(sessions));
            }
        }
    }

    section_header("Summary");
    println!("{}", summary_table(report));
    println!();

    match report.final_state {
        CloneState::Completed if report.succeeded() => {
            print_success("Clone completed and validated");
        }
        CloneState::PreflightPassed if report.succeeded() => {
            print_success("Pre-flight checks passed");
        }
        CloneState::Aborted => {
            print_error(
                report.error.as_deref().unwrap_or("Aborted"),
                Some("Nothing was changed on either server"),
            );
        }
        CloneState::Cancelled => {
            print_warning("Interrupted; the server may still be cloning");
            println!(
                "  {} {}",
                Theme::muted(Icons::ARROW_RIGHT),
                Theme::muted("Check performance_schema.clone_status on the target")
            );
        }
        _ => {
            print_error(
                report.error.as_deref().unwrap_or("Clone did not complete"),
                report
                    .watcher
                    .as_ref()
                    .map(|_| "The watcher log on the target host has the full progress history"),
            );
        }
    }
}
