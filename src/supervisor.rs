//! Process lifecycle for the background deployment.
//!
//! `start` detaches a `run` daemon and records its PID; `run` is the daemon
//! foreground: rolling-file logging, full service wiring, and a supervised
//! scheduler loop that restarts with exponential backoff and gives up after
//! a bounded number of attempts. `stop` escalates SIGTERM → SIGKILL,
//! `status` reports liveness plus best-effort process facts, and `logs`
//! tails the newest rotated log file.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::sync::watch;

use crate::broker::{Broker, BrokerClient, Tickler};
use crate::config::Config;
use crate::constants::supervisor::{
    LOG_FILES_KEPT, MAX_RESTARTS, RESTART_BASE_SECS, RESTART_CAP_SECS, STOP_GRACE_SECS,
};
use crate::engine::OrderEngine;
use crate::error::{Error, Result};
use crate::model::AggregateResult;
use crate::notify::WebhookNotifier;
use crate::scheduler::{Scheduler, next_fire_after};
use crate::server::{self, AppState};
use crate::sheet::GoogleSheet;

/// File name prefix for rotated log files.
const LOG_PREFIX: &str = "autoinvest";

// ---------------------------------------------------------------------------
// PID file
// ---------------------------------------------------------------------------

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn write_pid(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{pid}\n"))?;
    Ok(())
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// The live daemon PID behind the PID file, when there is one.
fn running_pid(path: &Path) -> Option<u32> {
    read_pid(path).filter(|pid| is_alive(*pid))
}

// ---------------------------------------------------------------------------
// Lifecycle commands
// ---------------------------------------------------------------------------

/// Detach a `run` daemon and record its PID. Fails when one is already
/// running.
pub fn start(config: &Config, config_path: &Path) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let pid_file = &config.supervisor.pid_file;
    if let Some(pid) = running_pid(pid_file) {
        return Err(Error::AlreadyRunning(pid));
    }

    let exe = std::env::current_exe()?;
    let child = Command::new(exe)
        .arg("--config")
        .arg(config_path)
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;

    write_pid(pid_file, child.id())?;
    println!("started (pid {})", child.id());
    Ok(())
}

/// SIGTERM the daemon, wait out the grace period, escalate to SIGKILL, and
/// remove the PID file.
pub async fn stop(config: &Config) -> Result<()> {
    let pid_file = &config.supervisor.pid_file;
    let Some(pid) = running_pid(pid_file) else {
        let _ = std::fs::remove_file(pid_file);
        return Err(Error::NotRunning);
    };

    let target = Pid::from_raw(pid as i32);
    kill(target, Signal::SIGTERM)
        .map_err(|e| Error::Io(std::io::Error::other(format!("SIGTERM failed: {e}"))))?;

    let deadline = std::time::Instant::now() + Duration::from_secs(STOP_GRACE_SECS);
    while std::time::Instant::now() < deadline {
        if !is_alive(pid) {
            let _ = std::fs::remove_file(pid_file);
            println!("stopped (pid {pid})");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    tracing::warn!(pid, "daemon ignored SIGTERM, escalating to SIGKILL");
    let _ = kill(target, Signal::SIGKILL);
    let _ = std::fs::remove_file(pid_file);
    println!("killed (pid {pid})");
    Ok(())
}

/// `stop` then `start`, tolerating a daemon that was not running.
pub async fn restart(config: &Config, config_path: &Path) -> Result<()> {
    match stop(config).await {
        Ok(()) | Err(Error::NotRunning) => {}
        Err(e) => return Err(e),
    }
    start(config, config_path)
}

/// Report liveness, PID, uptime, memory, next fire, and last run outcome.
pub async fn status(config: &Config) -> Result<()> {
    let pid_file = &config.supervisor.pid_file;
    let Some(pid) = running_pid(pid_file) else {
        println!("not running");
        return Ok(());
    };

    println!("running (pid {pid})");
    if let Ok(modified) = std::fs::metadata(pid_file).and_then(|m| m.modified()) {
        if let Ok(uptime) = modified.elapsed() {
            println!("uptime: {}", format_duration(uptime));
        }
    }
    if let Some(rss) = process_rss(pid) {
        println!("memory: {rss}");
    }

    let next = next_fire_after(Utc::now(), config.fire_time()?, config.timezone()?);
    println!("next fire: {next}");

    match fetch_status(config.server.port).await {
        Some(status) => {
            let last_run = status["last_run_at"].as_str().unwrap_or("never");
            println!("last run: {last_run}");
            if let Some(results) = status["last_run"]["results"].as_array() {
                println!("last run orders: {}", results.len());
            }
        }
        None => println!("last run: unavailable (local API not reachable)"),
    }
    Ok(())
}

async fn fetch_status(port: u16) -> Option<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    client
        .get(format!("http://127.0.0.1:{port}/recurring/status"))
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()
}

/// Best-effort resident set size from `/proc`.
fn process_rss(pid: u32) -> Option<String> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .map(|line| line.trim_start_matches("VmRSS:").trim().to_owned())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

// ---------------------------------------------------------------------------
// The daemon foreground
// ---------------------------------------------------------------------------

/// Exponential restart delay for the given 0-based attempt.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = RESTART_BASE_SECS
        .saturating_mul(1u64 << attempt.min(16))
        .min(RESTART_CAP_SECS);
    Duration::from_secs(secs)
}

/// Wire the full service stack.
fn build_stack(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<BrokerClient>, Arc<OrderEngine>)> {
    let broker = Arc::new(BrokerClient::new(config)?);
    let sheet = Arc::new(GoogleSheet::new(&config.sheet)?);
    let notifier = Arc::new(WebhookNotifier::new(config.notifier.webhook_url.clone()));
    let engine = Arc::new(OrderEngine::new(
        broker.clone() as Arc<dyn Broker>,
        sheet,
        notifier,
        config.timezone()?,
        config.broker.account_id.clone(),
        shutdown,
    ));
    Ok((broker, engine))
}

/// Run the service in the foreground: scheduler under supervision, tickler,
/// and the local API, until SIGTERM/Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let _log_guard = init_file_logging(&config.supervisor.log_dir)?;
    tracing::info!(environment = %config.environment, "daemon starting");

    let pid_file = config.supervisor.pid_file.clone();
    write_pid(&pid_file, std::process::id())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    spawn_signal_listener(shutdown_tx.clone());

    let (broker, engine) = build_stack(&config, shutdown_rx.clone())?;
    let mut tickler = Tickler::spawn(broker);

    let scheduler = Scheduler::new(
        engine.clone(),
        config.fire_time()?,
        config.timezone()?,
        shutdown_rx.clone(),
    );
    let state = Arc::new(AppState {
        engine,
        scheduler_status: scheduler.status_handle(),
    });
    let server_task = tokio::spawn(server::serve(
        state,
        config.server.port,
        shutdown_rx.clone(),
    ));

    // Supervised scheduler loop: restart on failure with capped backoff,
    // give up after the attempt budget.
    let mut attempts = 0u32;
    let outcome = loop {
        match scheduler.run().await {
            Ok(()) => break Ok(()),
            Err(e) => {
                attempts += 1;
                if attempts > MAX_RESTARTS {
                    tracing::error!(error = %e, attempts, "scheduler failed terminally");
                    break Err(e);
                }
                let delay = backoff_delay(attempts - 1);
                tracing::warn!(error = %e, attempts, ?delay, "scheduler crashed, restarting");
                tokio::time::sleep(delay).await;
            }
        }
    };

    // Reached on shutdown or terminal failure either way; make sure the
    // server and tickler wind down before the process exits.
    let _ = shutdown_tx.send(true);
    tickler.stop();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "local API ended abnormally"),
        Err(e) => tracing::warn!(error = %e, "local API task panicked"),
    }
    let _ = std::fs::remove_file(&pid_file);
    tracing::info!("daemon stopped");
    outcome
}

/// One foreground engine run for the `execute` subcommand.
pub async fn execute_once(config: &Config) -> Result<AggregateResult> {
    let (_broker, engine) = build_stack(config, watch::channel(false).1)?;
    engine.execute_due(Utc::now()).await
}

fn spawn_signal_listener(shutdown: Arc<watch::Sender<bool>>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => tracing::info!("interrupt received"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        }
        let _ = shutdown.send(true);
    });
}

fn init_file_logging(log_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(log_dir)
        .map_err(|e| Error::Config(format!("cannot open log directory: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Print the tail of the newest log file; optionally keep following it.
pub async fn logs(config: &Config, follow: bool, lines: usize) -> Result<()> {
    let Some(path) = newest_log_file(&config.supervisor.log_dir)? else {
        println!("no log files in {}", config.supervisor.log_dir.display());
        return Ok(());
    };

    let content = std::fs::read_to_string(&path)?;
    for line in tail_lines(&content, lines) {
        println!("{line}");
    }

    if !follow {
        return Ok(());
    }
    let mut offset = content.len() as u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
        let len = std::fs::metadata(&path)?.len();
        if len > offset {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut fresh = String::new();
            file.read_to_string(&mut fresh)?;
            print!("{fresh}");
            offset = len;
        }
    }
}

fn newest_log_file(log_dir: &Path) -> Result<Option<PathBuf>> {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return Ok(None);
    };
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_PREFIX) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(at, _)| modified > *at) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn tail_lines(content: &str, n: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(n);
    all[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_the_cap() {
        let delays: Vec<u64> = (0..8).map(|i| backoff_delay(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoinvest.pid");
        assert_eq!(read_pid(&path), None);

        write_pid(&path, 4242).unwrap();
        assert_eq!(read_pid(&path), Some(4242));

        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn running_pid_requires_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoinvest.pid");
        // A PID far beyond pid_max on any reasonable box.
        write_pid(&path, 3_999_999).unwrap();
        assert_eq!(running_pid(&path), None);
    }

    #[test]
    fn tail_keeps_the_last_n_lines() {
        let content = "a\nb\nc\nd\n";
        assert_eq!(tail_lines(content, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(content, 10), vec!["a", "b", "c", "d"]);
        assert!(tail_lines("", 3).is_empty());
    }

    #[test]
    fn newest_log_file_wins_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("autoinvest.2024-01-01.log");
        let new = dir.path().join("autoinvest.2024-01-02.log");
        std::fs::write(&old, "old").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&new, "new").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        let found = newest_log_file(dir.path()).unwrap().unwrap();
        assert_eq!(found, new);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h02m05s");
    }
}
