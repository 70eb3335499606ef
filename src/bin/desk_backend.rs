//! Headless shell for the backend connector
//!
//! Starts the backend the way the desktop shell does, runs one command and
//! prints the resulting events the way the UI presents them.
//!
//! Run with: cargo run --bin desk-backend -- health

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;

use desk_backend_lib::backend::config::Settings;
use desk_backend_lib::{Connector, ConnectorEvent, HealthStatus, StrategyKind, ToolStatus};

/// Desktop shell backend connector
#[derive(Parser)]
#[command(name = "desk-backend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: the shell's settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Backend strategy: process or embedded
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// Backend base URL for the process strategy
    #[arg(long)]
    url: Option<String>,

    /// Backend executable for the process strategy
    #[arg(long)]
    backend: Option<PathBuf>,

    /// Talk to an already running backend instead of starting one
    #[arg(long)]
    no_start: bool,

    /// Print events as JSON lines instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check backend health
    Health,
    /// Query tool installation and model status
    Status,
    /// Health check, then status check if healthy
    Check,
    /// Restart the backend, then check health
    Restart,
    /// Repeat the check at an interval until Ctrl-C
    Watch {
        /// Seconds between checks
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Stop after this many checks
        #[arg(long)]
        count: Option<u32>,
    },
}

fn load_settings(cli: &Cli) -> Result<Settings, String> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load_from(path)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Settings file {:?} does not exist", path))?,
        None => Settings::load(),
    };

    if let Some(strategy) = cli.strategy {
        settings.backend.strategy = strategy;
    }
    if let Some(url) = &cli.url {
        settings.backend.base_url = url.clone();
    }
    if let Some(exe) = &cli.backend {
        settings.backend.executable = Some(exe.clone());
    }
    Ok(settings)
}

fn print_event(event: &ConnectorEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("failed to encode event: {}", e),
        }
        return;
    }

    match event {
        ConnectorEvent::Health(health) => print_health(health),
        ConnectorEvent::ToolStatus(status) => print_status(status),
        ConnectorEvent::Started { ok: false, message } => {
            println!("Backend: failed to start backend executable\n{}", message);
        }
        ConnectorEvent::Restarted { ok } => {
            println!("Restart: {}", if *ok { "done" } else { "failed" });
        }
        ConnectorEvent::RequestFinished(done) => {
            log::debug!("request finished: {} ok={}", done.url, done.ok);
        }
        ConnectorEvent::Started { .. } => {}
    }
}

fn print_health(health: &HealthStatus) {
    if health.ok {
        println!("Health Check: Backend OK\n{}", health.message);
    } else {
        println!("Health Check Failed: Backend unreachable\n{}", health.message);
    }
}

fn print_status(status: &ToolStatus) {
    if !status.ok {
        println!("Status Check Failed\n{}", status.error);
        return;
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Installed: {}", yes_no(status.installed));
    println!("Running: {}", yes_no(status.running));
    println!("Models:");
    if status.models.is_empty() {
        println!("  (no models found)");
    } else {
        for model in &status.models {
            println!("  {}", model);
        }
    }
}

/// Health check, then a status check only if healthy
async fn check_once(connector: &Connector) -> Result<bool, JoinError> {
    let health = connector.check_health().await?;
    if !health.ok {
        return Ok(false);
    }
    connector.check_tool_status().await.map(|s| s.ok)
}

/// Run `check_once` every `every` until `stop` resolves or `rounds` checks
/// have run. Returns the outcome of the last check.
async fn watch(
    connector: &Connector,
    every: Duration,
    rounds: Option<u32>,
    stop: impl Future<Output = ()>,
) -> Result<bool, JoinError> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(stop);

    let mut ok = false;
    let mut done = 0;
    while rounds.map_or(true, |n| done < n) {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {
                ok = check_once(connector).await?;
                done += 1;
            }
        }
    }
    Ok(ok)
}

async fn run(cli: Cli) -> Result<bool, String> {
    let settings = load_settings(&cli)?;
    let connector = Connector::from_settings(&settings).map_err(|e| e.to_string())?;

    let mut events = connector.subscribe();
    let json = cli.json;
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event, json);
        }
    });

    let embedded = connector.kind() == StrategyKind::Embedded;
    if !cli.no_start || embedded {
        connector.start().await;
    }

    let ok = match cli.command {
        Commands::Health => connector.check_health().await.map(|h| h.ok),
        Commands::Status => connector.check_tool_status().await.map(|s| s.ok),
        Commands::Check => check_once(&connector).await,
        Commands::Restart => {
            if connector.restart().await {
                connector.check_health().await.map(|h| h.ok)
            } else {
                Ok(false)
            }
        }
        Commands::Watch { interval, count } => {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::warn!("[Connector] Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            watch(&connector, Duration::from_secs(interval.max(1)), count, ctrl_c).await
        }
    }
    .map_err(|e| format!("Task failed: {}", e))?;

    if !cli.no_start {
        connector.shutdown().await;
    }

    // Closing the bus ends the printer once it has drained
    drop(connector);
    let _ = printer.await;
    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use desk_backend_lib::backend::config::BackendSettings;
    use tokio::sync::broadcast::Receiver;

    fn connector_for(base_url: String) -> Connector {
        let settings = BackendSettings {
            base_url,
            request_timeout_ms: 500,
            ..BackendSettings::default()
        };
        Connector::process(&settings).unwrap()
    }

    async fn unreachable_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    }

    /// (health, status) events published so far
    fn tally(rx: &mut Receiver<ConnectorEvent>) -> (usize, usize) {
        let (mut health, mut status) = (0, 0);
        while let Ok(event) = rx.try_recv() {
            match event {
                ConnectorEvent::Health(_) => health += 1,
                ConnectorEvent::ToolStatus(_) => status += 1,
                _ => {}
            }
        }
        (health, status)
    }

    #[tokio::test]
    async fn watch_repeats_checks_against_healthy_backend() {
        let app = Router::new()
            .route("/health", get(|| async { "Backend OK" }))
            .route(
                "/status",
                get(|| async {
                    Json(serde_json::json!({"installed": true, "running": true, "models": []}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let connector = connector_for(url);
        let mut rx = connector.subscribe();

        let ok = watch(&connector, Duration::from_millis(10), Some(3), std::future::pending())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(tally(&mut rx), (3, 3));
    }

    #[tokio::test]
    async fn watch_skips_status_while_unhealthy() {
        let connector = connector_for(unreachable_url().await);
        let mut rx = connector.subscribe();

        let ok = watch(&connector, Duration::from_millis(10), Some(2), std::future::pending())
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(tally(&mut rx), (2, 0));
    }

    #[tokio::test]
    async fn watch_stops_when_asked() {
        let connector = connector_for(unreachable_url().await);
        let mut rx = connector.subscribe();

        let ok = watch(&connector, Duration::from_millis(10), None, async {})
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(tally(&mut rx), (0, 0));
    }
}
