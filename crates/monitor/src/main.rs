//! SeatWatch monitor CLI.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alerts::{
    AvailabilityCache, CycleReport, Dispatcher, HowdyProvider, JsonStore, Monitor, MonitorConfig,
    SmtpConfig, SmtpTransport,
};

/// Seat availability monitor and notification dispatcher.
#[derive(Parser)]
#[command(name = "seat-monitor")]
#[command(about = "Monitors course-section availability and notifies subscribers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Wiring shared by `run` and `check`.
#[derive(Args)]
struct EngineArgs {
    /// Seconds before the availability snapshot is refetched
    #[arg(long, default_value = "60")]
    refresh_interval: u64,

    /// Subscription store file
    #[arg(long, default_value = "/data/subscriptions.json")]
    store: PathBuf,

    /// Course catalog base URL
    #[arg(long, default_value = "https://howdy.tamu.edu")]
    base_url: String,

    /// Only monitor terms whose description contains this text
    /// (repeatable; default: all terms)
    #[arg(long = "semester")]
    semesters: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop until interrupted
    Run {
        /// Seconds between cycle starts
        #[arg(long, default_value = "60")]
        interval: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run a single cycle and exit (for CronJob use)
    Check {
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Send a test email to verify SMTP configuration
    TestEmail {
        /// Recipient (defaults to the configured sender)
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("alerts=debug,seat_monitor=debug,info")
    } else {
        EnvFilter::new("alerts=info,seat_monitor=info,warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { interval, engine } => run_loop(interval, &engine).await,
        Commands::Check { engine } => run_check(&engine).await,
        Commands::TestEmail { to } => run_test_email(to).await,
    }
}

fn build_monitor(engine: &EngineArgs, poll_interval: Duration) -> Result<Monitor> {
    let store = Arc::new(JsonStore::open(engine.store.clone())?);
    let provider = Arc::new(HowdyProvider::new(
        engine.base_url.clone(),
        engine.semesters.clone(),
    )?);
    let cache = AvailabilityCache::new(provider, Duration::from_secs(engine.refresh_interval));
    let smtp = SmtpConfig::from_env()?;
    let dispatcher = Dispatcher::new(Arc::new(SmtpTransport::new(smtp)));

    Ok(Monitor::new(
        store,
        cache,
        dispatcher,
        MonitorConfig { poll_interval },
    ))
}

async fn run_loop(interval: u64, engine: &EngineArgs) -> Result<()> {
    let monitor = build_monitor(engine, Duration::from_secs(interval))?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; finishing in-flight work");
            signal_token.cancel();
        }
    });

    monitor.run(cancel).await;
    Ok(())
}

async fn run_check(engine: &EngineArgs) -> Result<()> {
    let monitor = build_monitor(engine, Duration::from_secs(60))?;
    let report = monitor.run_cycle(chrono::Utc::now()).await?;
    print_report(&report);
    Ok(())
}

async fn run_test_email(to: Option<String>) -> Result<()> {
    let config = SmtpConfig::from_env()?;
    let to = to.unwrap_or_else(|| config.from_email.clone());
    let dispatcher = Dispatcher::new(Arc::new(SmtpTransport::new(config)));

    dispatcher.send_test(&to).await?;
    println!("Test email sent to {to}");
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("\nCycle Summary");
    println!("   Active:     {}", report.active);
    println!("   Evaluated:  {}", report.evaluated);
    println!("   Newly open: {}", report.newly_open);
    println!("   Notified:   {}", report.recipients_notified);
    println!("   Failed:     {}", report.recipients_failed);
    println!("   Retired:    {}", report.retired);
    if report.used_stale_snapshot {
        println!("   (ran on a stale availability snapshot)");
    }
}
