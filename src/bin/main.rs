use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};

use moneytap::chain::ScriptedChain;
use moneytap::config::Config;
use moneytap::core::WithdrawalLimiter;
use moneytap::engine::{BroadcastHub, Engine};
use moneytap::store::MemoryStore;
use moneytap::telemetry;

#[derive(Parser, Debug)]
#[command(name = "tapd", version, about = "money-tap accrual and sync daemon")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `TAP_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the TOML config file; created with defaults if missing.
    #[arg(long, global = true, default_value = "tapd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine against a recorded chain log.
    Run {
        /// JSON chain script: events, stream views, claimable values.
        #[arg(long)]
        script: PathBuf,
    },
    /// Parse and validate the config file, then exit.
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load_or_init(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            std::process::exit(2);
        }
    };

    let _telemetry_guard = telemetry::init(cli.verbose, &config.logging);

    if let Err(err) = run(cli, config) {
        tracing::error!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: Config) -> moneytap::Result<()> {
    match cli.command {
        Command::CheckConfig => {
            // Load already succeeded; report and exit.
            println!("{} is valid", cli.config.display());
            Ok(())
        }
        Command::Run { script } => {
            let chain = Arc::new(ScriptedChain::from_path(&script)?);
            let store = Arc::new(MemoryStore::new());
            let hub = Arc::new(BroadcastHub::new(config.engine.subscriber_queue_capacity));
            let limiter = Arc::new(WithdrawalLimiter::new());

            let handle = Engine::start(store, chain, hub, limiter, &config.engine)?;
            tracing::info!(script = %script.display(), "tapd running");

            let shutdown = Arc::new(AtomicBool::new(false));
            let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
            let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
            }

            tracing::info!("shutdown signal received");
            handle.shutdown();
            Ok(())
        }
    }
}
