use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::{info, warn};

use mailweave_core::impls::create_backend;
use mailweave_core::impls::drivers::MemoryDriverFactory;
use mailweave_core::observability::{env_filter, init_tracing};
use mailweave_core::ports::BackendKind;
use mailweave_core::{Config, ExitCode, Runtime, SyncAccountsArchitect};

#[derive(Parser, Debug)]
#[command(name = "mailweave", about = "Mirror mail accounts between two repositories")]
struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", env = "MAILWEAVE_CONFIG")]
    config: PathBuf,

    /// Run workers as threads or as processes (overrides the file)
    #[arg(long, value_name = "BACKEND")]
    concurrency: Option<BackendKind>,

    /// Accounts synced at the same time (overrides the file)
    #[arg(long, value_name = "N")]
    max_sync_accounts: Option<usize>,

    /// Log filter, used when RUST_LOG is not set
    #[arg(long, value_name = "FILTER", default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mailweave: {e:#}");
            ExitCode::ERROR
        }
    };
    std::process::exit(code.code());
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let kind = cli.concurrency.unwrap_or(config.concurrency);
    let max_accounts = cli.max_sync_accounts.unwrap_or(config.max_sync_accounts);

    let backend = create_backend(kind).context("creating the concurrency backend")?;
    let lock = backend.create_lock().context("creating the log lock")?;
    init_tracing(lock, env_filter(&cli.log_level))
        .map_err(|e| anyhow!(e))
        .context("installing the log subscriber")?;
    info!(backend = %kind, accounts = config.accounts.len(), max_accounts, "starting");

    let runtime = Runtime::with_builtins(backend, config, Arc::new(MemoryDriverFactory::new()))
        .context("assembling the runtime")?;
    let mut accounts = SyncAccountsArchitect::new(Arc::new(runtime));
    if let Err(e) = accounts.start(max_accounts) {
        if let Err(kill) = accounts.kill() {
            warn!(error = %kill, "cleanup after a failed start");
        }
        return Err(e).context("starting account workers");
    }
    Ok(accounts.run())
}
