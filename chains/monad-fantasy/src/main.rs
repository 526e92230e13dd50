use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use core_logic::{
    load_accounts, setup_logger, spawn_shutdown_listener, Account, LedgerStore, LogConfig,
    MetricsCollector, ProxyRotator, RunSummary,
};
use dialoguer::{theme::ColorfulTheme, Password};
use dotenv::dotenv;
use monad_fantasy::proxy_health::{scan_proxies, HEALTH_TARGET};
use monad_fantasy::{AppContext, FantasyConfig};
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "chains/monad-fantasy/config.toml")]
    config: String,
    #[arg(short, long)]
    export_metrics: Option<String>,
    #[arg(long, default_value = "30")]
    metrics_interval: u64,
    /// Show INFO from every module, not only per-account progress
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Process every account in the keys file
    Run,
    /// Reprocess the accounts listed in the failure file. Only the ones that
    /// still fail stay listed.
    RetryFailures,
    /// Print the stored per-account results
    Results,
    /// Probe every proxy in the proxy file
    CheckProxies {
        #[arg(long, default_value = "20")]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let mut config = FantasyConfig::load(&args.config)?;
    let _log_guard = setup_logger(&LogConfig {
        dir: PathBuf::from(&config.app.log_dir),
        verbose: args.verbose,
    });
    info!("Configuration loaded from {}", args.config);

    match args.command.unwrap_or(Commands::Run) {
        Commands::Results => print_results(&config).await,
        Commands::CheckProxies { concurrency } => check_proxies(&config, concurrency).await,
        mode => {
            ensure_captcha_key(&mut config)?;
            config.validate().context("Invalid configuration")?;
            run(config, mode == Commands::RetryFailures, &args).await
        }
    }
}

/// Environment first, then an interactive prompt.
fn ensure_captcha_key(config: &mut FantasyConfig) -> Result<()> {
    if !config.captcha.api_key.trim().is_empty() {
        return Ok(());
    }
    error!("captcha.api_key is not set (config file or FANTASY__CAPTCHA__API_KEY).");

    match Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Enter captcha API key")
        .interact()
    {
        Ok(input) if !input.trim().is_empty() => {
            config.captcha.api_key = input.trim().to_string();
            Ok(())
        }
        Ok(_) => bail!("Empty captcha API key"),
        Err(_) => bail!("Cannot prompt for the captcha API key (not a terminal)"),
    }
}

async fn run(config: FantasyConfig, retry_failures: bool, args: &Args) -> Result<()> {
    let cancel = CancellationToken::new();
    let keys_file = config.app.keys_file.clone();
    let ctx = AppContext::build(config, cancel.clone()).await?;

    let mut accounts: Vec<Account> = if retry_failures {
        let failed = ctx.failure_ledger.load().await?;
        if failed.is_empty() {
            info!(
                target: "task_result",
                "No failed accounts in {}",
                ctx.failure_ledger.path().display()
            );
            return Ok(());
        }
        failed
    } else {
        let accounts = load_accounts(&keys_file)?;
        ctx.prepare_fresh_run().await?;
        accounts
    };
    let retried = if retry_failures { accounts.clone() } else { Vec::new() };
    accounts.shuffle(&mut rand::thread_rng());

    spawn_shutdown_listener(cancel.clone());

    let metrics_task = args.export_metrics.as_ref().map(|path| {
        let path = path.clone();
        let metrics = ctx.metrics.clone();
        let interval_secs = args.metrics_interval.max(1);
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                if let Err(e) = metrics.export_to_file(&path).await {
                    error!("Metrics export failed: {}", e);
                }
            }
        })
    });

    let dispatcher = ctx.dispatcher();
    let processor = Arc::new(ctx.processor(accounts.len()));
    let summary = dispatcher.run_until_converged(accounts, processor).await;

    if let Some(task) = metrics_task {
        task.abort();
    }
    if let Some(path) = &args.export_metrics {
        export_final_metrics(&ctx.metrics, path).await;
    }

    if retry_failures {
        let remaining = ctx
            .settle_retried(&retried, dispatcher.coordinator())
            .await
            .context("Failed to update the failure file")?;
        info!("{} account(s) left in the failure file", remaining);
    }

    let exhausted = dispatcher.coordinator().exhausted();
    print_report(&summary, ctx.memo.completed(), &exhausted);
    if !exhausted.is_empty() {
        info!(
            "Exhausted accounts written to {}",
            ctx.failure_ledger.path().display()
        );
    }

    ctx.store.close().await;
    Ok(())
}

async fn export_final_metrics(metrics: &MetricsCollector, path: &str) {
    match metrics.export_to_file(path).await {
        Ok(_) => info!("Final metrics exported to {}", path),
        Err(e) => error!("Failed to export final metrics: {}", e),
    }
}

fn print_report(summary: &RunSummary, quests_completed: usize, exhausted: &[Account]) {
    let accounts = &summary.accounts;
    let rate = format!("{:.2}%", accounts.success_rate * 100.0);
    let rate = if accounts.succeeded == accounts.total {
        rate.green().bold()
    } else {
        rate.yellow().bold()
    };

    println!();
    println!("{}", "Run complete".bold().underline());
    if summary.cancelled {
        println!("{}", "Interrupted by Ctrl+C".yellow());
    }
    println!("  Success rate:      {}", rate);
    println!("  Accounts:          {}/{}", accounts.succeeded, accounts.total);
    println!("  Quests completed:  {}", quests_completed);
    println!("  Waves:             {}", summary.waves.len());
    println!("  Duration:          {:.1}s", summary.duration.as_secs_f64());
    if !exhausted.is_empty() {
        println!("  {} {}", "Exhausted:".red().bold(), exhausted.len());
        for account in exhausted {
            println!("    {}", account.to_string().red());
        }
    }
}

async fn print_results(config: &FantasyConfig) -> Result<()> {
    let store = LedgerStore::new(&config.app.db_path).await?;
    let results = store.read_all().await?;
    if results.is_empty() {
        println!("No results stored in {}", config.app.db_path);
    }
    for (wallet, record) in &results {
        let fields: Vec<String> = record.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("{} {}", wallet.cyan(), fields.join(" "));
    }
    store.close().await;
    Ok(())
}

async fn check_proxies(config: &FantasyConfig, concurrency: usize) -> Result<()> {
    let proxies = ProxyRotator::load_proxies(&config.app.proxy_file)?;
    if proxies.is_empty() {
        warn!("No proxies to check in {}", config.app.proxy_file);
        return Ok(());
    }

    let reports = scan_proxies(&proxies, HEALTH_TARGET, concurrency).await;
    let healthy = reports.iter().filter(|r| r.is_healthy()).count();
    for report in &reports {
        match report.latency {
            Some(latency) => println!(
                "{} {} ({} ms)",
                "OK  ".green().bold(),
                report.proxy.endpoint(),
                latency.as_millis()
            ),
            None => println!("{} {}", "DEAD".red().bold(), report.proxy.endpoint()),
        }
    }
    println!("{}/{} proxies healthy", healthy, reports.len());
    Ok(())
}
