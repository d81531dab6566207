use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stockwatch::captcha::{CaptchaSolver, HttpSolver};
use stockwatch::config::ConfigLoader;
use stockwatch::driver::{ChromiumDriver, ChromiumOptions, Driver};
use stockwatch::metrics::snapshot::MetricsSnapshot;
use stockwatch::MonitorEngine;
use tokio_stream::wrappers::WatchStream;

#[derive(Parser)]
#[command(name = "stockwatch")]
#[command(version = "0.1.0")]
#[command(about = "Product stock monitor with automated checkout", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the targets of a config file until interrupted
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show a live counter spinner (stderr)
        #[arg(short, long, default_value_t = true)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = indicatif::MultiProgress::new();

    match cli.command {
        Commands::Run { config, progress } => {
            if progress {
                indicatif_log_bridge::LogWrapper::new(multi.clone(), logger).try_init()?;
            } else {
                let level = logger.filter();
                log::set_boxed_logger(Box::new(logger))?;
                log::set_max_level(level);
            }

            log::info!("Loading config from {:?}", config);
            let app = ConfigLoader::load(&config)?;
            let global = app.global.clone();

            let driver: Arc<dyn Driver> = Arc::new(ChromiumDriver::new(ChromiumOptions::from(&global)));

            let solver: Option<Arc<dyn CaptchaSolver>> = match &global.solver_endpoint {
                Some(_) => Some(Arc::new(HttpSolver::new()?)),
                None => {
                    log::warn!("No solver endpoint configured, captchas wait for manual solutions");
                    None
                }
            };

            let targets = ConfigLoader::create_targets(&app);
            let storefronts = ConfigLoader::create_storefronts(&app, driver.clone());
            let engine = MonitorEngine::new(
                global,
                ConfigLoader::create_proxies(&app),
                storefronts,
                driver,
                solver,
            );

            engine.prepare_checkout_sessions(&targets).await;

            let mut progress_task = None;
            let spinner = if progress {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
                pb.enable_steady_tick(Duration::from_millis(120));

                let mut snapshots = WatchStream::new(engine.watch_metrics());
                let pb_clone = pb.clone();
                progress_task = Some(tokio::spawn(async move {
                    while let Some(snapshot) = snapshots.next().await {
                        pb_clone.set_message(status_line(&snapshot));
                    }
                }));
                Some(pb)
            } else {
                None
            };

            engine.start_all(&targets);

            tokio::signal::ctrl_c().await?;
            log::info!("Interrupt received");
            engine.request_shutdown().await;

            if let Some(task) = progress_task {
                task.abort();
            }
            let final_metrics = engine.metrics_snapshot();
            if let Some(pb) = spinner {
                pb.finish_with_message(format!("{} - stopped", status_line(&final_metrics)));
            }

            println!("\n✅ Monitoring stopped:");
            println!("   In stock seen: {}", final_metrics.in_stock);
            println!("   Purchases: {}", final_metrics.purchases);
            println!("   Captchas: {}", final_metrics.captchas);
            println!(
                "   Stock checks: {} ({:.1}% ok)",
                final_metrics.checks_total, final_metrics.check_success_rate
            );
            println!("   Total Time: {:.1}s", final_metrics.elapsed_seconds);
            for (label, state) in engine.monitor_states() {
                println!("   {} {:?}", label, state);
            }
        }
        Commands::Check { config } => match ConfigLoader::load(&config) {
            Ok(cfg) => {
                println!("✅ Config is valid:");
                println!("   Targets: {}", cfg.targets.len());
                for target in &cfg.targets {
                    println!("     {} ({} thread(s)) {}", target.name, target.threads, target.url);
                }
                println!("   Proxies: {}", cfg.proxies.len());
                println!("   Storefronts: {}", cfg.storefronts.len());
            }
            Err(e) => {
                eprintln!("❌ Config error: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

fn status_line(snapshot: &MetricsSnapshot) -> String {
    format!(
        "Monitors: {} | In stock: {} | Purchases: {} | Captchas: {} ({} waiting) | Checks/min: {:.1}",
        snapshot.active_monitors,
        snapshot.in_stock,
        snapshot.purchases,
        snapshot.captchas,
        snapshot.awaiting_solve,
        snapshot.checks_per_minute
    )
}
