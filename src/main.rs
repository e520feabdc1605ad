//! pricecast - headless market forecasting service
//!
//! Runs the refresh scheduler, or triggers individual jobs once, from the
//! command line:
//!
//! ```sh
//! pricecast serve              # run the scheduler until interrupted
//! pricecast refresh            # run the data-refresh job once
//! pricecast retrain            # run the retrain job once
//! pricecast predict TSLA       # train-if-needed and print a prediction
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use pricecast::application::scheduler::{REFRESH_JOB_ID, RETRAIN_JOB_ID};
use pricecast::application::system::Application;
use pricecast::config::Config;
use pricecast::domain::types::AssetClass;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "pricecast", version, about = "Market price forecasting service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Serve,
    /// Run the hourly data-refresh job once and exit
    Refresh,
    /// Run the daily retrain job once and exit
    Retrain,
    /// Predict the next closing price for one symbol
    Predict {
        symbol: String,
        #[arg(long, default_value = "stock")]
        asset_class: AssetClassArg,
        #[arg(long)]
        period: Option<String>,
        #[arg(long)]
        epochs: Option<usize>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum AssetClassArg {
    Stock,
    Crypto,
}

impl From<AssetClassArg> for AssetClass {
    fn from(arg: AssetClassArg) -> Self {
        match arg {
            AssetClassArg::Stock => AssetClass::Stock,
            AssetClassArg::Crypto => AssetClass::Crypto,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();

    info!("pricecast {} starting...", env!("CARGO_PKG_VERSION"));
    let config = Config::from_env()?;
    info!(
        "Tracking {} stock / {} crypto symbols, db={}",
        config.stock_symbols.len(),
        config.crypto_symbols.len(),
        config.db_url
    );

    let app = Application::build(config.clone()).await?;

    match cli.command {
        Command::Serve => {
            let handles = app.start().await;
            info!("Scheduler running. Press Ctrl+C to exit.");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down.");
            for handle in handles {
                handle.abort();
            }
        }
        Command::Refresh => {
            report_job(&app, REFRESH_JOB_ID).await;
        }
        Command::Retrain => {
            report_job(&app, RETRAIN_JOB_ID).await;
        }
        Command::Predict {
            symbol,
            asset_class,
            period,
            epochs,
        } => {
            let period = period.unwrap_or_else(|| config.default_period.clone());
            let epochs = epochs.unwrap_or(config.default_epochs);
            let prediction = app
                .service
                .predict(&symbol, asset_class.into(), &period, epochs)
                .await?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }

    Ok(())
}

async fn report_job(app: &Application, job_id: &str) {
    match app.scheduler.run_job_once(job_id).await {
        Some(report) => {
            info!(
                "Job '{}': {} succeeded, {} failed",
                job_id,
                report.succeeded_symbols().len(),
                report.failed_symbols().len()
            );
            for outcome in &report.outcomes {
                if let Err(reason) = &outcome.result {
                    info!("  {} failed: {}", outcome.symbol, reason);
                }
            }
        }
        None => {
            info!("Job '{}' is not registered", job_id);
        }
    }
}
