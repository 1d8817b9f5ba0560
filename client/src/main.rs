//! magsync - bring the local mirror of a site's collections up to date.
//!
//! Runs a single reconciliation pass and exits. A pass that could not reach
//! the site leaves the mirror untouched and exits with status 2.

use magsync_client::{sync_once, Config};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "magsync_client=debug,magsync_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Syncing app '{}' from {}", config.app, config.site_url);

    let report = match sync_once(&config).await {
        Ok(report) => report,
        Err(err) if err.is_offline() => {
            tracing::warn!("Site unreachable, local mirror left as is: {}", err);
            return Ok(ExitCode::from(2));
        }
        Err(err) => return Err(err.into()),
    };

    for (name, outcome) in &report.collections {
        tracing::info!(collection = %name, ?outcome, "Collection synced");
    }
    for name in &report.created {
        tracing::debug!(collection = %name, "Collection created");
    }

    if report.is_complete() {
        tracing::info!("Sync complete, {} collection(s) changed", report.changed());
        Ok(ExitCode::SUCCESS)
    } else {
        for (name, error) in report.failed() {
            tracing::error!(collection = %name, %error, "Collection failed");
        }
        Ok(ExitCode::FAILURE)
    }
}
