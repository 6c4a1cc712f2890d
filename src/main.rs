// ABOUTME: Entry point for the procstore maintenance binary.
// ABOUTME: Loads configuration from the environment, opens the stores, and runs the retention sweep.

use std::process::ExitCode;

use procstore_store::{StorageManager, StoreConfig};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procstore=info,procstore_store=info".into()),
        )
        .init();

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let manager = match StorageManager::open(&config) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!(
                "failed to open store at {}: {}",
                config.error_db_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    let result = manager.run_retention(&config);
    manager.close();

    match result {
        Ok(report) => {
            tracing::info!(
                "retention sweep removed {} errors (> {} days) and {} logs (> {} hours)",
                report.errors_removed,
                config.error_retention_days,
                report.logs_removed,
                config.log_retention_hours
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("retention sweep failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
