use inverter_collector::prelude::*;

use std::process::ExitCode;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    let options = Options::new();

    let config = match Config::from_options(&options) {
        Ok(config) => config,
        Err(err) => {
            inverter_collector::init_logging("info");
            error!("Failed to load config: {:?}", err);
            return ExitCode::from(255);
        }
    };

    inverter_collector::init_logging(config.loglevel());
    config.log_summary();

    // Create a channel for shutdown signaling
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Ctrl+C received, shutting down");
        let _ = shutdown_tx_clone.send(());
    });

    if let Some(secs) = options.runtime {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("runtime limit of {}s reached, shutting down", secs);
            let _ = shutdown_tx_clone.send(());
        });
    }

    let result = inverter_collector::app(shutdown_rx, config).await;
    drop(shutdown_tx);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(1)
        }
    }
}
