//! Faultline Agent Binary Entry Point

use clap::Parser;
use fault_agent::{run_agent, Args};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tokio::select! {
        result = run_agent(args) => {
            if let Err(e) = result {
                tracing::error!("Faultline agent failed: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
             tracing::info!("Shutdown signal received, stopping faultline agent...");
        }
    }

    Ok(())
}
