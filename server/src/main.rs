use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::launch;

/// Parses command-line arguments, starts the server and runs until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();

    info!(
        "Starting server on {} at {} Hz (max {} clients)",
        config.address(),
        config.tick_rate,
        config.max_clients
    );

    let server = match launch(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.shutdown().await;

    Ok(())
}
