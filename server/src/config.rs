//! Command line configuration for the server

use crate::error::ServerError;
use crate::hub::DEFAULT_QUEUE_CAPACITY;
use clap::Parser;
use shared::{PhysicsConstants, DEFAULT_TICK_RATE, MAX_CLIENTS};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative tick server")]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,
    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,
    /// Maximum number of connected clients
    #[arg(short, long, default_value_t = MAX_CLIENTS)]
    pub max_clients: usize,
    /// Messages a client may fall behind before it is disconnected
    #[arg(short, long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: MAX_CLIENTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Checks the values clap cannot: tick rate in 1..=1000, max clients
    /// within the one-byte id space, and a non-empty client queue.
    pub fn validate(&self) -> Result<(), ServerError> {
        if !(1..=1000).contains(&self.tick_rate) {
            return Err(ServerError::Config(format!(
                "tick rate must be between 1 and 1000, got {}",
                self.tick_rate
            )));
        }
        if !(1..=MAX_CLIENTS).contains(&self.max_clients) {
            return Err(ServerError::Config(format!(
                "max clients must be between 1 and {}, got {}",
                MAX_CLIENTS, self.max_clients
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` to bind the listener to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Nominal length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate))
    }

    pub fn physics(&self) -> PhysicsConstants {
        PhysicsConstants::for_tick_rate(self.tick_rate)
    }
}
