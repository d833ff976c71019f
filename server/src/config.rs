//! Server configuration, parsed from the command line.

use clap::Parser;
use shared::WIN_SCORE;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// JSON file with the user profiles served by the identity directory
    #[arg(short, long)]
    pub users: Option<PathBuf>,

    /// Maximum number of simultaneous connections
    #[arg(short, long, default_value = "1024")]
    pub max_connections: usize,

    /// Points a team needs to win a session
    #[arg(short, long, default_value_t = WIN_SCORE)]
    pub win_score: u32,

    /// Seconds an opponent must stay silent before victory can be claimed
    #[arg(long, default_value = "10")]
    pub claim_after_secs: u64,

    /// Seed for team shuffles (random if omitted)
    #[arg(long)]
    pub seed: Option<u64>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn claim_after(&self) -> Duration {
        Duration::from_secs(self.claim_after_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            users: None,
            max_connections: 1024,
            win_score: WIN_SCORE,
            claim_after_secs: 10,
            seed: None,
        }
    }
}
