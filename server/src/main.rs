use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::directory::{InMemoryDirectory, UserProfile};
use server::error::ServerError;
use server::network::Server;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, loads the identity directory and runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    let config = ServerConfig::parse();

    let directory = match &config.users {
        Some(path) => InMemoryDirectory::from_json_file(path)?,
        None => {
            info!("No --users file given, serving demo accounts");
            demo_directory()
        }
    };
    info!("Identity directory holds {} users", directory.len().await);
    let directory = Arc::new(directory);

    let server = Server::bind(&config, directory).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

/// Four mutual friends, enough for a 2v2 party or two solo pairs.
fn demo_directory() -> InMemoryDirectory {
    let names = ["alice", "bob", "carol", "dave"];
    InMemoryDirectory::with_users(names.iter().map(|name| {
        let friends = names.iter().filter(|other| *other != name).copied();
        UserProfile::new(*name, *name).with_friends(friends)
    }))
}
