//! # Rinkside Lobby Server
//!
//! This library provides the coordinator behind real-time table-hockey
//! matches. It tracks who is online, lets friends form parties, pairs solo
//! players, and relays in-match state between the participants of each
//! session. The physics itself runs on the clients; the server stores and
//! forwards their updates without interpreting them.
//!
//! ## Core Responsibilities
//!
//! ### Presence
//! Maps authenticated users to their live connection. A user has at most one
//! connection at a time; a newer login supersedes the older one, which is
//! notified and closed. Friends are told when a user comes online or leaves.
//!
//! ### Parties
//! Groups of 2 or 4 players with a leader. Members toggle a ready flag and
//! the party turns into a session the moment it is full and everyone is
//! ready.
//!
//! ### Solo Queue
//! A FIFO of unpartied users. The two longest-waiting users are matched into
//! a 1v1 session as soon as both are present.
//!
//! ### Sessions
//! Running matches. The server keeps the latest puck and mallet state,
//! counts goals, and ends the match at the winning score, on surrender, or
//! when a player claims victory over opponents who went silent. Results are
//! pushed to the identity directory as win/loss stats.
//!
//! ## Architecture Design
//!
//! ### Single Coordinator Loop
//! All lobby state is owned by one [`coordinator::Coordinator`], driven by a
//! single task. Connection readers and directory lookups post events into
//! one channel; the loop applies them one by one. No lock guards the state,
//! so checks like "is this party launchable" and the launch itself can never
//! interleave with another event.
//!
//! ### TCP With Framed Messages
//! Each connection carries length-prefixed bincode frames (see
//! [`shared::codec`]). A connection gets a reader task that decodes inbound
//! events and a writer task that drains its outbound queue in order.
//!
//! ### Effects Instead Of I/O
//! The coordinator never touches a socket. Each event returns a list of
//! [`coordinator::Effect`]s (send, close, resolve identity, record result)
//! which the network layer executes. This keeps the rules testable without
//! a network.
//!
//! ## Module Organization
//!
//! - `config`: command-line configuration
//! - `coordinator`: event routing and the effect list
//! - `directory`: the identity directory seam and an in-memory implementation
//! - `error`: error types for rules, directory and server
//! - `network`: listener, connection tasks and the main loop
//! - `party`, `presence`, `queue`, `session`: the four state stores
//! - `utils`: timestamps and id generation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::directory::{InMemoryDirectory, UserProfile};
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(InMemoryDirectory::with_users([
//!         UserProfile::new("alice", "Alice").with_friends(["bob"]),
//!         UserProfile::new("bob", "Bob").with_friends(["alice"]),
//!     ]));
//!
//!     // Listens on 127.0.0.1:8080 with default rules
//!     let server = Server::bind(&ServerConfig::default(), directory).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod network;
pub mod party;
pub mod presence;
pub mod queue;
pub mod session;
pub mod utils;
