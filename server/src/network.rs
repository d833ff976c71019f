//! Server network layer: TCP connections feeding the coordinator loop

use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, Effect};
use crate::directory::{IdentityDirectory, UserProfile};
use crate::error::{DirectoryError, ServerError};
use crate::presence::ConnectionId;
use log::{debug, error, info, warn};
use shared::{read_message, write_message, ClientMessage, ServerMessage, UserId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages sent from connection and directory tasks to the main loop
#[derive(Debug)]
pub enum ServerEvent {
    Message {
        connection: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        connection: ConnectionId,
    },
    IdentityResolved {
        connection: ConnectionId,
        user_id: UserId,
        attempt: u64,
        result: Result<UserProfile, DirectoryError>,
    },
}

/// Messages sent from the main loop to a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

struct ConnectionHandle {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
}

/// Main server owning the listener and the coordinator
pub struct Server {
    listener: TcpListener,
    directory: Arc<dyn IdentityDirectory>,
    coordinator: Coordinator,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    next_connection: ConnectionId,
    max_connections: usize,

    // Communication channels
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn bind(
        config: &ServerConfig,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            directory,
            coordinator: Coordinator::new(config),
            connections: HashMap::new(),
            next_connection: 1,
            max_connections: config.max_connections,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Main server loop: accepts connections and applies events one at a time
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        // The server holds a sender, so this only happens on teardown
                        None => break,
                    }
                },
            }
        }

        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.connections.len() >= self.max_connections {
            warn!("Rejecting {}: server full", addr);
            tokio::spawn(async move {
                let mut stream = stream;
                let full = ServerMessage::Error {
                    message: "Server full".to_string(),
                };
                if let Err(e) = write_message(&mut stream, &full).await {
                    debug!("Failed to notify {}: {}", addr, e);
                }
                let _ = stream.shutdown().await;
            });
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let connection = self.next_connection;
        self.next_connection += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(connection, write_half, outbound_rx));
        let reader = tokio::spawn(read_loop(
            connection,
            BufReader::new(read_half),
            self.event_tx.clone(),
        ));

        self.connections.insert(
            connection,
            ConnectionHandle {
                addr,
                outbound: outbound_tx,
                reader,
            },
        );
        info!("Connection {} opened from {}", connection, addr);
    }

    fn handle_event(&mut self, event: ServerEvent) {
        let effects = match event {
            ServerEvent::Message {
                connection,
                message,
            } => {
                debug!("Connection {} sent {}", connection, message.name());
                self.coordinator.handle_message(connection, message)
            }
            ServerEvent::Disconnected { connection } => {
                if let Some(handle) = self.connections.remove(&connection) {
                    info!("Connection {} from {} closed", connection, handle.addr);
                }
                self.coordinator.handle_disconnect(connection)
            }
            ServerEvent::IdentityResolved {
                connection,
                user_id,
                attempt,
                result,
            } => {
                if !self.connections.contains_key(&connection) {
                    debug!(
                        "Dropping identity of {} for closed connection {}",
                        user_id, connection
                    );
                    return;
                }
                self.coordinator
                    .complete_authentication(connection, attempt, &user_id, result)
            }
        };

        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Send {
                connection,
                message,
            } => {
                if let Some(handle) = self.connections.get(&connection) {
                    if handle.outbound.send(Outbound::Message(message)).is_err() {
                        debug!("Writer for connection {} already gone", connection);
                    }
                }
            }
            Effect::Close { connection } => {
                if let Some(handle) = self.connections.remove(&connection) {
                    info!("Closing connection {} from {}", connection, handle.addr);
                    let _ = handle.outbound.send(Outbound::Close);
                    handle.reader.abort();
                }
            }
            Effect::ResolveIdentity {
                connection,
                user_id,
                attempt,
            } => {
                let directory = Arc::clone(&self.directory);
                let events = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = directory.find_user(&user_id).await;
                    let _ = events.send(ServerEvent::IdentityResolved {
                        connection,
                        user_id,
                        attempt,
                        result,
                    });
                });
            }
            Effect::RecordResult { user_id, outcome } => {
                let directory = Arc::clone(&self.directory);
                tokio::spawn(async move {
                    if let Err(e) = directory.record_result(&user_id, outcome).await {
                        warn!("Failed to record {:?} for {}: {}", outcome, user_id, e);
                    }
                });
            }
        }
    }
}

/// Reads frames from one connection until it closes or breaks.
///
/// Frames that fail to decode are skipped; anything else ends the connection.
async fn read_loop<R>(
    connection: ConnectionId,
    mut reader: R,
    events: mpsc::UnboundedSender<ServerEvent>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match read_message::<_, ClientMessage>(&mut reader).await {
            Ok(Some(message)) => {
                if events
                    .send(ServerEvent::Message {
                        connection,
                        message,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                warn!("Dropping malformed frame from connection {}: {}", connection, e);
            }
            Err(e) => {
                debug!("Connection {} read failed: {}", connection, e);
                break;
            }
        }
    }

    let _ = events.send(ServerEvent::Disconnected { connection });
}

/// Writes queued messages to one connection in order.
async fn write_loop<W>(
    connection: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Message(message) => {
                if let Err(e) = write_message(&mut writer, &message).await {
                    debug!("Connection {} write failed: {}", connection, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
}
