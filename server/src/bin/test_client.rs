use clap::{Parser, ValueEnum};
use log::{info, warn};
use shared::{
    read_message, write_message, ClientMessage, CodecError, ServerMessage, SessionId,
    SessionUpdate, TeamId, Vec3,
};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Wait in the solo queue for a 1v1
    Queue,
    /// Create a party and wait for others to join
    CreateParty,
    /// Join the party given with --party
    JoinParty,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted lobby client for manual testing")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// User id to authenticate as
    #[arg(short, long, default_value = "alice")]
    user: String,

    #[arg(short, long, value_enum, default_value_t = Mode::Queue)]
    mode: Mode,

    /// Party size when creating a party
    #[arg(long, default_value = "2")]
    size: u8,

    /// Party id to join
    #[arg(long)]
    party: Option<String>,

    /// Report a goal for our team every N mallet moves (0 disables scoring)
    #[arg(long, default_value = "0")]
    score_every: u32,

    /// Delay between mallet moves in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,
}

/// Work handed from the reader loop to the writer task
#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Play { session_id: SessionId, team: TeamId },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", args.server);
    let (mut reader, writer) = stream.into_split();

    let (commands, command_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_task(
        writer,
        command_rx,
        args.score_every,
        Duration::from_millis(args.tick_ms.max(1)),
    ));

    let _ = commands.send(Command::Send(ClientMessage::Authenticate {
        user_id: args.user.clone(),
    }));

    while let Some(message) = read_message::<_, ServerMessage>(&mut reader).await? {
        info!("<- {:?}", message);

        match message {
            ServerMessage::Authenticated { .. } => {
                let first = match args.mode {
                    Mode::Queue => ClientMessage::JoinSoloQueue,
                    Mode::CreateParty => ClientMessage::CreateParty {
                        max_size: args.size,
                    },
                    Mode::JoinParty => match &args.party {
                        Some(party_id) => ClientMessage::JoinParty {
                            party_id: party_id.clone(),
                        },
                        None => {
                            warn!("--party is required with --mode join-party");
                            break;
                        }
                    },
                };
                let _ = commands.send(Command::Send(first));
            }
            ServerMessage::PartyCreated(status) => {
                info!("Share this party id: {}", status.id);
                let _ = commands.send(Command::Send(ClientMessage::ToggleReady));
            }
            ServerMessage::PartyJoined(_) => {
                let _ = commands.send(Command::Send(ClientMessage::ToggleReady));
            }
            ServerMessage::SessionStart {
                session_id, teams, ..
            } => {
                let team = teams.team_of(&args.user).unwrap_or(TeamId::Team1);
                info!("Playing {} on {}", session_id, team);
                let _ = commands.send(Command::Play { session_id, team });
            }
            ServerMessage::SessionEnd {
                is_winner, reason, ..
            } => {
                info!(
                    "Session over ({:?}), {}",
                    reason,
                    if is_winner { "we won" } else { "we lost" }
                );
                break;
            }
            ServerMessage::AuthError { .. } | ServerMessage::Superseded => break,
            _ => {}
        }
    }

    // Dropping the sender stops the writer task
    drop(commands);
    if let Ok(Err(e)) = writer_task.await {
        warn!("Writer stopped with error: {}", e);
    }

    info!("Test client finished");
    Ok(())
}

/// Sends lobby commands and, once a session is running, a mallet move per tick.
async fn write_task(
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Command>,
    score_every: u32,
    tick: Duration,
) -> Result<(), CodecError> {
    let mut playing: Option<(SessionId, TeamId)> = None;
    let mut moves: u32 = 0;
    let mut ticker = interval(tick);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => write_message(&mut writer, &message).await?,
                Some(Command::Play { session_id, team }) => {
                    playing = Some((session_id, team));
                    moves = 0;
                }
                None => break,
            },

            _ = ticker.tick(), if playing.is_some() => {
                if let Some((session_id, team)) = &playing {
                    moves += 1;
                    play_tick(&mut writer, session_id, *team, moves, score_every).await?;
                }
            },
        }
    }

    Ok(())
}

async fn play_tick(
    writer: &mut OwnedWriteHalf,
    session_id: &str,
    team: TeamId,
    moves: u32,
    score_every: u32,
) -> Result<(), CodecError> {
    // Sweep side to side in front of our own goal
    let side = match team {
        TeamId::Team1 => -1.5,
        TeamId::Team2 => 1.5,
    };
    let sweep = (moves as f32 * 0.1).sin() * 0.5;
    let update = ClientMessage::SessionUpdate {
        session_id: session_id.to_string(),
        update: SessionUpdate::MalletMove {
            position: Vec3::new(sweep, 0.0, side),
        },
    };
    write_message(writer, &update).await?;

    if score_every > 0 && moves % score_every == 0 {
        info!("-> goal for {}", team);
        let goal = ClientMessage::Score {
            session_id: session_id.to_string(),
            team,
        };
        write_message(writer, &goal).await?;
    }
    Ok(())
}
