//! services/client/src/bin/client.rs

use client_lib::{
    adapters::{
        file_player::{FilePlayer, PlayerEvent},
        grpc_web::GrpcWebSongAdapter,
        stomp::StompTransport,
        terminal::TerminalSurface,
    },
    config::Config,
    error::ClientError,
    room::{AppState, RoomClient, Submission},
};
use listening_room_core::ports::PlayerSurface;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Commands:
  request <nickname> <title> [mp3|wav]   download a song and join its room
  play | pause                           control the local player
  react <like|heart|fire>                send a reaction to the room
  users                                  who is listening right now
  status                                 session and connection state
  help                                   show this text
  quit                                   leave the room and exit";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Request {
        nickname: &'a str,
        title: &'a str,
        format: Option<&'a str>,
    },
    Play,
    Pause,
    React(&'a str),
    Users,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Command::Empty;
    };
    match verb.to_ascii_lowercase().as_str() {
        "request" => match (words.next(), words.next(), words.next()) {
            (Some(nickname), Some(title), format) => Command::Request {
                nickname,
                title,
                format,
            },
            _ => Command::Unknown(line.trim()),
        },
        "play" => Command::Play,
        "pause" => Command::Pause,
        "react" => match words.next() {
            Some(reaction) => Command::React(reaction),
            None => Command::Unknown(line.trim()),
        },
        "users" => Command::Users,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(line.trim()),
    }
}

/// Logs how the two flows of a request ended. Users already saw the details.
fn watch_submission(submission: Submission) {
    tokio::spawn(async move {
        match submission.audio.await {
            Ok(Ok(outcome)) => debug!(?outcome, "Song request finished"),
            Ok(Err(e)) => debug!("Song request failed: {}", e),
            Err(e) => error!("Song request task panicked: {}", e),
        }
        match submission.channel.await {
            Ok(Ok(())) => debug!("Room connection ready"),
            Ok(Err(e)) => debug!("Room connection failed: {}", e),
            Err(e) => error!("Room connection task panicked: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting client...");

    // --- 2. Initialize Adapters ---
    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| ClientError::Internal(format!("HTTP client: {}", e)))?;
    let songs = Arc::new(GrpcWebSongAdapter::new(
        http,
        &config.stream_endpoint,
        &config.song_rpc_path,
    ));
    let channel = Arc::new(StompTransport::new(
        &config.channel_endpoint,
        config.receipt_timeout,
    ));
    let render = Arc::new(TerminalSurface::new());
    let (player, mut player_events) = FilePlayer::new(config.output_dir.clone());
    let player = Arc::new(player);

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        songs,
        channel,
        render,
        player: player.clone(),
    });
    let client = Arc::new(RoomClient::new(app_state));

    // --- 4. Forward Player Transitions ---
    let events_task = tokio::spawn({
        let client = client.clone();
        async move {
            while let Some(event) = player_events.recv().await {
                match event {
                    PlayerEvent::Play => client.on_player_play().await,
                    PlayerEvent::Pause => client.on_player_pause().await,
                }
            }
        }
    });

    // --- 5. Command Loop ---
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            Command::Request {
                nickname,
                title,
                format,
            } => match client.submit_request(nickname, title, format).await {
                Ok(submission) => watch_submission(submission),
                Err(e) => debug!("Request refused: {}", e),
            },
            Command::Play => {
                if !player.resume() {
                    println!("Nothing to resume.");
                }
            }
            Command::Pause => {
                if !player.pause() {
                    println!("Already paused.");
                }
            }
            Command::React(reaction) => {
                if let Err(e) = client.on_reaction(reaction).await {
                    debug!("Reaction not sent: {}", e);
                }
            }
            Command::Users => {
                let roster = client.roster().await;
                if roster.is_empty() {
                    println!("Nobody is playing right now.");
                } else {
                    println!("Playing now: {}", roster.members().join(", "));
                }
            }
            Command::Status => {
                let session = client
                    .current_session()
                    .await
                    .map(|s| format!("{} listening to {}", s.nickname, s.song_id))
                    .unwrap_or_else(|| "no session".to_string());
                println!(
                    "{} | channel {:?} | player {}",
                    session,
                    client.channel_status().await,
                    if player.is_paused() { "paused" } else { "playing" }
                );
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => break,
            Command::Empty => {}
            Command::Unknown(raw) => println!("Unknown command '{}'. Type 'help'.", raw),
        }
    }

    // --- 6. Shut Down ---
    info!("Shutting down...");
    client.leave().await;
    events_task.abort();
    Ok(())
}
