//! services/client/src/adapters/file_player.rs
//!
//! A `PlayerSurface` without an audio device. The assembled song is written to
//! the output directory and the play/pause controls are driven from the
//! terminal. Every transition is reported on a channel so the wiring layer
//! sees them exactly like player events.

use async_trait::async_trait;
use listening_room_core::domain::PlayableAudio;
use listening_room_core::ports::{PlayerSurface, PortError, PortResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A transition of the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Play,
    Pause,
}

pub struct FilePlayer {
    output_dir: PathBuf,
    paused: AtomicBool,
    visible: AtomicBool,
    loaded: AtomicBool,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl FilePlayer {
    /// Creates a paused, hidden player and the receiver of its events.
    pub fn new(output_dir: impl Into<PathBuf>) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let player = Self {
            output_dir: output_dir.into(),
            paused: AtomicBool::new(true),
            visible: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            events,
        };
        (player, rx)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Resumes playback. Returns `false` if nothing is loaded or it was already playing.
    pub fn resume(&self) -> bool {
        if !self.loaded.load(Ordering::SeqCst) {
            return false;
        }
        self.transition(false)
    }

    /// Pauses playback. Returns `false` if it was already paused.
    pub fn pause(&self) -> bool {
        self.transition(true)
    }

    fn transition(&self, paused: bool) -> bool {
        let was = self.paused.swap(paused, Ordering::SeqCst);
        if was == paused {
            return false;
        }
        let event = if paused { PlayerEvent::Pause } else { PlayerEvent::Play };
        debug!(?event, "Player transition");
        // Nobody listening only means nobody publishes the transition.
        let _ = self.events.send(event);
        true
    }

    fn target_path(&self, audio: &PlayableAudio) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", sanitize(&audio.title), audio.format.extension()))
    }
}

/// Keeps the title usable as a single file name.
fn sanitize(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "song".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn write_file(path: &Path, data: &[u8]) -> PortResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

#[async_trait]
impl PlayerSurface for FilePlayer {
    fn show(&self) {
        if !self.visible.swap(true, Ordering::SeqCst) {
            info!("Player is now visible.");
        }
    }

    async fn load_and_play(&self, audio: PlayableAudio) -> PortResult<()> {
        let path = self.target_path(&audio);
        write_file(&path, &audio.data).await?;
        info!(
            path = %path.display(),
            bytes = audio.data.len(),
            mime = audio.format.mime_type(),
            "Song saved"
        );
        self.loaded.store(true, Ordering::SeqCst);
        // A new song restarts playback even if the previous one was playing.
        if !self.transition(false) {
            let _ = self.events.send(PlayerEvent::Play);
        }
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
