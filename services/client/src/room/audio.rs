//! services/client/src/room/audio.rs
//!
//! The audio acquisition controller: opens the streamed song call, buffers the
//! chunks in delivery order and hands the assembled song to the player.

use crate::{error::ClientError, room::render::Notifier};
use futures::StreamExt;
use listening_room_core::domain::{ChunkBuffer, PlayableAudio, SongRequest};
use listening_room_core::ports::{PlayerSurface, SongStreamService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Summary of one completed song request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackOutcome {
    pub chunks: usize,
    pub bytes: usize,
    /// `false` if the player refused to start (the audio is still loaded).
    pub started: bool,
}

pub struct AudioController {
    songs: Arc<dyn SongStreamService>,
    player: Arc<dyn PlayerSurface>,
    notifier: Notifier,
    in_flight: AtomicBool,
}

/// Releases the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AudioController {
    pub fn new(
        songs: Arc<dyn SongStreamService>,
        player: Arc<dyn PlayerSurface>,
        notifier: Notifier,
    ) -> Self {
        Self {
            songs,
            player,
            notifier,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Streams `request` to completion and starts playback.
    ///
    /// A second call while one is still streaming is rejected with
    /// [`ClientError::RequestInFlight`]. Failures are shown to the user and
    /// returned; there is no retry.
    pub async fn request_song(&self, request: SongRequest) -> Result<PlaybackOutcome, ClientError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            self.notifier
                .error("A song is already being downloaded; wait for it to finish.");
            return Err(ClientError::RequestInFlight);
        };

        let start_time = Instant::now();
        info!(title = %request.title, format = %request.format, "Requesting song stream");

        let mut stream = match self.songs.stream_song(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open song stream: {}", e);
                self.notifier
                    .error(&format!("Could not request \"{}\": {}", request.title, e));
                return Err(e.into());
            }
        };

        let mut buffer = ChunkBuffer::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    debug!("Fragment received. Size: {} bytes", chunk.len());
                    let first = buffer.is_empty();
                    buffer.push(chunk);
                    if first {
                        self.player.show();
                        self.notifier
                            .success("First fragment received. Player shown.");
                    }
                }
                Err(e) => {
                    error!(
                        "Song stream failed after {} fragments: {}",
                        buffer.len(),
                        e
                    );
                    self.notifier
                        .error(&format!("Streaming of \"{}\" failed: {}", request.title, e));
                    return Err(e.into());
                }
            }
        }

        if buffer.is_empty() {
            self.notifier
                .error(&format!("\"{}\" arrived without any audio.", request.title));
            return Err(ClientError::Internal(format!(
                "stream for '{}' ended without data",
                request.title
            )));
        }

        let chunks = buffer.len();
        let data = buffer.take_concatenated();
        let bytes = data.len();
        info!(
            "Song stream finished: {} fragments, {} bytes in {:?}",
            chunks,
            bytes,
            start_time.elapsed()
        );

        let audio = PlayableAudio {
            title: request.title.clone(),
            format: request.format,
            data,
        };
        let started = match self.player.load_and_play(audio).await {
            Ok(()) => {
                self.notifier.success("Playback started.");
                true
            }
            Err(e) => {
                warn!("Automatic playback failed: {}", e);
                self.notifier
                    .error("Automatic playback failed. Start the player manually.");
                false
            }
        };

        Ok(PlaybackOutcome {
            chunks,
            bytes,
            started,
        })
    }
}
