//! services/client/src/room/wiring.rs
//!
//! Top-level glue: turns user actions (form submission, player transitions,
//! reaction buttons) into calls on the audio controller, the channel session
//! and the publisher.

use crate::{
    error::ClientError,
    room::{
        audio::{AudioController, PlaybackOutcome},
        dispatcher::Dispatcher,
        publisher::Publisher,
        render::Notifier,
        session::{ChannelStatus, SessionManager},
        state::AppState,
    },
};
use listening_room_core::domain::{
    AudioFormat, NotificationKind, PrivateNotification, ReactionType, Roster, SessionIdentity,
    SongRequest,
};
use listening_room_core::ports::PlayerSurface;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info};

/// The two flows started by one song request.
pub struct Submission {
    pub audio: JoinHandle<Result<PlaybackOutcome, ClientError>>,
    pub channel: JoinHandle<Result<(), ClientError>>,
}

pub struct RoomClient {
    session: Mutex<Option<SessionIdentity>>,
    audio: Arc<AudioController>,
    channel: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    publisher: Publisher,
    player: Arc<dyn PlayerSurface>,
    notifier: Notifier,
}

impl RoomClient {
    pub fn new(app_state: Arc<AppState>) -> Self {
        let notifier = Notifier::new(app_state.render.clone());
        let dispatcher = Arc::new(Dispatcher::new(notifier.clone(), app_state.player.clone()));
        let channel = Arc::new(SessionManager::new(
            app_state.channel.clone(),
            dispatcher.clone(),
            notifier.clone(),
            app_state.config.channel.clone(),
        ));
        let audio = Arc::new(AudioController::new(
            app_state.songs.clone(),
            app_state.player.clone(),
            notifier.clone(),
        ));
        let publisher = Publisher::new(channel.clone(), app_state.config.channel.clone());

        Self {
            session: Mutex::new(None),
            audio,
            channel,
            dispatcher,
            publisher,
            player: app_state.player.clone(),
            notifier,
        }
    }

    pub async fn current_session(&self) -> Option<SessionIdentity> {
        self.session.lock().await.clone()
    }

    pub async fn channel_status(&self) -> ChannelStatus {
        self.channel.status().await
    }

    pub async fn roster(&self) -> Roster {
        self.dispatcher.roster().await
    }

    /// Handles the song request form.
    ///
    /// Validates the input, records the new session and starts the song
    /// download and the room connection side by side.
    pub async fn submit_request(
        &self,
        nickname: &str,
        title: &str,
        format: Option<&str>,
    ) -> Result<Submission, ClientError> {
        let Some(identity) = SessionIdentity::parse(nickname, title) else {
            self.notifier
                .error("You must enter a nickname and a song title.");
            return Err(ClientError::Precondition(
                "nickname and title are required".to_string(),
            ));
        };
        let format = match format {
            Some(raw) => raw.parse::<AudioFormat>().map_err(|e| {
                self.notifier.error(&format!("Cannot request song: {}.", e));
                ClientError::Precondition(e)
            })?,
            None => AudioFormat::default(),
        };

        *self.session.lock().await = Some(identity.clone());
        self.notifier.success(&format!(
            "Requesting song \"{}\" in {} format for {}.",
            identity.song_id, format, identity.nickname
        ));

        let request = SongRequest {
            title: identity.song_id.clone(),
            format,
        };
        let audio = tokio::spawn({
            let audio = self.audio.clone();
            async move { audio.request_song(request).await }
        });
        let channel = tokio::spawn({
            let channel = self.channel.clone();
            async move { channel.connect(identity).await }
        });

        Ok(Submission { audio, channel })
    }

    /// The local player started playing.
    pub async fn on_player_play(&self) {
        self.notifier.success("Playback started (play).");
        let Some(identity) = self.current_session().await else {
            return;
        };
        if let Err(e) = self.publisher.play(&identity).await {
            error!("Failed to publish PLAY: {}", e);
        }
    }

    /// The local player was paused.
    pub async fn on_player_pause(&self) {
        self.notifier.error("Playback paused (pause).");
        let Some(identity) = self.current_session().await else {
            return;
        };
        if let Err(e) = self.publisher.pause(&identity).await {
            error!("Failed to publish PAUSE: {}", e);
        }
    }

    /// A reaction button was pressed.
    ///
    /// Reactions are only sent while the local player is playing.
    pub async fn on_reaction(&self, reaction: &str) -> Result<(), ClientError> {
        let Some(identity) = self.current_session().await else {
            self.notifier
                .error("Cannot send a reaction: missing nickname or song.");
            return Err(ClientError::Precondition("no active session".to_string()));
        };

        if self.player.is_paused() {
            self.notifier
                .error("You cannot react while the song is paused.");
            self.notifier.toast(&PrivateNotification {
                kind: NotificationKind::PaymentError,
                title: "Action not allowed".to_string(),
                message: "You cannot send reactions while the song is paused.".to_string(),
            });
            return Err(ClientError::Precondition("player is paused".to_string()));
        }

        let reaction = reaction.parse::<ReactionType>().map_err(|e| {
            self.notifier.error(&format!("Cannot send reaction: {}.", e));
            ClientError::Precondition(e)
        })?;

        info!(nickname = %identity.nickname, reaction = reaction.as_str(), "Sending reaction");
        self.publisher.reaction(&identity, reaction).await
    }

    /// Leaves the room. Used on shutdown.
    pub async fn leave(&self) {
        self.channel.disconnect().await;
    }
}
