//! services/client/src/room/dispatcher.rs
//!
//! Classifies inbound broker messages and turns them into roster changes and
//! notifications. Malformed payloads are logged and dropped here; nothing
//! propagates back into the channel session.

use crate::room::{
    protocol::{decode_private_notification, decode_room_message},
    render::Notifier,
};
use listening_room_core::domain::{EventKind, ReactionType, Roster, SessionIdentity};
use listening_room_core::ports::PlayerSurface;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What a single inbound message ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A PLAY event; `added` is false if the user was already listed.
    Joined { nickname: String, added: bool },
    /// A PAUSE event; `removed` is false if the user was not listed.
    Left { nickname: String, removed: bool },
    ReactionShown { nickname: String, reaction: String },
    /// The local player is paused, so the reaction was not rendered.
    ReactionSuppressed,
    /// The message belongs to another song's room.
    ForeignRoom,
    Toast,
    Malformed,
}

pub struct Dispatcher {
    roster: Mutex<Roster>,
    notifier: Notifier,
    player: Arc<dyn PlayerSurface>,
}

impl Dispatcher {
    pub fn new(notifier: Notifier, player: Arc<dyn PlayerSurface>) -> Self {
        Self {
            roster: Mutex::new(Roster::new()),
            notifier,
            player,
        }
    }

    pub async fn roster(&self) -> Roster {
        self.roster.lock().await.clone()
    }

    /// Handles a message from the song's room topic.
    pub async fn on_room_message(&self, active: &SessionIdentity, raw: &str) -> DispatchOutcome {
        let msg = match decode_room_message(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping room message: {}", e);
                return DispatchOutcome::Malformed;
            }
        };

        if msg.song_id.is_empty() || msg.song_id != active.song_id {
            debug!(
                song_id = %msg.song_id,
                active = %active.song_id,
                "Ignoring message for another room"
            );
            return DispatchOutcome::ForeignRoom;
        }

        match msg.kind {
            EventKind::Play => {
                let added = {
                    let mut roster = self.roster.lock().await;
                    let added = roster.insert(&msg.nickname);
                    if added {
                        self.notifier.roster(roster.members());
                    }
                    added
                };
                self.notifier.success(&format!(
                    "{} started playing {}.",
                    msg.nickname, msg.song_id
                ));
                self.notifier.bubble(&format!("{} ▶", msg.nickname));
                DispatchOutcome::Joined {
                    nickname: msg.nickname,
                    added,
                }
            }
            EventKind::Pause => {
                let removed = {
                    let mut roster = self.roster.lock().await;
                    let removed = roster.remove(&msg.nickname);
                    if removed {
                        self.notifier.roster(roster.members());
                    }
                    removed
                };
                self.notifier
                    .error(&format!("{} paused {}.", msg.nickname, msg.song_id));
                self.notifier.bubble(&format!("{} ⏸", msg.nickname));
                DispatchOutcome::Left {
                    nickname: msg.nickname,
                    removed,
                }
            }
            EventKind::Reaction => {
                if self.player.is_paused() {
                    debug!("Reaction from {} ignored while paused", msg.nickname);
                    return DispatchOutcome::ReactionSuppressed;
                }
                let content = msg.content.unwrap_or_default();
                self.notifier
                    .success(&format!("{} sent reaction: {}", msg.nickname, content));
                match content.parse::<ReactionType>() {
                    Ok(reaction) => self.notifier.floating_reaction(&msg.nickname, reaction),
                    Err(e) => debug!("No animation for reaction: {}", e),
                }
                DispatchOutcome::ReactionShown {
                    nickname: msg.nickname,
                    reaction: content,
                }
            }
        }
    }

    /// Handles a message from the user's private queue.
    pub fn on_private_message(&self, raw: &str) -> DispatchOutcome {
        match decode_private_notification(raw) {
            Ok(notification) => {
                self.notifier.toast(&notification);
                DispatchOutcome::Toast
            }
            Err(e) => {
                warn!("Dropping private notification: {}", e);
                DispatchOutcome::Malformed
            }
        }
    }
}
