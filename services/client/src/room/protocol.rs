//! services/client/src/room/protocol.rs
//!
//! Defines the JSON payloads exchanged with the reactions broker.
//!
//! Field names follow the broker's models (`idCancion`, `tipo`, `contenido`,
//! `titulo`, `mensaje`). The English spellings are accepted on input too.

use listening_room_core::domain::{EventKind, NotificationKind, PrivateNotification, RoomMessage};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Room Messages (both directions)
//=========================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    #[serde(rename = "PLAY")]
    Play,
    #[serde(rename = "PAUSE")]
    Pause,
    #[serde(rename = "REACCION", alias = "REACTION")]
    Reaction,
}

/// The payload published to `/app/*` and broadcast on the room topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoomPayload {
    pub nickname: String,
    #[serde(rename = "idCancion", alias = "songId", default)]
    pub song_id: String,
    #[serde(rename = "tipo", alias = "kind")]
    pub kind: WireKind,
    #[serde(rename = "contenido", alias = "content", default)]
    pub content: Option<String>,
}

/// Why an inbound room payload was refused.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reaction from '{0}' has no content")]
    MissingReactionContent(String),
}

impl From<&RoomMessage> for RoomPayload {
    fn from(msg: &RoomMessage) -> Self {
        Self {
            nickname: msg.nickname.clone(),
            song_id: msg.song_id.clone(),
            kind: match msg.kind {
                EventKind::Play => WireKind::Play,
                EventKind::Pause => WireKind::Pause,
                EventKind::Reaction => WireKind::Reaction,
            },
            content: msg.content.clone(),
        }
    }
}

impl RoomPayload {
    fn into_domain(self) -> Result<RoomMessage, PayloadError> {
        let kind = match self.kind {
            WireKind::Play => EventKind::Play,
            WireKind::Pause => EventKind::Pause,
            WireKind::Reaction => EventKind::Reaction,
        };
        // PLAY/PAUSE may carry a descriptive string; only reactions need one.
        let content = self.content.filter(|c| !c.trim().is_empty());
        if kind == EventKind::Reaction && content.is_none() {
            return Err(PayloadError::MissingReactionContent(self.nickname));
        }
        Ok(RoomMessage {
            nickname: self.nickname,
            song_id: self.song_id,
            kind,
            content: if kind == EventKind::Reaction { content } else { None },
        })
    }
}

pub fn encode_room_message(msg: &RoomMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RoomPayload::from(msg))
}

pub fn decode_room_message(raw: &str) -> Result<RoomMessage, PayloadError> {
    serde_json::from_str::<RoomPayload>(raw)?.into_domain()
}

//=========================================================================================
// Private Notifications (server -> one user)
//=========================================================================================

#[derive(Deserialize, Debug)]
struct NotificationPayload {
    #[serde(rename = "tipo", alias = "kind", default)]
    kind: String,
    #[serde(rename = "titulo", alias = "title", default)]
    title: String,
    #[serde(rename = "mensaje", alias = "message", default)]
    message: String,
}

pub fn decode_private_notification(raw: &str) -> Result<PrivateNotification, serde_json::Error> {
    let payload: NotificationPayload = serde_json::from_str(raw)?;
    Ok(PrivateNotification {
        kind: notification_kind(&payload.kind),
        title: payload.title,
        message: payload.message,
    })
}

fn notification_kind(raw: &str) -> NotificationKind {
    match raw {
        "ERROR_PAGO" => NotificationKind::PaymentError,
        "LIMITE_ALCANZADO" => NotificationKind::LimitReached,
        "INFO" => NotificationKind::Info,
        other => NotificationKind::Other(other.to_string()),
    }
}
