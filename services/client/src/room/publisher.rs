//! services/client/src/room/publisher.rs
//!
//! Builds outbound room messages and sends them through the channel session.

use crate::{
    config::ChannelConfig,
    error::ClientError,
    room::{protocol::encode_room_message, session::SessionManager},
};
use listening_room_core::domain::{ReactionType, RoomMessage, SessionIdentity};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Publisher {
    session: Arc<SessionManager>,
    config: ChannelConfig,
}

impl Publisher {
    pub fn new(session: Arc<SessionManager>, config: ChannelConfig) -> Self {
        Self { session, config }
    }

    /// Serializes `msg` and sends it. Disconnected sessions only warn.
    pub async fn publish(&self, destination: &str, msg: &RoomMessage) -> Result<(), ClientError> {
        let body = encode_room_message(msg)?;
        debug!(destination, kind = ?msg.kind, "Publishing room message");
        self.session.send(destination, &body).await
    }

    pub async fn play(&self, identity: &SessionIdentity) -> Result<(), ClientError> {
        self.publish(&self.config.play_destination, &RoomMessage::play(identity))
            .await
    }

    pub async fn pause(&self, identity: &SessionIdentity) -> Result<(), ClientError> {
        self.publish(&self.config.pause_destination, &RoomMessage::pause(identity))
            .await
    }

    pub async fn reaction(
        &self,
        identity: &SessionIdentity,
        reaction: ReactionType,
    ) -> Result<(), ClientError> {
        self.publish(
            &self.config.reaction_destination,
            &RoomMessage::reaction(identity, reaction),
        )
        .await
    }
}
