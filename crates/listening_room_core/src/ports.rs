//! crates/listening_room_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the client's core logic.
//! These traits form the boundary of the hexagonal architecture: the streaming
//! backend, the messaging broker and the rendering surface all sit behind them.

use crate::domain::{LogLevel, PlayableAudio, PrivateNotification, ReactionType, SongRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors of the underlying transports.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Rejected by the remote peer: {0}")]
    Rejected(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Data events of a streamed song. An `Err` item is the error event and the end
/// of the stream is the end event.
pub type ChunkStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

/// Every frame the broker delivers on one connection, in delivery order.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundFrame> + Send>>;

//=========================================================================================
// Streamed RPC
//=========================================================================================

#[async_trait]
pub trait SongStreamService: Send + Sync {
    /// Opens a server-streamed call for the requested song.
    async fn stream_song(&self, request: &SongRequest) -> PortResult<ChunkStream>;
}

//=========================================================================================
// Publish/Subscribe Channel
//=========================================================================================

/// A message delivered on one of the connection's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub subscription_id: String,
    pub destination: String,
    pub body: String,
}

/// An open connection plus its inbound frames.
pub struct ChannelLink {
    pub connection: Box<dyn ChannelConnection>,
    pub frames: InboundStream,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Connects to the broker on behalf of `nickname`.
    async fn connect(&self, nickname: &str) -> PortResult<ChannelLink>;
}

#[async_trait]
pub trait ChannelConnection: Send + Sync {
    /// Subscribes to `destination` and returns the subscription id.
    async fn subscribe(&self, destination: &str) -> PortResult<String>;

    async fn unsubscribe(&self, subscription_id: &str) -> PortResult<()>;

    async fn send(&self, destination: &str, body: &str) -> PortResult<()>;

    /// Closes the connection. Resolves once the broker acknowledged it.
    async fn disconnect(&self) -> PortResult<()>;
}

//=========================================================================================
// Rendering Surface
//=========================================================================================

/// Where the client shows things to the user. Rendering never fails.
pub trait RenderSurface: Send + Sync {
    /// Appends a line to the timeline.
    fn log(&self, level: LogLevel, message: &str);

    /// A short-lived notification (play/pause of another listener).
    fn status_bubble(&self, text: &str);

    /// A floating reaction naming the sender.
    fn floating_reaction(&self, nickname: &str, reaction: ReactionType);

    /// A dismissible toast for private notifications.
    fn toast(&self, notification: &PrivateNotification);

    fn roster_changed(&self, members: &[String]);
}

#[async_trait]
pub trait PlayerSurface: Send + Sync {
    /// Makes the player visible. Called once the first chunk arrives.
    fn show(&self);

    /// Loads the assembled audio and starts playback.
    async fn load_and_play(&self, audio: PlayableAudio) -> PortResult<()>;

    fn is_paused(&self) -> bool;
}
