pub mod domain;
pub mod ports;

pub use domain::{
    AudioFormat, ChunkBuffer, EventKind, LogLevel, NotificationKind, PlayableAudio,
    PrivateNotification, ReactionType, RoomMessage, Roster, SessionIdentity, SongRequest,
};
pub use ports::{
    ChannelConnection, ChannelLink, ChannelTransport, ChunkStream, InboundFrame, InboundStream,
    PlayerSurface, PortError, PortResult, RenderSurface, SongStreamService,
};
