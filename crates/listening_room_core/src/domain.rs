//! crates/listening_room_core/src/domain.rs
//!
//! Defines the pure, core data structures for the listening room client.
//! These types are independent of any transport or serialization format.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Session Identity
//=========================================================================================

/// Who is listening and to which song. The song id doubles as the room key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub nickname: String,
    pub song_id: String,
}

impl SessionIdentity {
    /// Builds an identity from raw user input.
    ///
    /// Both values are trimmed; returns `None` if either one ends up empty.
    pub fn parse(nickname: &str, song_id: &str) -> Option<Self> {
        let nickname = nickname.trim();
        let song_id = song_id.trim();
        if nickname.is_empty() || song_id.is_empty() {
            return None;
        }
        Some(Self {
            nickname: nickname.to_string(),
            song_id: song_id.to_string(),
        })
    }
}

//=========================================================================================
// Song Requests and Audio
//=========================================================================================

/// The container format requested from the streaming backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            other => Err(format!("unsupported audio format '{}'", other)),
        }
    }
}

/// A request for one song, keyed by `(title, format)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    pub title: String,
    pub format: AudioFormat,
}

/// The ordered byte blocks received for one streamed request.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Bytes>,
    byte_len: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Bytes) {
        self.byte_len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Number of chunks held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenates every chunk in push order and leaves the buffer empty.
    pub fn take_concatenated(&mut self) -> Bytes {
        let chunks = std::mem::take(&mut self.chunks);
        let mut joined = BytesMut::with_capacity(self.byte_len);
        for chunk in chunks {
            joined.extend_from_slice(&chunk);
        }
        self.byte_len = 0;
        joined.freeze()
    }
}

/// A fully assembled song, ready to hand to the player.
#[derive(Debug, Clone)]
pub struct PlayableAudio {
    pub title: String,
    pub format: AudioFormat,
    pub data: Bytes,
}

//=========================================================================================
// Room Events
//=========================================================================================

/// What a participant did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Play,
    Pause,
    Reaction,
}

/// One event broadcast to everyone in a song's room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub nickname: String,
    pub song_id: String,
    pub kind: EventKind,
    /// Only set for reactions (the reaction type).
    pub content: Option<String>,
}

impl RoomMessage {
    pub fn play(identity: &SessionIdentity) -> Self {
        Self::without_content(identity, EventKind::Play)
    }

    pub fn pause(identity: &SessionIdentity) -> Self {
        Self::without_content(identity, EventKind::Pause)
    }

    pub fn reaction(identity: &SessionIdentity, reaction: ReactionType) -> Self {
        Self {
            nickname: identity.nickname.clone(),
            song_id: identity.song_id.clone(),
            kind: EventKind::Reaction,
            content: Some(reaction.as_str().to_string()),
        }
    }

    fn without_content(identity: &SessionIdentity, kind: EventKind) -> Self {
        Self {
            nickname: identity.nickname.clone(),
            song_id: identity.song_id.clone(),
            kind,
            content: None,
        }
    }
}

/// The reactions a listener can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionType {
    Like,
    Heart,
    Fire,
}

impl ReactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionType::Like => "like",
            ReactionType::Heart => "heart",
            ReactionType::Fire => "fire",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ReactionType::Like => "👍",
            ReactionType::Heart => "❤️",
            ReactionType::Fire => "🔥",
        }
    }
}

impl FromStr for ReactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "like" => Ok(ReactionType::Like),
            "heart" => Ok(ReactionType::Heart),
            "fire" => Ok(ReactionType::Fire),
            other => Err(format!("unknown reaction '{}'", other)),
        }
    }
}

//=========================================================================================
// Private Notifications
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentError,
    LimitReached,
    Info,
    Other(String),
}

/// A message the server sends to one user only (payment failures, limits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

//=========================================================================================
// Roster
//=========================================================================================

/// Nicknames believed to be playing right now, in the order they were first seen.
///
/// Only the last reported transition per user is tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    members: Vec<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the nickname was already present.
    pub fn insert(&mut self, nickname: &str) -> bool {
        if self.contains(nickname) {
            return false;
        }
        self.members.push(nickname.to_string());
        true
    }

    /// Returns `false` if the nickname was not present.
    pub fn remove(&mut self, nickname: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != nickname);
        self.members.len() != before
    }

    pub fn contains(&self, nickname: &str) -> bool {
        self.members.iter().any(|m| m == nickname)
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Severity of a line in the client's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_requires_non_empty_trimmed_values() {
        let identity = SessionIdentity::parse("  ana ", " song1").unwrap();
        assert_eq!(identity.nickname, "ana");
        assert_eq!(identity.song_id, "song1");

        assert!(SessionIdentity::parse("   ", "song1").is_none());
        assert!(SessionIdentity::parse("ana", "").is_none());
    }

    #[test]
    fn chunk_buffer_concatenates_in_push_order_and_empties() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(Bytes::from_static(b"ID3"));
        buffer.push(Bytes::new());
        buffer.push(Bytes::from_static(b"\x00\x01\x02"));
        buffer.push(Bytes::from_static(b"tail"));

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.byte_len(), 10);

        let joined = buffer.take_concatenated();
        assert_eq!(&joined[..], b"ID3\x00\x01\x02tail");
        assert!(buffer.is_empty());
        assert_eq!(buffer.byte_len(), 0);
        assert!(buffer.take_concatenated().is_empty());
    }

    #[test]
    fn audio_format_parsing() {
        assert_eq!("MP3".parse::<AudioFormat>(), Ok(AudioFormat::Mp3));
        assert_eq!(" wav ".parse::<AudioFormat>(), Ok(AudioFormat::Wav));
        assert!("flac".parse::<AudioFormat>().is_err());
        assert_eq!(AudioFormat::default().mime_type(), "audio/mpeg");
    }

    #[test]
    fn roster_play_then_pause_round_trip() {
        let mut roster = Roster::new();
        assert!(roster.insert("bob"));
        assert!(!roster.insert("bob"));
        assert!(roster.insert("ana"));
        assert_eq!(roster.members(), ["bob".to_string(), "ana".to_string()]);

        assert!(roster.remove("bob"));
        assert!(!roster.contains("bob"));
        assert!(!roster.remove("bob"));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn reaction_message_carries_content() {
        let identity = SessionIdentity::parse("ana", "song1").unwrap();
        let msg = RoomMessage::reaction(&identity, ReactionType::Fire);
        assert_eq!(msg.kind, EventKind::Reaction);
        assert_eq!(msg.content.as_deref(), Some("fire"));
        assert_eq!(RoomMessage::play(&identity).content, None);
    }
}
