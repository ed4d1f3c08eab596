pub mod audio;
pub mod dispatcher;
pub mod protocol;
pub mod publisher;
pub mod render;
pub mod session;
pub mod state;
pub mod wiring;

// Re-export the entry point the binary drives.
pub use session::ChannelStatus;
pub use state::AppState;
pub use wiring::{RoomClient, Submission};
