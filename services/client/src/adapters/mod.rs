pub mod file_player;
pub mod grpc_web;
pub mod stomp;
pub mod terminal;

pub use file_player::{FilePlayer, PlayerEvent};
pub use grpc_web::GrpcWebSongAdapter;
pub use stomp::StompTransport;
pub use terminal::TerminalSurface;
