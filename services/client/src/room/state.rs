//! services/client/src/room/state.rs
//!
//! Defines the application's shared state: configuration plus the adapters
//! behind every port, created once at startup.

use crate::config::Config;
use listening_room_core::ports::{
    ChannelTransport, PlayerSurface, RenderSurface, SongStreamService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub songs: Arc<dyn SongStreamService>,
    pub channel: Arc<dyn ChannelTransport>,
    pub render: Arc<dyn RenderSurface>,
    pub player: Arc<dyn PlayerSurface>,
}
