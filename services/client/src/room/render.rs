//! services/client/src/room/render.rs
//!
//! Thin helpers over the rendering surface. Every timeline line is mirrored to
//! `tracing` so the terminal log and the structured log agree.

use listening_room_core::domain::{LogLevel, PrivateNotification, ReactionType};
use listening_room_core::ports::RenderSurface;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Notifier {
    surface: Arc<dyn RenderSurface>,
}

impl Notifier {
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self { surface }
    }

    pub fn info(&self, message: &str) {
        info!("{}", message);
        self.surface.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: &str) {
        info!("{}", message);
        self.surface.log(LogLevel::Success, message);
    }

    pub fn error(&self, message: &str) {
        warn!("{}", message);
        self.surface.log(LogLevel::Error, message);
    }

    pub fn bubble(&self, text: &str) {
        self.surface.status_bubble(text);
    }

    pub fn floating_reaction(&self, nickname: &str, reaction: ReactionType) {
        self.surface.floating_reaction(nickname, reaction);
    }

    pub fn toast(&self, notification: &PrivateNotification) {
        info!(kind = ?notification.kind, "Private notification: {}", notification.title);
        self.surface.toast(notification);
    }

    pub fn roster(&self, members: &[String]) {
        self.surface.roster_changed(members);
    }
}
