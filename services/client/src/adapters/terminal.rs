//! services/client/src/adapters/terminal.rs
//!
//! Implements the `RenderSurface` port by printing to standard output.

use chrono::Local;
use listening_room_core::domain::{LogLevel, NotificationKind, PrivateNotification, ReactionType};
use listening_room_core::ports::RenderSurface;
use std::io::Write;

fn wall_ts() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Success => " ok ",
        LogLevel::Error => "warn",
    }
}

fn notification_tag(kind: &NotificationKind) -> String {
    match kind {
        NotificationKind::PaymentError => "PAYMENT".to_string(),
        NotificationKind::LimitReached => "LIMIT".to_string(),
        NotificationKind::Info => "INFO".to_string(),
        NotificationKind::Other(raw) => raw.to_uppercase(),
    }
}

/// Renders the timeline, bubbles, reactions and toasts as plain text lines.
#[derive(Clone, Default)]
pub struct TerminalSurface;

impl TerminalSurface {
    pub fn new() -> Self {
        Self
    }

    fn print(&self, line: String) {
        let mut out = std::io::stdout().lock();
        // A closed stdout only loses the line.
        let _ = writeln!(out, "[{}] {}", wall_ts(), line);
    }
}

impl RenderSurface for TerminalSurface {
    fn log(&self, level: LogLevel, message: &str) {
        self.print(format!("[{}] {}", level_tag(level), message));
    }

    fn status_bubble(&self, text: &str) {
        self.print(format!("  ({})", text));
    }

    fn floating_reaction(&self, nickname: &str, reaction: ReactionType) {
        self.print(format!("  {} {}", reaction.emoji(), nickname));
    }

    fn toast(&self, notification: &PrivateNotification) {
        self.print(format!(
            "** {}: {} - {}",
            notification_tag(&notification.kind),
            notification.title,
            notification.message
        ));
    }

    fn roster_changed(&self, members: &[String]) {
        if members.is_empty() {
            self.print("  listening now: nobody".to_string());
        } else {
            self.print(format!("  listening now: {}", members.join(", ")));
        }
    }
}
