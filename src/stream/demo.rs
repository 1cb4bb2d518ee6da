//! Emitter sets behind the two demo push endpoints.

use std::time::Duration;

use rand::seq::IndexedRandom;

use super::emitter::PeriodicEmitter;
use super::frame::Frame;
use crate::render;

/// Alert labels sent on the `alert` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Info,
    Warning,
    Success,
    Update,
}

impl AlertKind {
    pub const ALL: [AlertKind; 4] = [
        AlertKind::Info,
        AlertKind::Warning,
        AlertKind::Success,
        AlertKind::Update,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AlertKind::Info => "Info",
            AlertKind::Warning => "Warning",
            AlertKind::Success => "Success",
            AlertKind::Update => "Update",
        }
    }

    pub fn background(self) -> &'static str {
        match self {
            AlertKind::Info => "bg-blue-200",
            AlertKind::Warning => "bg-yellow-200",
            AlertKind::Success => "bg-green-200",
            AlertKind::Update => "bg-purple-200",
        }
    }
}

/// Status labels sent on the `status` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Online,
    Processing,
    Idle,
    Active,
    Busy,
}

impl StatusKind {
    /// Labels the push stream picks from.
    pub const STREAMED: [StatusKind; 4] = [
        StatusKind::Online,
        StatusKind::Processing,
        StatusKind::Idle,
        StatusKind::Active,
    ];

    /// Labels the one-shot `/status` endpoint picks from.
    pub const ALL: [StatusKind; 5] = [
        StatusKind::Online,
        StatusKind::Processing,
        StatusKind::Idle,
        StatusKind::Active,
        StatusKind::Busy,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatusKind::Online => "Online",
            StatusKind::Processing => "Processing",
            StatusKind::Idle => "Idle",
            StatusKind::Active => "Active",
            StatusKind::Busy => "Busy",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            StatusKind::Online => "🟢",
            StatusKind::Processing => "⚡",
            StatusKind::Idle => "💤",
            StatusKind::Active => "🔥",
            StatusKind::Busy => "⛔",
        }
    }
}

fn clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn pick<T: Copy>(options: &[T]) -> T {
    // The option tables are non-empty constants.
    *options.choose(&mut rand::rng()).unwrap_or(&options[0])
}

/// Greeting and emitters for `/events`: one `message` every two seconds.
pub fn basic() -> (Frame, Vec<PeriodicEmitter>) {
    let greeting = Frame::new("message", render::basic_connected());
    let emitters = vec![PeriodicEmitter::new(
        "message",
        Duration::from_secs(2),
        |n| render::basic_update(n, &clock()),
    )];
    (greeting, emitters)
}

/// Greeting and emitters for `/multi-events`: `message` every 2s, `alert`
/// every 5s and `status` every 3s.
pub fn multi() -> (Frame, Vec<PeriodicEmitter>) {
    let greeting = Frame::new("connected", render::multi_connected());
    let emitters = vec![
        PeriodicEmitter::new("message", Duration::from_secs(2), |n| {
            render::multi_message(n, &clock())
        }),
        PeriodicEmitter::new("alert", Duration::from_secs(5), |n| {
            let kind = pick(&AlertKind::ALL);
            render::alert(kind.background(), kind.label(), n)
        }),
        PeriodicEmitter::new("status", Duration::from_secs(3), |_| {
            let kind = pick(&StatusKind::STREAMED);
            render::status_badge(kind.icon(), kind.label())
        }),
    ];
    (greeting, emitters)
}

/// Body of the one-shot `/status` fragment.
pub fn random_status() -> String {
    render::status_panel(pick(&StatusKind::ALL).label(), &clock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_styles_are_distinct() {
        let styles: std::collections::HashSet<_> =
            AlertKind::ALL.iter().map(|k| k.background()).collect();
        assert_eq!(styles.len(), AlertKind::ALL.len());
        assert_eq!(AlertKind::Warning.background(), "bg-yellow-200");
    }

    #[test]
    fn test_status_icons() {
        assert_eq!(StatusKind::Online.icon(), "🟢");
        assert_eq!(StatusKind::Processing.icon(), "⚡");
        assert_eq!(StatusKind::Idle.icon(), "💤");
        assert_eq!(StatusKind::Active.icon(), "🔥");
    }

    #[test]
    fn test_multi_emitter_layout() {
        let (greeting, emitters) = multi();
        assert_eq!(greeting.event, "connected");
        let layout: Vec<_> = emitters
            .iter()
            .map(|e| (e.event().to_string(), e.interval().as_secs()))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("message".to_string(), 2),
                ("alert".to_string(), 5),
                ("status".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_basic_emitter_layout() {
        let (greeting, emitters) = basic();
        assert_eq!(greeting.event, "message");
        assert!(greeting.data.contains("Connected to SSE stream"));
        assert_eq!(emitters.len(), 1);
        assert_eq!(emitters[0].interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_random_status_uses_known_label() {
        let html = random_status();
        assert!(StatusKind::ALL.iter().any(|k| html.contains(k.label())));
    }
}
