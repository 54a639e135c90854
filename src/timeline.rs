//! Start/stop log keyed by video time.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Stopped,
}

impl EventKind {
    fn describe(&self) -> &'static str {
        match self {
            EventKind::Started => "Started recording",
            EventKind::Stopped => "Stopped recording",
        }
    }
}

/// One recording transition.
///
/// `video_time` keeps full precision; only the rendered timestamp is truncated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub video_time: f64,
    pub kind: EventKind,
}

impl TimelineEvent {
    pub fn started(video_time: f64) -> Self {
        Self {
            video_time,
            kind: EventKind::Started,
        }
    }

    pub fn stopped(video_time: f64) -> Self {
        Self {
            video_time,
            kind: EventKind::Stopped,
        }
    }

    /// `HH:MM:SS`, sub-second part dropped.
    pub fn timestamp(&self) -> String {
        format_video_time(self.video_time)
    }
}

impl fmt::Display for TimelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.timestamp(), self.kind.describe())
    }
}

/// Render seconds of video as `HH:MM:SS`. Hours keep counting past 24.
pub fn format_video_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

/// Append-only ordered event list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TimelineEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Human-readable lines, one per event.
    pub fn log_lines(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }

    pub fn into_events(self) -> Vec<TimelineEvent> {
        self.events
    }
}
