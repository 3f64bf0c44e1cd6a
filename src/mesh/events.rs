//! Line-oriented event envelope
//!
//! Proximity signals, user clicks and simulated remote actions arrive as
//! JSON objects tagged by `type`, one per line:
//!
//! ```text
//! {"type":"near","peer":"room:alice"}
//! {"type":"camera"}
//! {"type":"status"}
//! ```

use super::controls::{ControlKind, ControlSurface, IconState};
use super::media::LocalMediaState;
use super::registry::CallState;
use super::session::{MeshSession, MeshStatsSnapshot};
use super::Direction;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MeshEvent {
    /// Peer entered interaction range
    Near { peer: String },

    /// Peer left interaction range
    Far { peer: String },

    /// Peer is calling us
    Offer { peer: String },

    /// Peer hung up its side of a call
    Hangup {
        peer: String,
        #[serde(default = "default_hangup_direction")]
        direction: HangupDirection,
    },

    /// Microphone control clicked
    Mic,

    /// Camera control clicked
    Camera,

    /// Ask for camera and microphone
    Media {
        #[serde(default = "default_prompt")]
        prompt: bool,
    },

    /// Print a [`StatusReport`]
    Status,
}

/// Serde mirror of [`Direction`] for the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HangupDirection {
    Outgoing,
    Incoming,
}

impl From<HangupDirection> for Direction {
    fn from(d: HangupDirection) -> Self {
        match d {
            HangupDirection::Outgoing => Direction::Outgoing,
            HangupDirection::Incoming => Direction::Incoming,
        }
    }
}

fn default_hangup_direction() -> HangupDirection {
    HangupDirection::Incoming
}

fn default_prompt() -> bool {
    true
}

#[derive(Debug)]
pub enum EventError {
    Parse(String),
    Serialize(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Parse(msg) => write!(f, "Invalid mesh event: {}", msg),
            EventError::Serialize(msg) => write!(f, "Failed to serialize: {}", msg),
        }
    }
}

impl Error for EventError {}

impl MeshEvent {
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        serde_json::from_str(json).map_err(|e| EventError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Serialize(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStatus {
    pub peer: String,
    pub direction: &'static str,
    pub call_id: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlStatus {
    pub control: ControlKind,
    pub icon: IconState,
}

/// Snapshot of a session answered to `{"type":"status"}`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub local_address: String,
    pub media: &'static str,
    /// Empty while controls are hidden
    pub controls: Vec<ControlStatus>,
    pub calls: Vec<CallStatus>,
    pub stats: MeshStatsSnapshot,
}

impl StatusReport {
    pub fn capture(session: &MeshSession, controls: &ControlSurface) -> Self {
        let media = match session.media_state() {
            LocalMediaState::NotRequested => "not_requested",
            LocalMediaState::Denied => "denied",
            LocalMediaState::Ready(_) => "ready",
        };

        let controls = if controls.is_available(session) {
            controls
                .states()
                .iter()
                .map(|&(control, icon)| ControlStatus { control, icon })
                .collect()
        } else {
            Vec::new()
        };

        let mut calls = Vec::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for info in session.registry().entries(direction) {
                calls.push(CallStatus {
                    peer: info.peer.to_string(),
                    direction: direction.as_str(),
                    call_id: info.call_id,
                    active: info.state == CallState::Active,
                });
            }
        }

        Self {
            local_address: session.local_address().to_string(),
            media,
            controls,
            calls,
            stats: session.stats(),
        }
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_events() {
        assert_eq!(
            MeshEvent::from_json(r#"{"type":"near","peer":"room:alice"}"#).unwrap(),
            MeshEvent::Near { peer: "room:alice".to_string() }
        );
        assert_eq!(MeshEvent::from_json(r#"{"type":"mic"}"#).unwrap(), MeshEvent::Mic);
        assert_eq!(
            MeshEvent::from_json(r#"{"type":"media"}"#).unwrap(),
            MeshEvent::Media { prompt: true }
        );
        assert_eq!(
            MeshEvent::from_json(r#"{"type":"hangup","peer":"bob"}"#).unwrap(),
            MeshEvent::Hangup {
                peer: "bob".to_string(),
                direction: HangupDirection::Incoming,
            }
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let err = MeshEvent::from_json(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(err.to_string().starts_with("Invalid mesh event"));
        assert!(MeshEvent::from_json("near alice").is_err());
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = MeshEvent::Far { peer: "p1".to_string() }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"far","peer":"p1"}"#);
    }

    #[tokio::test]
    async fn status_report_lists_calls() {
        use crate::config::Config;
        use crate::loopback::{LoopbackMedia, LoopbackTransport, RecordingNotifier, RecordingSurface};
        use std::sync::Arc;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let session = MeshSession::new(
            "me",
            &Config::default(),
            Arc::new(LoopbackTransport::new(tx).manual_streams()),
            Arc::new(LoopbackMedia::new()),
            Arc::new(RecordingSurface::default()),
            Arc::new(RecordingNotifier::default()),
        );
        let controls = ControlSurface::new();

        let report = StatusReport::capture(&session, &controls);
        assert_eq!(report.media, "not_requested");
        assert!(report.controls.is_empty());

        session.request_local_media(true).await.unwrap();
        session.connect("p:1").await.unwrap();
        let report = StatusReport::capture(&session, &controls);
        assert_eq!(report.media, "ready");
        assert_eq!(report.controls.len(), 2);
        assert_eq!(report.calls.len(), 1);
        assert_eq!(report.calls[0].peer, "pG1");
        assert_eq!(report.calls[0].direction, "outgoing");
        assert!(!report.calls[0].active);

        let json = report.to_json().unwrap();
        assert!(json.contains(r#""calls_placed":1"#));
    }
}
