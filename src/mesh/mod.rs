//! Peer mesh call lifecycle
//!
//! This module provides the proximity-driven audio/video mesh:
//! - Peer address sanitization
//! - Local camera/microphone control
//! - Per-direction call registry
//! - Call lifecycle orchestration
//! - In-call mute/camera controls

pub mod identity;
pub mod media;
pub mod registry;
pub mod transport;
pub mod render;
pub mod notify;
pub mod events;
pub mod controls;
pub mod session;

pub use identity::{sanitize, PeerAddress};
pub use media::{LocalMediaController, LocalMediaState, MediaStream, MediaTrack, TrackKind};
pub use registry::{CallState, PeerRegistry};
pub use session::{MeshSession, MeshStats};
pub use controls::{ControlKind, ControlSurface, IconState};
pub use events::MeshEvent;

use std::error::Error;
use std::fmt;

/// Which side placed a call.
///
/// A peer may hold one call in each direction at the same time; the two
/// are independent mesh edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Placed by us after a proximity-connect
    Outgoing,
    /// Placed by the remote peer and answered by us
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local capture errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Camera/microphone request refused by the user or the platform
    PermissionDenied(String),
    /// No capture device present, or re-acquisition failed
    DeviceUnavailable(String),
    /// No local stream has been acquired yet
    NotReady,
    /// The platform never answered the device request
    Timeout,
    /// Local media was stopped while the request was in flight
    Stopped,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            MediaError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            MediaError::NotReady => write!(f, "Local media is not ready"),
            MediaError::Timeout => write!(f, "Timed out waiting for media device"),
            MediaError::Stopped => write!(f, "Local media was stopped"),
        }
    }
}

impl Error for MediaError {}

/// Errors reported by the peer transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Placing a call failed
    Call(String),
    /// Answering an offer failed
    Answer(String),
    /// Rendezvous/identity channel failure
    Signaling(String),
    /// Call setup did not complete in time
    Timeout,
    /// The call was already closed
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Call(msg) => write!(f, "Call failed: {}", msg),
            TransportError::Answer(msg) => write!(f, "Answer failed: {}", msg),
            TransportError::Signaling(msg) => write!(f, "Signaling error: {}", msg),
            TransportError::Timeout => write!(f, "Call setup timed out"),
            TransportError::Closed => write!(f, "Call already closed"),
        }
    }
}

impl Error for TransportError {}

/// Mesh-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Camera/microphone request refused
    PermissionDenied(String),
    /// No capture device present (including mid-session re-acquisition)
    DeviceUnavailable(String),
    /// Call placement, answer or signaling failure
    TransportError(TransportError),
    /// Suppressed duplicate; never surfaced to the user
    DuplicateIgnored,
    /// Outgoing call requested before local media was ready
    MediaNotReady,
}

impl MeshError {
    /// Text shown to the user by the notification collaborator
    pub fn user_message(&self) -> String {
        match self {
            MeshError::PermissionDenied(_) => {
                "No webcam or microphone found, or permission is blocked".to_string()
            }
            MeshError::DeviceUnavailable(_) => "Could not access camera".to_string(),
            MeshError::TransportError(e) => format!("Video call failed: {}", e),
            MeshError::DuplicateIgnored => String::new(),
            MeshError::MediaNotReady => "Turn on your camera or microphone to join video".to_string(),
        }
    }

    /// Whether this outcome is a suppressed no-op rather than a failure
    pub fn is_benign(&self) -> bool {
        matches!(self, MeshError::DuplicateIgnored)
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            MeshError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            MeshError::TransportError(e) => write!(f, "Transport error: {}", e),
            MeshError::DuplicateIgnored => write!(f, "Duplicate ignored"),
            MeshError::MediaNotReady => write!(f, "Local media is not ready"),
        }
    }
}

impl Error for MeshError {}

impl From<MediaError> for MeshError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied(msg) => MeshError::PermissionDenied(msg),
            MediaError::DeviceUnavailable(msg) => MeshError::DeviceUnavailable(msg),
            MediaError::NotReady | MediaError::Stopped => MeshError::MediaNotReady,
            MediaError::Timeout => MeshError::DeviceUnavailable("device request timed out".to_string()),
        }
    }
}

impl From<TransportError> for MeshError {
    fn from(err: TransportError) -> Self {
        MeshError::TransportError(err)
    }
}
