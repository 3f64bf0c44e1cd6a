//! In-call mute and camera controls
//!
//! Each control shows one of two icon states. Activating it runs the matching
//! media toggle and shows the state the toggle reports. Registry and call
//! state are never touched from here.

use super::session::MeshSession;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Microphone,
    Camera,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::Microphone => write!(f, "microphone"),
            ControlKind::Camera => write!(f, "camera"),
        }
    }
}

/// What the rendering collaborator draws for a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IconState {
    Active,
    Inactive,
}

impl IconState {
    fn from_enabled(enabled: bool) -> Self {
        if enabled {
            IconState::Active
        } else {
            IconState::Inactive
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlSurface {
    microphone: IconState,
    camera: IconState,
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSurface {
    /// Both controls start active, matching freshly acquired media
    pub fn new() -> Self {
        Self {
            microphone: IconState::Active,
            camera: IconState::Active,
        }
    }

    /// Controls are only shown once local media is ready
    pub fn is_available(&self, session: &MeshSession) -> bool {
        session.is_local_media_ready()
    }

    pub fn state(&self, kind: ControlKind) -> IconState {
        match kind {
            ControlKind::Microphone => self.microphone,
            ControlKind::Camera => self.camera,
        }
    }

    pub fn states(&self) -> [(ControlKind, IconState); 2] {
        [
            (ControlKind::Microphone, self.microphone),
            (ControlKind::Camera, self.camera),
        ]
    }

    /// Re-read both icons from the media controller
    pub fn refresh(&mut self, session: &MeshSession) {
        if !session.is_local_media_ready() {
            return;
        }
        self.microphone = IconState::from_enabled(session.media().is_mic_on());
        self.camera = IconState::from_enabled(session.media().is_camera_on());
    }

    /// Handle a click on `kind`. The icon follows the new media state and
    /// stays as it was when the toggle fails or there is nothing to toggle.
    pub async fn activate(&mut self, kind: ControlKind, session: &MeshSession) -> IconState {
        if !self.is_available(session) {
            debug!("{} control activated before local media is ready", kind);
            return self.state(kind);
        }

        match kind {
            ControlKind::Microphone => {
                if let Some(on) = session.toggle_mic() {
                    self.microphone = IconState::from_enabled(on);
                }
            }
            ControlKind::Camera => match session.toggle_camera().await {
                Ok(on) => self.camera = IconState::from_enabled(on),
                Err(e) => warn!("Camera toggle failed: {}", e),
            },
        }
        self.state(kind)
    }
}
