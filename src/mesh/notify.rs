//! Notification collaborator boundary

use super::identity::PeerAddress;
use super::MeshError;

/// Something worth showing to the user or reporting upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Local capture stream acquired
    LocalMediaReady,
    /// Tell the room/network layer that our video is up
    VideoConnected,
    /// A failure the user should see
    Error {
        error: MeshError,
        message: String,
        peer: Option<PeerAddress>,
    },
}

impl Notification {
    pub fn error(error: MeshError, peer: Option<PeerAddress>) -> Self {
        let message = error.user_message();
        Notification::Error { error, message, peer }
    }
}

/// Receives notifications for display
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}
