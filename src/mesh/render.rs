//! Render sinks
//!
//! A sink is the attachment point for one stream on the rendering
//! collaborator. Each call owns exactly one; the local preview owns another.

use super::identity::PeerAddress;
use super::media::MediaStream;
use std::sync::Arc;

/// What the rendering collaborator needs to know about a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDescriptor {
    /// Unique sink id
    pub id: String,
    /// Peer whose media the sink shows (our own address for the preview)
    pub peer: PeerAddress,
    /// Suppress audio playback (local preview)
    pub muted: bool,
}

/// Mount point for sinks, e.g. a video grid.
///
/// Must accept any number of concurrently mounted sinks in any order.
/// Mounting a sink again replaces its stream. Unmounting an id that was
/// never mounted is a no-op.
pub trait RenderSurface: Send + Sync {
    /// Show `stream` through the sink; playback starts once media is loaded
    fn mount(&self, sink: &SinkDescriptor, stream: &Arc<MediaStream>);

    /// Remove the sink from the display area
    fn unmount(&self, sink_id: &str);
}

/// Owned rendering target bound to one call or to the local preview
pub struct RenderSink {
    descriptor: SinkDescriptor,
    surface: Arc<dyn RenderSurface>,
    stream: Option<Arc<MediaStream>>,
    released: bool,
}

impl RenderSink {
    pub fn new(surface: Arc<dyn RenderSurface>, peer: PeerAddress, muted: bool) -> Self {
        Self {
            descriptor: SinkDescriptor {
                id: format!("sink-{}", uuid::Uuid::new_v4()),
                peer,
                muted,
            },
            surface,
            stream: None,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&Arc<MediaStream>> {
        self.stream.as_ref()
    }

    /// Attach `stream`, replacing any previous one. Ignored after release.
    pub fn attach(&mut self, stream: Arc<MediaStream>) {
        if self.released {
            return;
        }
        self.surface.mount(&self.descriptor, &stream);
        self.stream = Some(stream);
    }

    /// Detach from the surface. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.stream.take().is_some() {
            self.surface.unmount(&self.descriptor.id);
        }
    }
}

impl Drop for RenderSink {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RenderSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSink")
            .field("descriptor", &self.descriptor)
            .field("attached", &self.is_attached())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::RecordingSurface;
    use crate::mesh::identity::sanitize;

    #[test]
    fn release_unmounts_only_attached_sinks() {
        let surface = Arc::new(RecordingSurface::default());
        let mut idle = RenderSink::new(surface.clone(), sanitize("p1"), false);
        idle.release();
        assert_eq!(surface.unmount_count(), 0);

        let mut sink = RenderSink::new(surface.clone(), sanitize("p2"), false);
        sink.attach(MediaStream::new(Vec::new()));
        assert!(surface.is_mounted(sink.id()));
        sink.release();
        sink.release();
        assert!(!surface.is_mounted(sink.id()));
        assert_eq!(surface.unmount_count(), 1);
    }

    #[test]
    fn attach_after_release_is_ignored() {
        let surface = Arc::new(RecordingSurface::default());
        let mut sink = RenderSink::new(surface.clone(), sanitize("p1"), false);
        sink.release();
        sink.attach(MediaStream::new(Vec::new()));
        assert!(!sink.is_attached());
        assert_eq!(surface.mounted_count(), 0);
    }

    #[test]
    fn drop_releases() {
        let surface = Arc::new(RecordingSurface::default());
        let id = {
            let mut sink = RenderSink::new(surface.clone(), sanitize("p1"), true);
            sink.attach(MediaStream::new(Vec::new()));
            sink.id().to_string()
        };
        assert!(!surface.is_mounted(&id));
    }
}
