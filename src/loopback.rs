//! In-process collaborators
//!
//! A transport that "calls" simulated peers, a synthetic capture platform,
//! and recording surface/notifier implementations. The binary runs a
//! session on top of these; the test suite uses them as doubles.

use crate::mesh::identity::PeerAddress;
use crate::mesh::media::{MediaConstraints, MediaPlatform, MediaStream, MediaTrack, PermissionState, TrackKind};
use crate::mesh::notify::{Notification, Notifier};
use crate::mesh::render::{RenderSurface, SinkDescriptor};
use crate::mesh::transport::{IncomingOffer, PeerTransport, TransportCall, TransportEvent, TransportEventSender};
use crate::mesh::{Direction, MediaError, TransportError};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Capture track that only tracks its flags
pub struct SyntheticTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl SyntheticTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{}-{}", kind, uuid::Uuid::new_v4()),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

fn synthetic_stream(constraints: MediaConstraints) -> Arc<MediaStream> {
    let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
    if constraints.audio {
        tracks.push(SyntheticTrack::new(TrackKind::Audio));
    }
    if constraints.video {
        tracks.push(SyntheticTrack::new(TrackKind::Video));
    }
    MediaStream::new(tracks)
}

/// Simulated camera/microphone platform
pub struct LoopbackMedia {
    deny: AtomicBool,
    camera_available: AtomicBool,
    prior_grant: bool,
    hang: bool,
    delay: Option<Duration>,
    requests: AtomicUsize,
    last_stream: Mutex<Option<Arc<MediaStream>>>,
}

impl LoopbackMedia {
    pub fn new() -> Self {
        Self {
            deny: AtomicBool::new(false),
            camera_available: AtomicBool::new(true),
            prior_grant: false,
            hang: false,
            delay: None,
            requests: AtomicUsize::new(0),
            last_stream: Mutex::new(None),
        }
    }

    /// Refuse every device request
    pub fn deny(self) -> Self {
        self.deny.store(true, Ordering::Relaxed);
        self
    }

    /// Report a stored microphone grant to permission queries
    pub fn with_prior_grant(mut self) -> Self {
        self.prior_grant = true;
        self
    }

    /// Never answer device requests
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Answer device requests only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_camera_available(&self, available: bool) {
        self.camera_available.store(available, Ordering::Relaxed);
    }

    /// Number of `get_user_media` calls so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Most recent stream handed out
    pub fn last_stream(&self) -> Option<Arc<MediaStream>> {
        self.last_stream.lock().clone()
    }
}

impl Default for LoopbackMedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaPlatform for LoopbackMedia {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<Arc<MediaStream>, MediaError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny.load(Ordering::Relaxed) {
            return Err(MediaError::PermissionDenied("request dismissed".to_string()));
        }
        if constraints.video && !self.camera_available.load(Ordering::Relaxed) {
            return Err(MediaError::DeviceUnavailable("no camera found".to_string()));
        }
        let stream = synthetic_stream(constraints);
        *self.last_stream.lock() = Some(stream.clone());
        Ok(stream)
    }

    async fn query_permission(&self, _kind: TrackKind) -> PermissionState {
        if self.prior_grant {
            PermissionState::Granted
        } else if self.deny.load(Ordering::Relaxed) {
            PermissionState::Denied
        } else {
            PermissionState::Prompt
        }
    }
}

fn new_call_id() -> String {
    format!("call-{}", uuid::Uuid::new_v4())
}

/// A simulated call; records what the session did to it
pub struct LoopbackCall {
    id: String,
    peer: PeerAddress,
    direction: Direction,
    sent_stream: bool,
    video_track: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl LoopbackCall {
    pub fn new(peer: PeerAddress, direction: Direction) -> Arc<Self> {
        Self::with_stream(new_call_id(), peer, direction, None)
    }

    fn with_stream(
        id: String,
        peer: PeerAddress,
        direction: Direction,
        stream: Option<&Arc<MediaStream>>,
    ) -> Arc<Self> {
        let video_track = stream
            .and_then(|s| s.first_track(TrackKind::Video))
            .map(|t| t.id().to_string());
        Arc::new(Self {
            id,
            peer,
            direction,
            sent_stream: stream.is_some(),
            video_track: Mutex::new(video_track),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Whether we sent local media on this call
    pub fn sent_stream(&self) -> bool {
        self.sent_stream
    }

    /// Id of the video track currently being sent
    pub fn video_track_id(&self) -> Option<String> {
        self.video_track.lock().clone()
    }
}

impl TransportCall for LoopbackCall {
    fn id(&self) -> &str {
        &self.id
    }

    fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn replace_track(&self, kind: TrackKind, track: Option<Arc<dyn MediaTrack>>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if kind == TrackKind::Video {
            *self.video_track.lock() = track.map(|t| t.id().to_string());
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            debug!("Loopback {} call {} with {} closed", self.direction, self.id, self.peer);
        }
    }
}

/// Shared view of whether an offer was declined
#[derive(Default)]
pub struct OfferProbe {
    declined: AtomicBool,
}

impl OfferProbe {
    pub fn was_declined(&self) -> bool {
        self.declined.load(Ordering::Relaxed)
    }
}

/// An inbound offer from a simulated peer
pub struct LoopbackOffer {
    peer: String,
    call_id: String,
    inner: Arc<Inner>,
    probe: Arc<OfferProbe>,
}

impl LoopbackOffer {
    pub fn probe(&self) -> Arc<OfferProbe> {
        self.probe.clone()
    }
}

#[async_trait]
impl IncomingOffer for LoopbackOffer {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn call_id(&self) -> &str {
        &self.call_id
    }

    async fn answer(
        self: Box<Self>,
        peer: PeerAddress,
        stream: Option<Arc<MediaStream>>,
    ) -> Result<Arc<dyn TransportCall>, TransportError> {
        if self.inner.hang_calls.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.inner.fail_calls.load(Ordering::Relaxed) {
            return Err(TransportError::Answer(format!("{} went away", self.peer)));
        }
        let call = LoopbackCall::with_stream(self.call_id.clone(), peer, Direction::Incoming, stream.as_ref());
        self.inner.answered.lock().push(call.clone());
        self.inner.schedule_stream(&call);
        Ok(call)
    }

    fn decline(self: Box<Self>) {
        self.probe.declined.store(true, Ordering::Relaxed);
        debug!("Declined loopback offer from {}", self.peer);
    }
}

struct Inner {
    events: TransportEventSender,
    /// `None` leaves stream delivery to the caller
    stream_delay: Mutex<Option<Duration>>,
    fail_calls: AtomicBool,
    hang_calls: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    placed: Mutex<Vec<Arc<LoopbackCall>>>,
    answered: Mutex<Vec<Arc<LoopbackCall>>>,
}

impl Inner {
    fn schedule_stream(&self, call: &Arc<LoopbackCall>) {
        let Some(delay) = *self.stream_delay.lock() else {
            return;
        };
        let events = self.events.clone();
        let call = call.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if call.is_closed() {
                return;
            }
            let event = TransportEvent::Stream {
                call_id: call.id.clone(),
                peer: call.peer.clone(),
                direction: call.direction,
                stream: synthetic_stream(MediaConstraints::default()),
            };
            if events.send(event).is_err() {
                debug!("Session gone, dropping loopback stream for {}", call.peer);
            }
        });
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            warn!("Loopback transport has no listener");
        }
    }
}

/// Simulated peer transport
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    /// Remote streams arrive automatically after a short delay
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                stream_delay: Mutex::new(Some(Duration::from_millis(250))),
                fail_calls: AtomicBool::new(false),
                hang_calls: AtomicBool::new(false),
                gate: Mutex::new(None),
                placed: Mutex::new(Vec::new()),
                answered: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_stream_delay(self, delay: Duration) -> Self {
        *self.inner.stream_delay.lock() = Some(delay);
        self
    }

    /// Never deliver remote streams on their own
    pub fn manual_streams(self) -> Self {
        *self.inner.stream_delay.lock() = None;
        self
    }

    pub fn set_fail_calls(&self, fail: bool) {
        self.inner.fail_calls.store(fail, Ordering::Relaxed);
    }

    pub fn set_hang_calls(&self, hang: bool) {
        self.inner.hang_calls.store(hang, Ordering::Relaxed);
    }

    /// Hold the next placement until the returned handle is notified
    pub fn gate_calls(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn placed_calls(&self) -> usize {
        self.inner.placed.lock().len()
    }

    pub fn last_call(&self) -> Option<Arc<LoopbackCall>> {
        self.inner.placed.lock().last().cloned()
    }

    pub fn last_answered(&self) -> Option<Arc<LoopbackCall>> {
        self.inner.answered.lock().last().cloned()
    }

    /// Build an offer as if `peer` had called us
    pub fn offer(&self, peer: &str) -> Box<LoopbackOffer> {
        Box::new(LoopbackOffer {
            peer: peer.to_string(),
            call_id: new_call_id(),
            inner: self.inner.clone(),
            probe: Arc::new(OfferProbe::default()),
        })
    }

    /// Deliver an offer from `peer` through the event channel
    pub fn ring(&self, peer: &str) {
        self.inner.emit(TransportEvent::Offer(self.offer(peer)));
    }

    /// Simulate the remote side ending its latest open call with `peer`
    pub fn remote_hangup(&self, peer: &PeerAddress, direction: Direction) -> bool {
        let calls = match direction {
            Direction::Outgoing => self.inner.placed.lock().clone(),
            Direction::Incoming => self.inner.answered.lock().clone(),
        };
        let Some(call) = calls.iter().rev().find(|c| &c.peer == peer && !c.is_closed()) else {
            return false;
        };
        call.close();
        self.inner.emit(TransportEvent::Closed {
            call_id: call.id.clone(),
            peer: peer.clone(),
            direction,
        });
        true
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn open(&self, local: &PeerAddress) -> Result<(), TransportError> {
        info!("Loopback transport open as {}", local);
        Ok(())
    }

    async fn place_call(&self, remote: &PeerAddress, stream: Arc<MediaStream>) -> Result<Arc<dyn TransportCall>, TransportError> {
        if self.inner.hang_calls.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        let gate = self.inner.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.inner.fail_calls.load(Ordering::Relaxed) {
            return Err(TransportError::Call(format!("{} unreachable", remote)));
        }

        let call = LoopbackCall::with_stream(new_call_id(), remote.clone(), Direction::Outgoing, Some(&stream));
        self.inner.placed.lock().push(call.clone());
        self.inner.schedule_stream(&call);
        Ok(call)
    }

    fn shutdown(&self) {
        for call in self.inner.placed.lock().iter().chain(self.inner.answered.lock().iter()) {
            call.close();
        }
        debug!("Loopback transport shut down");
    }
}

/// Surface that remembers what is mounted
#[derive(Default)]
pub struct RecordingSurface {
    mounted: Mutex<HashMap<String, SinkDescriptor>>,
    unmounts: AtomicUsize,
}

impl RecordingSurface {
    pub fn is_mounted(&self, sink_id: &str) -> bool {
        self.mounted.lock().contains_key(sink_id)
    }

    pub fn is_muted(&self, sink_id: &str) -> bool {
        self.mounted.lock().get(sink_id).map(|d| d.muted).unwrap_or(false)
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.lock().len()
    }

    pub fn unmount_count(&self) -> usize {
        self.unmounts.load(Ordering::Relaxed)
    }
}

impl RenderSurface for RecordingSurface {
    fn mount(&self, sink: &SinkDescriptor, stream: &Arc<MediaStream>) {
        info!("Mounted sink {} for {} (stream {})", sink.id, sink.peer, stream.id());
        self.mounted.lock().insert(sink.id.clone(), sink.clone());
    }

    fn unmount(&self, sink_id: &str) {
        if self.mounted.lock().remove(sink_id).is_some() {
            self.unmounts.fetch_add(1, Ordering::Relaxed);
            info!("Unmounted sink {}", sink_id);
        }
    }
}

/// Notifier that logs and keeps every notification
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn error_count(&self) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|n| matches!(n, Notification::Error { .. }))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Error { message, peer, .. } => match peer {
                Some(peer) => warn!("[{}] {}", peer, message),
                None => warn!("{}", message),
            },
            other => info!("{:?}", other),
        }
        self.seen.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::identity::sanitize;

    #[tokio::test(start_paused = true)]
    async fn placed_call_delivers_stream_after_delay() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = LoopbackTransport::new(tx).with_stream_delay(Duration::from_millis(100));
        let call = transport
            .place_call(&sanitize("p1"), synthetic_stream(MediaConstraints::default()))
            .await
            .unwrap();

        match rx.recv().await {
            Some(TransportEvent::Stream { call_id, direction, .. }) => {
                assert_eq!(call_id, call.id());
                assert_eq!(direction, Direction::Outgoing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn remote_hangup_emits_close() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = LoopbackTransport::new(tx).manual_streams();
        let p1 = sanitize("p1");
        transport
            .place_call(&p1, synthetic_stream(MediaConstraints::default()))
            .await
            .unwrap();

        assert!(transport.remote_hangup(&p1, Direction::Outgoing));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed { .. })));
        assert!(!transport.remote_hangup(&p1, Direction::Outgoing));
    }
}
