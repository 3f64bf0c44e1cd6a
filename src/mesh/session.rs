//! Mesh session: call lifecycle orchestration
//!
//! Reacts to proximity signals, inbound offers and transport events, and
//! keeps the registry at one call per (peer, direction):
//! - Proximity-connect places an outgoing call (needs local media)
//! - Inbound offers are answered with the local stream, or none yet
//! - Remote streams are attached to the call's sink
//! - Proximity-disconnect tears down only our outgoing call
//! - Remote close/failure tears down the matching call

use super::identity::{sanitize_with, PeerAddress};
use super::media::{LocalMediaController, LocalMediaState, MediaPlatform, MediaStream, TrackKind};
use super::notify::{Notification, Notifier};
use super::registry::{CallHandle, CallInfo, PeerRegistry};
use super::render::{RenderSink, RenderSurface};
use super::transport::{IncomingOffer, PeerTransport, TransportCall, TransportEvent, TransportEventReceiver};
use super::{Direction, MeshError, TransportError};
use crate::config::Config;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle counters
#[derive(Debug, Default)]
pub struct MeshStats {
    calls_placed: AtomicU64,
    calls_answered: AtomicU64,
    duplicates_ignored: AtomicU64,
    calls_removed: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`MeshStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeshStatsSnapshot {
    pub calls_placed: u64,
    pub calls_answered: u64,
    pub duplicates_ignored: u64,
    pub calls_removed: u64,
    pub failures: u64,
}

impl MeshStats {
    pub fn snapshot(&self) -> MeshStatsSnapshot {
        MeshStatsSnapshot {
            calls_placed: self.calls_placed.load(Ordering::Relaxed),
            calls_answered: self.calls_answered.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates_ignored.load(Ordering::Relaxed),
            calls_removed: self.calls_removed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The call lifecycle controller for one local participant
pub struct MeshSession {
    local_address: PeerAddress,
    filler: char,
    call_timeout: Option<Duration>,
    connect_on_ready: bool,
    transport: Arc<dyn PeerTransport>,
    media: LocalMediaController,
    registry: PeerRegistry,
    surface: Arc<dyn RenderSurface>,
    notifier: Arc<dyn Notifier>,
    /// Peers reported near and not yet far, for calls deferred until media is ready
    nearby: Mutex<HashSet<PeerAddress>>,
    stats: MeshStats,
}

impl MeshSession {
    /// Create a session for the raw session `identity`
    pub fn new(
        identity: &str,
        config: &Config,
        transport: Arc<dyn PeerTransport>,
        platform: Arc<dyn MediaPlatform>,
        surface: Arc<dyn RenderSurface>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let filler = config.identity.filler;
        let local_address = sanitize_with(identity, filler);
        info!("Session identity {:?} -> peer address {}", identity, local_address);

        let media = LocalMediaController::new(
            platform,
            notifier.clone(),
            surface.clone(),
            local_address.clone(),
            config.media.constraints(),
            config.media.request_timeout(),
        );

        Self {
            local_address,
            filler,
            call_timeout: config.mesh.call_timeout(),
            connect_on_ready: config.mesh.connect_on_ready,
            transport,
            media,
            registry: PeerRegistry::new(),
            surface,
            notifier,
            nearby: Mutex::new(HashSet::new()),
            stats: MeshStats::default(),
        }
    }

    pub fn local_address(&self) -> &PeerAddress {
        &self.local_address
    }

    /// Map a raw identity to its peer address
    pub fn address_of(&self, peer_id: &str) -> PeerAddress {
        sanitize_with(peer_id, self.filler)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn media(&self) -> &LocalMediaController {
        &self.media
    }

    pub fn stats(&self) -> MeshStatsSnapshot {
        self.stats.snapshot()
    }

    /// Register with the transport, then optionally resume media silently
    pub async fn start(&self, probe_prior_permission: bool) -> Result<(), MeshError> {
        self.transport.open(&self.local_address).await?;
        info!("Peer transport open as {}", self.local_address);
        if probe_prior_permission {
            self.probe_prior_permission().await;
        }
        Ok(())
    }

    /// Drain transport events until the channel closes.
    ///
    /// Offers are answered on their own task so a slow answer never holds up
    /// events for other peers. The reserved slot keeps a second offer from the
    /// same peer out, and media arriving before the answer lands is held on it.
    pub async fn run(self: Arc<Self>, mut events: TransportEventReceiver) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Offer(offer) => {
                    let session = self.clone();
                    tokio::spawn(async move { session.handle_offer(offer).await });
                }
                other => self.handle_transport_event(other).await,
            }
        }
        debug!("Transport event channel closed");
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Offer(offer) => self.handle_offer(offer).await,
            TransportEvent::Stream { call_id, peer, direction, stream } => {
                self.handle_stream(&call_id, &peer, direction, stream);
            }
            TransportEvent::Closed { call_id, peer, direction } => {
                self.handle_closed(&call_id, &peer, direction);
            }
            TransportEvent::CallFailed { call_id, peer, direction, error } => {
                warn!("{} call {} with {} failed: {}", direction, call_id, peer, error);
                MeshStats::bump(&self.stats.failures);
                self.handle_closed(&call_id, &peer, direction);
            }
            TransportEvent::Error(error) => {
                warn!("Peer transport error: {}", error);
                MeshStats::bump(&self.stats.failures);
                self.notifier.notify(Notification::error(error.into(), None));
            }
        }
    }

    /// Proximity-connect: call `peer_id` unless a call to it exists already.
    ///
    /// Fails with `MediaNotReady` while local media is not ready; with
    /// `connect_on_ready` the peer is called once it is.
    pub async fn connect(&self, peer_id: &str) -> Result<(), MeshError> {
        let addr = self.address_of(peer_id);
        if addr == self.local_address {
            debug!("Ignoring connect to our own address {}", addr);
            return Ok(());
        }
        if self.connect_on_ready {
            self.nearby.lock().insert(addr.clone());
        }

        let Some(stream) = self.media.stream() else {
            debug!("Local media not ready, not calling {}", addr);
            return Err(MeshError::MediaNotReady);
        };

        match self.place_outgoing(addr, stream).await {
            Err(MeshError::DuplicateIgnored) => Ok(()),
            other => other,
        }
    }

    /// Proximity-disconnect: hang up our outgoing call to `peer_id`.
    ///
    /// Returns whether anything was torn down. Incoming calls from the peer
    /// are left to the remote side.
    pub fn disconnect(&self, peer_id: &str) -> bool {
        let addr = self.address_of(peer_id);
        self.nearby.lock().remove(&addr);

        let cancelled = self.registry.cancel_reservation(Direction::Outgoing, &addr);
        let removed = self.registry.remove(Direction::Outgoing, &addr);
        if removed {
            MeshStats::bump(&self.stats.calls_removed);
            info!("Hung up outgoing call to {}", addr);
        } else if cancelled {
            info!("Abandoned call setup to {}", addr);
        } else {
            debug!("No outgoing call to {}", addr);
        }
        removed || cancelled
    }

    /// Request camera/microphone; once media turns ready call every peer
    /// still nearby
    pub async fn request_local_media(&self, prompt_on_failure: bool) -> Result<(), MeshError> {
        if self.media.is_ready() {
            debug!("Local media already ready");
            return Ok(());
        }
        self.media.request_media(prompt_on_failure).await?;
        self.on_local_media_ready().await;
        Ok(())
    }

    /// Resume media silently if it was granted before. Returns whether it resumed.
    pub async fn probe_prior_permission(&self) -> bool {
        if self.media.is_ready() {
            return true;
        }
        if self.media.probe_prior_permission().await.is_some() {
            self.on_local_media_ready().await;
            true
        } else {
            false
        }
    }

    pub fn toggle_mic(&self) -> Option<bool> {
        self.media.toggle_audio()
    }

    /// Toggle the camera and hot-swap the video track on every live call
    pub async fn toggle_camera(&self) -> Result<bool, MeshError> {
        let on = self.media.toggle_video().await?;
        let track = self.media.video_track();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for call in self.registry.calls(direction) {
                if let Err(e) = call.replace_track(TrackKind::Video, track.clone()) {
                    warn!("Failed to swap video track on call {} with {}: {}", call.id(), call.peer(), e);
                }
            }
        }
        Ok(on)
    }

    pub fn is_local_media_ready(&self) -> bool {
        self.media.is_ready()
    }

    pub fn media_state(&self) -> LocalMediaState {
        self.media.state()
    }

    /// Peers whose remote stream is currently rendered
    pub fn active_peers(&self) -> Vec<CallInfo> {
        self.registry.active_peers()
    }

    pub fn lookup(&self, direction: Direction, peer_id: &str) -> Option<CallInfo> {
        self.registry.lookup(direction, &self.address_of(peer_id))
    }

    /// Hang up everything and release local devices
    pub fn shutdown(&self) {
        self.nearby.lock().clear();
        let closed = self.registry.clear();
        self.media.stop();
        self.transport.shutdown();
        info!("Mesh session {} shut down ({} calls closed)", self.local_address, closed);
    }

    async fn on_local_media_ready(&self) {
        if !self.connect_on_ready {
            return;
        }
        let pending: Vec<PeerAddress> = self.nearby.lock().iter().cloned().collect();
        for addr in pending {
            // The peer may have left while earlier calls were being placed
            if !self.nearby.lock().contains(&addr) {
                continue;
            }
            let Some(stream) = self.media.stream() else {
                return;
            };
            // Failures are already reported; duplicates are expected here
            let _ = self.place_outgoing(addr, stream).await;
        }
    }

    async fn place_outgoing(&self, addr: PeerAddress, stream: Arc<MediaStream>) -> Result<(), MeshError> {
        if !self.registry.try_reserve(Direction::Outgoing, &addr) {
            MeshStats::bump(&self.stats.duplicates_ignored);
            debug!("Outgoing call to {} already exists, duplicate ignored", addr);
            return Err(MeshError::DuplicateIgnored);
        }

        info!("Calling {}", addr);
        let placed = self
            .with_call_timeout(self.transport.place_call(&addr, stream))
            .await;

        match placed {
            Ok(call) => {
                if self.commit(addr, Direction::Outgoing, call) {
                    MeshStats::bump(&self.stats.calls_placed);
                }
                Ok(())
            }
            Err(e) => {
                self.registry.cancel_reservation(Direction::Outgoing, &addr);
                self.report_failure(&addr, e.clone());
                Err(e.into())
            }
        }
    }

    async fn handle_offer(&self, offer: Box<dyn IncomingOffer>) {
        let addr = self.address_of(offer.peer());
        if !self.registry.try_reserve(Direction::Incoming, &addr) {
            MeshStats::bump(&self.stats.duplicates_ignored);
            debug!("Incoming call from {} already exists, declining duplicate offer", addr);
            offer.decline();
            return;
        }

        let stream = self.media.stream();
        if stream.is_none() {
            debug!("Answering {} without local media", addr);
        }
        info!("Answering call from {}", addr);

        match self.with_call_timeout(offer.answer(addr.clone(), stream)).await {
            Ok(call) => {
                if self.commit(addr, Direction::Incoming, call) {
                    MeshStats::bump(&self.stats.calls_answered);
                }
            }
            Err(e) => {
                self.registry.cancel_reservation(Direction::Incoming, &addr);
                self.report_failure(&addr, e);
            }
        }
    }

    fn handle_stream(&self, call_id: &str, peer: &PeerAddress, direction: Direction, stream: Arc<MediaStream>) {
        let addr = self.address_of(peer.as_str());
        if self.registry.attach_stream(direction, &addr, call_id, stream) {
            info!("Receiving media from {} ({})", addr, direction);
        } else {
            debug!("Dropping stream for unknown {} call {} from {}", direction, call_id, addr);
        }
    }

    fn handle_closed(&self, call_id: &str, peer: &PeerAddress, direction: Direction) {
        let addr = self.address_of(peer.as_str());
        if self.registry.remove_call(direction, &addr, call_id) {
            MeshStats::bump(&self.stats.calls_removed);
            info!("{} call with {} ended by remote", direction, addr);
        } else {
            debug!("Close for unknown {} call {} from {}", direction, call_id, addr);
        }
    }

    /// Register a freshly set-up call; hangs it up if its slot was abandoned
    fn commit(&self, addr: PeerAddress, direction: Direction, call: Arc<dyn TransportCall>) -> bool {
        let sink = RenderSink::new(self.surface.clone(), addr.clone(), false);
        let handle = CallHandle::new(addr, direction, call, sink);
        match self.registry.commit(handle) {
            Ok(()) => true,
            Err(orphan) => {
                info!("{} call with {} abandoned during setup, hanging up", direction, orphan.peer());
                orphan.close();
                false
            }
        }
    }

    fn report_failure(&self, addr: &PeerAddress, error: TransportError) {
        MeshStats::bump(&self.stats.failures);
        warn!("Call setup with {} failed: {}", addr, error);
        self.notifier
            .notify(Notification::error(MeshError::TransportError(error), Some(addr.clone())));
    }

    async fn with_call_timeout<F>(&self, setup: F) -> Result<Arc<dyn TransportCall>, TransportError>
    where
        F: Future<Output = Result<Arc<dyn TransportCall>, TransportError>>,
    {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, setup)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => setup.await,
        }
    }
}
