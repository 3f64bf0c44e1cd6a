//! Local media control
//!
//! Owns the local camera/microphone capture:
//! - Requesting capture from the platform (with a silent prior-permission probe)
//! - Microphone mute by flipping the track's enabled flag
//! - Camera off by stopping and removing the video track, so the device is released
//! - Camera on by re-acquiring a fresh video track into the same stream

use super::identity::PeerAddress;
use super::notify::{Notification, Notifier};
use super::render::{RenderSink, RenderSurface};
use super::{MediaError, MeshError};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// A single capture track provided by the platform
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Stop capture and release the underlying device
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

/// An ordered, mutable set of tracks shared by reference.
///
/// Calls hold the same `Arc` the media controller owns, so adding or
/// removing a track is visible to every call without re-placing it.
pub struct MediaStream {
    id: String,
    tracks: RwLock<Vec<Arc<dyn MediaTrack>>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Arc<Self> {
        Arc::new(Self {
            id: format!("stream-{}", uuid::Uuid::new_v4()),
            tracks: RwLock::new(tracks),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.read().clone()
    }

    pub fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .read()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn first_track(&self, kind: TrackKind) -> Option<Arc<dyn MediaTrack>> {
        self.tracks.read().iter().find(|t| t.kind() == kind).cloned()
    }

    /// Add a track unless one with the same id is present
    pub fn add_track(&self, track: Arc<dyn MediaTrack>) {
        let mut tracks = self.tracks.write();
        if !tracks.iter().any(|t| t.id() == track.id()) {
            tracks.push(track);
        }
    }

    pub fn remove_track(&self, track_id: &str) -> Option<Arc<dyn MediaTrack>> {
        let mut tracks = self.tracks.write();
        let index = tracks.iter().position(|t| t.id() == track_id)?;
        Some(tracks.remove(index))
    }

    /// Stop every track; the stream keeps them so callers can inspect state
    pub fn stop_all(&self) {
        for track in self.tracks.read().iter() {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracks = self.tracks.read();
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &tracks.iter().map(|t| (t.kind(), t.id().to_string())).collect::<Vec<_>>())
            .finish()
    }
}

/// Which devices to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn camera_only() -> Self {
        Self { audio: false, video: true }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

/// Previously recorded permission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// Platform device access (e.g. `getUserMedia` and the permissions API)
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// Capture the requested devices. May suspend on a user prompt.
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<Arc<MediaStream>, MediaError>;

    /// Look up the stored permission for a device kind without prompting
    async fn query_permission(&self, kind: TrackKind) -> PermissionState;
}

/// Process-wide local capture state
#[derive(Clone, Default)]
pub enum LocalMediaState {
    #[default]
    NotRequested,
    Denied,
    Ready(Arc<MediaStream>),
}

impl LocalMediaState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LocalMediaState::Ready(_))
    }

    pub fn stream(&self) -> Option<Arc<MediaStream>> {
        match self {
            LocalMediaState::Ready(stream) => Some(stream.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for LocalMediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalMediaState::NotRequested => write!(f, "NotRequested"),
            LocalMediaState::Denied => write!(f, "Denied"),
            LocalMediaState::Ready(stream) => write!(f, "Ready({})", stream.id()),
        }
    }
}

/// Owner of the local capture stream
pub struct LocalMediaController {
    platform: Arc<dyn MediaPlatform>,
    notifier: Arc<dyn Notifier>,
    surface: Arc<dyn RenderSurface>,
    local_address: PeerAddress,
    constraints: MediaConstraints,
    request_timeout: Option<Duration>,
    state: RwLock<LocalMediaState>,
    camera_on: Mutex<bool>,
    preview: Mutex<Option<RenderSink>>,
    /// Serializes device requests (initial capture and camera re-acquire)
    device: tokio::sync::Mutex<()>,
    /// Bumped by `stop`; a request that started earlier drops its result
    generation: AtomicU64,
}

impl LocalMediaController {
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        notifier: Arc<dyn Notifier>,
        surface: Arc<dyn RenderSurface>,
        local_address: PeerAddress,
        constraints: MediaConstraints,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            platform,
            notifier,
            surface,
            local_address,
            constraints,
            request_timeout,
            state: RwLock::new(LocalMediaState::NotRequested),
            camera_on: Mutex::new(false),
            preview: Mutex::new(None),
            device: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LocalMediaState {
        self.state.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().is_ready()
    }

    pub fn stream(&self) -> Option<Arc<MediaStream>> {
        self.state.read().stream()
    }

    pub fn is_camera_on(&self) -> bool {
        *self.camera_on.lock()
    }

    pub fn is_mic_on(&self) -> bool {
        self.stream()
            .and_then(|s| s.first_track(TrackKind::Audio))
            .map(|t| t.enabled())
            .unwrap_or(false)
    }

    /// Current outgoing video track, if the camera is on
    pub fn video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.stream().and_then(|s| s.first_track(TrackKind::Video))
    }

    /// Sink showing our own (muted) stream
    pub fn preview_sink_id(&self) -> Option<String> {
        self.preview.lock().as_ref().map(|s| s.id().to_string())
    }

    /// Request camera and microphone capture.
    ///
    /// On success the state becomes `Ready`, the local preview is mounted and
    /// both `LocalMediaReady` and `VideoConnected` are emitted. On failure the
    /// state becomes `Denied`; the user is only told when `prompt_on_failure`
    /// is set.
    pub async fn request_media(&self, prompt_on_failure: bool) -> Result<Arc<MediaStream>, MediaError> {
        let _device = self.device.lock().await;
        if let Some(stream) = self.stream() {
            debug!("Local media already ready ({})", stream.id());
            return Ok(stream);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        match self.acquire(self.constraints).await {
            Ok(stream) => {
                {
                    let mut state = self.state.write();
                    if self.generation.load(Ordering::SeqCst) != generation {
                        drop(state);
                        stream.stop_all();
                        debug!("Local media stopped during request, releasing {}", stream.id());
                        return Err(MediaError::Stopped);
                    }
                    *state = LocalMediaState::Ready(stream.clone());
                    *self.camera_on.lock() = stream.first_track(TrackKind::Video).is_some();
                    self.attach_preview(&stream);
                }
                info!(
                    "Local media ready: {} ({} tracks)",
                    stream.id(),
                    stream.tracks().len()
                );
                self.notifier.notify(Notification::LocalMediaReady);
                self.notifier.notify(Notification::VideoConnected);
                Ok(stream)
            }
            Err(e) => {
                {
                    let mut state = self.state.write();
                    if self.generation.load(Ordering::SeqCst) == generation {
                        *state = LocalMediaState::Denied;
                    }
                }
                if prompt_on_failure {
                    warn!("Local media request failed: {}", e);
                    self.notifier.notify(Notification::error(MeshError::from(e.clone()), None));
                } else {
                    debug!("Silent local media request failed: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Resume capture without prompting when the microphone was granted before.
    ///
    /// Returns the stream when capture resumed; any failure stays silent.
    pub async fn probe_prior_permission(&self) -> Option<Arc<MediaStream>> {
        match self.platform.query_permission(TrackKind::Audio).await {
            PermissionState::Granted => {
                info!("Microphone permission granted earlier, resuming local media");
                self.request_media(false).await.ok()
            }
            other => {
                debug!("Prior microphone permission: {:?}", other);
                None
            }
        }
    }

    /// Flip the microphone's enabled flag. `None` without a local audio track.
    pub fn toggle_audio(&self) -> Option<bool> {
        let track = self.stream()?.first_track(TrackKind::Audio)?;
        let enabled = !track.enabled();
        track.set_enabled(enabled);
        info!("Microphone {}", if enabled { "unmuted" } else { "muted" });
        Some(enabled)
    }

    /// Turn the camera off (stop + remove the track) or on (re-acquire).
    ///
    /// Returns the new camera state. On failure the camera stays off and the
    /// user is told.
    pub async fn toggle_video(&self) -> Result<bool, MediaError> {
        let _device = self.device.lock().await;
        let stream = self.stream().ok_or(MediaError::NotReady)?;
        let generation = self.generation.load(Ordering::SeqCst);

        if self.is_camera_on() {
            for track in stream.tracks_of(TrackKind::Video) {
                track.stop();
                stream.remove_track(track.id());
            }
            *self.camera_on.lock() = false;
            info!("Camera released");
            return Ok(false);
        }

        let fresh = match self.acquire(MediaConstraints::camera_only()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Failed to access camera: {}", e);
                self.notifier.notify(Notification::error(
                    MeshError::DeviceUnavailable(e.to_string()),
                    None,
                ));
                return Err(e);
            }
        };

        let Some(track) = fresh.first_track(TrackKind::Video) else {
            fresh.stop_all();
            let err = MediaError::DeviceUnavailable("no video track returned".to_string());
            self.notifier.notify(Notification::error(MeshError::from(err.clone()), None));
            return Err(err);
        };
        // Anything else the platform handed back is not ours to keep
        for extra in fresh.tracks() {
            if extra.id() != track.id() {
                extra.stop();
            }
        }

        {
            let _state = self.state.read();
            if self.generation.load(Ordering::SeqCst) != generation {
                track.stop();
                debug!("Local media stopped during camera re-acquire");
                return Err(MediaError::Stopped);
            }
            stream.add_track(track);
            *self.camera_on.lock() = true;
            self.attach_preview(&stream);
        }
        info!("Camera re-acquired");
        Ok(true)
    }

    /// Stop all local tracks and release the preview
    pub fn stop(&self) {
        let previous = {
            let mut state = self.state.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            std::mem::take(&mut *state)
        };
        if let LocalMediaState::Ready(stream) = previous {
            stream.stop_all();
            info!("Local media stopped ({})", stream.id());
        }
        *self.camera_on.lock() = false;
        if let Some(mut preview) = self.preview.lock().take() {
            preview.release();
        }
    }

    async fn acquire(&self, constraints: MediaConstraints) -> Result<Arc<MediaStream>, MediaError> {
        let request = self.platform.get_user_media(constraints);
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| MediaError::Timeout)?,
            None => request.await,
        }
    }

    fn attach_preview(&self, stream: &Arc<MediaStream>) {
        let mut preview = self.preview.lock();
        let sink = preview.get_or_insert_with(|| {
            RenderSink::new(self.surface.clone(), self.local_address.clone(), true)
        });
        sink.attach(stream.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackMedia, RecordingNotifier, RecordingSurface};
    use crate::mesh::identity::sanitize;

    struct Fixture {
        media: Arc<LoopbackMedia>,
        notifier: Arc<RecordingNotifier>,
        surface: Arc<RecordingSurface>,
        controller: LocalMediaController,
    }

    fn fixture(media: LoopbackMedia) -> Fixture {
        let media = Arc::new(media);
        let notifier = Arc::new(RecordingNotifier::default());
        let surface = Arc::new(RecordingSurface::default());
        let controller = LocalMediaController::new(
            media.clone(),
            notifier.clone(),
            surface.clone(),
            sanitize("me"),
            MediaConstraints::default(),
            None,
        );
        Fixture { media, notifier, surface, controller }
    }

    #[tokio::test]
    async fn request_media_becomes_ready_and_notifies() {
        let f = fixture(LoopbackMedia::new());
        let stream = f.controller.request_media(true).await.unwrap();
        assert!(f.controller.is_ready());
        assert_eq!(stream.tracks().len(), 2);
        assert!(f.controller.is_camera_on());
        assert_eq!(
            f.notifier.notifications(),
            vec![Notification::LocalMediaReady, Notification::VideoConnected]
        );
        let preview = f.controller.preview_sink_id().unwrap();
        assert!(f.surface.is_mounted(&preview));
        assert!(f.surface.is_muted(&preview));
    }

    #[tokio::test]
    async fn denied_request_prompts_only_when_asked() {
        let f = fixture(LoopbackMedia::new().deny());
        assert!(f.controller.request_media(false).await.is_err());
        assert!(matches!(f.controller.state(), LocalMediaState::Denied));
        assert!(f.notifier.notifications().is_empty());

        let err = f.controller.request_media(true).await.unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied(_)));
        assert_eq!(f.notifier.error_count(), 1);
    }

    #[tokio::test]
    async fn probe_resumes_only_with_prior_grant() {
        let f = fixture(LoopbackMedia::new());
        assert!(f.controller.probe_prior_permission().await.is_none());
        assert!(!f.controller.is_ready());

        let f = fixture(LoopbackMedia::new().with_prior_grant());
        assert!(f.controller.probe_prior_permission().await.is_some());
        assert!(f.controller.is_ready());

        let f = fixture(LoopbackMedia::new().with_prior_grant().deny());
        assert!(f.controller.probe_prior_permission().await.is_none());
        assert!(f.notifier.notifications().is_empty());

        let f = fixture(LoopbackMedia::new().deny());
        assert!(f.controller.probe_prior_permission().await.is_none());
        assert_eq!(f.media.requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_requests_share_one_stream() {
        let f = fixture(LoopbackMedia::new().with_delay(Duration::from_millis(50)));
        let (first, second) = tokio::join!(f.controller.request_media(true), f.controller.request_media(false));

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.id(), second.id());
        assert_eq!(f.media.requests(), 1);
        assert_eq!(
            f.notifier.notifications(),
            vec![Notification::LocalMediaReady, Notification::VideoConnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_request_releases_late_stream() {
        let f = fixture(LoopbackMedia::new().with_delay(Duration::from_millis(50)));
        let (result, ()) = tokio::join!(f.controller.request_media(true), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            f.controller.stop();
        });

        assert_eq!(result.unwrap_err(), MediaError::Stopped);
        assert!(!f.controller.is_ready());
        assert!(!f.controller.is_camera_on());
        let late = f.media.last_stream().unwrap();
        assert!(late.tracks().iter().all(|t| t.is_stopped()));
        assert_eq!(f.surface.mounted_count(), 0);
        assert!(f.controller.preview_sink_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_camera_reacquire_drops_new_track() {
        let f = fixture(LoopbackMedia::new().with_delay(Duration::from_millis(50)));
        let stream = f.controller.request_media(true).await.unwrap();
        assert_eq!(f.controller.toggle_video().await, Ok(false));

        let (result, ()) = tokio::join!(f.controller.toggle_video(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            f.controller.stop();
        });

        assert_eq!(result, Err(MediaError::Stopped));
        assert!(stream.first_track(TrackKind::Video).is_none());
        assert!(f.media.last_stream().unwrap().tracks().iter().all(|t| t.is_stopped()));
        assert!(!f.controller.is_camera_on());
        assert_eq!(f.surface.mounted_count(), 0);
    }

    #[tokio::test]
    async fn toggle_audio_flips_enabled_flag() {
        let f = fixture(LoopbackMedia::new());
        assert_eq!(f.controller.toggle_audio(), None);
        f.controller.request_media(true).await.unwrap();
        assert_eq!(f.controller.toggle_audio(), Some(false));
        assert!(!f.controller.is_mic_on());
        assert_eq!(f.controller.toggle_audio(), Some(true));
    }

    #[tokio::test]
    async fn toggle_video_round_trip_releases_device() {
        let f = fixture(LoopbackMedia::new());
        let stream = f.controller.request_media(true).await.unwrap();
        let original = stream.first_track(TrackKind::Video).unwrap();

        assert_eq!(f.controller.toggle_video().await, Ok(false));
        assert!(original.is_stopped());
        assert!(stream.first_track(TrackKind::Video).is_none());

        assert_eq!(f.controller.toggle_video().await, Ok(true));
        let fresh = stream.first_track(TrackKind::Video).unwrap();
        assert_ne!(fresh.id(), original.id());
        assert!(fresh.enabled());
        assert!(!fresh.is_stopped());
        assert_eq!(f.media.requests(), 2);
    }

    #[tokio::test]
    async fn failed_reacquire_leaves_camera_off() {
        let f = fixture(LoopbackMedia::new());
        f.controller.request_media(true).await.unwrap();
        assert_eq!(f.controller.toggle_video().await, Ok(false));

        f.media.set_camera_available(false);
        assert!(f.controller.toggle_video().await.is_err());
        assert!(!f.controller.is_camera_on());
        assert!(f.controller.video_track().is_none());
        assert_eq!(f.notifier.error_count(), 1);
    }

    #[tokio::test]
    async fn toggle_video_without_stream_is_not_ready() {
        let f = fixture(LoopbackMedia::new());
        assert_eq!(f.controller.toggle_video().await, Err(MediaError::NotReady));
    }

    #[tokio::test]
    async fn stop_releases_everything() {
        let f = fixture(LoopbackMedia::new());
        let stream = f.controller.request_media(true).await.unwrap();
        let preview = f.controller.preview_sink_id().unwrap();
        f.controller.stop();
        assert!(!f.controller.is_ready());
        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
        assert!(!f.surface.is_mounted(&preview));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out() {
        let media = Arc::new(LoopbackMedia::new().hang());
        let controller = LocalMediaController::new(
            media,
            Arc::new(RecordingNotifier::default()),
            Arc::new(RecordingSurface::default()),
            sanitize("me"),
            MediaConstraints::default(),
            Some(Duration::from_millis(500)),
        );
        assert_eq!(controller.request_media(false).await.unwrap_err(), MediaError::Timeout);
        assert!(matches!(controller.state(), LocalMediaState::Denied));
    }
}
