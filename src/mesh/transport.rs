//! Peer transport boundary
//!
//! The mesh never speaks a wire protocol itself. It drives an external
//! peer-to-peer media primitive through these traits: place a call, answer
//! an offer, swap a track, close. Asynchronous happenings (offers, remote
//! streams, closes, errors) come back as [`TransportEvent`]s on a channel.

use super::identity::PeerAddress;
use super::media::{MediaStream, MediaTrack, TrackKind};
use super::{Direction, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sender half handed to a transport at construction
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half drained by [`crate::mesh::MeshSession::run`]
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// One negotiated media session with a remote address
pub trait TransportCall: Send + Sync {
    /// Unique id, echoed in every event about this call
    fn id(&self) -> &str;

    fn peer(&self) -> &PeerAddress;

    fn direction(&self) -> Direction;

    /// Replace (or with `None`, drop) the outgoing track of `kind` in place,
    /// without renegotiating the call
    fn replace_track(&self, kind: TrackKind, track: Option<Arc<dyn MediaTrack>>) -> Result<(), TransportError>;

    /// Hang up. Closing twice is a no-op.
    fn close(&self);
}

/// A call offer from a remote peer, awaiting our answer
#[async_trait]
pub trait IncomingOffer: Send {
    /// Remote address as reported by the transport
    fn peer(&self) -> &str;

    fn call_id(&self) -> &str;

    /// Accept, sending `stream` when we have one.
    ///
    /// `peer` is the address the session keyed this offer by; every later
    /// event about the call must carry it. `call_id` stays the call's id.
    async fn answer(
        self: Box<Self>,
        peer: PeerAddress,
        stream: Option<Arc<MediaStream>>,
    ) -> Result<Arc<dyn TransportCall>, TransportError>;

    /// Refuse without establishing media
    fn decline(self: Box<Self>);
}

/// The peer-to-peer media primitive
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Register our address with the rendezvous channel
    async fn open(&self, local: &PeerAddress) -> Result<(), TransportError>;

    /// Call `remote`, sending `stream`. Resolves once the call exists; the
    /// remote stream arrives later as [`TransportEvent::Stream`].
    async fn place_call(&self, remote: &PeerAddress, stream: Arc<MediaStream>) -> Result<Arc<dyn TransportCall>, TransportError>;

    /// Leave the rendezvous channel
    fn shutdown(&self) {}
}

/// Events emitted by the transport
pub enum TransportEvent {
    /// A remote peer is calling us
    Offer(Box<dyn IncomingOffer>),
    /// Remote media arrived for a call
    Stream {
        call_id: String,
        peer: PeerAddress,
        direction: Direction,
        stream: Arc<MediaStream>,
    },
    /// The remote end or the transport ended a call
    Closed {
        call_id: String,
        peer: PeerAddress,
        direction: Direction,
    },
    /// A call dropped with an error
    CallFailed {
        call_id: String,
        peer: PeerAddress,
        direction: Direction,
        error: TransportError,
    },
    /// Transport-level failure not tied to a call
    Error(TransportError),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Offer(offer) => f
                .debug_struct("Offer")
                .field("peer", &offer.peer())
                .field("call_id", &offer.call_id())
                .finish(),
            TransportEvent::Stream { call_id, peer, direction, stream } => f
                .debug_struct("Stream")
                .field("call_id", call_id)
                .field("peer", peer)
                .field("direction", direction)
                .field("stream", &stream.id())
                .finish(),
            TransportEvent::Closed { call_id, peer, direction } => f
                .debug_struct("Closed")
                .field("call_id", call_id)
                .field("peer", peer)
                .field("direction", direction)
                .finish(),
            TransportEvent::CallFailed { call_id, peer, direction, error } => f
                .debug_struct("CallFailed")
                .field("call_id", call_id)
                .field("peer", peer)
                .field("direction", direction)
                .field("error", error)
                .finish(),
            TransportEvent::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}
