//! Peer registry
//!
//! Two independent maps, one per [`Direction`], each keyed by peer address.
//! At most one call exists per (peer, direction). Each map has its own lock,
//! held only for single map mutations and never across transport awaits.
//!
//! Slots are reserved before a call is placed or answered and committed once
//! the transport hands back the call. Cancelling a reservation while the
//! transport is busy makes the later commit fail, so a peer that left
//! mid-setup is never resurrected. Remote media that shows up before the
//! commit is held on the reservation and attached when the call lands.

use super::identity::PeerAddress;
use super::media::MediaStream;
use super::render::RenderSink;
use super::transport::TransportCall;
use super::Direction;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call state. `Absent` is represented by the missing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Call exists, remote stream not yet arrived
    Pending,
    /// Remote stream attached to the sink
    Active,
}

/// One live call and its sink. Owned by the registry.
pub struct CallHandle {
    peer: PeerAddress,
    direction: Direction,
    call: Arc<dyn TransportCall>,
    sink: RenderSink,
    state: CallState,
}

impl CallHandle {
    pub fn new(peer: PeerAddress, direction: Direction, call: Arc<dyn TransportCall>, sink: RenderSink) -> Self {
        Self {
            peer,
            direction,
            call,
            sink,
            state: CallState::Pending,
        }
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn call_id(&self) -> &str {
        self.call.id()
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Hang up, then release the sink
    pub fn close(mut self) {
        self.call.close();
        self.sink.release();
    }

    fn info(&self) -> CallInfo {
        CallInfo {
            peer: self.peer().clone(),
            direction: self.direction(),
            call_id: self.call_id().to_string(),
            state: self.state,
            sink_id: self.sink.id().to_string(),
        }
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .field("call_id", &self.call_id())
            .field("state", &self.state)
            .field("sink", &self.sink)
            .finish()
    }
}

/// Read-only view of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub peer: PeerAddress,
    pub direction: Direction,
    pub call_id: String,
    pub state: CallState,
    pub sink_id: String,
}

/// Remote stream that arrived while its slot was still reserved
struct EarlyStream {
    call_id: String,
    stream: Arc<MediaStream>,
}

#[derive(Default)]
struct DirectionMap {
    calls: HashMap<PeerAddress, CallHandle>,
    reserved: HashMap<PeerAddress, Option<EarlyStream>>,
}

impl DirectionMap {
    fn occupied(&self, addr: &PeerAddress) -> bool {
        self.calls.contains_key(addr) || self.reserved.contains_key(addr)
    }
}

/// Outgoing and incoming call maps
#[derive(Default)]
pub struct PeerRegistry {
    outgoing: Mutex<DirectionMap>,
    incoming: Mutex<DirectionMap>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, direction: Direction) -> &Mutex<DirectionMap> {
        match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        }
    }

    /// Whether a call exists or is being set up for `addr`
    pub fn contains(&self, direction: Direction, addr: &PeerAddress) -> bool {
        self.map(direction).lock().occupied(addr)
    }

    /// Claim the slot for `addr`. `false` when a call exists or is being set up.
    pub fn try_reserve(&self, direction: Direction, addr: &PeerAddress) -> bool {
        let mut map = self.map(direction).lock();
        if map.occupied(addr) {
            return false;
        }
        map.reserved.insert(addr.clone(), None);
        true
    }

    /// Drop a pending reservation. `true` if one was held.
    pub fn cancel_reservation(&self, direction: Direction, addr: &PeerAddress) -> bool {
        self.map(direction).lock().reserved.remove(addr).is_some()
    }

    /// Turn a reservation into a live entry.
    ///
    /// Hands the call back when the reservation was cancelled in the
    /// meantime; the caller must close it. A stream held for this call is
    /// attached right away.
    pub fn commit(&self, mut handle: CallHandle) -> Result<(), CallHandle> {
        let addr = handle.peer().clone();
        let mut map = self.map(handle.direction()).lock();
        if map.calls.contains_key(&addr) {
            return Err(handle);
        }
        let Some(early) = map.reserved.remove(&addr) else {
            return Err(handle);
        };
        if let Some(early) = early.filter(|e| e.call_id == handle.call_id()) {
            handle.sink.attach(early.stream);
            handle.state = CallState::Active;
        }
        map.calls.insert(addr, handle);
        Ok(())
    }

    /// Insert without a prior reservation, only if the slot is free.
    ///
    /// Hands the call back when the slot is taken.
    pub fn register(&self, handle: CallHandle) -> Result<(), CallHandle> {
        let addr = handle.peer().clone();
        let mut map = self.map(handle.direction()).lock();
        if map.occupied(&addr) {
            debug!("{} call for {} already registered", handle.direction(), addr);
            return Err(handle);
        }
        map.calls.insert(addr, handle);
        Ok(())
    }

    /// Close the call, release its sink and delete the entry. No-op if absent.
    pub fn remove(&self, direction: Direction, addr: &PeerAddress) -> bool {
        let handle = self.map(direction).lock().calls.remove(addr);
        match handle {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Like [`remove`](Self::remove) but only when the entry is the call `call_id`
    pub fn remove_call(&self, direction: Direction, addr: &PeerAddress, call_id: &str) -> bool {
        let handle = {
            let mut map = self.map(direction).lock();
            let same_call = map.calls.get(addr).is_some_and(|h| h.call_id() == call_id);
            if same_call {
                map.calls.remove(addr)
            } else {
                None
            }
        };
        match handle {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, direction: Direction, addr: &PeerAddress) -> Option<CallInfo> {
        self.map(direction).lock().calls.get(addr).map(CallHandle::info)
    }

    /// Attach remote media to the entry for call `call_id` (`Pending` to `Active`).
    ///
    /// While the slot is only reserved the stream is held until the commit.
    /// Returns `false` and does nothing when the entry is gone or belongs to
    /// another call.
    pub fn attach_stream(
        &self,
        direction: Direction,
        addr: &PeerAddress,
        call_id: &str,
        stream: Arc<MediaStream>,
    ) -> bool {
        let mut map = self.map(direction).lock();
        match map.calls.get_mut(addr) {
            Some(handle) if handle.call_id() == call_id => {
                handle.sink.attach(stream);
                handle.state = CallState::Active;
                true
            }
            Some(_) => false,
            None => match map.reserved.get_mut(addr) {
                Some(slot) => {
                    *slot = Some(EarlyStream {
                        call_id: call_id.to_string(),
                        stream,
                    });
                    true
                }
                None => false,
            },
        }
    }

    /// Transport calls currently registered in `direction`
    pub fn calls(&self, direction: Direction) -> Vec<Arc<dyn TransportCall>> {
        self.map(direction)
            .lock()
            .calls
            .values()
            .map(|h| h.call.clone())
            .collect()
    }

    pub fn entries(&self, direction: Direction) -> Vec<CallInfo> {
        self.map(direction).lock().calls.values().map(CallHandle::info).collect()
    }

    /// Entries in both directions whose remote stream is attached
    pub fn active_peers(&self) -> Vec<CallInfo> {
        let mut peers: Vec<CallInfo> = [Direction::Outgoing, Direction::Incoming]
            .into_iter()
            .flat_map(|d| self.entries(d))
            .filter(|info| info.state == CallState::Active)
            .collect();
        peers.sort_by(|a, b| a.peer.cmp(&b.peer).then(a.direction.as_str().cmp(b.direction.as_str())));
        peers
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.map(direction).lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(Direction::Outgoing) == 0 && self.len(Direction::Incoming) == 0
    }

    /// Close every call in both directions and drop all reservations
    pub fn clear(&self) -> usize {
        let mut drained = Vec::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            let mut map = self.map(direction).lock();
            map.reserved.clear();
            drained.extend(map.calls.drain().map(|(_, h)| h));
        }
        let count = drained.len();
        for handle in drained {
            handle.close();
        }
        count
    }
}
