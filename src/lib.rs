//! proximity-mesh - proximity-driven WebRTC peer mesh
//!
//! Call lifecycle management for a mesh of direct audio/video calls between
//! participants that are near each other in a shared space.

pub mod config;
pub mod loopback;
pub mod mesh;

// Re-exports
pub use config::Config;
pub use mesh::{
    sanitize, ControlKind, ControlSurface, Direction, IconState, MeshError, MeshEvent, MeshSession, PeerAddress,
};
