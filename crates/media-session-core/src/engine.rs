//! Media engine collaborator
//!
//! Capture, rendering and codecs live outside this crate. The engine reports
//! what it can encode, produces outbound elementary streams and builds
//! players for inbound ones.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

use crate::codec::Encoding;
use crate::error::Result;
use crate::sdp::EncodingsByKind;
use crate::transport::stream::StreamDriver;
use crate::types::{CallSessionId, MediaKind};

/// Outbound stream produced by the engine for one negotiated encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStream {
    pub kind: MediaKind,
    pub encoding: Encoding,
    /// Engine-side identifier of the capture source
    pub source_id: String,
}

/// Inbound stream reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundStream {
    pub kind: MediaKind,
    pub ssrc: u32,
    pub encoding: Option<Encoding>,
    pub source: Option<SocketAddr>,
}

/// Opaque handle to a rendering surface owned by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisualComponent(pub String);

impl fmt::Display for VisualComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders one inbound stream
pub trait Player: StreamDriver + Sync {
    /// Surface to show, for video players once realized
    fn visual_component(&self) -> Option<VisualComponent>;
}

/// Capture/render capability consumed by call sessions
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Encodings the engine can produce for a kind, in preference order
    fn supported_encodings(&self, kind: MediaKind) -> Vec<Encoding>;

    /// Whether a capture device for this kind is usable right now
    fn capture_available(&self, kind: MediaKind) -> bool;

    /// Elementary streams for the negotiated encodings
    async fn create_send_data_source(&self, encodings: &EncodingsByKind) -> Result<Vec<ElementaryStream>>;

    /// Build a player for a freshly detected inbound stream
    async fn create_player(&self, stream: &InboundStream) -> Result<Box<dyn Player>>;

    /// Called when a call starts streaming
    async fn start_processing(&self, _call: &CallSessionId) -> Result<()> {
        Ok(())
    }

    /// Called when a call stops streaming
    async fn stop_processing(&self, _call: &CallSessionId) {}

    fn set_mute(&self, _mute: bool) {}

    fn is_mute(&self) -> bool {
        false
    }
}
