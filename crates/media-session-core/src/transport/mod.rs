//! Media transport: port allocation, transport contexts and the
//! collaborator traits for the RTP stack underneath.

pub mod allocator;
pub mod context;
pub mod stream;
pub mod udp;

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::codec::Encoding;
use crate::engine::{ElementaryStream, InboundStream};
use crate::error::Result;
use crate::security::HandshakeEvent;
use crate::types::MediaKind;

pub use allocator::{PortAllocator, PortBinding, PortRange};
pub use context::MediaTransportContext;
pub use stream::{StreamCommand, StreamDriver, StreamMachine, StreamState, StreamTransition};
pub use udp::{LocalAddressResolver, UdpPortBinder};

/// RTP and RTCP sockets of one bound pair
#[derive(Debug)]
pub struct BoundSockets {
    pub rtp: UdpSocket,
    pub rtcp: UdpSocket,
}

/// Binds the data/control endpoint pair at consecutive ports
#[async_trait]
pub trait PortBinder: Send + Sync {
    /// Bind `data` and `data.port() + 1`. Binders that only reserve
    /// addresses may return `Ok(None)`.
    async fn bind_pair(&self, data: SocketAddr) -> io::Result<Option<BoundSockets>>;
}

/// NAT resolution collaborator
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Externally reachable address for a local port. The destination hint
    /// lets resolvers pick the outgoing interface.
    async fn public_address_for(&self, destination_hint: Option<IpAddr>, local_port: u16) -> io::Result<SocketAddr>;
}

/// Outbound RTP stream created by a transport
pub trait SendStream: StreamDriver + Sync {
    fn encoding(&self) -> &Encoding;
}

/// Handle to one RTP session
#[async_trait]
pub trait RtpTransport: Send + Sync {
    async fn add_target(&self, target: SocketAddr) -> Result<()>;

    async fn remove_targets(&self) -> Result<()>;

    async fn create_send_stream(&self, stream: &ElementaryStream) -> Result<Box<dyn SendStream>>;

    /// Stop all inbound streams; returns how many were running
    async fn stop_receive_streams(&self) -> Result<usize>;

    /// Release the session and its sockets. Called exactly once.
    async fn dispose(&self);
}

/// Options applied when a transport is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub receive_buffer_ms: u64,
}

/// Opens RTP sessions over freshly allocated ports
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, kind: MediaKind, binding: PortBinding, options: TransportOptions) -> Result<Arc<dyn RtpTransport>>;
}

/// Notifications raised by a transport on its own tasks
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    NewReceiveStream(InboundStream),
    StreamMapped { ssrc: u32, cname: Option<String> },
    ByeReceived { ssrc: u32, reason: Option<String> },
    NewParticipant { cname: String },
    Handshake(HandshakeEvent),
}
