//! Call media session control for a SIP softphone
//!
//! This crate sits between SIP signaling and the RTP media stack. It
//! allocates local RTP/RTCP ports, builds and answers SDP offers, drives the
//! hold sub-protocol, starts and stops the media streams of a call and
//! sequences a ZRTP-style key exchange across a call's media kinds.
//!
//! The RTP stack, the capture/render engine and the key exchange engine are
//! collaborators behind traits ([`RtpTransport`], [`MediaEngine`],
//! [`SecureTransformEngine`]); applications plug their implementations into
//! a [`MediaService`] and create one [`CallSession`] per call.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod sdp;
pub mod security;
pub mod service;
pub mod session;
pub mod transport;
pub mod types;

pub use codec::{CodecRegistry, Encoding};
pub use config::MediaSessionConfig;
pub use engine::{ElementaryStream, InboundStream, MediaEngine, Player, VisualComponent};
pub use error::{Error, Result};
pub use sdp::{LocalDescription, RemoteDescription, SdpNegotiator, SessionDescription};
pub use security::{
    HandshakeEvent, SecureKeyExchangeCoordinator, SecureTransformEngine, SecureTransformFactory, SecurityInfoCode,
    SecurityState,
};
pub use service::{MediaService, MediaServiceBuilder};
pub use session::events::{CallSessionEvent, VideoEvent, VideoEventType, VideoListener};
pub use session::CallSession;
pub use transport::{
    AddressResolver, BoundSockets, MediaTransportContext, PortAllocator, PortBinder, PortBinding, PortRange,
    RtpTransport, SendStream, StreamDriver, StreamState, TransportEvent, TransportFactory, TransportOptions,
};
pub use types::{CallMediaState, CallSessionId, CallState, HoldState, MediaDirection, MediaKind, SecuritySource};

/// Commonly used types in one import
pub mod prelude {
    pub use crate::{
        CallMediaState, CallSession, CallSessionEvent, CallState, Encoding, Error, MediaEngine, MediaKind,
        MediaService, MediaSessionConfig, RemoteDescription, Result, SecuritySource,
    };
}
