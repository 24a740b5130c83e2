//! Secure media: key exchange engine traits and the per-call coordinator
//!
//! The key exchange itself (ZRTP or similar) runs in an external engine
//! that wraps a transport. This module decides which media kind runs the
//! full handshake and when the others may start from its results.

pub mod coordinator;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::transport::RtpTransport;
use crate::types::MediaKind;

pub use coordinator::SecureKeyExchangeCoordinator;

/// Key exchange engine wrapping one transport
#[async_trait]
pub trait SecureTransformEngine: Send + Sync {
    /// Prepare the engine. With `auto_start` the handshake begins right away
    /// in auto-sensing mode. Returns `false` if the engine is unusable.
    async fn init(&mut self, identity_store: &str, auto_start: bool) -> bool;

    /// Start the handshake, or multistream mode once parameters are applied
    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self);

    /// Release crypto state; called after `stop`
    async fn cleanup(&mut self);

    fn is_started(&self) -> bool;

    /// Parameters a completed handshake hands to the other streams
    fn derive_multistream_params(&self) -> Option<Bytes>;

    async fn apply_multistream_params(&mut self, params: Bytes);

    fn set_sas_verified(&mut self, verified: bool);

    async fn add_target(&mut self, target: SocketAddr) -> Result<()>;

    async fn remove_targets(&mut self) -> Result<()>;
}

/// Creates engines over freshly opened transports
pub trait SecureTransformFactory: Send + Sync {
    fn create(&self, kind: MediaKind, transport: Arc<dyn RtpTransport>) -> Box<dyn SecureTransformEngine>;
}

/// Progress of a call's key exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityState {
    Unsecured,
    MasterPending,
    MasterNegotiating,
    MasterSecure,
    AllStarted,
    /// The engine failed to initialize; the call continues unsecured
    Disabled,
    /// Security was switched off before the master became secure
    Reverted,
}

impl SecurityState {
    pub fn is_secure(self) -> bool {
        matches!(self, SecurityState::MasterSecure | SecurityState::AllStarted)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SecurityState::Disabled | SecurityState::Reverted)
    }
}

impl fmt::Display for SecurityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Informational codes surfaced to the user interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityInfoCode {
    /// Secure communication was requested by default and the handshake is running
    EnabledByDefault,
    /// The user did not ask for secure communication
    NotEnabledByUser,
    /// The key exchange engine could not be initialized
    EngineInitFailure,
    /// The call ended while secure communication was active
    DisabledByCallEnd,
}

/// Handshake progress reported by an engine through its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Media is now encrypted
    SecureOn { cipher: String, sas: Option<String>, sas_verified: bool },
    /// Media fell back to clear
    SecureOff,
    /// The handshake failed
    Failed { reason: String },
}
