//! Error types for call media sessions

use thiserror::Error;

use crate::sdp::SdpParseError;
use crate::types::MediaKind;

/// Result type alias for media session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the media session core
#[derive(Debug, Error)]
pub enum Error {
    /// Binding or resolving a local port pair exhausted its retries
    #[error("Failed to bind to a local port in {attempts} tries (last tried {last_port})")]
    AllocationFailed { attempts: u32, last_port: u16 },

    /// No encoding offered by the remote party is supported locally
    #[error("None of the offered media formats is supported")]
    UnsupportedFormatSet,

    /// The remote session description could not be parsed
    #[error("Malformed remote session description: {0}")]
    MalformedRemoteDescription(#[from] SdpParseError),

    /// The remote description carries no connection address for a media line
    #[error("Remote description has no connection address for {media} media")]
    MissingConnectionAddress { media: MediaKind },

    /// A connection address could not be turned into an IP address
    #[error("Failed to resolve address {address}: {source}")]
    AddressResolution {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// None of the prepared send streams could be started
    #[error("Failed to start streaming ({attempted} streams attempted): {reason}")]
    StreamStartFailed { attempted: usize, reason: String },

    /// The secure transform engine refused to initialize
    #[error("Secure key exchange failed to initialize for {media} media")]
    SecureHandshakeInitFailed { media: MediaKind },

    /// An operation needed the key-exchange master but none is designated
    #[error("No secure key exchange master is active for this call")]
    NoSecureMaster,

    /// Transport session failure
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Failure reported by the media engine
    #[error("Media engine error: {message}")]
    MediaEngine { message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// The call session already reached its terminal state
    #[error("Call session has ended")]
    SessionEnded,
}

impl Error {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport { message: message.into() }
    }

    /// Create a media engine error
    pub fn media_engine(message: impl Into<String>) -> Self {
        Error::MediaEngine { message: message.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into() }
    }

    /// Whether the error only affects the operation that raised it and leaves
    /// an already active call untouched.
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormatSet
                | Error::MalformedRemoteDescription(_)
                | Error::MissingConnectionAddress { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport { message: err.to_string() }
    }
}

