//! Core value types shared across the media session modules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Call session identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallSessionId(pub String);

impl CallSessionId {
    pub fn new() -> Self {
        Self(format!("call-media-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for CallSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media carried by a transport context.
///
/// The ordering is significant: audio sorts before video, which is the order
/// media lines are emitted in and the order contexts are allocated in.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// All media kinds, in emission order
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    /// SDP media type token
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parse an SDP media type token; unknown kinds (application, text...) yield `None`
    pub fn from_sdp(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("audio") {
            Some(MediaKind::Audio)
        } else if token.eq_ignore_ascii_case("video") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media direction attribute of the hold sub-protocol
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub const ALL: [MediaDirection; 4] = [
        MediaDirection::SendRecv,
        MediaDirection::SendOnly,
        MediaDirection::RecvOnly,
        MediaDirection::Inactive,
    ];

    /// Attribute name as written on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }

    /// Whether a peer announcing this direction is putting us on hold
    pub fn is_hold(&self) -> bool {
        matches!(self, MediaDirection::SendOnly | MediaDirection::Inactive)
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaDirection {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaDirection::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Hold state of a call: who asked for it.
///
/// The two flags are independent. The effective send/receive policy and the
/// direction attribute announced in descriptions are pure functions of both.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct HoldState {
    /// We put the call on hold
    pub held_by_us: bool,
    /// The remote party put the call on hold
    pub held_by_peer: bool,
}

impl HoldState {
    pub const NONE: HoldState = HoldState { held_by_us: false, held_by_peer: false };

    /// Set or clear the flag matching the origin of the request
    pub fn apply(mut self, on: bool, locally_initiated: bool) -> Self {
        if locally_initiated {
            self.held_by_us = on;
        } else {
            self.held_by_peer = on;
        }
        self
    }

    pub fn is_on_hold(&self) -> bool {
        self.held_by_us || self.held_by_peer
    }

    /// Outbound media stops whenever either side holds
    pub fn sending_suspended(&self) -> bool {
        self.is_on_hold()
    }

    /// Inbound playback stops only when we hold
    pub fn playback_suspended(&self) -> bool {
        self.held_by_us
    }

    /// Direction attribute to announce. `None` means plain sendrecv, which is
    /// left implicit.
    pub fn direction(&self) -> Option<MediaDirection> {
        match (self.held_by_us, self.held_by_peer) {
            (true, true) => Some(MediaDirection::Inactive),
            (true, false) => Some(MediaDirection::SendOnly),
            (false, true) => Some(MediaDirection::RecvOnly),
            (false, false) => None,
        }
    }
}

/// Media projection of a call's lifecycle
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallMediaState {
    Idle,
    Negotiating,
    Active,
    OnHold,
    Ended,
}

impl fmt::Display for CallMediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallMediaState::Idle => "Idle",
            CallMediaState::Negotiating => "Negotiating",
            CallMediaState::Active => "Active",
            CallMediaState::OnHold => "OnHold",
            CallMediaState::Ended => "Ended",
        };
        f.write_str(s)
    }
}

/// States of the surrounding call as signaled by the signaling layer
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    Initializing,
    InProgress,
    Ended,
}

/// Where a secure-communication toggle came from
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum SecuritySource {
    /// The local user toggled it
    Local,
    /// The remote party asked for it during renegotiation
    Remote,
    /// A previous toggle is being rolled back; no further action
    Reverted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_direction_mapping() {
        assert_eq!(HoldState::NONE.direction(), None);
        assert_eq!(HoldState::NONE.apply(true, true).direction(), Some(MediaDirection::SendOnly));
        assert_eq!(HoldState::NONE.apply(true, false).direction(), Some(MediaDirection::RecvOnly));
        assert_eq!(
            HoldState::NONE.apply(true, true).apply(true, false).direction(),
            Some(MediaDirection::Inactive)
        );
    }

    #[test]
    fn test_hold_policy() {
        let peer = HoldState::NONE.apply(true, false);
        assert!(peer.sending_suspended());
        assert!(!peer.playback_suspended());

        let ours = HoldState::NONE.apply(true, true);
        assert!(ours.sending_suspended());
        assert!(ours.playback_suspended());
    }

    #[test]
    fn test_media_kind_tokens() {
        assert_eq!(MediaKind::from_sdp("AUDIO"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_sdp("video"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_sdp("application"), None);
        assert!(MediaKind::Audio < MediaKind::Video);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("recvonly".parse::<MediaDirection>(), Ok(MediaDirection::RecvOnly));
        assert!("sideways".parse::<MediaDirection>().is_err());
        assert!(MediaDirection::Inactive.is_hold());
        assert!(!MediaDirection::RecvOnly.is_hold());
    }
}
