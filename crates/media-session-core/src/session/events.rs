//! Call Session Events
//!
//! Out-of-band notifications a call session emits: lifecycle changes,
//! security information and video surfaces appearing or disappearing.

use std::time::Instant;

use crate::engine::VisualComponent;
use crate::security::{SecurityInfoCode, SecurityState};
use crate::types::{CallMediaState, MediaKind};

/// Whether a video surface appeared or went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEventType {
    Added,
    Removed,
}

/// A remote video surface changed
#[derive(Debug, Clone)]
pub struct VideoEvent {
    pub event_type: VideoEventType,
    pub component: VisualComponent,
    /// SSRC of the inbound stream rendered on the surface
    pub ssrc: u32,
    pub timestamp: Instant,
}

impl VideoEvent {
    pub fn added(component: VisualComponent, ssrc: u32) -> Self {
        Self { event_type: VideoEventType::Added, component, ssrc, timestamp: Instant::now() }
    }

    pub fn removed(component: VisualComponent, ssrc: u32) -> Self {
        Self { event_type: VideoEventType::Removed, component, ssrc, timestamp: Instant::now() }
    }
}

/// Receives video surface notifications
pub trait VideoListener: Send + Sync {
    fn video_added(&self, event: &VideoEvent);
    fn video_removed(&self, event: &VideoEvent);
}

/// Events published on a call session's event channel
#[derive(Debug, Clone)]
pub enum CallSessionEvent {
    /// Media state machine moved
    StateChanged { old: CallMediaState, new: CallMediaState },

    /// Informational security notice for the user
    SecurityInfo { media: Option<MediaKind>, code: SecurityInfoCode },

    /// Key exchange progress
    SecurityStateChanged { state: SecurityState },

    /// Streaming could not start and was rolled back
    StreamingFailed { reason: String },

    /// A remote video surface appeared or went away
    Video(VideoEvent),
}

impl CallSessionEvent {
    pub fn is_security_event(&self) -> bool {
        matches!(self, CallSessionEvent::SecurityInfo { .. } | CallSessionEvent::SecurityStateChanged { .. })
    }
}
