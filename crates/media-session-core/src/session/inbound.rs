//! Inbound playback: one player per received stream, plus the video
//! listeners told about remote video surfaces.

use std::sync::Arc;

use tracing::{debug, warn};

use super::events::{VideoEvent, VideoListener};
use crate::engine::{InboundStream, Player, VisualComponent};
use crate::error::Result;
use crate::transport::stream::{StreamCommand, StreamMachine, StreamState};
use crate::types::MediaKind;

struct InboundPlayer {
    kind: MediaKind,
    ssrc: u32,
    component: Option<VisualComponent>,
    machine: StreamMachine<dyn Player>,
}

#[derive(Default)]
pub(crate) struct InboundMedia {
    players: Vec<InboundPlayer>,
    listeners: Vec<Arc<dyn VideoListener>>,
}

impl InboundMedia {
    pub fn add_listener(&mut self, listener: Arc<dyn VideoListener>) {
        if !self.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn VideoListener>) {
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_states(&self) -> Vec<(MediaKind, u32, StreamState)> {
        self.players.iter().map(|p| (p.kind, p.ssrc, p.machine.state())).collect()
    }

    pub fn visual_components(&self) -> Vec<VisualComponent> {
        self.players.iter().filter_map(|p| p.component.clone()).collect()
    }

    /// Realize a new player and start it unless playback is suspended.
    /// A visual component appearing on realize is announced to listeners and
    /// returned.
    pub async fn add_player(&mut self, stream: &InboundStream, player: Box<dyn Player>, start: bool) -> Result<Option<VideoEvent>> {
        let label = format!("{}-play-{:08x}", stream.kind, stream.ssrc);
        let mut machine = StreamMachine::new(label, player);

        if let Err(e) = machine.dispatch(StreamCommand::Realize).await {
            machine.release().await;
            return Err(e);
        }

        let component = machine.driver().visual_component();
        let event = component.clone().map(|c| VideoEvent::added(c, stream.ssrc));
        if let Some(event) = &event {
            for listener in &self.listeners {
                listener.video_added(event);
            }
        }

        if start {
            if let Err(e) = machine.dispatch(StreamCommand::Start).await {
                warn!(stream = machine.label(), error = %e, "failed to start player");
            }
        } else {
            debug!(stream = machine.label(), "player held back while on hold");
        }

        self.players.push(InboundPlayer { kind: stream.kind, ssrc: stream.ssrc, component, machine });
        Ok(event)
    }

    /// Suspend or resume playback for hold
    pub async fn set_playing(&mut self, play: bool) {
        let command = if play { StreamCommand::Start } else { StreamCommand::Stop };
        for player in &mut self.players {
            if let Err(e) = player.machine.dispatch(command).await {
                warn!(stream = player.machine.label(), ?command, error = %e, "player hold transition failed");
            }
        }
    }

    /// Close every player. Returns the removal events that were delivered
    /// to listeners.
    pub async fn close_all(&mut self) -> Vec<VideoEvent> {
        let mut removed = Vec::new();
        for mut player in self.players.drain(..) {
            player.machine.release().await;
            if let Some(component) = player.component {
                let event = VideoEvent::removed(component, player.ssrc);
                for listener in &self.listeners {
                    listener.video_removed(&event);
                }
                removed.push(event);
            }
        }
        removed
    }
}
