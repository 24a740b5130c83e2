//! Call session orchestration
//!
//! A [`CallSession`] owns the media side of one call: a transport context
//! per media kind, the hold flags, the optional key exchange coordinator and
//! the inbound players. Signaling drives it through offer/answer and hold
//! operations; transports report back through
//! [`CallSession::on_transport_event`]. Both paths take the same per-session
//! lock.

pub mod events;
mod inbound;

use std::collections::BTreeMap;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::MediaSessionConfig;
use crate::engine::{MediaEngine, VisualComponent};
use crate::error::{Error, Result};
use crate::sdp::{literal_ip, EncodingsByKind, LocalDescription, RemoteDescription, SdpNegotiator};
use crate::security::{SecureKeyExchangeCoordinator, SecureTransformFactory, SecurityState};
use crate::service::SessionMap;
use crate::transport::{
    MediaTransportContext, PortAllocator, StreamState, TransportEvent, TransportFactory, TransportOptions,
};
use crate::types::{CallMediaState, CallSessionId, CallState, HoldState, MediaKind, SecuritySource};

use events::{CallSessionEvent, VideoListener};
use inbound::InboundMedia;

/// Collaborators a session is built from
pub(crate) struct SessionDeps {
    pub config: Arc<MediaSessionConfig>,
    pub allocator: Arc<PortAllocator>,
    pub negotiator: SdpNegotiator,
    pub engine: Arc<dyn MediaEngine>,
    pub transports: Arc<dyn TransportFactory>,
    pub security: Option<Arc<dyn SecureTransformFactory>>,
    pub registry: Weak<SessionMap>,
}

struct SessionInner {
    state: CallMediaState,
    contexts: BTreeMap<MediaKind, MediaTransportContext>,
    hold: HoldState,
    last_intended_destination: Option<IpAddr>,
    allocated: bool,
    security: Option<SecureKeyExchangeCoordinator>,
    call_info_uri: Option<String>,
    inbound: InboundMedia,
}

impl SessionInner {
    fn ensure_live(&self) -> Result<()> {
        if self.state == CallMediaState::Ended {
            return Err(Error::SessionEnded);
        }
        Ok(())
    }
}

/// Media side of one call
pub struct CallSession {
    id: CallSessionId,
    config: Arc<MediaSessionConfig>,
    allocator: Arc<PortAllocator>,
    negotiator: SdpNegotiator,
    engine: Arc<dyn MediaEngine>,
    transports: Arc<dyn TransportFactory>,
    registry: Weak<SessionMap>,
    inner: Mutex<SessionInner>,
    security_state: Option<watch::Receiver<SecurityState>>,
    event_tx: mpsc::UnboundedSender<CallSessionEvent>,
    event_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<CallSessionEvent>>>,
}

impl CallSession {
    pub(crate) fn new(deps: SessionDeps) -> Self {
        let id = CallSessionId::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let security = deps.security.map(|factory| {
            SecureKeyExchangeCoordinator::new(
                factory,
                deps.config.identity_store.clone(),
                deps.config.default_secure,
                event_tx.clone(),
            )
        });
        let security_state = security.as_ref().map(|s| s.subscribe());

        info!(session = %id, secure = security.is_some(), "call session created");
        Self {
            id,
            config: deps.config,
            allocator: deps.allocator,
            negotiator: deps.negotiator,
            engine: deps.engine,
            transports: deps.transports,
            registry: deps.registry,
            inner: Mutex::new(SessionInner {
                state: CallMediaState::Idle,
                contexts: BTreeMap::new(),
                hold: HoldState::NONE,
                last_intended_destination: None,
                allocated: false,
                security,
                call_info_uri: None,
                inbound: InboundMedia::default(),
            }),
            security_state,
            event_tx,
            event_rx: parking_lot::Mutex::new(Some(event_rx)),
        }
    }

    pub fn id(&self) -> &CallSessionId {
        &self.id
    }

    /// Take the event receiver; only the first caller gets it
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<CallSessionEvent>> {
        self.event_rx.lock().take()
    }

    pub async fn state(&self) -> CallMediaState {
        self.inner.lock().await.state
    }

    pub async fn hold_state(&self) -> HoldState {
        self.inner.lock().await.hold
    }

    pub async fn call_info_uri(&self) -> Option<String> {
        self.inner.lock().await.call_info_uri.clone()
    }

    /// Local RTP port of a media kind, once allocated
    pub async fn local_port(&self, kind: MediaKind) -> Option<u16> {
        let inner = self.inner.lock().await;
        inner.contexts.get(&kind).and_then(|c| c.local_bind()).map(|a| a.port())
    }

    pub async fn public_address(&self, kind: MediaKind) -> Option<SocketAddr> {
        let inner = self.inner.lock().await;
        inner.contexts.get(&kind).and_then(|c| c.public_address())
    }

    /// Remote targets currently bound for a media kind
    pub async fn targets(&self, kind: MediaKind) -> Vec<SocketAddr> {
        let inner = self.inner.lock().await;
        inner.contexts.get(&kind).map(|c| c.targets().to_vec()).unwrap_or_default()
    }

    /// States of the outbound streams of a media kind
    pub async fn send_stream_states(&self, kind: MediaKind) -> Vec<StreamState> {
        let inner = self.inner.lock().await;
        inner.contexts.get(&kind).map(|c| c.send_stream_states()).unwrap_or_default()
    }

    pub async fn inbound_player_count(&self) -> usize {
        self.inner.lock().await.inbound.player_count()
    }

    /// Remote video surfaces currently shown, in arrival order
    pub async fn visual_components(&self) -> Vec<VisualComponent> {
        self.inner.lock().await.inbound.visual_components()
    }

    /// States of the inbound players as (kind, ssrc, state)
    pub async fn player_states(&self) -> Vec<(MediaKind, u32, StreamState)> {
        self.inner.lock().await.inbound.player_states()
    }

    pub fn set_mute(&self, mute: bool) {
        self.engine.set_mute(mute);
    }

    pub fn is_mute(&self) -> bool {
        self.engine.is_mute()
    }

    /// Build a local offer, allocating (or re-allocating) transports for
    /// `intended_destination` first.
    pub async fn create_offer(&self, intended_destination: Option<IpAddr>) -> Result<LocalDescription> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;

        self.ensure_contexts(&mut inner, intended_destination).await?;
        let offer = self.build(&inner, None)?;
        if inner.state == CallMediaState::Idle {
            self.transition(&mut inner, CallMediaState::Negotiating);
        }
        debug!(session = %self.id, "created offer:\n{}", offer);
        Ok(offer)
    }

    /// Answer a remote offer. Targets are bound and outbound streams are
    /// prepared, but nothing starts until the call is in progress.
    pub async fn process_offer(&self, remote: &RemoteDescription) -> Result<LocalDescription> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;
        self.record_call_info(&mut inner, remote);

        let destination = self.resolve_destination(remote).await?;
        self.ensure_contexts(&mut inner, Some(destination)).await?;
        let answer = self.build(&inner, Some(remote))?;
        self.apply_remote(&mut inner, remote, &answer.negotiated).await?;

        if inner.state == CallMediaState::Idle {
            self.transition(&mut inner, CallMediaState::Negotiating);
        }
        debug!(session = %self.id, "created answer:\n{}", answer);
        Ok(answer)
    }

    /// Apply the remote answer to an offer we sent
    pub async fn process_answer(&self, remote: &RemoteDescription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;
        self.record_call_info(&mut inner, remote);

        let destination = self.resolve_destination(remote).await?;
        self.ensure_contexts(&mut inner, Some(destination)).await?;
        let negotiated = self.negotiator.negotiate(&self.local_supported(), remote)?;
        self.apply_remote(&mut inner, remote, &negotiated).await?;

        if inner.state == CallMediaState::Idle {
            self.transition(&mut inner, CallMediaState::Negotiating);
        }
        Ok(())
    }

    /// Build a re-offer from a previously received description with every
    /// media line moved into or out of hold.
    pub async fn create_description_for_hold(&self, remote: &RemoteDescription, on: bool) -> Result<LocalDescription> {
        let inner = self.inner.lock().await;
        inner.ensure_live()?;
        let addresses = public_addresses(&inner);
        self.negotiator.build_hold_description(
            &self.local_supported(),
            remote,
            &addresses,
            inner.hold,
            |kind| self.engine.capture_available(kind),
            on,
        )
    }

    pub fn is_offer_to_hold(&self, remote: &RemoteDescription) -> bool {
        remote.is_offer_for_hold()
    }

    /// Set or clear a hold flag and apply the resulting policy right away.
    /// No renegotiation happens here; the next description announces it.
    pub async fn put_on_hold(&self, on: bool, locally_initiated: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;

        inner.hold = inner.hold.apply(on, locally_initiated);
        info!(session = %self.id, on, locally_initiated, hold = ?inner.hold, "hold changed");
        self.apply_hold(&mut inner).await;

        // streams held back when the call started go out now
        let running = matches!(inner.state, CallMediaState::Active | CallMediaState::OnHold);
        if running && !inner.hold.sending_suspended() {
            self.start_streaming_locked(&mut inner).await?;
        }

        match inner.state {
            CallMediaState::Active if inner.hold.is_on_hold() => {
                self.transition(&mut inner, CallMediaState::OnHold)
            }
            CallMediaState::OnHold if !inner.hold.is_on_hold() => {
                self.transition(&mut inner, CallMediaState::Active)
            }
            _ => {}
        }
        Ok(())
    }

    /// Start every prepared outbound stream
    pub async fn start_streaming(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;
        self.start_streaming_locked(&mut inner).await?;
        self.apply_hold(&mut inner).await;
        Ok(())
    }

    /// Stop and release all streams and transports. Returns whether anything
    /// was stopped; a second call returns `false`.
    pub async fn stop_streaming(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.release_contexts(&mut inner, false).await
    }

    /// Follow the surrounding call's lifecycle
    pub async fn on_call_state_changed(&self, call_state: CallState) -> Result<()> {
        match call_state {
            CallState::Initializing => Ok(()),
            CallState::InProgress => {
                let mut inner = self.inner.lock().await;
                inner.ensure_live()?;
                self.start_streaming_locked(&mut inner).await?;
                self.apply_hold(&mut inner).await;
                if let Err(e) = self.engine.start_processing(&self.id).await {
                    warn!(session = %self.id, error = %e, "media engine failed to start processing");
                }
                let next = if inner.hold.is_on_hold() { CallMediaState::OnHold } else { CallMediaState::Active };
                self.transition(&mut inner, next);
                Ok(())
            }
            CallState::Ended => {
                self.end().await;
                Ok(())
            }
        }
    }

    /// Tear the call's media down. Safe to call more than once.
    pub async fn end(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CallMediaState::Ended {
            return;
        }
        self.release_contexts(&mut inner, true).await;
        self.engine.stop_processing(&self.id).await;
        for event in inner.inbound.close_all().await {
            let _ = self.event_tx.send(CallSessionEvent::Video(event));
        }
        self.transition(&mut inner, CallMediaState::Ended);
        drop(inner);

        if let Some(sessions) = self.registry.upgrade() {
            if sessions.write().await.remove(&self.id).is_some() {
                debug!(session = %self.id, "call session unregistered");
            }
        }
    }

    /// Single entry point for transport notifications
    pub async fn on_transport_event(&self, kind: MediaKind, event: TransportEvent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == CallMediaState::Ended {
            debug!(session = %self.id, media = %kind, ?event, "discarding transport event after call end");
            return Ok(());
        }

        match event {
            TransportEvent::NewReceiveStream(stream) => {
                info!(session = %self.id, media = %stream.kind, ssrc = stream.ssrc, "new receive stream");
                let player = self.engine.create_player(&stream).await?;
                let play = !inner.hold.playback_suspended();
                if let Some(video) = inner.inbound.add_player(&stream, player, play).await? {
                    let _ = self.event_tx.send(CallSessionEvent::Video(video));
                }
            }
            TransportEvent::StreamMapped { ssrc, cname } => {
                debug!(session = %self.id, media = %kind, ssrc, ?cname, "stream mapped to participant");
            }
            TransportEvent::ByeReceived { ssrc, reason } => {
                debug!(session = %self.id, media = %kind, ssrc, ?reason, "BYE received");
            }
            TransportEvent::NewParticipant { cname } => {
                debug!(session = %self.id, media = %kind, %cname, "new participant");
            }
            TransportEvent::Handshake(handshake) => {
                let SessionInner { security, contexts, .. } = &mut *inner;
                match security {
                    Some(security) => security.on_handshake_event(kind, handshake, contexts).await,
                    None => debug!(session = %self.id, media = %kind, "handshake event on an unsecured call"),
                }
            }
        }
        Ok(())
    }

    pub async fn add_video_listener(&self, listener: Arc<dyn VideoListener>) {
        self.inner.lock().await.inbound.add_listener(listener);
    }

    pub async fn remove_video_listener(&self, listener: &Arc<dyn VideoListener>) {
        self.inner.lock().await.inbound.remove_listener(listener);
    }

    /// Switch secure communication on or off for this call
    pub async fn set_security_enabled(&self, enabled: bool, source: SecuritySource) {
        let mut inner = self.inner.lock().await;
        let SessionInner { security, contexts, .. } = &mut *inner;
        match security {
            Some(security) => security.set_security_enabled(enabled, source, contexts).await,
            None => debug!(session = %self.id, "no key exchange selected for this call"),
        }
    }

    pub async fn is_security_enabled(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.security.as_ref().is_some_and(|s| s.is_enabled())
    }

    pub async fn security_state(&self) -> Option<SecurityState> {
        let inner = self.inner.lock().await;
        inner.security.as_ref().map(|s| s.state())
    }

    /// Forward the user's short authentication string decision
    pub async fn verify_sas(&self, verified: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let SessionInner { security, contexts, .. } = &mut *inner;
        match security {
            Some(security) => security.verify_sas(verified, contexts),
            None => Err(Error::NoSecureMaster),
        }
    }

    /// Wait until the master key exchange is secure. Returns `false` on
    /// timeout or when the call has no key exchange.
    pub async fn wait_until_secure(&self, timeout: Duration) -> bool {
        let Some(mut rx) = self.security_state.clone() else {
            return false;
        };
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| s.is_secure())).await,
            Ok(Ok(_))
        )
    }

    fn record_call_info(&self, inner: &mut SessionInner, remote: &RemoteDescription) {
        if let Some(uri) = remote.call_info_uri() {
            debug!(session = %self.id, %uri, "call info");
            inner.call_info_uri = Some(uri.to_string());
        }
    }

    fn local_supported(&self) -> EncodingsByKind {
        MediaKind::ALL
            .into_iter()
            .map(|kind| (kind, self.engine.supported_encodings(kind)))
            .filter(|(_, list)| !list.is_empty())
            .collect()
    }

    fn build(&self, inner: &SessionInner, remote: Option<&RemoteDescription>) -> Result<LocalDescription> {
        let addresses = public_addresses(inner);
        self.negotiator.build_description(
            &self.local_supported(),
            remote,
            &addresses,
            inner.hold,
            |kind| self.engine.capture_available(kind),
        )
    }

    async fn resolve_destination(&self, remote: &RemoteDescription) -> Result<IpAddr> {
        let host = remote.destination_host().ok_or_else(|| Error::MissingConnectionAddress {
            media: remote
                .description()
                .media
                .iter()
                .find_map(|m| m.kind())
                .unwrap_or(MediaKind::Audio),
        })?;
        resolve_host(host, self.config.resolve_timeout()).await
    }

    /// Allocate contexts on first use, or re-allocate when the destination
    /// changed. Streams running before a re-allocation are restarted.
    async fn ensure_contexts(&self, inner: &mut SessionInner, destination: Option<IpAddr>) -> Result<()> {
        if inner.allocated {
            match (inner.last_intended_destination, destination) {
                (Some(last), Some(dest)) if last != dest => {}
                (None, dest) => {
                    inner.last_intended_destination = dest;
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }

        let mut was_streaming = false;
        if inner.allocated {
            info!(
                session = %self.id,
                old = ?inner.last_intended_destination,
                new = ?destination,
                "destination changed, re-allocating media ports"
            );
            was_streaming = self.release_contexts(inner, false).await;
        }

        self.allocate_contexts(inner, destination).await?;

        if was_streaming {
            if let Err(e) = self.start_streaming_locked(inner).await {
                warn!(session = %self.id, error = %e, "failed to restart streaming after re-allocation");
            }
            self.apply_hold(inner).await;
        }
        Ok(())
    }

    async fn allocate_contexts(&self, inner: &mut SessionInner, destination: Option<IpAddr>) -> Result<()> {
        let options = TransportOptions { receive_buffer_ms: self.config.receive_buffer_ms };
        let mut last_error = None;

        for kind in MediaKind::ALL {
            if self.engine.supported_encodings(kind).is_empty() {
                debug!(session = %self.id, media = %kind, "no local encodings, skipping allocation");
                continue;
            }
            let opened = match self.allocator.allocate(destination, self.config.bind_retries).await {
                Ok(binding) => MediaTransportContext::open(kind, binding, self.transports.as_ref(), options).await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(mut ctx) => {
                    if let Some(security) = inner.security.as_mut() {
                        security.attach(&mut ctx).await;
                    }
                    inner.contexts.insert(kind, ctx);
                }
                Err(e) => {
                    warn!(session = %self.id, media = %kind, error = %e, "media allocation failed");
                    last_error = Some(e);
                }
            }
        }

        if inner.contexts.is_empty() {
            return Err(last_error.unwrap_or(Error::UnsupportedFormatSet));
        }
        inner.allocated = true;
        inner.last_intended_destination = destination;
        Ok(())
    }

    /// Bind the negotiated remote targets and prepare outbound streams
    async fn apply_remote(
        &self,
        inner: &mut SessionInner,
        remote: &RemoteDescription,
        negotiated: &EncodingsByKind,
    ) -> Result<()> {
        let mut targets: BTreeMap<MediaKind, SocketAddr> = BTreeMap::new();
        for kind in negotiated.keys() {
            let Some(line) = remote.description().media_of_kind(*kind).find(|m| m.port != 0) else {
                continue;
            };
            let host = remote
                .connection_host(line)
                .ok_or(Error::MissingConnectionAddress { media: *kind })?;
            let ip = resolve_host(host, self.config.resolve_timeout()).await?;
            targets.insert(*kind, SocketAddr::new(ip, line.port));
        }

        let streams = self.engine.create_send_data_source(negotiated).await?;
        let running = matches!(inner.state, CallMediaState::Active | CallMediaState::OnHold);

        let mut replaced = false;
        for (kind, ctx) in inner.contexts.iter_mut() {
            let wanted_targets: Vec<SocketAddr> = targets.get(kind).copied().into_iter().collect();
            ctx.set_targets(wanted_targets).await?;

            let wanted: Vec<_> = streams.iter().filter(|s| s.kind == *kind).map(|s| s.encoding.clone()).collect();
            if ctx.send_encodings() != wanted {
                ctx.prepare_send_streams(&streams).await?;
                replaced = true;
            }
        }

        if replaced && running {
            self.start_streaming_locked(inner).await?;
            self.apply_hold(inner).await;
        }
        Ok(())
    }

    async fn start_streaming_locked(&self, inner: &mut SessionInner) -> Result<()> {
        let send = !inner.hold.sending_suspended();
        let mut started = 0;
        let mut attempted = 0;
        let mut last_error = None;
        for ctx in inner.contexts.values_mut() {
            let (s, a, e) = ctx.start_send_streams(send).await;
            started += s;
            attempted += a;
            if e.is_some() {
                last_error = e;
            }
        }

        if attempted > 0 && started == 0 {
            let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
            warn!(session = %self.id, attempted, %reason, "no stream started, rolling back");
            self.release_contexts(inner, false).await;
            let _ = self.event_tx.send(CallSessionEvent::StreamingFailed { reason: reason.clone() });
            return Err(Error::StreamStartFailed { attempted, reason });
        }
        if started < attempted {
            warn!(session = %self.id, started, attempted, "some streams failed to start");
        } else {
            info!(session = %self.id, started, "streaming started");
        }
        Ok(())
    }

    async fn apply_hold(&self, inner: &mut SessionInner) {
        let send = !inner.hold.sending_suspended();
        for ctx in inner.contexts.values_mut() {
            ctx.set_sending(send).await;
        }
        inner.inbound.set_playing(!inner.hold.playback_suspended()).await;
    }

    async fn release_contexts(&self, inner: &mut SessionInner, call_ended: bool) -> bool {
        let contexts = mem::take(&mut inner.contexts);
        let had_contexts = !contexts.is_empty();

        let mut stopped = false;
        for (_, mut ctx) in contexts {
            stopped |= ctx.release().await;
        }
        if had_contexts {
            if let Some(security) = inner.security.as_mut() {
                security.detach(call_ended);
            }
        }
        inner.allocated = false;
        inner.last_intended_destination = None;
        if had_contexts {
            info!(session = %self.id, stopped, "media streaming stopped");
        }
        stopped
    }

    fn transition(&self, inner: &mut SessionInner, new: CallMediaState) {
        let old = inner.state;
        if old == new {
            return;
        }
        inner.state = new;
        info!(session = %self.id, %old, %new, "call media state changed");
        let _ = self.event_tx.send(CallSessionEvent::StateChanged { old, new });
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession").field("id", &self.id).finish()
    }
}

fn public_addresses(inner: &SessionInner) -> BTreeMap<MediaKind, SocketAddr> {
    inner
        .contexts
        .iter()
        .filter_map(|(kind, ctx)| ctx.public_address().map(|addr| (*kind, addr)))
        .collect()
}

async fn resolve_host(host: &str, timeout: Duration) -> Result<IpAddr> {
    if let Some(ip) = literal_ip(host) {
        return Ok(ip);
    }
    let lookup = tokio::time::timeout(timeout, tokio::net::lookup_host((host, 0)))
        .await
        .map_err(|_| Error::AddressResolution {
            address: host.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "lookup timed out"),
        })?;
    let mut addrs = lookup.map_err(|source| Error::AddressResolution { address: host.to_string(), source })?;
    addrs.next().map(|a| a.ip()).ok_or_else(|| Error::AddressResolution {
        address: host.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
    })
}
