//! Master/slave sequencing of a call's key exchange
//!
//! The first secured media kind becomes the master and runs the full
//! handshake. The others are prepared but held back; once the master is
//! secure they receive its multistream parameters and start without a
//! handshake of their own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{HandshakeEvent, SecureTransformFactory, SecurityInfoCode, SecurityState};
use crate::error::{Error, Result};
use crate::session::events::CallSessionEvent;
use crate::transport::MediaTransportContext;
use crate::types::{MediaKind, SecuritySource};

pub type Contexts = BTreeMap<MediaKind, MediaTransportContext>;

pub struct SecureKeyExchangeCoordinator {
    factory: Arc<dyn SecureTransformFactory>,
    identity_store: String,
    enabled: bool,
    master: Option<MediaKind>,
    slaves: BTreeSet<MediaKind>,
    initialized: BTreeSet<MediaKind>,
    started_slaves: BTreeSet<MediaKind>,
    state: watch::Sender<SecurityState>,
    events: mpsc::UnboundedSender<CallSessionEvent>,
}

impl SecureKeyExchangeCoordinator {
    pub fn new(
        factory: Arc<dyn SecureTransformFactory>,
        identity_store: impl Into<String>,
        enabled: bool,
        events: mpsc::UnboundedSender<CallSessionEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SecurityState::Unsecured);
        Self {
            factory,
            identity_store: identity_store.into(),
            enabled,
            master: None,
            slaves: BTreeSet::new(),
            initialized: BTreeSet::new(),
            started_slaves: BTreeSet::new(),
            state,
            events,
        }
    }

    pub fn state(&self) -> SecurityState {
        *self.state.borrow()
    }

    /// Watch state changes, e.g. to wait for the master with a timeout
    pub fn subscribe(&self) -> watch::Receiver<SecurityState> {
        self.state.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn master(&self) -> Option<MediaKind> {
        self.master
    }

    pub fn slaves(&self) -> impl Iterator<Item = MediaKind> + '_ {
        self.slaves.iter().copied()
    }

    /// Wrap a freshly bound context with a secure transform. The first
    /// context attached becomes the master.
    pub async fn attach(&mut self, ctx: &mut MediaTransportContext) {
        let kind = ctx.kind();
        let Some(transport) = ctx.transport() else {
            debug!(media = %kind, "not attaching security to an unbound context");
            return;
        };
        let is_master = match self.master {
            None => {
                self.master = Some(kind);
                self.set_state(SecurityState::MasterPending);
                true
            }
            Some(master) => {
                if master != kind {
                    self.slaves.insert(kind);
                }
                master == kind
            }
        };
        ctx.set_secure_transform(self.factory.create(kind, transport));

        if !self.enabled {
            if is_master {
                self.notify(Some(kind), SecurityInfoCode::NotEnabledByUser);
            }
            return;
        }
        if self.state().is_terminal() {
            return;
        }
        if self.init_engine(ctx, is_master).await && is_master {
            self.notify(Some(kind), SecurityInfoCode::EnabledByDefault);
        }
    }

    /// React to handshake progress of one media kind
    pub async fn on_handshake_event(&mut self, kind: MediaKind, event: HandshakeEvent, contexts: &mut Contexts) {
        let is_master = self.master == Some(kind);
        match event {
            HandshakeEvent::SecureOn { cipher, .. } if is_master => {
                if self.state().is_terminal() {
                    debug!(media = %kind, %cipher, state = ?self.state(), "ignoring late master handshake");
                    return;
                }
                info!(media = %kind, %cipher, "master key exchange secure");
                self.set_state(SecurityState::MasterSecure);
                self.start_slaves(contexts).await;
            }
            HandshakeEvent::SecureOn { cipher, .. } => {
                debug!(media = %kind, %cipher, "slave stream secure");
            }
            HandshakeEvent::SecureOff if is_master => {
                warn!(media = %kind, "master stream fell back to clear media");
                if !self.state().is_terminal() {
                    self.set_state(SecurityState::Unsecured);
                }
            }
            HandshakeEvent::SecureOff => debug!(media = %kind, "slave stream fell back to clear media"),
            HandshakeEvent::Failed { reason } => {
                warn!(media = %kind, %reason, master = is_master, "key exchange failed, continuing unsecured");
                if is_master && !self.state().is_terminal() {
                    self.set_state(SecurityState::Unsecured);
                }
            }
        }
    }

    /// Toggle secure communication.
    ///
    /// Only a local request acts on the engines: it starts the master
    /// handshake if that has not started yet. Remote and reverted toggles
    /// record the flag. Switching off never tears down a secure session.
    pub async fn set_security_enabled(&mut self, enabled: bool, source: SecuritySource, contexts: &mut Contexts) {
        self.enabled = enabled;
        if source != SecuritySource::Local {
            debug!(enabled, ?source, "security toggle recorded");
            return;
        }

        if !enabled {
            let state = self.state();
            if self.master.is_some() && !state.is_secure() && !state.is_terminal() {
                self.set_state(SecurityState::Reverted);
            }
            return;
        }

        if self.state().is_terminal() {
            debug!(state = %self.state(), "security toggle ignored in terminal state");
            return;
        }
        let Some(master) = self.master else {
            return;
        };
        let Some(ctx) = contexts.get_mut(&master) else {
            return;
        };
        let started = ctx.secure_transform().map(|s| s.is_started()).unwrap_or(false);
        if !started {
            self.init_engine(ctx, true).await;
        }
        // slaves still wait for the master
        for slave in self.slaves.clone() {
            if let Some(ctx) = contexts.get_mut(&slave) {
                if !self.initialized.contains(&slave) {
                    self.init_engine(ctx, false).await;
                }
            }
        }
    }

    /// Forward the user's SAS decision to the master engine
    pub fn verify_sas(&self, verified: bool, contexts: &mut Contexts) -> Result<()> {
        let master = self.master.ok_or(Error::NoSecureMaster)?;
        let engine = contexts
            .get_mut(&master)
            .and_then(|ctx| ctx.secure_transform_mut())
            .ok_or(Error::NoSecureMaster)?;
        engine.set_sas_verified(verified);
        info!(media = %master, verified, "SAS verification forwarded");
        Ok(())
    }

    /// Forget all engines; their contexts were released. A call end while
    /// secure raises [`SecurityInfoCode::DisabledByCallEnd`].
    pub fn detach(&mut self, call_ended: bool) {
        if call_ended && self.enabled && self.master.is_some() {
            self.notify(self.master, SecurityInfoCode::DisabledByCallEnd);
        }
        self.master = None;
        self.slaves.clear();
        self.initialized.clear();
        self.started_slaves.clear();
        if !self.state().is_terminal() {
            self.set_state(SecurityState::Unsecured);
        }
    }

    async fn init_engine(&mut self, ctx: &mut MediaTransportContext, auto_start: bool) -> bool {
        let kind = ctx.kind();
        let Some(engine) = ctx.secure_transform_mut() else {
            return false;
        };
        if engine.init(&self.identity_store, auto_start).await {
            self.initialized.insert(kind);
            if auto_start {
                self.set_state(SecurityState::MasterNegotiating);
            }
            true
        } else {
            let err = Error::SecureHandshakeInitFailed { media: kind };
            warn!(error = %err, "continuing unsecured");
            self.set_state(SecurityState::Disabled);
            self.notify(Some(kind), SecurityInfoCode::EngineInitFailure);
            false
        }
    }

    async fn start_slaves(&mut self, contexts: &mut Contexts) {
        let Some(master) = self.master else {
            return;
        };
        let params = match contexts
            .get(&master)
            .and_then(|ctx| ctx.secure_transform())
            .and_then(|engine| engine.derive_multistream_params())
        {
            Some(params) => params,
            None => {
                warn!(media = %master, "master produced no multistream parameters");
                return;
            }
        };

        for slave in self.slaves.clone() {
            if self.started_slaves.contains(&slave) {
                continue;
            }
            let Some(ctx) = contexts.get_mut(&slave) else {
                continue;
            };
            if !self.initialized.contains(&slave) && !self.init_engine(ctx, false).await {
                continue;
            }
            let Some(engine) = ctx.secure_transform_mut() else {
                continue;
            };
            engine.apply_multistream_params(params.clone()).await;
            match engine.start().await {
                Ok(()) => {
                    info!(media = %slave, "slave started in multistream mode");
                    self.started_slaves.insert(slave);
                }
                Err(e) => warn!(media = %slave, error = %e, "slave failed to start"),
            }
        }
        if !self.state().is_terminal() {
            self.set_state(SecurityState::AllStarted);
        }
    }

    fn set_state(&self, next: SecurityState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "security state changed");
            let _ = self.events.send(CallSessionEvent::SecurityStateChanged { state: next });
        }
    }

    fn notify(&self, media: Option<MediaKind>, code: SecurityInfoCode) {
        let _ = self.events.send(CallSessionEvent::SecurityInfo { media, code });
    }
}

impl std::fmt::Debug for SecureKeyExchangeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKeyExchangeCoordinator")
            .field("enabled", &self.enabled)
            .field("state", &self.state())
            .field("master", &self.master)
            .field("slaves", &self.slaves)
            .finish()
    }
}
