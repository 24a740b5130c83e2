//! Media Service
//!
//! Per-process entry point. The service owns the state every call shares
//! (the port allocator, the codec registry and the collaborators) and hands
//! out [`CallSession`]s built on top of it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::codec::CodecRegistry;
use crate::config::MediaSessionConfig;
use crate::engine::MediaEngine;
use crate::error::Result;
use crate::sdp::SdpNegotiator;
use crate::security::SecureTransformFactory;
use crate::session::{CallSession, SessionDeps};
use crate::transport::{
    AddressResolver, LocalAddressResolver, PortAllocator, PortBinder, TransportFactory, UdpPortBinder,
};
use crate::types::CallSessionId;

/// Live sessions by id. Sessions remove themselves when their call ends.
pub(crate) type SessionMap = RwLock<HashMap<CallSessionId, Arc<CallSession>>>;

/// Creates and tracks call sessions
pub struct MediaService {
    config: Arc<MediaSessionConfig>,
    registry: Arc<CodecRegistry>,
    allocator: Arc<PortAllocator>,
    engine: Arc<dyn MediaEngine>,
    transports: Arc<dyn TransportFactory>,
    security: Option<Arc<dyn SecureTransformFactory>>,
    sessions: Arc<SessionMap>,
}

impl MediaService {
    pub fn builder(engine: Arc<dyn MediaEngine>, transports: Arc<dyn TransportFactory>) -> MediaServiceBuilder {
        MediaServiceBuilder::new(engine, transports)
    }

    pub fn config(&self) -> &MediaSessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// The allocator shared by every call of this process
    pub fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    /// Whether new calls get a key exchange coordinator
    pub fn has_key_exchange(&self) -> bool {
        self.security.is_some()
    }

    /// Create a session for a new call
    pub async fn create_call_session(&self) -> Arc<CallSession> {
        let session = Arc::new(CallSession::new(SessionDeps {
            config: self.config.clone(),
            allocator: self.allocator.clone(),
            negotiator: SdpNegotiator::new(self.registry.clone(), self.config.origin_username.clone()),
            engine: self.engine.clone(),
            transports: self.transports.clone(),
            security: self.security.clone(),
            registry: Arc::downgrade(&self.sessions),
        }));
        self.sessions.write().await.insert(session.id().clone(), session.clone());
        debug!(session = %session.id(), "call session registered");
        session
    }

    pub async fn get_session(&self, id: &CallSessionId) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// End a call's media and forget the session. Returns `false` for an
    /// unknown id.
    pub async fn end_session(&self, id: &CallSessionId) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };
        session.end().await;
        info!(session = %id, "call session ended");
        true
    }

    pub async fn active_sessions(&self) -> Vec<CallSessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("config", &self.config)
            .field("allocator", &self.allocator)
            .field("secure", &self.security.is_some())
            .finish()
    }
}

/// Builder for [`MediaService`]
pub struct MediaServiceBuilder {
    engine: Arc<dyn MediaEngine>,
    transports: Arc<dyn TransportFactory>,
    config: MediaSessionConfig,
    registry: Option<CodecRegistry>,
    binder: Option<Arc<dyn PortBinder>>,
    resolver: Option<Arc<dyn AddressResolver>>,
    security: Option<Arc<dyn SecureTransformFactory>>,
}

impl MediaServiceBuilder {
    fn new(engine: Arc<dyn MediaEngine>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            engine,
            transports,
            config: MediaSessionConfig::default(),
            registry: None,
            binder: None,
            resolver: None,
            security: None,
        }
    }

    pub fn config(mut self, config: MediaSessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Codec table; defaults to [`CodecRegistry::standard`]
    pub fn registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Port binder; defaults to [`UdpPortBinder`]
    pub fn binder(mut self, binder: Arc<dyn PortBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Public address resolver; defaults to [`LocalAddressResolver`]
    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Key exchange engines for secured calls
    pub fn security(mut self, factory: Arc<dyn SecureTransformFactory>) -> Self {
        self.security = Some(factory);
        self
    }

    pub fn build(self) -> Result<MediaService> {
        self.config.validate()?;
        let binder = self.binder.unwrap_or_else(|| Arc::new(UdpPortBinder));
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(LocalAddressResolver::default()));
        let allocator = PortAllocator::from_config(&self.config, binder, resolver)?;

        info!(
            min_port = self.config.min_port,
            max_port = self.config.max_port,
            secure = self.security.is_some(),
            "media service ready"
        );
        Ok(MediaService {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry.unwrap_or_else(CodecRegistry::standard)),
            allocator: Arc::new(allocator),
            engine: self.engine,
            transports: self.transports,
            security: self.security,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}
