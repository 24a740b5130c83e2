//! Per media-kind transport context

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::allocator::PortBinding;
use super::stream::{StreamCommand, StreamMachine, StreamState};
use super::{RtpTransport, SendStream, TransportFactory, TransportOptions};
use crate::codec::Encoding;
use crate::engine::ElementaryStream;
use crate::error::{Error, Result};
use crate::security::SecureTransformEngine;
use crate::types::MediaKind;

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    local_bind: SocketAddr,
    public_address: SocketAddr,
}

/// Everything one media kind of a call runs on.
///
/// A context is either unbound or fully bound: address, public address and
/// transport appear together in [`MediaTransportContext::open`] and go away
/// together in [`MediaTransportContext::release`].
pub struct MediaTransportContext {
    kind: MediaKind,
    endpoint: Option<Endpoint>,
    transport: Option<Arc<dyn RtpTransport>>,
    secure: Option<Box<dyn SecureTransformEngine>>,
    send_streams: Vec<StreamMachine<dyn SendStream>>,
    targets: Vec<SocketAddr>,
}

impl MediaTransportContext {
    /// An unbound context
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            endpoint: None,
            transport: None,
            secure: None,
            send_streams: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Open a transport over an allocated port pair
    pub async fn open(
        kind: MediaKind,
        binding: PortBinding,
        factory: &dyn TransportFactory,
        options: TransportOptions,
    ) -> Result<Self> {
        let endpoint = Endpoint {
            local_bind: binding.local_bind,
            public_address: binding.public_address,
        };
        let transport = factory.open(kind, binding, options).await?;
        info!(media = %kind, local = %endpoint.local_bind, public = %endpoint.public_address, "media transport opened");
        Ok(Self {
            endpoint: Some(endpoint),
            transport: Some(transport),
            ..Self::new(kind)
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }

    pub fn local_bind(&self) -> Option<SocketAddr> {
        self.endpoint.map(|e| e.local_bind)
    }

    pub fn public_address(&self) -> Option<SocketAddr> {
        self.endpoint.map(|e| e.public_address)
    }

    pub fn transport(&self) -> Option<Arc<dyn RtpTransport>> {
        self.transport.clone()
    }

    pub fn set_secure_transform(&mut self, engine: Box<dyn SecureTransformEngine>) {
        self.secure = Some(engine);
    }

    pub fn secure_transform_mut(&mut self) -> Option<&mut (dyn SecureTransformEngine + 'static)> {
        self.secure.as_deref_mut()
    }

    pub fn secure_transform(&self) -> Option<&(dyn SecureTransformEngine + 'static)> {
        self.secure.as_deref()
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Replace the remote targets. Targets go through the secure transform
    /// when there is one. Returns whether anything changed.
    pub async fn set_targets(&mut self, targets: Vec<SocketAddr>) -> Result<bool> {
        if targets == self.targets {
            return Ok(false);
        }
        let transport = self.transport.clone().ok_or_else(|| Error::transport("context is not bound"))?;

        if !self.targets.is_empty() {
            match self.secure.as_deref_mut() {
                Some(secure) => secure.remove_targets().await?,
                None => transport.remove_targets().await?,
            }
            self.targets.clear();
        }
        for target in targets {
            match self.secure.as_deref_mut() {
                Some(secure) => secure.add_target(target).await?,
                None => transport.add_target(target).await?,
            }
            debug!(media = %self.kind, %target, "added media target");
            self.targets.push(target);
        }
        Ok(true)
    }

    /// Encodings of the prepared send streams, in order
    pub fn send_encodings(&self) -> Vec<Encoding> {
        self.send_streams.iter().map(|s| s.driver().encoding().clone()).collect()
    }

    pub fn send_stream_states(&self) -> Vec<StreamState> {
        self.send_streams.iter().map(|s| s.state()).collect()
    }

    pub fn has_running_streams(&self) -> bool {
        self.send_streams.iter().any(|s| s.state().is_running())
    }

    /// Create and realize send streams for the streams of this kind,
    /// closing any previous ones. Nothing is started.
    pub async fn prepare_send_streams(&mut self, streams: &[ElementaryStream]) -> Result<usize> {
        let transport = self.transport.clone().ok_or_else(|| Error::transport("context is not bound"))?;

        for mut old in self.send_streams.drain(..) {
            old.release().await;
        }
        for stream in streams.iter().filter(|s| s.kind == self.kind) {
            let driver = transport.create_send_stream(stream).await?;
            let label = format!("{}-send-{}", self.kind, stream.encoding.name);
            let mut machine = StreamMachine::new(label, driver);
            if let Err(e) = machine.dispatch(StreamCommand::Realize).await {
                machine.release().await;
                return Err(e);
            }
            self.send_streams.push(machine);
        }
        debug!(media = %self.kind, count = self.send_streams.len(), "send streams prepared");
        Ok(self.send_streams.len())
    }

    /// Start every prepared send stream. Returns (started, attempted) and
    /// the last error seen. With `send` off (hold) prepared streams stay
    /// realized and count as neither.
    pub async fn start_send_streams(&mut self, send: bool) -> (usize, usize, Option<Error>) {
        let mut started = 0;
        let mut attempted = 0;
        let mut last_error = None;
        for stream in &mut self.send_streams {
            if stream.state().is_running() {
                started += 1;
                attempted += 1;
                continue;
            }
            if !send {
                debug!(stream = stream.label(), "sending suspended, leaving stream prepared");
                continue;
            }
            attempted += 1;
            match stream.run().await {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!(stream = stream.label(), error = %e, "failed to start stream");
                    last_error = Some(e);
                }
            }
        }
        (started, attempted, last_error)
    }

    /// Suspend or resume outbound media for hold. Resuming only restarts
    /// streams a hold stopped; prepared streams wait for `start_send_streams`.
    pub async fn set_sending(&mut self, send: bool) {
        let command = if send { StreamCommand::Start } else { StreamCommand::Stop };
        for stream in &mut self.send_streams {
            if send && stream.state() != StreamState::Stopped {
                continue;
            }
            if let Err(e) = stream.dispatch(command).await {
                warn!(stream = stream.label(), ?command, error = %e, "hold transition failed");
            }
        }
    }

    /// Stop and release everything this context holds. Errors are logged
    /// and swallowed. Returns whether any stream was stopped; an unbound
    /// context returns `false` and does nothing.
    pub async fn release(&mut self) -> bool {
        let Some(transport) = self.transport.take() else {
            return false;
        };
        let mut stopped = !self.send_streams.is_empty();

        for mut stream in self.send_streams.drain(..) {
            stream.release().await;
        }

        match transport.stop_receive_streams().await {
            Ok(count) => stopped |= count > 0,
            Err(e) => warn!(media = %self.kind, error = %e, "failed to stop receive streams"),
        }

        if let Some(mut secure) = self.secure.take() {
            secure.stop().await;
            if let Err(e) = secure.remove_targets().await {
                warn!(media = %self.kind, error = %e, "failed to remove secure targets");
            }
            secure.cleanup().await;
        } else if !self.targets.is_empty() {
            if let Err(e) = transport.remove_targets().await {
                warn!(media = %self.kind, error = %e, "failed to remove targets");
            }
        }
        self.targets.clear();

        transport.dispose().await;
        self.endpoint = None;
        info!(media = %self.kind, stopped, "media transport released");
        stopped
    }
}

impl std::fmt::Debug for MediaTransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTransportContext")
            .field("kind", &self.kind)
            .field("local_bind", &self.local_bind())
            .field("public_address", &self.public_address())
            .field("secure", &self.secure.is_some())
            .field("send_streams", &self.send_streams)
            .field("targets", &self.targets)
            .finish()
    }
}
