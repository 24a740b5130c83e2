//! Shared fakes for the call session integration tests
//!
//! Every collaborator appends to one shared trace so that tests can assert
//! on the order in which things happened across media kinds.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use media_session_core::codec::CodecRegistry;
use media_session_core::sdp::EncodingsByKind;
use media_session_core::transport::BoundSockets;
use media_session_core::{
    AddressResolver, CallSessionEvent, ElementaryStream, Encoding, Error, InboundStream, MediaEngine, MediaKind,
    MediaService, MediaSessionConfig, Player, PortBinder, PortBinding, RemoteDescription, Result, RtpTransport,
    SecureTransformEngine, SecureTransformFactory, SendStream, StreamDriver, TransportFactory, TransportOptions,
    VisualComponent,
};

/// Address our fake NAT resolver reports
pub const PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Position of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

pub fn pcmu() -> Encoding {
    Encoding::audio(0, "PCMU", 8000)
}

pub fn pcma() -> Encoding {
    Encoding::audio(8, "PCMA", 8000)
}

pub fn g723() -> Encoding {
    Encoding::audio(4, "G723", 8000)
}

pub fn h264() -> Encoding {
    Encoding::video(99, "H264", 90000)
}

// ---------------------------------------------------------------------------
// Media engine

pub struct FakeEngine {
    trace: Trace,
    audio: Vec<Encoding>,
    video: Vec<Encoding>,
    no_capture: Mutex<BTreeSet<MediaKind>>,
    muted: AtomicBool,
}

impl FakeEngine {
    pub fn new(trace: Trace, audio: Vec<Encoding>, video: Vec<Encoding>) -> Self {
        Self { trace, audio, video, no_capture: Mutex::new(BTreeSet::new()), muted: AtomicBool::new(false) }
    }

    pub fn set_capture_available(&self, kind: MediaKind, available: bool) {
        let mut no_capture = self.no_capture.lock();
        if available {
            no_capture.remove(&kind);
        } else {
            no_capture.insert(kind);
        }
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn supported_encodings(&self, kind: MediaKind) -> Vec<Encoding> {
        match kind {
            MediaKind::Audio => self.audio.clone(),
            MediaKind::Video => self.video.clone(),
        }
    }

    fn capture_available(&self, kind: MediaKind) -> bool {
        !self.no_capture.lock().contains(&kind)
    }

    async fn create_send_data_source(&self, encodings: &EncodingsByKind) -> Result<Vec<ElementaryStream>> {
        let mut streams = Vec::new();
        for (kind, list) in encodings {
            if let Some(encoding) = list.first() {
                self.trace.push(format!("engine:source:{}:{}", kind, encoding.name));
                streams.push(ElementaryStream {
                    kind: *kind,
                    encoding: encoding.clone(),
                    source_id: format!("{}-capture", kind),
                });
            }
        }
        Ok(streams)
    }

    async fn create_player(&self, stream: &InboundStream) -> Result<Box<dyn Player>> {
        let label = format!("{}:{:08x}", stream.kind, stream.ssrc);
        self.trace.push(format!("engine:player:{}", label));
        let component = (stream.kind == MediaKind::Video).then(|| VisualComponent(format!("surface-{:08x}", stream.ssrc)));
        Ok(Box::new(FakePlayer { trace: self.trace.clone(), label, component }))
    }

    async fn start_processing(&self, _call: &media_session_core::CallSessionId) -> Result<()> {
        self.trace.push("engine:start_processing");
        Ok(())
    }

    async fn stop_processing(&self, _call: &media_session_core::CallSessionId) {
        self.trace.push("engine:stop_processing");
    }

    fn set_mute(&self, mute: bool) {
        self.muted.store(mute, Ordering::SeqCst);
    }

    fn is_mute(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

pub struct FakePlayer {
    trace: Trace,
    label: String,
    component: Option<VisualComponent>,
}

#[async_trait]
impl StreamDriver for FakePlayer {
    async fn realize(&mut self) -> Result<()> {
        self.trace.push(format!("player:realize:{}", self.label));
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.trace.push(format!("player:start:{}", self.label));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.trace.push(format!("player:stop:{}", self.label));
        Ok(())
    }

    async fn close(&mut self) {
        self.trace.push(format!("player:close:{}", self.label));
    }
}

impl Player for FakePlayer {
    fn visual_component(&self) -> Option<VisualComponent> {
        self.component.clone()
    }
}

// ---------------------------------------------------------------------------
// Port binding and address resolution

#[derive(Default)]
pub struct FakeBinder {
    occupied: Mutex<HashSet<u16>>,
    attempts: AtomicU32,
}

impl FakeBinder {
    pub fn occupy(&self, port: u16) {
        self.occupied.lock().insert(port);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortBinder for FakeBinder {
    async fn bind_pair(&self, data: SocketAddr) -> io::Result<Option<BoundSockets>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut occupied = self.occupied.lock();
        if occupied.contains(&data.port()) || occupied.contains(&(data.port() + 1)) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "port taken"));
        }
        occupied.insert(data.port());
        occupied.insert(data.port() + 1);
        Ok(None)
    }
}

#[derive(Default)]
pub struct FakeResolver {
    hints: Mutex<Vec<Option<IpAddr>>>,
}

impl FakeResolver {
    pub fn hints(&self) -> Vec<Option<IpAddr>> {
        self.hints.lock().clone()
    }
}

#[async_trait]
impl AddressResolver for FakeResolver {
    async fn public_address_for(&self, destination_hint: Option<IpAddr>, local_port: u16) -> io::Result<SocketAddr> {
        self.hints.lock().push(destination_hint);
        Ok(SocketAddr::new(PUBLIC_IP, local_port))
    }
}

// ---------------------------------------------------------------------------
// RTP transport

pub struct FakeTransport {
    pub kind: MediaKind,
    pub local: SocketAddr,
    trace: Trace,
    fail_start: bool,
    targets: Mutex<Vec<SocketAddr>>,
    receiving: AtomicUsize,
    disposed: AtomicUsize,
}

impl FakeTransport {
    pub fn targets(&self) -> Vec<SocketAddr> {
        self.targets.lock().clone()
    }

    /// Pretend `count` inbound streams are running
    pub fn set_receiving(&self, count: usize) {
        self.receiving.store(count, Ordering::SeqCst);
    }

    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RtpTransport for FakeTransport {
    async fn add_target(&self, target: SocketAddr) -> Result<()> {
        self.trace.push(format!("transport:add_target:{}:{}", self.kind, target));
        self.targets.lock().push(target);
        Ok(())
    }

    async fn remove_targets(&self) -> Result<()> {
        self.trace.push(format!("transport:remove_targets:{}", self.kind));
        self.targets.lock().clear();
        Ok(())
    }

    async fn create_send_stream(&self, stream: &ElementaryStream) -> Result<Box<dyn SendStream>> {
        Ok(Box::new(FakeSendStream {
            trace: self.trace.clone(),
            kind: self.kind,
            encoding: stream.encoding.clone(),
            fail_start: self.fail_start,
        }))
    }

    async fn stop_receive_streams(&self) -> Result<usize> {
        Ok(self.receiving.swap(0, Ordering::SeqCst))
    }

    async fn dispose(&self) {
        self.trace.push(format!("transport:dispose:{}:{}", self.kind, self.local.port()));
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeSendStream {
    trace: Trace,
    kind: MediaKind,
    encoding: Encoding,
    fail_start: bool,
}

#[async_trait]
impl StreamDriver for FakeSendStream {
    async fn realize(&mut self) -> Result<()> {
        self.trace.push(format!("send:realize:{}:{}", self.kind, self.encoding.name));
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(Error::transport(format!("{} sender refused to start", self.kind)));
        }
        self.trace.push(format!("send:start:{}:{}", self.kind, self.encoding.name));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.trace.push(format!("send:stop:{}:{}", self.kind, self.encoding.name));
        Ok(())
    }

    async fn close(&mut self) {
        self.trace.push(format!("send:close:{}:{}", self.kind, self.encoding.name));
    }
}

impl SendStream for FakeSendStream {
    fn encoding(&self) -> &Encoding {
        &self.encoding
    }
}

pub struct FakeTransportFactory {
    trace: Trace,
    failing: Mutex<BTreeSet<MediaKind>>,
    opened: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new(trace: Trace) -> Self {
        Self { trace, failing: Mutex::new(BTreeSet::new()), opened: Mutex::new(Vec::new()) }
    }

    /// Send streams of this kind refuse to start from now on
    pub fn fail_starts(&self, kind: MediaKind) {
        self.failing.lock().insert(kind);
    }

    pub fn opened(&self) -> Vec<Arc<FakeTransport>> {
        self.opened.lock().clone()
    }

    /// Most recently opened transport of a kind
    pub fn latest(&self, kind: MediaKind) -> Option<Arc<FakeTransport>> {
        self.opened.lock().iter().rev().find(|t| t.kind == kind).cloned()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn open(&self, kind: MediaKind, binding: PortBinding, _options: TransportOptions) -> Result<Arc<dyn RtpTransport>> {
        self.trace.push(format!("transport:open:{}:{}", kind, binding.local_bind.port()));
        let transport = Arc::new(FakeTransport {
            kind,
            local: binding.local_bind,
            trace: self.trace.clone(),
            fail_start: self.failing.lock().contains(&kind),
            targets: Mutex::new(Vec::new()),
            receiving: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
        });
        self.opened.lock().push(transport.clone());
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Key exchange engine

pub struct FakeSecureFactory {
    trace: Trace,
    fail_init: Mutex<BTreeSet<MediaKind>>,
}

impl FakeSecureFactory {
    pub fn new(trace: Trace) -> Self {
        Self { trace, fail_init: Mutex::new(BTreeSet::new()) }
    }

    pub fn fail_init(&self, kind: MediaKind) {
        self.fail_init.lock().insert(kind);
    }
}

impl SecureTransformFactory for FakeSecureFactory {
    fn create(&self, kind: MediaKind, transport: Arc<dyn RtpTransport>) -> Box<dyn SecureTransformEngine> {
        self.trace.push(format!("secure:create:{}", kind));
        Box::new(FakeSecureEngine {
            kind,
            transport,
            trace: self.trace.clone(),
            fail_init: self.fail_init.lock().contains(&kind),
            started: false,
        })
    }
}

pub struct FakeSecureEngine {
    kind: MediaKind,
    transport: Arc<dyn RtpTransport>,
    trace: Trace,
    fail_init: bool,
    started: bool,
}

#[async_trait]
impl SecureTransformEngine for FakeSecureEngine {
    async fn init(&mut self, _identity_store: &str, auto_start: bool) -> bool {
        let mode = if auto_start { "auto" } else { "manual" };
        self.trace.push(format!("secure:init:{}:{}", self.kind, mode));
        if self.fail_init {
            return false;
        }
        if auto_start {
            self.started = true;
            self.trace.push(format!("secure:start:{}", self.kind));
        }
        true
    }

    async fn start(&mut self) -> Result<()> {
        self.started = true;
        self.trace.push(format!("secure:start:{}", self.kind));
        Ok(())
    }

    async fn stop(&mut self) {
        self.started = false;
        self.trace.push(format!("secure:stop:{}", self.kind));
    }

    async fn cleanup(&mut self) {
        self.trace.push(format!("secure:cleanup:{}", self.kind));
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn derive_multistream_params(&self) -> Option<Bytes> {
        self.started.then(|| Bytes::from_static(b"multistream-params"))
    }

    async fn apply_multistream_params(&mut self, params: Bytes) {
        self.trace.push(format!("secure:apply:{}:{}", self.kind, params.len()));
    }

    fn set_sas_verified(&mut self, verified: bool) {
        self.trace.push(format!("secure:sas:{}:{}", self.kind, verified));
    }

    async fn add_target(&mut self, target: SocketAddr) -> Result<()> {
        self.trace.push(format!("secure:add_target:{}", self.kind));
        self.transport.add_target(target).await
    }

    async fn remove_targets(&mut self) -> Result<()> {
        self.trace.push(format!("secure:remove_targets:{}", self.kind));
        self.transport.remove_targets().await
    }
}

// ---------------------------------------------------------------------------
// Wiring

pub struct Harness {
    pub trace: Trace,
    pub engine: Arc<FakeEngine>,
    pub binder: Arc<FakeBinder>,
    pub resolver: Arc<FakeResolver>,
    pub transports: Arc<FakeTransportFactory>,
    pub secure: Arc<FakeSecureFactory>,
}

impl Harness {
    /// Engine supporting PCMU/G723 audio and H264 video
    pub fn new() -> Self {
        Self::with_encodings(vec![pcmu(), g723()], vec![h264()])
    }

    pub fn audio_only() -> Self {
        Self::with_encodings(vec![pcmu(), g723()], Vec::new())
    }

    pub fn with_encodings(audio: Vec<Encoding>, video: Vec<Encoding>) -> Self {
        init_test_logging();
        let trace = Trace::default();
        Self {
            engine: Arc::new(FakeEngine::new(trace.clone(), audio, video)),
            binder: Arc::new(FakeBinder::default()),
            resolver: Arc::new(FakeResolver::default()),
            transports: Arc::new(FakeTransportFactory::new(trace.clone())),
            secure: Arc::new(FakeSecureFactory::new(trace.clone())),
            trace,
        }
    }

    pub fn config() -> MediaSessionConfig {
        MediaSessionConfig::default().with_port_range(5000, 5100).with_bind_retries(5)
    }

    /// Service without a key exchange
    pub fn service(&self) -> MediaService {
        self.builder(Self::config()).build().expect("service")
    }

    /// Service whose calls get a key exchange, requested by default or not
    pub fn secure_service(&self, default_secure: bool) -> MediaService {
        self.builder(Self::config().with_default_secure(default_secure))
            .security(self.secure.clone())
            .build()
            .expect("service")
    }

    fn builder(&self, config: MediaSessionConfig) -> media_session_core::MediaServiceBuilder {
        MediaService::builder(self.engine.clone(), self.transports.clone())
            .config(config)
            .registry(CodecRegistry::standard())
            .binder(self.binder.clone())
            .resolver(self.resolver.clone())
    }
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Remote description from SDP text with `\n` line endings
pub fn remote(text: &str) -> RemoteDescription {
    RemoteDescription::parse(text).expect("valid SDP")
}

/// Offer from a peer at `ip` with audio on `port` and optional video on
/// `port + 2`
pub fn peer_offer(ip: &str, port: u16, audio_formats: &str, video_formats: Option<&str>) -> RemoteDescription {
    let mut text = format!(
        "v=0\no=peer 1 1 IN IP4 {ip}\ns=call\nc=IN IP4 {ip}\nt=0 0\nm=audio {port} RTP/AVP {audio_formats}\n"
    );
    if let Some(video) = video_formats {
        text.push_str(&format!("m=video {} RTP/AVP {}\na=rtpmap:99 H264/90000\n", port + 2, video));
    }
    remote(&text)
}

/// Drain every event already queued
pub fn drain(rx: &mut mpsc::UnboundedReceiver<CallSessionEvent>) -> Vec<CallSessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
