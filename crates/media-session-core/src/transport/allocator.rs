//! Local RTP/RTCP port allocation
//!
//! One [`PortAllocator`] is shared by every call session of a process. It
//! owns the "next free port" counter; the counter is the only state shared
//! between calls and is only ever touched under its lock. Socket binds and
//! address resolution run outside the lock.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AddressResolver, BoundSockets, PortBinder};
use crate::config::MediaSessionConfig;
use crate::error::{Error, Result};

/// Inclusive local port range. The lower bound is kept even so that RTP
/// lands on even ports and RTCP on the odd port above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self> {
        let even_min = min.checked_add(min % 2).ok_or_else(|| Error::config("port range overflows"))?;
        let range = Self { min: even_min, max };
        if even_min == 0 || !range.fits_pair(even_min) {
            return Err(Error::config(format!("port range {}-{} cannot hold an RTP/RTCP pair", min, max)));
        }
        Ok(range)
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Whether a pair starting at `port` lies inside the range
    pub fn fits_pair(&self, port: u16) -> bool {
        port >= self.min && u32::from(port) + 1 <= u32::from(self.max)
    }

    /// First data port after a pair at `used`, wrapping to the minimum
    pub fn after(&self, used: u16) -> u16 {
        let next = u32::from(used) + 2;
        match u16::try_from(next) {
            Ok(p) if self.fits_pair(p) => p,
            _ => self.min,
        }
    }
}

/// Result of a successful allocation
#[derive(Debug)]
pub struct PortBinding {
    /// Local RTP address
    pub local_bind: SocketAddr,
    /// Local RTCP address
    pub control: SocketAddr,
    /// Externally reachable RTP address; may equal `local_bind`
    pub public_address: SocketAddr,
    /// Sockets bound by the binder, if it binds for real
    pub sockets: Option<BoundSockets>,
}

/// Process-wide port allocator service
pub struct PortAllocator {
    range: PortRange,
    bind_ip: IpAddr,
    next_port: Mutex<u16>,
    binder: Arc<dyn PortBinder>,
    resolver: Arc<dyn AddressResolver>,
    resolve_timeout: Duration,
}

impl PortAllocator {
    pub fn new(range: PortRange, bind_ip: IpAddr, binder: Arc<dyn PortBinder>, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            range,
            bind_ip,
            next_port: Mutex::new(range.min()),
            binder,
            resolver,
            resolve_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &MediaSessionConfig, binder: Arc<dyn PortBinder>, resolver: Arc<dyn AddressResolver>) -> Result<Self> {
        config.validate()?;
        let range = PortRange::new(config.min_port, config.max_port)?;
        Ok(Self::new(range, config.bind_address, binder, resolver).with_resolve_timeout(config.resolve_timeout()))
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Current value of the shared counter
    pub fn next_port(&self) -> u16 {
        *self.next_port.lock()
    }

    /// Allocate a pair starting from the shared counter
    pub async fn allocate(&self, intended_destination: Option<IpAddr>, max_retries: u32) -> Result<PortBinding> {
        let start = SocketAddr::new(self.bind_ip, self.next_port());
        self.allocate_from(intended_destination, start, max_retries).await
    }

    /// Allocate a pair starting at `start`, moving up two ports per failed
    /// attempt. The counter only moves on success.
    pub async fn allocate_from(
        &self,
        intended_destination: Option<IpAddr>,
        start: SocketAddr,
        max_retries: u32,
    ) -> Result<PortBinding> {
        let mut port = start.port();
        let mut last_port = port;

        for attempt in 1..=max_retries {
            if !self.range.fits_pair(port) {
                port = self.range.min();
            }
            last_port = port;
            let data = SocketAddr::new(start.ip(), port);

            match self.try_bind(intended_destination, data).await {
                Ok(binding) => {
                    let next = {
                        let mut next = self.next_port.lock();
                        *next = self.range.after(port);
                        *next
                    };
                    info!(
                        local = %binding.local_bind,
                        public = %binding.public_address,
                        next_port = next,
                        "allocated media ports"
                    );
                    return Ok(binding);
                }
                Err(e) => {
                    warn!(attempt, port, error = %e, "retrying a bind because of a failure");
                    port = self.range.after(port);
                }
            }
        }

        Err(Error::AllocationFailed { attempts: max_retries, last_port })
    }

    async fn try_bind(&self, intended_destination: Option<IpAddr>, data: SocketAddr) -> io::Result<PortBinding> {
        let control = SocketAddr::new(data.ip(), data.port() + 1);
        let sockets = self.binder.bind_pair(data).await?;

        let resolved = tokio::time::timeout(
            self.resolve_timeout,
            self.resolver.public_address_for(intended_destination, data.port()),
        )
        .await;
        let public_address = match resolved {
            Ok(addr) => addr?,
            Err(_) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "public address resolution timed out"));
            }
        };
        debug!(local = %data, public = %public_address, "resolved public address");

        Ok(PortBinding { local_bind: data, control, public_address, sockets })
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .field("bind_ip", &self.bind_ip)
            .field("next_port", &self.next_port())
            .finish()
    }
}
