//! Default UDP binder and interface-based address resolver

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{AddressResolver, BoundSockets, PortBinder};

/// Binds real RTP and RTCP sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpPortBinder;

#[async_trait]
impl PortBinder for UdpPortBinder {
    async fn bind_pair(&self, data: SocketAddr) -> io::Result<Option<BoundSockets>> {
        let control_port = data
            .port()
            .checked_add(1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no room for the control port"))?;
        let rtp = UdpSocket::bind(data).await?;
        // dropping `rtp` on failure releases the data port again
        let rtcp = UdpSocket::bind(SocketAddr::new(data.ip(), control_port)).await?;
        Ok(Some(BoundSockets { rtp, rtcp }))
    }
}

/// Resolves the public address to the local interface that routes towards
/// the destination. No NAT discovery: behind a NAT this is the private
/// address.
#[derive(Debug, Clone, Copy)]
pub struct LocalAddressResolver {
    fallback: IpAddr,
}

impl LocalAddressResolver {
    pub fn new(fallback: IpAddr) -> Self {
        Self { fallback }
    }
}

impl Default for LocalAddressResolver {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[async_trait]
impl AddressResolver for LocalAddressResolver {
    async fn public_address_for(&self, destination_hint: Option<IpAddr>, local_port: u16) -> io::Result<SocketAddr> {
        let ip = match destination_hint {
            Some(dest) => match outbound_interface(dest).await {
                Ok(ip) => ip,
                Err(e) => {
                    debug!(destination = %dest, error = %e, "no route to destination, using fallback address");
                    self.fallback
                }
            },
            None => self.fallback,
        };
        Ok(SocketAddr::new(ip, local_port))
    }
}

// Connecting a UDP socket sends nothing but makes the kernel pick a route.
async fn outbound_interface(dest: IpAddr) -> io::Result<IpAddr> {
    let any: SocketAddr = match dest {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(any).await?;
    socket.connect(SocketAddr::new(dest, 9)).await?;
    Ok(socket.local_addr()?.ip())
}
