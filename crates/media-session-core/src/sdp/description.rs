//! Session description wire types
//!
//! A deliberately small SDP model: the lines this subsystem produces and
//! consumes (`v o s u c t a m`). Every other line type found in remote
//! descriptions is tolerated by the parser and dropped.

use std::fmt;
use std::net::IpAddr;

use crate::types::{MediaDirection, MediaKind};

/// `o=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub net_type: String,
    pub addr_type: String,
    pub address: String,
}

impl Origin {
    /// Origin with fixed `0 0` identifiers for the given unicast address
    pub fn for_address(username: impl Into<String>, address: IpAddr) -> Self {
        Self {
            username: username.into(),
            session_id: "0".to_string(),
            session_version: "0".to_string(),
            net_type: "IN".to_string(),
            addr_type: addr_type_of(&address).to_string(),
            address: address.to_string(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.username,
            self.session_id,
            self.session_version,
            self.net_type,
            self.addr_type,
            self.address
        )
    }
}

/// `c=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub net_type: String,
    pub addr_type: String,
    /// Host part, possibly followed by a multicast `/ttl` suffix
    pub address: String,
}

impl Connection {
    pub fn for_address(address: IpAddr) -> Self {
        Self {
            net_type: "IN".to_string(),
            addr_type: addr_type_of(&address).to_string(),
            address: address.to_string(),
        }
    }

    /// Address without any multicast ttl/count suffix
    pub fn host(&self) -> &str {
        self.address.split('/').next().unwrap_or(&self.address)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.net_type, self.addr_type, self.address)
    }
}

fn addr_type_of(address: &IpAddr) -> &'static str {
    match address {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

/// `a=` line, either a flag (`a=inactive`) or a name/value pair (`a=rtpmap:0 PCMU/8000`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn flag(name: impl Into<String>) -> Self {
        Self { name: name.into(), value: None }
    }

    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: Some(value.into()) }
    }

    pub fn direction(&self) -> Option<MediaDirection> {
        match self.value {
            None => self.name.parse().ok(),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}:{}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// Parsed `a=rtpmap` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

impl RtpMap {
    /// Parse `<pt> <name>/<rate>[/<channels>]`; `None` for anything else
    pub fn parse(value: &str) -> Option<Self> {
        let (pt, rest) = value.trim().split_once(' ')?;
        let payload_type = pt.parse().ok()?;
        let mut parts = rest.trim().split('/');
        let encoding_name = parts.next()?.to_string();
        let clock_rate = parts.next()?.parse().ok()?;
        let channels = match parts.next() {
            Some(ch) => Some(ch.parse().ok()?),
            None => None,
        };
        Some(Self { payload_type, encoding_name, clock_rate, channels })
    }
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media token as written (`audio`, `video`, `application`...)
    pub media: String,
    pub port: u16,
    pub port_count: Option<u16>,
    pub protocol: String,
    pub formats: Vec<String>,
    pub connection: Option<Connection>,
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    pub fn new(kind: MediaKind, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            media: kind.as_str().to_string(),
            port,
            port_count: None,
            protocol: protocol.into(),
            formats: Vec::new(),
            connection: None,
            attributes: Vec::new(),
        }
    }

    /// Media kind, if it is one this subsystem negotiates
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_sdp(&self.media)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn rtpmaps(&self) -> impl Iterator<Item = RtpMap> + '_ {
        self.attributes
            .iter()
            .filter(|a| a.name.eq_ignore_ascii_case("rtpmap"))
            .filter_map(|a| a.value.as_deref().and_then(RtpMap::parse))
    }

    pub fn rtpmap_for(&self, payload_type: u8) -> Option<RtpMap> {
        self.rtpmaps().find(|m| m.payload_type == payload_type)
    }

    /// Format parameters announced for a payload type
    pub fn fmtp_for(&self, payload_type: u8) -> Option<&str> {
        let prefix = payload_type.to_string();
        self.attributes
            .iter()
            .filter(|a| a.name.eq_ignore_ascii_case("fmtp"))
            .filter_map(|a| a.value.as_deref())
            .find_map(|v| {
                let (pt, params) = v.split_once(' ')?;
                (pt == prefix).then_some(params.trim())
            })
    }

    /// The direction attribute carried by this line, if any
    pub fn direction(&self) -> Option<MediaDirection> {
        self.attributes.iter().find_map(Attribute::direction)
    }

    /// Drop every direction attribute and append `direction` if given
    pub fn set_direction(&mut self, direction: Option<MediaDirection>) {
        self.attributes.retain(|a| a.direction().is_none());
        if let Some(direction) = direction {
            self.attributes.push(Attribute::flag(direction.as_str()));
        }
    }
}

impl fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} {}", self.media, self.port)?;
        if let Some(count) = self.port_count {
            write!(f, "/{}", count)?;
        }
        write!(f, " {}", self.protocol)?;
        for format in &self.formats {
            write!(f, " {}", format)?;
        }
        f.write_str("\r\n")?;

        if let Some(conn) = &self.connection {
            write!(f, "c={}\r\n", conn)?;
        }
        for attr in &self.attributes {
            write!(f, "a={}\r\n", attr)?;
        }
        Ok(())
    }
}

/// A complete session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub version: u32,
    pub origin: Origin,
    pub session_name: String,
    /// `u=` call information URI
    pub uri: Option<String>,
    pub connection: Option<Connection>,
    /// `t=` lines as (start, stop)
    pub times: Vec<(u64, u64)>,
    pub attributes: Vec<Attribute>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Skeleton with the fixed conventions: `v=0`, `s=-`, `t=0 0`
    pub fn new(origin: Origin) -> Self {
        Self {
            version: 0,
            origin,
            session_name: "-".to_string(),
            uri: None,
            connection: None,
            times: vec![(0, 0)],
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Session-level direction attribute
    pub fn direction(&self) -> Option<MediaDirection> {
        self.attributes.iter().find_map(Attribute::direction)
    }

    pub fn media_of_kind(&self, kind: MediaKind) -> impl Iterator<Item = &MediaDescription> {
        self.media.iter().filter(move |m| m.kind() == Some(kind))
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}\r\n", self.version)?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.session_name)?;
        if let Some(uri) = &self.uri {
            write!(f, "u={}\r\n", uri)?;
        }
        if let Some(conn) = &self.connection {
            write!(f, "c={}\r\n", conn)?;
        }
        for (start, stop) in &self.times {
            write!(f, "t={} {}\r\n", start, stop)?;
        }
        for attr in &self.attributes {
            write!(f, "a={}\r\n", attr)?;
        }
        for media in &self.media {
            write!(f, "{}", media)?;
        }
        Ok(())
    }
}
