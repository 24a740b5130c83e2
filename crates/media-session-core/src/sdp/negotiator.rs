//! Offer/answer negotiation
//!
//! Pure computation over encoding lists and descriptions. Nothing here
//! touches the network: addresses come in already allocated and results go
//! out as [`LocalDescription`] values.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::debug;

use super::description::{Attribute, Connection, MediaDescription, Origin, SessionDescription};
use crate::codec::{CodecRegistry, Encoding};
use crate::error::{Error, Result};
use crate::types::{HoldState, MediaDirection, MediaKind};

/// Transport protocol announced on every media line
pub const RTP_AVP: &str = "RTP/AVP";

/// Ordered encoding lists per media kind
pub type EncodingsByKind = BTreeMap<MediaKind, Vec<Encoding>>;

/// A description received from the remote party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescription {
    description: SessionDescription,
}

impl RemoteDescription {
    /// Parse remote SDP text
    pub fn parse(text: &str) -> Result<Self> {
        let description: SessionDescription = text.parse()?;
        Ok(Self { description })
    }

    pub fn from_description(description: SessionDescription) -> Self {
        Self { description }
    }

    pub fn description(&self) -> &SessionDescription {
        &self.description
    }

    /// Advisory `u=` value
    pub fn call_info_uri(&self) -> Option<&str> {
        self.description.uri.as_deref()
    }

    /// Host the remote party expects media at: the session-level connection
    /// overridden by the first media-level one.
    pub fn destination_host(&self) -> Option<&str> {
        self.description
            .media
            .iter()
            .find_map(|m| m.connection.as_ref())
            .or(self.description.connection.as_ref())
            .map(Connection::host)
    }

    /// Connection host applying to one media line
    pub fn connection_host<'a>(&'a self, media: &'a MediaDescription) -> Option<&'a str> {
        media
            .connection
            .as_ref()
            .or(self.description.connection.as_ref())
            .map(Connection::host)
    }

    /// Encodings offered for a kind, in the remote's order. Rejected lines
    /// (port 0) and formats that cannot be resolved are skipped.
    pub fn encodings(&self, registry: &CodecRegistry, kind: MediaKind) -> Vec<Encoding> {
        let mut out: Vec<Encoding> = Vec::new();
        for media in self.description.media_of_kind(kind).filter(|m| m.port != 0) {
            for format in &media.formats {
                let Ok(payload_type) = format.parse::<u8>() else {
                    continue;
                };
                let encoding = match media.rtpmap_for(payload_type) {
                    Some(map) => Some(Encoding {
                        kind,
                        payload_type,
                        name: map.encoding_name,
                        clock_rate: map.clock_rate,
                        channels: map.channels,
                    }),
                    None => registry.by_payload_type(kind, payload_type).cloned(),
                };
                match encoding {
                    Some(e) if !out.iter().any(|o| o.same_codec(&e)) => out.push(e),
                    Some(_) => {}
                    None => debug!(media = %kind, payload_type, "ignoring unknown remote format"),
                }
            }
        }
        out
    }

    pub fn is_offer_for_hold(&self) -> bool {
        is_offer_for_hold(&self.description)
    }
}

/// A description built locally, with the encodings it commits to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescription {
    pub description: SessionDescription,
    /// Encodings per emitted media line, in announced order
    pub negotiated: EncodingsByKind,
}

impl LocalDescription {
    pub fn encodings(&self, kind: MediaKind) -> &[Encoding] {
        self.negotiated.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn kinds(&self) -> impl Iterator<Item = MediaKind> + '_ {
        self.negotiated.keys().copied()
    }
}

impl fmt::Display for LocalDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

/// Keep the offered encodings the local side supports, in the offered order
pub fn intersect_encodings(offered: &[Encoding], supported: &[Encoding]) -> Vec<Encoding> {
    offered
        .iter()
        .filter(|o| supported.iter().any(|s| s.same_codec(o)))
        .cloned()
        .collect()
}

/// Direction attribute to announce for one media kind.
///
/// Without a capture device we cannot send, which reads to the peer exactly
/// like them having put us on hold; the persistent state is not touched.
pub fn hold_attribute(hold: HoldState, capture_available: bool) -> Option<MediaDirection> {
    let effective = if capture_available { hold } else { hold.apply(true, false) };
    effective.direction()
}

/// True when every media line asks us to stop sending
pub fn is_offer_for_hold(description: &SessionDescription) -> bool {
    description
        .media
        .iter()
        .all(|m| m.direction().is_some_and(|d| d.is_hold()))
}

/// Flip a media line into or out of hold.
///
/// A line that is already one-way keeps its one-way character:
/// recvonly becomes inactive when holding, inactive becomes recvonly when
/// resuming. Everything else moves between sendrecv and sendonly.
pub fn toggle_hold_attribute(media: &mut MediaDescription, entering_hold: bool) {
    let current = media.direction();
    let next = match (entering_hold, current) {
        (true, Some(MediaDirection::RecvOnly)) => MediaDirection::Inactive,
        (true, _) => MediaDirection::SendOnly,
        (false, Some(MediaDirection::Inactive)) => MediaDirection::RecvOnly,
        (false, _) => MediaDirection::SendRecv,
    };
    media.set_direction(Some(next));
}

/// Builds offers and answers from local capabilities
#[derive(Debug, Clone)]
pub struct SdpNegotiator {
    registry: Arc<CodecRegistry>,
    username: String,
}

impl SdpNegotiator {
    pub fn new(registry: Arc<CodecRegistry>, username: impl Into<String>) -> Self {
        Self { registry, username: username.into() }
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Encodings both sides can use, per kind. Fails only when no kind has
    /// anything in common.
    pub fn negotiate(&self, local_supported: &EncodingsByKind, remote: &RemoteDescription) -> Result<EncodingsByKind> {
        let mut negotiated = EncodingsByKind::new();
        for kind in MediaKind::ALL {
            let offered = remote.encodings(&self.registry, kind);
            let supported = local_supported.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
            let common = intersect_encodings(&offered, supported);
            if common.is_empty() {
                debug!(media = %kind, offered = offered.len(), "no common encodings, omitting media");
                continue;
            }
            negotiated.insert(kind, common);
        }
        if negotiated.is_empty() {
            return Err(Error::UnsupportedFormatSet);
        }
        Ok(negotiated)
    }

    /// Build a local offer (no `remote_offer`) or answer.
    pub fn build_description(
        &self,
        local_supported: &EncodingsByKind,
        remote_offer: Option<&RemoteDescription>,
        public_addresses: &BTreeMap<MediaKind, SocketAddr>,
        hold: HoldState,
        capture_available: impl Fn(MediaKind) -> bool,
    ) -> Result<LocalDescription> {
        let mut encodings = match remote_offer {
            Some(remote) => self.negotiate(local_supported, remote)?,
            None => local_supported.clone(),
        };
        encodings.retain(|kind, list| {
            if list.is_empty() {
                return false;
            }
            if !public_addresses.contains_key(kind) {
                debug!(media = %kind, "no local address allocated, omitting media");
                return false;
            }
            true
        });

        let session_ip = match encodings.keys().next().and_then(|k| public_addresses.get(k)) {
            Some(addr) => addr.ip(),
            None => return Err(Error::UnsupportedFormatSet),
        };

        let mut description = SessionDescription::new(Origin::for_address(&self.username, session_ip));
        description.connection = Some(Connection::for_address(session_ip));

        for (kind, list) in &encodings {
            // retained above, every remaining kind has an address
            let Some(addr) = public_addresses.get(kind) else {
                continue;
            };
            let mut media = self.media_line(*kind, *addr, list);
            if addr.ip() != session_ip {
                media.connection = Some(Connection::for_address(addr.ip()));
            }
            media.set_direction(hold_attribute(hold, capture_available(*kind)));
            description.media.push(media);
        }

        Ok(LocalDescription { description, negotiated: encodings })
    }

    /// Build a description against a previously received one and flip every
    /// media line into or out of hold.
    pub fn build_hold_description(
        &self,
        local_supported: &EncodingsByKind,
        remote: &RemoteDescription,
        public_addresses: &BTreeMap<MediaKind, SocketAddr>,
        hold: HoldState,
        capture_available: impl Fn(MediaKind) -> bool,
        on: bool,
    ) -> Result<LocalDescription> {
        let mut local = self.build_description(
            local_supported,
            Some(remote),
            public_addresses,
            hold,
            capture_available,
        )?;
        for media in &mut local.description.media {
            toggle_hold_attribute(media, on);
        }
        Ok(local)
    }

    fn media_line(&self, kind: MediaKind, addr: SocketAddr, encodings: &[Encoding]) -> MediaDescription {
        let mut media = MediaDescription::new(kind, addr.port(), RTP_AVP);
        for encoding in encodings {
            media.formats.push(encoding.payload_type.to_string());
            if self.registry.needs_rtpmap(encoding) {
                media.attributes.push(Attribute::value("rtpmap", encoding.rtpmap_value()));
            }
            if let Some(params) = self.registry.format_parameters(encoding) {
                media
                    .attributes
                    .push(Attribute::value("fmtp", format!("{} {}", encoding.payload_type, params)));
            }
        }
        media
    }
}

/// Parse a connection host into an IP address without any lookup
pub fn literal_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[').trim_end_matches(']').parse().ok()
}
