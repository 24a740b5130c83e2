//! SDP handling: wire types, parsing and offer/answer negotiation

pub mod description;
pub mod negotiator;
pub mod parser;

pub use description::{Attribute, Connection, MediaDescription, Origin, RtpMap, SessionDescription};
pub use negotiator::{
    hold_attribute, intersect_encodings, is_offer_for_hold, literal_ip, toggle_hold_attribute,
    EncodingsByKind, LocalDescription, RemoteDescription, SdpNegotiator, RTP_AVP,
};
pub use parser::{parse_description, SdpParseError};
