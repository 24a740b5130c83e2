//! Media encodings and the codec registry
//!
//! The registry is built once at startup and shared read-only between call
//! sessions. It knows the static RTP payload types, the dynamic payload
//! types this client assigns to its extra encodings, and the format
//! parameters some encodings must announce.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::MediaKind;

/// First payload type of the dynamic range
pub const DYNAMIC_PAYLOAD_TYPE_MIN: u8 = 96;

/// One RTP encoding: payload type plus the rtpmap triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoding {
    pub kind: MediaKind,
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

impl Encoding {
    pub fn new(kind: MediaKind, payload_type: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind,
            payload_type,
            name: name.into(),
            clock_rate,
            channels: None,
        }
    }

    pub fn audio(payload_type: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self::new(MediaKind::Audio, payload_type, name, clock_rate)
    }

    pub fn video(payload_type: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self::new(MediaKind::Video, payload_type, name, clock_rate)
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.payload_type >= DYNAMIC_PAYLOAD_TYPE_MIN
    }

    /// Two encodings denote the same codec when kind, name and clock rate
    /// agree. Payload numbers may differ for dynamic types.
    pub fn same_codec(&self, other: &Encoding) -> bool {
        self.kind == other.kind
            && self.clock_rate == other.clock_rate
            && self.name.eq_ignore_ascii_case(&other.name)
    }

    /// Value of the `a=rtpmap` attribute for this encoding
    pub fn rtpmap_value(&self) -> String {
        match self.channels {
            Some(ch) => format!("{} {}/{}/{}", self.payload_type, self.name, self.clock_rate, ch),
            None => format!("{} {}/{}", self.payload_type, self.name, self.clock_rate),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.name, self.clock_rate, self.payload_type)
    }
}

/// Immutable table of known encodings and their format parameters
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    encodings: Vec<Encoding>,
    // keyed by upper-case encoding name
    format_parameters: HashMap<String, String>,
}

impl CodecRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the static payload types plus the encodings this client
    /// registers on top of them.
    pub fn standard() -> Self {
        Self::new()
            .register(Encoding::audio(0, "PCMU", 8000))
            .register(Encoding::audio(3, "GSM", 8000))
            .register(Encoding::audio(4, "G723", 8000))
            .register(Encoding::audio(5, "DVI4", 8000))
            .register(Encoding::audio(8, "PCMA", 8000))
            .register(Encoding::audio(15, "G728", 8000))
            .register(Encoding::audio(18, "G729", 8000))
            .register(Encoding::audio(97, "SPEEX", 8000))
            .register(Encoding::audio(98, "iLBC", 8000))
            .register(Encoding::video(26, "JPEG", 90000))
            .register(Encoding::video(31, "H261", 90000))
            .register(Encoding::video(34, "H263", 90000))
            .register(Encoding::video(99, "H264", 90000))
            .with_format_parameters("G723", "annexa=no;bitrate=6.3")
            .with_format_parameters("H264", "packetization-mode=1")
    }

    /// Add an encoding; a later registration of the same payload type and
    /// kind replaces the earlier one.
    pub fn register(mut self, encoding: Encoding) -> Self {
        self.encodings
            .retain(|e| !(e.kind == encoding.kind && e.payload_type == encoding.payload_type));
        self.encodings.push(encoding);
        self
    }

    /// Attach format parameters announced with every use of an encoding
    pub fn with_format_parameters(mut self, name: &str, params: impl Into<String>) -> Self {
        self.format_parameters.insert(name.to_ascii_uppercase(), params.into());
        self
    }

    pub fn encodings(&self, kind: MediaKind) -> impl Iterator<Item = &Encoding> {
        self.encodings.iter().filter(move |e| e.kind == kind)
    }

    /// Look up a payload type without an rtpmap. Only static payload types
    /// carry meaning on their own.
    pub fn by_payload_type(&self, kind: MediaKind, payload_type: u8) -> Option<&Encoding> {
        if payload_type >= DYNAMIC_PAYLOAD_TYPE_MIN {
            return None;
        }
        self.encodings
            .iter()
            .find(|e| e.kind == kind && e.payload_type == payload_type)
    }

    pub fn by_name(&self, kind: MediaKind, name: &str, clock_rate: u32) -> Option<&Encoding> {
        self.encodings.iter().find(|e| {
            e.kind == kind && e.clock_rate == clock_rate && e.name.eq_ignore_ascii_case(name)
        })
    }

    pub fn format_parameters(&self, encoding: &Encoding) -> Option<&str> {
        self.format_parameters
            .get(&encoding.name.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Whether a media line must carry an rtpmap for this encoding
    pub fn needs_rtpmap(&self, encoding: &Encoding) -> bool {
        encoding.is_dynamic() || self.format_parameters(encoding).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_static_lookup() {
        let registry = CodecRegistry::standard();
        let pcmu = registry.by_payload_type(MediaKind::Audio, 0).unwrap();
        assert_eq!(pcmu.name, "PCMU");
        assert!(registry.by_payload_type(MediaKind::Video, 0).is_none());
        // dynamic numbers mean nothing without an rtpmap
        assert!(registry.by_payload_type(MediaKind::Video, 99).is_none());
    }

    #[test]
    fn test_format_parameters() {
        let registry = CodecRegistry::standard();
        let g723 = registry.by_name(MediaKind::Audio, "g723", 8000).unwrap().clone();
        assert_eq!(registry.format_parameters(&g723), Some("annexa=no;bitrate=6.3"));
        assert!(registry.needs_rtpmap(&g723));

        let pcma = registry.by_payload_type(MediaKind::Audio, 8).unwrap();
        assert!(registry.format_parameters(pcma).is_none());
        assert!(!registry.needs_rtpmap(pcma));
    }

    #[test]
    fn test_same_codec_ignores_payload_number() {
        let ours = Encoding::video(99, "H264", 90000);
        let theirs = Encoding::video(109, "h264", 90000);
        assert!(ours.same_codec(&theirs));
        assert!(!ours.same_codec(&Encoding::audio(99, "H264", 90000)));
    }

    #[test]
    fn test_register_replaces() {
        let registry = CodecRegistry::standard().register(Encoding::audio(97, "opus", 48000).with_channels(2));
        assert_eq!(registry.encodings(MediaKind::Audio).filter(|e| e.payload_type == 97).count(), 1);
        let opus = registry.by_name(MediaKind::Audio, "OPUS", 48000).unwrap();
        assert_eq!(opus.rtpmap_value(), "97 opus/48000/2");
    }
}
