//! Session description parser

use std::str::FromStr;
use thiserror::Error;

use super::description::{Attribute, Connection, MediaDescription, Origin, SessionDescription};

/// Errors produced while parsing a session description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdpParseError {
    #[error("description is empty")]
    Empty,

    #[error("line {line}: expected '<type>=<value>', got {content:?}")]
    InvalidLine { line: usize, content: String },

    #[error("missing mandatory {0}= line")]
    MissingLine(char),

    #[error("line {line}: unsupported version {value:?}")]
    InvalidVersion { line: usize, value: String },

    #[error("line {line}: malformed {kind} line {value:?}")]
    Malformed { line: usize, kind: char, value: String },

    #[error("line {line}: {kind}= line out of order")]
    OutOfOrder { line: usize, kind: char },
}

impl FromStr for SessionDescription {
    type Err = SdpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_description(s)
    }
}

/// Parse SDP text. Accepts both CRLF and bare LF line endings.
pub fn parse_description(input: &str) -> Result<SessionDescription, SdpParseError> {
    let mut version: Option<u32> = None;
    let mut origin: Option<Origin> = None;
    let mut session_name: Option<String> = None;
    let mut uri = None;
    let mut connection = None;
    let mut times = Vec::new();
    let mut attributes = Vec::new();
    let mut media: Vec<MediaDescription> = Vec::new();

    let mut saw_line = false;
    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        saw_line = true;

        let (kind, value) = split_line(line).ok_or_else(|| SdpParseError::InvalidLine {
            line: line_no,
            content: line.to_string(),
        })?;

        if version.is_none() && kind != 'v' {
            return Err(SdpParseError::OutOfOrder { line: line_no, kind });
        }

        match kind {
            'v' => {
                if version.is_some() {
                    return Err(SdpParseError::OutOfOrder { line: line_no, kind });
                }
                let v = value.trim().parse::<u32>().ok().filter(|v| *v == 0).ok_or_else(|| {
                    SdpParseError::InvalidVersion { line: line_no, value: value.to_string() }
                })?;
                version = Some(v);
            }
            'o' => origin = Some(parse_origin(line_no, value)?),
            's' => session_name = Some(value.to_string()),
            'u' if media.is_empty() => uri = Some(value.trim().to_string()),
            'c' => {
                let conn = parse_connection(line_no, value)?;
                match media.last_mut() {
                    Some(m) => m.connection = Some(conn),
                    None => connection = Some(conn),
                }
            }
            't' => {
                let mut parts = value.split_whitespace();
                let start = parts.next().and_then(|v| v.parse().ok());
                let stop = parts.next().and_then(|v| v.parse().ok());
                match (start, stop) {
                    (Some(start), Some(stop)) => times.push((start, stop)),
                    _ => {
                        return Err(SdpParseError::Malformed {
                            line: line_no,
                            kind,
                            value: value.to_string(),
                        })
                    }
                }
            }
            'a' => {
                let attr = parse_attribute(value);
                match media.last_mut() {
                    Some(m) => m.attributes.push(attr),
                    None => attributes.push(attr),
                }
            }
            'm' => media.push(parse_media(line_no, value)?),
            // i= b= k= e= p= z= r= and anything newer carry nothing we act on
            _ => {}
        }
    }

    if !saw_line {
        return Err(SdpParseError::Empty);
    }

    Ok(SessionDescription {
        version: version.ok_or(SdpParseError::MissingLine('v'))?,
        origin: origin.ok_or(SdpParseError::MissingLine('o'))?,
        session_name: session_name.ok_or(SdpParseError::MissingLine('s'))?,
        uri,
        connection,
        times,
        attributes,
        media,
    })
}

fn split_line(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let kind = chars.next()?;
    if !kind.is_ascii_lowercase() || chars.next()? != '=' {
        return None;
    }
    Some((kind, &line[2..]))
}

fn parse_origin(line: usize, value: &str) -> Result<Origin, SdpParseError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(SdpParseError::Malformed { line, kind: 'o', value: value.to_string() });
    }
    Ok(Origin {
        username: parts[0].to_string(),
        session_id: parts[1].to_string(),
        session_version: parts[2].to_string(),
        net_type: parts[3].to_string(),
        addr_type: parts[4].to_string(),
        address: parts[5].to_string(),
    })
}

fn parse_connection(line: usize, value: &str) -> Result<Connection, SdpParseError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(SdpParseError::Malformed { line, kind: 'c', value: value.to_string() });
    }
    Ok(Connection {
        net_type: parts[0].to_string(),
        addr_type: parts[1].to_string(),
        address: parts[2].to_string(),
    })
}

fn parse_attribute(value: &str) -> Attribute {
    match value.split_once(':') {
        Some((name, v)) => Attribute::value(name.trim(), v.trim()),
        None => Attribute::flag(value.trim()),
    }
}

fn parse_media(line: usize, value: &str) -> Result<MediaDescription, SdpParseError> {
    let malformed = || SdpParseError::Malformed { line, kind: 'm', value: value.to_string() };

    let mut parts = value.split_whitespace();
    let media = parts.next().ok_or_else(malformed)?.to_string();
    let port_field = parts.next().ok_or_else(malformed)?;
    let protocol = parts.next().ok_or_else(malformed)?.to_string();
    let formats: Vec<String> = parts.map(str::to_string).collect();
    if formats.is_empty() {
        return Err(malformed());
    }

    let (port, port_count) = match port_field.split_once('/') {
        Some((port, count)) => (
            port.parse().map_err(|_| malformed())?,
            Some(count.parse().map_err(|_| malformed())?),
        ),
        None => (port_field.parse().map_err(|_| malformed())?, None),
    };

    Ok(MediaDescription {
        media,
        port,
        port_count,
        protocol,
        formats,
        connection: None,
        attributes: Vec::new(),
    })
}
