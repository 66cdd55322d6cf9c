//! Media-session negotiation payloads: session descriptions and ICE candidates.
//!
//! Field names follow the browser WebRTC dictionaries on the wire
//! (`type`, `sdpMid`, `sdpMLineIndex`) and snake_case in Rust.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// One half of the offer/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Address family of a candidate's connection address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    /// mDNS hostname (`*.local`) or anything that does not parse as an IP
    Unresolved,
}

/// A proposed network path for the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// SDP `candidate:` attribute line
    pub candidate: String,
    #[serde(rename = "sdpMid", alias = "sdp_mid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", alias = "sdp_m_line_index", default)]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }

    /// Family of the connection address (5th field of the candidate line).
    ///
    /// `candidate:<foundation> <component> <transport> <priority> <address> <port> typ ...`
    pub fn address_family(&self) -> AddressFamily {
        let line = self.candidate.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let Some(address) = line.split_whitespace().nth(4) else {
            return AddressFamily::Unresolved;
        };
        match address.trim_matches(['[', ']']).parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => AddressFamily::Ipv4,
            Ok(IpAddr::V6(_)) => AddressFamily::Ipv6,
            Err(_) => AddressFamily::Unresolved,
        }
    }
}

/// STUN/TURN server handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Public STUN servers used when nothing is configured.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                urls: vec!["stun:stun.l.google.com:19302".into()],
                username: None,
                credential: None,
            },
            Self {
                urls: vec!["stun:stun1.l.google.com:19302".into()],
                username: None,
                credential: None,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_family_from_candidate_line() {
        let v4 = IceCandidate::new("candidate:842163049 1 udp 1677729535 203.0.113.5 46154 typ srflx");
        let v6 = IceCandidate::new("candidate:1 1 udp 2122262783 2001:db8::1 51000 typ host");
        let mdns = IceCandidate::new("candidate:2 1 udp 2122260223 4b0c5f1a.local 55000 typ host");
        let attr = IceCandidate::new("a=candidate:3 1 tcp 1518280447 192.168.1.4 9 typ host tcptype active");

        assert_eq!(v4.address_family(), AddressFamily::Ipv4);
        assert_eq!(v6.address_family(), AddressFamily::Ipv6);
        assert_eq!(mdns.address_family(), AddressFamily::Unresolved);
        assert_eq!(attr.address_family(), AddressFamily::Ipv4);
        assert_eq!(IceCandidate::new("").address_family(), AddressFamily::Unresolved);
    }

    #[test]
    fn candidate_wire_names() {
        let c: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_m_line_index, Some(0));

        let snake: IceCandidate = serde_json::from_str(
            r#"{"candidate":"x","sdp_mid":"1","sdp_m_line_index":2}"#,
        )
        .unwrap();
        assert_eq!(snake.sdp_m_line_index, Some(2));
    }

    #[test]
    fn description_type_is_lowercase() {
        let d = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "offer");
    }
}
