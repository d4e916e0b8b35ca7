use std::fmt;

use serde::Serialize;

use crate::error::ValueError;
use crate::result::MatchResult;

/// Wildcard protocol: `ip` in access lists matches every protocol.
pub const IP: u8 = 0;
pub const ICMP: u8 = 1;
pub const IGMP: u8 = 2;
pub const TCP: u8 = 6;
pub const UDP: u8 = 17;
pub const GRE: u8 = 47;
pub const ESP: u8 = 50;
pub const AH: u8 = 51;
pub const ICMP6: u8 = 58;
pub const SCTP: u8 = 132;

const NAMES: &[(&str, u8)] = &[
    ("ip", IP),
    ("icmp", ICMP),
    ("igmp", IGMP),
    ("tcp", TCP),
    ("udp", UDP),
    ("gre", GRE),
    ("esp", ESP),
    ("ah", AH),
    ("icmp6", ICMP6),
    ("ipv6-icmp", ICMP6),
    ("sctp", SCTP),
];

/// Parse a protocol name or number.
pub fn parse_protocol(token: &str) -> Result<u8, ValueError> {
    let lowered = token.trim().to_ascii_lowercase();
    if let Some((_, number)) = NAMES.iter().find(|(name, _)| *name == lowered) {
        return Ok(*number);
    }
    lowered
        .parse::<u8>()
        .map_err(|_| ValueError::new("protocol", token, "unknown protocol name"))
}

pub fn protocol_name(protocol: u8) -> String {
    NAMES
        .iter()
        .find(|(_, number)| *number == protocol)
        .map(|(name, _)| (*name).to_string())
        .unwrap_or_else(|| protocol.to_string())
}

/// Protocols a probe may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProtocolSet(Vec<u8>);

impl ProtocolSet {
    pub fn new(protocols: impl IntoIterator<Item = u8>) -> Self {
        let mut out: Vec<u8> = Vec::new();
        for protocol in protocols {
            if !out.contains(&protocol) {
                out.push(protocol);
            }
        }
        Self(out)
    }

    pub fn contains(&self, protocol: u8) -> bool {
        self.0.contains(&protocol)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tests a rule protocol against the plausible protocols of a probe.
    pub fn matches(&self, spec: u8) -> MatchResult {
        if spec == IP || self.contains(spec) {
            MatchResult::All
        } else {
            MatchResult::Not
        }
    }

    /// Any-of over a rule protocol list.
    pub fn matches_any(&self, specs: &[u8]) -> MatchResult {
        if specs.iter().any(|spec| self.matches(*spec).is_all()) {
            MatchResult::All
        } else {
            MatchResult::Not
        }
    }
}

impl FromIterator<u8> for ProtocolSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|p| protocol_name(*p)).collect();
        f.write_str(&names.join(","))
    }
}

impl Serialize for ProtocolSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_protocol, protocol_name, ProtocolSet, ICMP6, IP, TCP, UDP};
    use crate::result::MatchResult;

    #[test]
    fn names_and_numbers_parse() {
        assert_eq!(parse_protocol("TCP"), Ok(TCP));
        assert_eq!(parse_protocol("ipv6-icmp"), Ok(ICMP6));
        assert_eq!(parse_protocol("89"), Ok(89));
        assert!(parse_protocol("bogus").is_err());
        assert_eq!(protocol_name(UDP), "udp");
        assert_eq!(protocol_name(89), "89");
    }

    #[test]
    fn wildcard_matches_any_candidate() {
        let candidate = ProtocolSet::new([UDP]);
        assert_eq!(candidate.matches(IP), MatchResult::All);
        assert_eq!(candidate.matches(TCP), MatchResult::Not);
        assert_eq!(
            ProtocolSet::new([TCP, UDP]).matches_any(&[UDP]),
            MatchResult::All
        );
    }
}
