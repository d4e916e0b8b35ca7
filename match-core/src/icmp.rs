use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ValueError;
use crate::result::{any_of, MatchResult};

/// An ICMP type with an optional code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IcmpEntry {
    pub icmp_type: u8,
    pub code: Option<u8>,
}

impl IcmpEntry {
    pub fn new(icmp_type: u8, code: Option<u8>) -> Self {
        Self { icmp_type, code }
    }

    /// Tests a probe type/code. A probe without a code stands for every code
    /// of its type, so a code-specific entry only partially covers it.
    pub fn matches(&self, icmp_type: u8, code: Option<u8>) -> MatchResult {
        if self.icmp_type != icmp_type {
            return MatchResult::Not;
        }
        match (self.code, code) {
            (None, _) => MatchResult::All,
            (Some(expected), Some(actual)) if expected == actual => MatchResult::All,
            (Some(_), Some(_)) => MatchResult::Not,
            (Some(_), None) => MatchResult::Match,
        }
    }
}

/// Any-of over an entry list.
pub fn match_entries(entries: &[IcmpEntry], icmp_type: u8, code: Option<u8>) -> MatchResult {
    any_of(entries.iter().map(|entry| entry.matches(icmp_type, code)))
}

const TYPE_NAMES: &[(&str, u8)] = &[
    ("echo-reply", 0),
    ("echorep", 0),
    ("unreachable", 3),
    ("unreach", 3),
    ("source-quench", 4),
    ("squench", 4),
    ("redirect", 5),
    ("echo", 8),
    ("echo-request", 8),
    ("echoreq", 8),
    ("router-advertisement", 9),
    ("routeradv", 9),
    ("router-solicitation", 10),
    ("routersol", 10),
    ("time-exceeded", 11),
    ("timex", 11),
    ("parameter-problem", 12),
    ("paramprob", 12),
    ("timestamp-request", 13),
    ("timereq", 13),
    ("timestamp-reply", 14),
    ("timerep", 14),
];

/// Parse an ICMP type given by name or number.
pub fn parse_icmp_type(token: &str) -> Result<u8, ValueError> {
    let lowered = token.trim().to_ascii_lowercase();
    if let Some((_, number)) = TYPE_NAMES.iter().find(|(name, _)| *name == lowered) {
        return Ok(*number);
    }
    lowered
        .parse::<u8>()
        .map_err(|_| ValueError::new("icmp type", token, "unknown icmp type"))
}

/// Accepts `echoreq`, `8`, `3/1` and `unreach code 1`.
impl FromStr for IcmpEntry {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (ty, code) = if let Some((ty, code)) = raw.split_once('/') {
            (ty, Some(code))
        } else if let Some((ty, code)) = raw.split_once(" code ") {
            (ty, Some(code))
        } else {
            (raw, None)
        };
        let code = code
            .map(|c| {
                c.trim()
                    .parse::<u8>()
                    .map_err(|_| ValueError::new("icmp code", raw, "code must be 0-255"))
            })
            .transpose()?;
        Ok(Self::new(parse_icmp_type(ty)?, code))
    }
}

impl fmt::Display for IcmpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}/{}", self.icmp_type, code),
            None => write!(f, "{}", self.icmp_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{match_entries, IcmpEntry};
    use crate::result::MatchResult;

    fn entry(s: &str) -> IcmpEntry {
        s.parse().expect("icmp entry")
    }

    #[test]
    fn parses_names_and_codes() {
        assert_eq!(entry("echoreq"), IcmpEntry::new(8, None));
        assert_eq!(entry("3/1"), IcmpEntry::new(3, Some(1)));
        assert_eq!(entry("unreach code 4"), IcmpEntry::new(3, Some(4)));
        assert!("3/x".parse::<IcmpEntry>().is_err());
    }

    #[test]
    fn code_specific_entry_partially_covers_codeless_probe() {
        let port_unreach = entry("3/3");
        assert_eq!(port_unreach.matches(3, Some(3)), MatchResult::All);
        assert_eq!(port_unreach.matches(3, Some(1)), MatchResult::Not);
        assert_eq!(port_unreach.matches(3, None), MatchResult::Match);
        assert_eq!(port_unreach.matches(8, None), MatchResult::Not);
    }

    #[test]
    fn list_is_any_of() {
        let entries = [entry("echoreq"), entry("3/3")];
        assert_eq!(match_entries(&entries, 8, Some(0)), MatchResult::All);
        assert_eq!(match_entries(&entries, 3, None), MatchResult::Match);
        assert_eq!(match_entries(&entries, 11, None), MatchResult::Not);
    }
}
