//! Port operators and range coverage.
//!
//! Every operator is normalized into a sorted list of disjoint inclusive
//! ranges over `0..=65535`; matching counts how many candidate ports fall
//! inside those ranges.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ValueError;
use crate::result::MatchResult;

pub const MAX_PORT: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Inclusive range `a:b`.
    Range,
    /// Exclusive range `a >< b`.
    RangeExclusive,
    /// Everything outside `a <> b`.
    ExceptRange,
}

impl PortOperator {
    fn takes_two(self) -> bool {
        matches!(self, Self::Range | Self::RangeExclusive | Self::ExceptRange)
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "le",
            Self::Gt => "gt",
            Self::Gte => "ge",
            Self::Range => "range",
            Self::RangeExclusive => "rangeex",
            Self::ExceptRange => "except",
        }
    }

    fn parse_unary(token: &str) -> Option<Self> {
        let op = match token {
            "eq" | "=" => Self::Eq,
            "neq" | "!=" => Self::Neq,
            "lt" | "<" => Self::Lt,
            "le" | "lte" | "<=" => Self::Lte,
            "gt" | ">" => Self::Gt,
            "ge" | "gte" | ">=" => Self::Gte,
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary_keyword(token: &str) -> Option<Self> {
        match token {
            "range" => Some(Self::Range),
            "rangeex" => Some(Self::RangeExclusive),
            "except" => Some(Self::ExceptRange),
            _ => None,
        }
    }

    fn parse_binary_symbol(token: &str) -> Option<Self> {
        match token {
            ":" => Some(Self::Range),
            "><" => Some(Self::RangeExclusive),
            "<>" => Some(Self::ExceptRange),
            _ => None,
        }
    }
}

/// Inclusive port interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn size(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }

    fn intersection_len(&self, other: &PortRange) -> u64 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start > end {
            0
        } else {
            u64::from(end) - u64::from(start) + 1
        }
    }
}

/// A port operator with its operands and the normalized ranges it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortSpec {
    op: PortOperator,
    first: u16,
    second: Option<u16>,
    ranges: Vec<PortRange>,
}

impl PortSpec {
    pub fn new(op: PortOperator, first: u16, second: Option<u16>) -> Result<Self, ValueError> {
        let (first, second) = match (op.takes_two(), second) {
            (true, Some(second)) => (first.min(second), Some(first.max(second))),
            (true, None) => {
                return Err(ValueError::new(
                    "port",
                    first.to_string(),
                    format!("operator '{}' needs two ports", op.keyword()),
                ))
            }
            (false, Some(_)) => {
                return Err(ValueError::new(
                    "port",
                    first.to_string(),
                    format!("operator '{}' takes a single port", op.keyword()),
                ))
            }
            (false, None) => (first, None),
        };
        Ok(Self {
            op,
            first,
            second,
            ranges: normalize(op, first, second.unwrap_or(first)),
        })
    }

    pub fn eq(port: u16) -> Self {
        Self {
            op: PortOperator::Eq,
            first: port,
            second: None,
            ranges: vec![PortRange::new(port, port)],
        }
    }

    pub fn range(start: u16, end: u16) -> Self {
        let range = PortRange::new(start, end);
        Self {
            op: PortOperator::Range,
            first: range.start,
            second: Some(range.end),
            ranges: vec![range],
        }
    }

    pub fn operator(&self) -> PortOperator {
        self.op
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    /// True for specs such as `lt 0` or `>< 5 6` that cover no port at all.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn port_count(&self) -> u64 {
        self.ranges.iter().map(PortRange::size).sum()
    }

    pub fn contains_port(&self, port: u16) -> bool {
        self.ranges
            .iter()
            .any(|range| range.start <= port && port <= range.end)
    }

    /// Tests the ports described by `candidate` against this spec.
    pub fn matches(&self, candidate: &PortSpec) -> MatchResult {
        let total = candidate.port_count();
        let covered: u64 = candidate
            .ranges
            .iter()
            .map(|c| {
                self.ranges
                    .iter()
                    .map(|s| s.intersection_len(c))
                    .sum::<u64>()
            })
            .sum();
        MatchResult::from_coverage(covered, total)
    }
}

fn normalize(op: PortOperator, a: u16, b: u16) -> Vec<PortRange> {
    let mut out = Vec::new();
    match op {
        PortOperator::Eq => out.push(PortRange::new(a, a)),
        PortOperator::Neq => {
            if a > 0 {
                out.push(PortRange::new(0, a - 1));
            }
            if a < MAX_PORT {
                out.push(PortRange::new(a + 1, MAX_PORT));
            }
        }
        PortOperator::Lt => {
            if a > 0 {
                out.push(PortRange::new(0, a - 1));
            }
        }
        PortOperator::Lte => out.push(PortRange::new(0, a)),
        PortOperator::Gt => {
            if a < MAX_PORT {
                out.push(PortRange::new(a + 1, MAX_PORT));
            }
        }
        PortOperator::Gte => out.push(PortRange::new(a, MAX_PORT)),
        PortOperator::Range => out.push(PortRange::new(a, b)),
        PortOperator::RangeExclusive => {
            if b > a && b - a >= 2 {
                out.push(PortRange::new(a + 1, b - 1));
            }
        }
        PortOperator::ExceptRange => {
            if a > 0 {
                out.push(PortRange::new(0, a - 1));
            }
            if b < MAX_PORT {
                out.push(PortRange::new(b + 1, MAX_PORT));
            }
        }
    }
    out
}

/// Well-known service names accepted wherever a port number is.
pub fn parse_port(token: &str) -> Result<u16, ValueError> {
    let port = match token {
        "ftp-data" => 20,
        "ftp" => 21,
        "ssh" => 22,
        "telnet" => 23,
        "smtp" => 25,
        "domain" => 53,
        "bootps" => 67,
        "bootpc" => 68,
        "tftp" => 69,
        "www" | "http" => 80,
        "pop3" => 110,
        "ntp" => 123,
        "imap4" => 143,
        "snmp" => 161,
        "ldap" => 389,
        "https" => 443,
        "syslog" => 514,
        "ldaps" => 636,
        other => {
            return other
                .parse::<u16>()
                .map_err(|_| ValueError::new("port", other, "not a port number or service name"))
        }
    };
    Ok(port)
}

/// Accepts keyword forms (`eq 80`, `range 1 5`, `rangeex 1 5`, `except 1 5`),
/// symbol forms (`= 80`, `!= 80`, `<= 1024`, `1:5`, `1 >< 5`, `1 <> 5`) and a
/// bare port meaning `eq`.
impl FromStr for PortSpec {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        match tokens.as_slice() {
            [single] => {
                if let Some((lo, hi)) = single.split_once(':') {
                    return PortSpec::new(PortOperator::Range, parse_port(lo)?, Some(parse_port(hi)?));
                }
                Ok(PortSpec::eq(parse_port(single)?))
            }
            [op, port] => match PortOperator::parse_unary(op) {
                Some(op) => PortSpec::new(op, parse_port(port)?, None),
                None => Err(ValueError::new("port", raw, format!("unknown operator '{op}'"))),
            },
            [head, mid, tail] => {
                if let Some(op) = PortOperator::parse_binary_keyword(head) {
                    PortSpec::new(op, parse_port(mid)?, Some(parse_port(tail)?))
                } else if let Some(op) = PortOperator::parse_binary_symbol(mid) {
                    PortSpec::new(op, parse_port(head)?, Some(parse_port(tail)?))
                } else {
                    Err(ValueError::new("port", raw, "unknown range operator"))
                }
            }
            _ => Err(ValueError::new("port", raw, "unrecognized port expression")),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.second {
            Some(second) => write!(f, "{} {} {}", self.op.keyword(), self.first, second),
            None => write!(f, "{} {}", self.op.keyword(), self.first),
        }
    }
}

impl Serialize for PortSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
