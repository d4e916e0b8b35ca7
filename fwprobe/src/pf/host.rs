use std::fmt;
use std::str::FromStr;

use match_core::{AddrRange, ValueError};

/// What a single host entry of an address clause refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    Any,
    NoRoute,
    UrpfFailed,
    /// `route <label>`: depends on routing labels, never decided offline.
    RouteLabel(String),
    Table(String),
    Addresses(Vec<AddrRange>),
    /// `a - b`
    Range(AddrRange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub kind: HostKind,
    pub not: bool,
}

impl HostSpec {
    pub fn new(kind: HostKind) -> Self {
        Self { kind, not: false }
    }

    pub fn negated(kind: HostKind) -> Self {
        Self { kind, not: true }
    }

    /// Kinds allowed inside a table.
    pub fn is_table_entry(&self) -> bool {
        matches!(
            self.kind,
            HostKind::Table(_) | HostKind::Addresses(_) | HostKind::Range(_)
        )
    }
}

/// Accepts `any`, `no-route`, `urpf-failed`, `route LABEL`, `<table>`,
/// `10.0.0.1 - 10.0.0.9` and address lists (`10.0.0.0/8, 192.168.0.1`),
/// each optionally prefixed by `!`.
impl FromStr for HostSpec {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (not, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };
        let kind = if body == "any" {
            HostKind::Any
        } else if body == "no-route" {
            HostKind::NoRoute
        } else if body == "urpf-failed" {
            HostKind::UrpfFailed
        } else if let Some(label) = body.strip_prefix("route ") {
            HostKind::RouteLabel(label.trim().to_string())
        } else if let Some(name) = body.strip_prefix('<').and_then(|b| b.strip_suffix('>')) {
            if name.is_empty() {
                return Err(ValueError::new("host", raw, "empty table name"));
            }
            HostKind::Table(name.to_string())
        } else if body.contains(" - ") {
            HostKind::Range(body.parse()?)
        } else {
            let addresses = body
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|token| !token.is_empty())
                .map(str::parse)
                .collect::<Result<Vec<AddrRange>, _>>()?;
            if addresses.is_empty() {
                return Err(ValueError::new("host", raw, "no address given"));
            }
            HostKind::Addresses(addresses)
        };
        Ok(Self { kind, not })
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.not {
            f.write_str("!")?;
        }
        match &self.kind {
            HostKind::Any => f.write_str("any"),
            HostKind::NoRoute => f.write_str("no-route"),
            HostKind::UrpfFailed => f.write_str("urpf-failed"),
            HostKind::RouteLabel(label) => write!(f, "route {label}"),
            HostKind::Table(name) => write!(f, "<{name}>"),
            HostKind::Range(range) => write!(f, "{} - {}", range.first(), range.last()),
            HostKind::Addresses(list) if list.len() == 1 => write!(f, "{}", list[0]),
            HostKind::Addresses(list) => {
                let parts: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "{{ {} }}", parts.join(", "))
            }
        }
    }
}

/// The host list of a `from` or `to` clause. Empty means any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSpec {
    pub hosts: Vec<HostSpec>,
}

impl IpSpec {
    pub fn new(hosts: Vec<HostSpec>) -> Self {
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().filter_map(|host| match &host.kind {
            HostKind::Table(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for IpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hosts.as_slice() {
            [] => f.write_str("any"),
            [single] => write!(f, "{single}"),
            many => {
                let parts: Vec<String> = many.iter().map(ToString::to_string).collect();
                write!(f, "{{ {} }}", parts.join(", "))
            }
        }
    }
}

/// A named address set owned by an anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub entries: Vec<HostSpec>,
}

#[cfg(test)]
mod tests {
    use super::{HostKind, HostSpec};

    fn host(s: &str) -> HostSpec {
        s.parse().expect("host")
    }

    #[test]
    fn parses_every_host_form() {
        assert_eq!(host("any"), HostSpec::new(HostKind::Any));
        assert_eq!(host("!no-route"), HostSpec::negated(HostKind::NoRoute));
        assert_eq!(
            host("route wan_ok").kind,
            HostKind::RouteLabel("wan_ok".to_string())
        );
        assert_eq!(host("! <badhosts>"), HostSpec::negated(HostKind::Table("badhosts".to_string())));
        assert!(matches!(host("10.0.0.1 - 10.0.0.9").kind, HostKind::Range(_)));
        match host("10.0.0.0/8, 192.168.0.1").kind {
            HostKind::Addresses(list) => assert_eq!(list.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!("<>".parse::<HostSpec>().is_err());
        assert!("not-an-address".parse::<HostSpec>().is_err());
        assert!("!".parse::<HostSpec>().is_err());
    }

    #[test]
    fn display_is_pf_like() {
        assert_eq!(host("!<bad>").to_string(), "!<bad>");
        assert_eq!(host("10.0.0.1 - 10.0.0.9").to_string(), "10.0.0.1 - 10.0.0.9");
        assert_eq!(host("10.0.0.0/8 10.1.0.0/16").to_string(), "{ 10.0.0.0/8, 10.1.0.0/16 }");
    }
}
