//! Match algebra and packet field primitives used by higher-level firewall analyzers.
//!
//! A probe describes a *set* of packets: addresses and ports may be ranges,
//! protocols a list of plausible values. Every field test therefore answers
//! with a [`MatchResult`] rather than a boolean:
//!
//! - [`MatchResult::All`]: every packet of the probe satisfies the test
//! - [`MatchResult::Match`]: some do, some do not
//! - [`MatchResult::Not`]: none do
//! - [`MatchResult::Unknown`]: the test cannot be decided offline
//!
//! Rule evaluators built on top of this crate combine field results, record
//! verdicts as [`FwResult`] flags and store them in the probe's
//! [`ProbeResults`].

pub mod addr;
pub mod error;
pub mod icmp;
pub mod port;
pub mod probe;
pub mod proto;
pub mod result;
pub mod routing;
pub mod tcp_flags;
pub mod verdict;

pub use addr::{AddrRange, AddressFamily};
pub use error::{EvalError, ValueError};
pub use icmp::IcmpEntry;
pub use port::{PortOperator, PortRange, PortSpec};
pub use probe::{Direction, Link, Probe, ProbeOptions, ProbeRequest, RouteOverride};
pub use proto::ProtocolSet;
pub use result::MatchResult;
pub use routing::{Route, RouteLookup, StaticRoutes};
pub use tcp_flags::{FlagsTest, TcpFlags};
pub use verdict::{format_json, AclEntry, DirectionResult, FwResult, ProbeResults};
