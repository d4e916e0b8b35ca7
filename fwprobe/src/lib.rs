//! Offline reachability analysis for firewall configurations.
//!
//! Given a model of one equipment and a *probe* (a packet description whose
//! addresses and ports may be ranges), this crate works out whether the
//! modeled ruleset accepts, denies or only partially classifies the probe,
//! and which rules were authoritative. No traffic is sent.
//!
//! # Architecture
//!
//! Two rule disciplines are supported:
//!
//! - [`acl`]: Cisco-style access lists bound to interfaces, with typed
//!   object groups. The first matching entry decides.
//! - [`pf`]: OpenBSD-style rulesets organized in an anchor tree with tables.
//!   The last matching rule decides unless a `quick` rule fires first.
//!
//! Both are built on the match algebra of `match-core`, where every field
//! test answers ALL, MATCH, NOT or UNKNOWN for the whole probe.
//!
//! Around the evaluators:
//!
//! - [`equipment`]: interfaces, static routes and traversal (inbound filter,
//!   egress selection, outbound filter per route)
//! - [`model`]: TOML model files, validated at load
//! - [`check`]: load-time configuration report
//! - [`report`]: terminal and JSON rendering of probe results
//! - [`usage`]: load-time reference counters and evaluation hit counters
//!
//! # Examples
//!
//! ```ignore
//! use fwprobe::model::load_model;
//! use match_core::{Link, Probe, ProbeRequest};
//!
//! let model = load_model("fixtures/asa-edge.toml".as_ref())?;
//! let probe = Probe::new("192.0.2.10".parse()?, "10.0.0.5".parse()?, ProbeRequest::default())?;
//! let probes = model.equipment.traverse(probe, &Link::new("outside"), None)?;
//! println!("{:?}", fwprobe::equipment::summarize(&probes));
//! ```

pub mod acl;
pub mod check;
pub mod equipment;
pub mod error;
pub mod model;
pub mod pf;
pub mod report;
pub mod usage;
