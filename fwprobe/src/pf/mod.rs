//! pf-style packet filters: anchors, tables, last match wins unless `quick`.

pub mod anchor;
pub mod eval;
pub mod firewall;
pub mod host;
pub mod rule;

pub use anchor::{Anchor, AnchorId, AnchorTree};
pub use eval::{evaluate_anchor, AnchorOutcome, EvalContext, RuleResult};
pub use firewall::PfFirewall;
pub use host::{HostKind, HostSpec, IpSpec, Table};
pub use rule::{AnchorRule, AnchorTarget, FilterClause, IcmpSpec, IfSpec, PfAction, PfGenericRule, PfRule, RouteTo, TaggedOpt};
