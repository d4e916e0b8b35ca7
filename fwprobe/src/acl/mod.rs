//! Access-list firewalls: object groups, ordered entries, first match wins.

pub mod entry;
pub mod eval;
pub mod firewall;
pub mod group;
pub mod list;

pub use entry::{AccessListEntry, AclAction, AddressSpec, IcmpMatch, PortMatch, ProtocolSpec};
pub use firewall::AclFirewall;
pub use group::{GroupId, GroupItem, GroupKind, GroupLeaf, GroupTable, ObjectGroup, ServiceObject, ServiceProtocol};
pub use list::{AccessGroup, AccessList};
