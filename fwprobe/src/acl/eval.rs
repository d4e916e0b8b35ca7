//! First-match-wins evaluation of access lists.
//!
//! Every entry is tested against the whole probe; non-`Not` entries are
//! recorded in order and the first recorded one decides.

use match_core::proto::{ICMP, TCP};
use match_core::result::all_of;
use match_core::{
    AddrRange, EvalError, FlagsTest, FwResult, MatchResult, PortSpec, Probe, ProtocolSet,
};
use tracing::{debug, trace};

use super::entry::{AccessListEntry, AclAction, AddressSpec, IcmpMatch, PortMatch, ProtocolSpec};
use super::group::GroupTable;
use super::list::AccessList;

/// A recorded entry: where it lives and what it decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMatch {
    pub list: usize,
    pub entry: usize,
    pub text: String,
    pub certainty: MatchResult,
    pub result: FwResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclTrail {
    pub matches: Vec<EntryMatch>,
}

impl AclTrail {
    /// The authoritative entry: the first one recorded.
    pub fn first(&self) -> Option<&EntryMatch> {
        self.matches.first()
    }
}

/// Scans `lists` in order, recording every entry the probe may hit.
pub fn evaluate(
    groups: &GroupTable,
    lists: &[(usize, &AccessList)],
    probe: &Probe,
) -> Result<AclTrail, EvalError> {
    let mut trail = AclTrail::default();
    for (list_index, list) in lists {
        for (entry_index, entry) in list.active_entries() {
            let certainty = entry_filter(groups, entry, probe)?;
            if certainty.is_not() {
                continue;
            }
            let result = FwResult::decision(entry.action == AclAction::Deny, certainty);
            debug!(list = list.name(), entry = entry_index, %certainty, %result, "access-list entry matched");
            trail.matches.push(EntryMatch {
                list: *list_index,
                entry: entry_index,
                text: entry.text.clone(),
                certainty,
                result,
            });
        }
    }
    Ok(trail)
}

/// Tests one entry against the probe by AND-ing its independent field tests.
/// Tests for fields the probe leaves unspecified are skipped.
pub fn entry_filter(
    groups: &GroupTable,
    entry: &AccessListEntry,
    probe: &Probe,
) -> Result<MatchResult, EvalError> {
    let request = probe.request();
    let mut results = Vec::with_capacity(8);

    let source = address_filter(groups, &entry.source, probe.source())?;
    if skip(source, "source") {
        return Ok(MatchResult::Not);
    }
    results.push(source);

    let destination = address_filter(groups, &entry.destination, probe.destination())?;
    if skip(destination, "destination") {
        return Ok(MatchResult::Not);
    }
    results.push(destination);

    if let (Some(spec), Some(protocols)) = (&entry.protocol, &request.protocols) {
        let protocol = match spec {
            ProtocolSpec::Number(number) => protocols.matches(*number),
            ProtocolSpec::Group(id) => groups.match_protocol(*id, protocols)?,
        };
        if skip(protocol, "protocol") {
            return Ok(MatchResult::Not);
        }
        results.push(protocol);
    }

    if let (Some(spec), Some(port)) = (&entry.source_port, &request.source_port) {
        let result = port_filter(groups, spec, request.protocols.as_ref(), port)?;
        if skip(result, "source port") {
            return Ok(MatchResult::Not);
        }
        results.push(result);
    }

    if let (Some(spec), Some(port)) = (&entry.destination_port, &request.destination_port) {
        let result = port_filter(groups, spec, request.protocols.as_ref(), port)?;
        if skip(result, "destination port") {
            return Ok(MatchResult::Not);
        }
        results.push(result);
    }

    if let (Some(spec), Some(icmp_type)) = (&entry.icmp, request.icmp_type) {
        if request.carries_protocol(ICMP) {
            let result = match spec {
                IcmpMatch::Entry(icmp) => icmp.matches(icmp_type, request.icmp_code),
                IcmpMatch::Group(id) => groups.match_icmp(*id, icmp_type)?,
            };
            if skip(result, "icmp type") {
                return Ok(MatchResult::Not);
            }
            results.push(result);
        }
    }

    if let Some(id) = entry.service {
        let result = groups.match_enhanced(
            id,
            request.protocols.as_ref(),
            request.destination_port.as_ref(),
        )?;
        if skip(result, "service") {
            return Ok(MatchResult::Not);
        }
        results.push(result);
    }

    // Stateless permits only see connection openings; replies use the state table.
    if entry.action == AclAction::Permit
        && !request.tcp_flags.is_empty()
        && request.carries_protocol(TCP)
    {
        let result = FlagsTest::initial_syn().matches(&request.tcp_flags);
        if skip(result, "tcp flags") {
            return Ok(MatchResult::Not);
        }
        results.push(result);
    }

    Ok(all_of(results))
}

fn skip(result: MatchResult, field: &str) -> bool {
    if result.is_not() {
        trace!(field, "access-list entry does not match");
        return true;
    }
    false
}

fn address_filter(
    groups: &GroupTable,
    spec: &AddressSpec,
    candidate: &AddrRange,
) -> Result<MatchResult, EvalError> {
    match spec {
        AddressSpec::Any => Ok(MatchResult::All),
        AddressSpec::Range(range) => Ok(range.matches(candidate)),
        AddressSpec::Group(id) => groups.match_network(*id, candidate),
    }
}

fn port_filter(
    groups: &GroupTable,
    spec: &PortMatch,
    protocols: Option<&ProtocolSet>,
    candidate: &PortSpec,
) -> Result<MatchResult, EvalError> {
    match spec {
        PortMatch::Spec(port) => Ok(port.matches(candidate)),
        PortMatch::Group(id) => groups.match_service(*id, protocols, candidate),
    }
}
