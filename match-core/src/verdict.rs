use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::probe::Direction;
use crate::result::MatchResult;

bitflags! {
    /// Verdict of a rule or of a whole direction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FwResult: u8 {
        const ACCEPT = 0x01;
        const DENY = 0x02;
        /// Recorded by a rule that only matches (tags) without deciding.
        const MATCH = 0x04;
        /// Applies to only part of the probe, or could not be decided.
        const MAY = 0x80;
    }
}

impl FwResult {
    /// Verdict for an `accept`/`deny` decision reached with `certainty`.
    pub fn decision(deny: bool, certainty: MatchResult) -> Self {
        let base = if deny { Self::DENY } else { Self::ACCEPT };
        base.qualified(certainty)
    }

    pub fn qualified(self, certainty: MatchResult) -> Self {
        if certainty.is_partial() {
            self | Self::MAY
        } else {
            self
        }
    }

    pub fn is_accept(self) -> bool {
        self.contains(Self::ACCEPT)
    }

    pub fn is_deny(self) -> bool {
        self.contains(Self::DENY)
    }

    pub fn is_may(self) -> bool {
        self.contains(Self::MAY)
    }

    fn certain_accept(self) -> bool {
        self.is_accept() && !self.is_may()
    }

    fn certain_deny(self) -> bool {
        self.is_deny() && !self.is_may()
    }

    /// Combines two filters crossed one after the other.
    pub fn concat(self, next: FwResult) -> FwResult {
        if self.certain_deny() || next.certain_deny() {
            Self::DENY
        } else if self.certain_accept() && next.certain_accept() {
            Self::ACCEPT
        } else if self.is_deny() || next.is_deny() {
            Self::MAY | Self::DENY
        } else if self.is_accept() || next.is_accept() {
            Self::MAY | Self::ACCEPT
        } else {
            self | next
        }
    }

    /// Combines two alternative paths taken by parts of the same probe.
    pub fn sum_path(self, other: FwResult) -> FwResult {
        if self.certain_deny() && other.certain_deny() {
            Self::DENY
        } else if self.certain_accept() && other.certain_accept() {
            Self::ACCEPT
        } else if self.is_deny() || other.is_deny() {
            Self::MAY | Self::DENY
        } else if self.is_accept() || other.is_accept() {
            Self::MAY | Self::ACCEPT
        } else {
            self | other
        }
    }
}

impl fmt::Display for FwResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_may() {
            parts.push("MAY");
        }
        if self.is_accept() {
            parts.push("ACCEPT");
        }
        if self.is_deny() {
            parts.push("DENY");
        }
        if self.contains(Self::MATCH) {
            parts.push("MATCH");
        }
        if parts.is_empty() {
            parts.push("NONE");
        }
        f.write_str(&parts.join(" "))
    }
}

impl Serialize for FwResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One trail line: the rule text and what it decided for this probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclEntry {
    pub text: String,
    pub result: FwResult,
}

impl AclEntry {
    pub fn new(text: impl Into<String>, result: FwResult) -> Self {
        Self {
            text: text.into(),
            result,
        }
    }
}

/// Outcome of filtering one direction on one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectionResult {
    pub interface: String,
    pub matching: Vec<AclEntry>,
    pub active: Option<AclEntry>,
    pub verdict: FwResult,
}

impl DirectionResult {
    /// A verdict reached without consulting any rule.
    pub fn without_rules(interface: impl Into<String>, verdict: FwResult) -> Self {
        Self {
            interface: interface.into(),
            matching: Vec::new(),
            active: None,
            verdict,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResults {
    pub incoming: Option<DirectionResult>,
    pub outgoing: Option<DirectionResult>,
}

impl ProbeResults {
    pub fn record(&mut self, direction: Direction, result: DirectionResult) {
        match direction {
            Direction::In => self.incoming = Some(result),
            Direction::Out => self.outgoing = Some(result),
        }
    }

    pub fn get(&self, direction: Direction) -> Option<&DirectionResult> {
        match direction {
            Direction::In => self.incoming.as_ref(),
            Direction::Out => self.outgoing.as_ref(),
        }
    }

    /// Verdict of crossing the equipment: inbound filter then outbound filter.
    pub fn path_verdict(&self) -> Option<FwResult> {
        match (&self.incoming, &self.outgoing) {
            (Some(incoming), Some(outgoing)) => Some(incoming.verdict.concat(outgoing.verdict)),
            (Some(only), None) | (None, Some(only)) => Some(only.verdict),
            (None, None) => None,
        }
    }
}

/// Serialize results as pretty JSON.
pub fn format_json(results: &ProbeResults) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(results)
}
