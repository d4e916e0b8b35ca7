use std::net::IpAddr;

use thiserror::Error;

/// Fatal conditions raised while evaluating a probe.
///
/// These indicate an inconsistent rule structure, never a non-matching
/// packet; evaluators propagate them instead of degrading to `Not`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("address family mismatch between {first} and {second}")]
    FamilyMismatch { first: IpAddr, second: IpAddr },
    #[error("dangling {arena} id {id}")]
    DanglingId { arena: &'static str, id: usize },
    #[error("{kind} reference cycle through '{name}'")]
    ReferenceCycle { kind: &'static str, name: String },
}

/// A field value that could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct ValueError {
    pub kind: &'static str,
    pub value: String,
    pub reason: String,
}

impl ValueError {
    pub fn new(kind: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
