use match_core::ValueError;
use thiserror::Error;

/// Inconsistencies detected while building rule structures.
///
/// Everything listed here is rejected at load so that evaluation only ever
/// sees resolved, acyclic structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{context}: {source}")]
    Value {
        context: String,
        #[source]
        source: ValueError,
    },
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },
    #[error("unknown {kind} '{name}' referenced by {by}")]
    UnknownReference {
        kind: &'static str,
        name: String,
        by: String,
    },
    #[error("group '{group}' references '{target}' of kind {found}, expected {expected}")]
    KindMismatch {
        group: String,
        target: String,
        expected: String,
        found: String,
    },
    #[error("group-id pointing to itself: '{0}'")]
    SelfReference(String),
    #[error("object-group reference cycle: {0}")]
    Cycle(String),
    #[error("{context}: {detail}")]
    Conflict { context: String, detail: String },
    #[error("invalid anchor path '{0}'")]
    AnchorPath(String),
}

impl ConfigError {
    pub fn value(context: impl Into<String>, source: ValueError) -> Self {
        Self::Value {
            context: context.into(),
            source,
        }
    }

    pub fn conflict(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            context: context.into(),
            detail: detail.into(),
        }
    }
}
