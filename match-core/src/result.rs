use std::fmt;

use serde::Serialize;

/// Outcome of testing a set of packets against a rule field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    /// Every packet described by the probe satisfies the test.
    All,
    /// Some packets satisfy it, others do not.
    Match,
    /// No packet satisfies it.
    Not,
    /// The test cannot be decided.
    Unknown,
}

impl MatchResult {
    /// Logical negation over packet sets: `All` and `Not` swap, partial and
    /// undecidable results stay as they are.
    pub fn negate(self) -> Self {
        match self {
            Self::All => Self::Not,
            Self::Not => Self::All,
            other => other,
        }
    }

    pub fn negate_if(self, negate: bool) -> Self {
        if negate {
            self.negate()
        } else {
            self
        }
    }

    pub fn is_all(self) -> bool {
        self == Self::All
    }

    pub fn is_not(self) -> bool {
        self == Self::Not
    }

    /// True for `Match` and `Unknown`, the results that make a verdict uncertain.
    pub fn is_partial(self) -> bool {
        matches!(self, Self::Match | Self::Unknown)
    }

    /// Conjunction of two independent field tests.
    ///
    /// `Not` dominates, then `Unknown`, then `Match`.
    pub fn and(self, other: Self) -> Self {
        use MatchResult::*;
        match (self, other) {
            (Not, _) | (_, Not) => Not,
            (Unknown, _) | (_, Unknown) => Unknown,
            (Match, _) | (_, Match) => Match,
            (All, All) => All,
        }
    }

    /// Disjunction over alternative specs: `All` > `Match` > `Unknown` > `Not`.
    pub fn or(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// Builds a result from the number of covered units out of `total`.
    pub fn from_coverage(covered: u64, total: u64) -> Self {
        if total == 0 || covered == 0 {
            Self::Not
        } else if covered >= total {
            Self::All
        } else {
            Self::Match
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Not => 0,
            Self::Unknown => 1,
            Self::Match => 2,
            Self::All => 3,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::All => "ALL",
            Self::Match => "MATCH",
            Self::Not => "NOT",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(text)
    }
}

/// Folds alternatives with [`MatchResult::or`]; an empty input is `Not`.
pub fn any_of<I>(results: I) -> MatchResult
where
    I: IntoIterator<Item = MatchResult>,
{
    let mut best = MatchResult::Not;
    for result in results {
        best = best.or(result);
        if best.is_all() {
            break;
        }
    }
    best
}

/// Folds independent tests with [`MatchResult::and`]; an empty input is `All`.
pub fn all_of<I>(results: I) -> MatchResult
where
    I: IntoIterator<Item = MatchResult>,
{
    let mut acc = MatchResult::All;
    for result in results {
        acc = acc.and(result);
        if acc.is_not() {
            break;
        }
    }
    acc
}
