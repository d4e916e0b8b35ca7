use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::Serialize;

use crate::error::ValueError;
use crate::result::MatchResult;

bitflags! {
    /// TCP header flags, in wire bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

const LETTERS: [(char, TcpFlags); 8] = [
    ('F', TcpFlags::FIN),
    ('S', TcpFlags::SYN),
    ('R', TcpFlags::RST),
    ('P', TcpFlags::PSH),
    ('A', TcpFlags::ACK),
    ('U', TcpFlags::URG),
    ('E', TcpFlags::ECE),
    ('W', TcpFlags::CWR),
];

/// Parses the letter form used by pf, e.g. `SA` or `FPU`.
impl FromStr for TcpFlags {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = TcpFlags::empty();
        for ch in s.trim().chars() {
            let upper = ch.to_ascii_uppercase();
            match LETTERS.iter().find(|(letter, _)| *letter == upper) {
                Some((_, flag)) => flags |= *flag,
                None => {
                    return Err(ValueError::new(
                        "tcp flags",
                        s,
                        format!("unknown flag letter '{ch}'"),
                    ))
                }
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, flag) in LETTERS {
            if self.contains(flag) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// A `flags F/M` clause: the bits of `mask` must equal `flags`.
/// Without a mask, the packet must carry at least `flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagsTest {
    pub flags: TcpFlags,
    pub mask: Option<TcpFlags>,
}

impl FlagsTest {
    /// `S/SA`: an initial SYN.
    pub fn initial_syn() -> Self {
        Self {
            flags: TcpFlags::SYN,
            mask: Some(TcpFlags::SYN | TcpFlags::ACK),
        }
    }

    pub fn accepts(&self, packet: TcpFlags) -> bool {
        match self.mask {
            Some(mask) => packet & mask == self.flags,
            None => packet.contains(self.flags),
        }
    }

    /// Each probe flag set stands for one packet shape.
    pub fn matches(&self, candidates: &[TcpFlags]) -> MatchResult {
        let hits = candidates.iter().filter(|f| self.accepts(**f)).count();
        MatchResult::from_coverage(hits as u64, candidates.len() as u64)
    }
}

impl FromStr for FlagsTest {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        match raw.split_once('/') {
            Some((flags, mask)) => Ok(Self {
                flags: flags.parse()?,
                mask: Some(mask.parse()?),
            }),
            None => Ok(Self {
                flags: raw.parse()?,
                mask: None,
            }),
        }
    }
}

impl fmt::Display for FlagsTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mask {
            Some(mask) => write!(f, "{}/{}", self.flags, mask),
            None => write!(f, "{}", self.flags),
        }
    }
}

impl Serialize for FlagsTest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{FlagsTest, TcpFlags};
    use crate::result::MatchResult;

    fn flags(s: &str) -> TcpFlags {
        s.parse().expect("flags")
    }

    #[test]
    fn letters_round_through_display() {
        assert_eq!(flags("as"), TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(flags("SA").to_string(), "SA");
        assert!("SX".parse::<TcpFlags>().is_err());
    }

    #[test]
    fn masked_test_requires_exact_bits_under_mask() {
        let syn = FlagsTest::initial_syn();
        assert!(syn.accepts(flags("S")));
        assert!(syn.accepts(flags("SE")));
        assert!(!syn.accepts(flags("SA")));
        assert!(!syn.accepts(flags("A")));
    }

    #[test]
    fn unmasked_test_requires_listed_bits() {
        let test: FlagsTest = "S".parse().expect("test");
        assert!(test.accepts(flags("SA")));
        assert!(!test.accepts(flags("A")));
    }

    #[test]
    fn several_packet_shapes_give_partial_results() {
        let syn = FlagsTest::initial_syn();
        assert_eq!(syn.matches(&[flags("S")]), MatchResult::All);
        assert_eq!(syn.matches(&[flags("S"), flags("SA")]), MatchResult::Match);
        assert_eq!(syn.matches(&[flags("A")]), MatchResult::Not);
    }
}
