//! Birth/survival rule encoding for Life-like automata.
//!
//! A rule is a pair of 9-bit neighbour-count sets. Rule ids pack them as
//! `birth_mask * 512 + survival_mask`, giving 262,144 distinct rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};
use thiserror::Error;

/// Number of distinct masks per set (counts 0..=8).
pub const MASK_LIMIT: u16 = 512;
/// Total number of Life-like rules.
pub const RULE_COUNT: u32 = (MASK_LIMIT as u32) * (MASK_LIMIT as u32);
/// Highest neighbour count in the Moore neighbourhood.
pub const MAX_NEIGHBORS: u8 = 8;

/// Errors raised while constructing rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// Notation did not match `B{digits}/S{digits}` with digits 0-8.
    #[error("invalid rule notation: {0:?}")]
    InvalidRuleNotation(String),
    #[error("rule id {0} outside [0, {max}]", max = RULE_COUNT - 1)]
    IdOutOfRange(u32),
    #[error("mask {0} outside [0, {max}]", max = MASK_LIMIT - 1)]
    MaskOutOfRange(u16),
    #[error("neighbour count {0} outside [0, 8]")]
    CountOutOfRange(u8),
}

const fn mask_of(counts: &[u8]) -> u16 {
    let mut mask = 0u16;
    let mut i = 0;
    while i < counts.len() {
        mask |= 1u16 << counts[i];
        i += 1;
    }
    mask
}

/// A Life-like transition rule. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    birth: u16,
    survival: u16,
}

impl Rule {
    /// Conway's Game of Life.
    pub const LIFE: Rule = Rule::from_counts_const(&[3], &[2, 3]);
    pub const HIGHLIFE: Rule = Rule::from_counts_const(&[3, 6], &[2, 3]);
    pub const DAY_AND_NIGHT: Rule = Rule::from_counts_const(&[3, 6, 7, 8], &[3, 4, 6, 7, 8]);
    /// Chaotic; nothing survives.
    pub const SEEDS: Rule = Rule::from_counts_const(&[2], &[]);
    pub const REPLICATOR: Rule = Rule::from_counts_const(&[1, 3, 5, 7], &[1, 3, 5, 7]);
    pub const MORLEY: Rule = Rule::from_counts_const(&[3, 6, 8], &[2, 4, 5]);
    pub const LIFE_WITHOUT_DEATH: Rule =
        Rule::from_counts_const(&[3], &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
    pub const DIAMOEBA: Rule = Rule::from_counts_const(&[3, 5, 6, 7, 8], &[5, 6, 7, 8]);
    pub const TWO_BY_TWO: Rule = Rule::from_counts_const(&[3, 6], &[1, 2, 5]);
    pub const MAZE: Rule = Rule::from_counts_const(&[3], &[1, 2, 3, 4, 5]);

    const fn from_counts_const(birth: &[u8], survival: &[u8]) -> Self {
        Self {
            birth: mask_of(birth),
            survival: mask_of(survival),
        }
    }

    /// Build a rule from explicit birth and survival masks.
    pub fn from_masks(birth_mask: u16, survival_mask: u16) -> Result<Self, RuleError> {
        for mask in [birth_mask, survival_mask] {
            if mask >= MASK_LIMIT {
                return Err(RuleError::MaskOutOfRange(mask));
            }
        }
        Ok(Self {
            birth: birth_mask,
            survival: survival_mask,
        })
    }

    /// Decode a packed rule id.
    pub fn from_id(id: u32) -> Result<Self, RuleError> {
        if id >= RULE_COUNT {
            return Err(RuleError::IdOutOfRange(id));
        }
        let limit = u32::from(MASK_LIMIT);
        Ok(Self {
            birth: (id / limit) as u16,
            survival: (id % limit) as u16,
        })
    }

    /// Build a rule from neighbour-count lists; duplicates are harmless.
    pub fn from_counts(birth: &[u8], survival: &[u8]) -> Result<Self, RuleError> {
        let to_mask = |counts: &[u8]| -> Result<u16, RuleError> {
            counts.iter().try_fold(0u16, |mask, &count| {
                if count > MAX_NEIGHBORS {
                    Err(RuleError::CountOutOfRange(count))
                } else {
                    Ok(mask | (1u16 << count))
                }
            })
        };
        Ok(Self {
            birth: to_mask(birth)?,
            survival: to_mask(survival)?,
        })
    }

    /// Decode `B{digits}/S{digits}` notation.
    ///
    /// Markers are case-insensitive and the slash is optional. Digits must be
    /// 0-8; anything else, including trailing text, is rejected.
    pub fn parse(notation: &str) -> Result<Self, RuleError> {
        let invalid = || RuleError::InvalidRuleNotation(notation.to_owned());
        let mut chars = notation.trim().chars().peekable();

        if !matches!(chars.next(), Some('B' | 'b')) {
            return Err(invalid());
        }
        let birth = read_counts(&mut chars).ok_or_else(invalid)?;
        if chars.peek() == Some(&'/') {
            chars.next();
        }
        if !matches!(chars.next(), Some('S' | 's')) {
            return Err(invalid());
        }
        let survival = read_counts(&mut chars).ok_or_else(invalid)?;
        if chars.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { birth, survival })
    }

    /// Resolve a canonical rule name (case-insensitive), falling back to notation.
    pub fn lookup(name_or_notation: &str) -> Result<Self, RuleError> {
        match known_rule(name_or_notation) {
            Some(rule) => Ok(rule),
            None => Self::parse(name_or_notation),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.birth as u32 * MASK_LIMIT as u32 + self.survival as u32
    }

    #[must_use]
    pub const fn birth_mask(&self) -> u16 {
        self.birth
    }

    #[must_use]
    pub const fn survival_mask(&self) -> u16 {
        self.survival
    }

    #[must_use]
    pub const fn to_masks(&self) -> (u16, u16) {
        (self.birth, self.survival)
    }

    #[inline]
    #[must_use]
    pub const fn should_birth(&self, neighbors: u8) -> bool {
        neighbors <= MAX_NEIGHBORS && self.birth & (1u16 << neighbors) != 0
    }

    #[inline]
    #[must_use]
    pub const fn should_survive(&self, neighbors: u8) -> bool {
        neighbors <= MAX_NEIGHBORS && self.survival & (1u16 << neighbors) != 0
    }

    /// Birth counts in ascending order.
    pub fn birth_counts(&self) -> impl Iterator<Item = u8> + '_ {
        counts_in(self.birth)
    }

    /// Survival counts in ascending order.
    pub fn survival_counts(&self) -> impl Iterator<Item = u8> + '_ {
        counts_in(self.survival)
    }
}

fn counts_in(mask: u16) -> impl Iterator<Item = u8> {
    (0..=MAX_NEIGHBORS).filter(move |&count| mask & (1u16 << count) != 0)
}

fn read_counts(chars: &mut Peekable<Chars<'_>>) -> Option<u16> {
    let mut mask = 0u16;
    while let Some(&ch) = chars.peek() {
        let Some(digit) = ch.to_digit(10) else {
            break;
        };
        if digit > u32::from(MAX_NEIGHBORS) {
            return None;
        }
        mask |= 1u16 << digit;
        chars.next();
    }
    Some(mask)
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("B")?;
        for count in self.birth_counts() {
            write!(f, "{count}")?;
        }
        f.write_str("/S")?;
        for count in self.survival_counts() {
            write!(f, "{count}")?;
        }
        Ok(())
    }
}

impl FromStr for Rule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rule::parse(s)
    }
}

/// A named entry in the canonical rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownRule {
    pub name: &'static str,
    pub rule: Rule,
}

/// Well-known rules addressable by name.
pub const KNOWN_RULES: &[KnownRule] = &[
    KnownRule { name: "life", rule: Rule::LIFE },
    KnownRule { name: "highlife", rule: Rule::HIGHLIFE },
    KnownRule { name: "daynight", rule: Rule::DAY_AND_NIGHT },
    KnownRule { name: "seeds", rule: Rule::SEEDS },
    KnownRule { name: "replicator", rule: Rule::REPLICATOR },
    KnownRule { name: "morley", rule: Rule::MORLEY },
    KnownRule { name: "lifewithoutdeath", rule: Rule::LIFE_WITHOUT_DEATH },
    KnownRule { name: "diamoeba", rule: Rule::DIAMOEBA },
    KnownRule { name: "twoxtwo", rule: Rule::TWO_BY_TWO },
    KnownRule { name: "maze", rule: Rule::MAZE },
];

/// Look up a canonical rule by name, ignoring case.
#[must_use]
pub fn known_rule(name: &str) -> Option<Rule> {
    let name = name.trim();
    KNOWN_RULES
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name))
        .map(|entry| entry.rule)
}

/// Render a rule id as canonical `B{digits}/S{digits}` notation.
pub fn rule_id_to_notation(id: u32) -> Result<String, RuleError> {
    Rule::from_id(id).map(|rule| rule.to_string())
}

/// Parse notation straight to its packed rule id.
pub fn notation_to_rule_id(notation: &str) -> Result<u32, RuleError> {
    Rule::parse(notation).map(|rule| rule.id())
}
