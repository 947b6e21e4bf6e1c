// src/version/mod.rs

//! Version ordering and constraint satisfaction for recipes
//!
//! Upstream version strings are not semver: they look like `0.29.3`,
//! `1.0rc2`, `2023-04-01` or `0.578`. A [`Version`] splits the string into
//! numeric and alphabetic tokens and compares them pairwise, padding the
//! shorter side with zeros. Pre-release markers (`alpha`, `beta`, `pre`,
//! `rc`) sort before any number, other letters sort after.
//!
//! A recipe revision (a rebuild of the same upstream version) lives in
//! [`PkgVersion`], not in [`Version`], so identical version strings always
//! compare equal regardless of revision.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single comparable piece of a version string
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// `alpha`/`a`, `beta`/`b`, `pre`, `dev`, `rc` (rank, lowercased text)
    Pre(u8, String),
    Num(u64),
    /// Any other alphabetic run, e.g. the `p` in `9.3p1`
    Post(String),
}

impl Token {
    fn classify(word: &str) -> Self {
        let lower = word.to_ascii_lowercase();
        let rank = match lower.as_str() {
            "alpha" | "a" => Some(0),
            "beta" | "b" => Some(1),
            "pre" | "dev" => Some(2),
            "rc" => Some(3),
            _ => None,
        };
        match rank {
            Some(r) => Token::Pre(r, lower),
            None => Token::Post(lower),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Token::Pre(..) => 0,
            Token::Num(_) => 1,
            Token::Post(_) => 2,
        }
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Num(a), Token::Num(b)) => a.cmp(b),
            (Token::Pre(ra, a), Token::Pre(rb, b)) => ra.cmp(rb).then_with(|| a.cmp(b)),
            (Token::Post(a), Token::Post(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An upstream version with a total order
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

impl Version {
    /// Parse a version string
    ///
    /// Separators (`.`, `-`, `_`, `+`, `~`) delimit tokens, and so does every
    /// digit/letter boundary: `1.0rc2` is `[1, 0, rc, 2]`.
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::ParseError("Empty version string".to_string()));
        }

        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut current_is_digit = false;

        let flush = |current: &mut String, is_digit: bool, tokens: &mut Vec<Token>| -> Result<()> {
            if current.is_empty() {
                return Ok(());
            }
            let token = if is_digit {
                Token::Num(current.parse::<u64>().map_err(|e| {
                    Error::ParseError(format!("Version component '{}' out of range: {}", current, e))
                })?)
            } else {
                Token::classify(current)
            };
            tokens.push(token);
            current.clear();
            Ok(())
        };

        for c in raw.chars() {
            if matches!(c, '.' | '-' | '_' | '+' | '~') {
                flush(&mut current, current_is_digit, &mut tokens)?;
                continue;
            }
            if !c.is_ascii_alphanumeric() {
                return Err(Error::ParseError(format!(
                    "Invalid character '{}' in version '{}'",
                    c, raw
                )));
            }
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != current_is_digit {
                flush(&mut current, current_is_digit, &mut tokens)?;
            }
            current_is_digit = is_digit;
            current.push(c);
        }
        flush(&mut current, current_is_digit, &mut tokens)?;

        if tokens.is_empty() {
            return Err(Error::ParseError(format!("Version '{}' has no components", raw)));
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    /// The version string as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Tokens with trailing zeros removed, so `1.0` and `1.0.0` agree
    fn significant(&self) -> &[Token] {
        let mut end = self.tokens.len();
        while end > 0 && self.tokens[end - 1] == Token::Num(0) {
            end -= 1;
        }
        &self.tokens[..end]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.raw == other.raw {
            return Ordering::Equal;
        }
        let zero = Token::Num(0);
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            let a = self.tokens.get(i).unwrap_or(&zero);
            let b = other.tokens.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for token in self.significant() {
            match token {
                Token::Pre(rank, s) => (0u8, *rank, s).hash(state),
                Token::Num(n) => (1u8, n).hash(state),
                Token::Post(s) => (2u8, s).hash(state),
            }
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A recipe version plus its revision, displayed as `0.29.3_4`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PkgVersion {
    pub version: Version,
    pub revision: u32,
}

impl PkgVersion {
    pub fn new(version: Version, revision: u32) -> Self {
        Self { version, revision }
    }

    /// Parse `version[_revision]`
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((head, tail)) = s.rsplit_once('_')
            && !tail.is_empty()
            && tail.chars().all(|c| c.is_ascii_digit())
        {
            let revision = tail
                .parse::<u32>()
                .map_err(|e| Error::ParseError(format!("Invalid revision in '{}': {}", s, e)))?;
            return Ok(Self::new(Version::parse(head)?, revision));
        }
        Ok(Self::new(Version::parse(s)?, 0))
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)?;
        if self.revision > 0 {
            write!(f, "_{}", self.revision)?;
        }
        Ok(())
    }
}

impl Serialize for PkgVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Any version is acceptable
    #[default]
    Any,
    Exact(Version),
    GreaterThan(Version),
    GreaterOrEqual(Version),
    LessThan(Version),
    LessOrEqual(Version),
    NotEqual(Version),
    /// Both constraints must be satisfied (for ranges like ">= 1.0, < 2.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

/// One end of an interval: (version, inclusive)
type Bound = Option<(Version, bool)>;

/// The set of versions a constraint admits, as an interval plus exclusions
#[derive(Debug, Clone)]
struct Interval {
    lower: Bound,
    upper: Bound,
    excluded: Vec<Version>,
}

impl Interval {
    fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            excluded: Vec::new(),
        }
    }

    fn intersect(mut self, other: Interval) -> Self {
        self.lower = match (self.lower, other.lower) {
            (None, b) | (b, None) => b,
            (Some((a, ai)), Some((b, bi))) => match a.cmp(&b) {
                Ordering::Greater => Some((a, ai)),
                Ordering::Less => Some((b, bi)),
                Ordering::Equal => Some((a, ai && bi)),
            },
        };
        self.upper = match (self.upper, other.upper) {
            (None, b) | (b, None) => b,
            (Some((a, ai)), Some((b, bi))) => match a.cmp(&b) {
                Ordering::Less => Some((a, ai)),
                Ordering::Greater => Some((b, bi)),
                Ordering::Equal => Some((a, ai && bi)),
            },
        };
        self.excluded.extend(other.excluded);
        self
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some((lo, lo_inc)), Some((hi, hi_inc))) => match lo.cmp(hi) {
                Ordering::Greater => true,
                // A single point: empty unless both ends include it and it is not excluded
                Ordering::Equal => !(*lo_inc && *hi_inc) || self.excluded.contains(lo),
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">= 1.2.3" → GreaterOrEqual(1.2.3)
    /// - "< 2.0" → LessThan(2.0)
    /// - "1.5" → Exact(1.5)
    /// - ">= 1.0, < 2.0" → And(..)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if let Some((first, rest)) = s.split_once(',') {
            let left = Self::parse(first)?;
            let right = Self::parse(rest)?;
            return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("==") {
            Ok(VersionConstraint::Exact(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(Version::parse(rest)?))
        } else {
            Ok(VersionConstraint::Exact(Version::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }

    fn interval(&self) -> Interval {
        let mut iv = Interval::unbounded();
        match self {
            VersionConstraint::Any => {}
            VersionConstraint::Exact(v) => {
                iv.lower = Some((v.clone(), true));
                iv.upper = Some((v.clone(), true));
            }
            VersionConstraint::GreaterThan(v) => iv.lower = Some((v.clone(), false)),
            VersionConstraint::GreaterOrEqual(v) => iv.lower = Some((v.clone(), true)),
            VersionConstraint::LessThan(v) => iv.upper = Some((v.clone(), false)),
            VersionConstraint::LessOrEqual(v) => iv.upper = Some((v.clone(), true)),
            VersionConstraint::NotEqual(v) => iv.excluded.push(v.clone()),
            VersionConstraint::And(left, right) => return left.interval().intersect(right.interval()),
        }
        iv
    }

    /// Check if two constraints can be satisfied by a single version
    pub fn is_compatible_with(&self, other: &VersionConstraint) -> bool {
        !self.interval().intersect(other.interval()).is_empty()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionConstraint::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_numeric_order() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("0.578") > v("0.577"));
        assert!(v("2023.04.01") > v("2022.12.31"));
    }

    #[test]
    fn test_version_trailing_zero_equal() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("0.29.3"), v("0.29.3"));
    }

    #[test]
    fn test_version_prerelease_sorts_first() {
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0-beta2") < v("1.0-rc1"));
        assert!(v("1.0alpha") < v("1.0beta"));
        assert!(v("1.0a") < v("1.0"));
    }

    #[test]
    fn test_version_post_letter_sorts_after() {
        assert!(v("1.1.1k") > v("1.1.1"));
        assert!(v("1.1.1k") > v("1.1.1j"));
        assert!(v("9.3p1") > v("9.3"));
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.0/2").is_err());
        assert!(Version::parse("...").is_err());
    }

    #[test]
    fn test_version_display_preserves_input() {
        assert_eq!(v("1.0rc2").to_string(), "1.0rc2");
    }

    #[test]
    fn test_pkg_version_revision() {
        let a = PkgVersion::parse("0.29.3_4").unwrap();
        assert_eq!(a.version, v("0.29.3"));
        assert_eq!(a.revision, 4);
        assert_eq!(a.to_string(), "0.29.3_4");

        let b = PkgVersion::parse("0.29.3").unwrap();
        assert_eq!(b.revision, 0);
        assert!(b < a);
        // Identical versions compare equal regardless of revision
        assert_eq!(a.version, b.version);
    }

    #[test]
    fn test_constraint_parse_and_satisfy() {
        let c = VersionConstraint::parse(">= 1.0, < 2.0").unwrap();
        assert!(c.satisfies(&v("1.5")));
        assert!(!c.satisfies(&v("2.0")));
        assert!(!c.satisfies(&v("0.9")));
        assert_eq!(c.to_string(), ">= 1.0, < 2.0");
    }

    #[test]
    fn test_constraint_any() {
        let c = VersionConstraint::parse("*").unwrap();
        assert!(c.satisfies(&v("99.99")));
        assert_eq!(VersionConstraint::default(), VersionConstraint::Any);
    }

    #[test]
    fn test_constraint_compatibility() {
        let ge2 = VersionConstraint::parse(">= 2.0").unwrap();
        let lt2 = VersionConstraint::parse("< 2.0").unwrap();
        let le2 = VersionConstraint::parse("<= 2.0").unwrap();
        let exact3 = VersionConstraint::parse("3.0").unwrap();
        let ne2 = VersionConstraint::parse("!= 2.0").unwrap();

        assert!(!ge2.is_compatible_with(&lt2));
        assert!(ge2.is_compatible_with(&le2));
        assert!(ge2.is_compatible_with(&exact3));
        assert!(!exact3.is_compatible_with(&le2));
        assert!(ge2.is_compatible_with(&ne2));

        let point = VersionConstraint::And(Box::new(ge2.clone()), Box::new(le2.clone()));
        assert!(!point.is_compatible_with(&ne2));
    }
}
