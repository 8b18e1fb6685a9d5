//! Version ordering helpers shared by the resolver, the gate and the mutators.
//!
//! Strict semver strings are compared with the `semver` crate. Anything else
//! (`5.3.20.RELEASE`, `2.13.4.2`, `1.0-M1`) falls back to a numeric segment
//! comparison with a small qualifier ranking.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Strips range operators, quotes and a leading `v` from a declared version.
///
/// For compound ranges (`>=1.0.0 <2.0.0`) only the first bound is kept.
pub fn normalize(raw: &str) -> &str {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_start_matches(|c: char| matches!(c, '^' | '~' | '=' | '<' | '>' | ' '));
    let trimmed = trimmed
        .strip_prefix('v')
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(trimmed);
    trimmed.split_whitespace().next().unwrap_or("")
}

/// Returns `true` when the string starts like a version number.
pub fn looks_like_version(raw: &str) -> bool {
    normalize(raw).starts_with(|c: char| c.is_ascii_digit())
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (normalize(a), normalize(b));
    if let (Ok(left), Ok(right)) = (semver::Version::parse(a), semver::Version::parse(b)) {
        return left.cmp(&right);
    }
    let left = LooseVersion::parse(a);
    let right = LooseVersion::parse(b);
    left.cmp(&right)
}

/// `candidate >= required` under [`compare_versions`].
pub fn satisfies(candidate: &str, required: &str) -> bool {
    compare_versions(candidate, required) != Ordering::Less
}

pub fn max_version<'a>(a: &'a str, b: &'a str) -> &'a str {
    if compare_versions(a, b) == Ordering::Less {
        b
    } else {
        a
    }
}

pub fn major(version: &str) -> Option<u64> {
    LooseVersion::parse(normalize(version)).segments.first().copied()
}

pub fn major_minor(version: &str) -> Option<(u64, u64)> {
    let parsed = LooseVersion::parse(normalize(version));
    let major = *parsed.segments.first()?;
    Some((major, parsed.segments.get(1).copied().unwrap_or(0)))
}

#[derive(Debug, Clone)]
struct LooseVersion {
    segments: Vec<u64>,
    qualifier: String,
}

impl LooseVersion {
    fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = raw;
        loop {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                break;
            }
            match rest[..digits].parse::<u64>() {
                Ok(value) => segments.push(value),
                Err(_) => break,
            }
            rest = &rest[digits..];
            match rest.strip_prefix('.') {
                Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => rest = next,
                _ => break,
            }
        }
        let mut qualifier = rest
            .trim_start_matches(|c| c == '.' || c == '-' || c == '_' || c == '+')
            .to_ascii_lowercase();
        if matches!(qualifier.as_str(), "release" | "final" | "ga") {
            qualifier.clear();
        }
        Self {
            segments,
            qualifier,
        }
    }

    fn qualifier_rank(&self) -> u8 {
        let q = self.qualifier.as_str();
        if q.is_empty() {
            2
        } else if q.starts_with("sp") {
            3
        } else {
            1
        }
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for idx in 0..len {
            let left = self.segments.get(idx).copied().unwrap_or(0);
            let right = other.segments.get(idx).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.qualifier_rank()
            .cmp(&other.qualifier_rank())
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A `major.x` or `major.minor.x` compatibility range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    pub major: u64,
    pub minor: Option<u64>,
}

impl VersionRange {
    pub fn contains(&self, version: &str) -> bool {
        match major_minor(version) {
            Some((major, minor)) => {
                major == self.major && self.minor.map_or(true, |expected| expected == minor)
            }
            None => false,
        }
    }

    /// Deterministic in-range version used when no catalog is available.
    pub fn floor(&self) -> String {
        format!("{}.{}.0", self.major, self.minor.unwrap_or(0))
    }
}

impl FromStr for VersionRange {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        let parse = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| format!("invalid version range '{}'", raw))
        };
        match parts.as_slice() {
            [major, "x"] | [major] => Ok(Self {
                major: parse(major)?,
                minor: None,
            }),
            [major, minor, "x"] | [major, minor] => Ok(Self {
                major: parse(major)?,
                minor: Some(parse(minor)?),
            }),
            _ => Err(format!("invalid version range '{}'", raw)),
        }
    }
}

impl TryFrom<String> for VersionRange {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}.{}.x", self.major, minor),
            None => write!(f, "{}.x", self.major),
        }
    }
}
