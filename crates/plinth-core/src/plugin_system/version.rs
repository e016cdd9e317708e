use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use semver::{Version, VersionReq};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Error type for version parsing
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("Invalid version '{input}': {message}")]
    InvalidVersion { input: String, message: String },
    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },
}

/// Parses a version string into a `semver::Version`.
///
/// Accepts an optional leading `v` (e.g. `v1.2.3`). Pre-release and build
/// metadata follow the usual `MAJOR.MINOR.PATCH[-pre][+build]` grammar.
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    let trimmed = input.trim();
    let bare = strip_v_prefix(trimmed);
    Version::parse(bare).map_err(|e| VersionError::InvalidVersion {
        input: input.to_string(),
        message: e.to_string(),
    })
}

/// Compares two version strings.
///
/// Ordering follows semver rules: the numeric triple is compared first, a
/// pre-release sorts below the same bare triple, and build metadata never
/// affects the result.
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering, VersionError> {
    // cmp_precedence, not cmp: the derived ordering would use build
    // metadata as a tiebreaker.
    Ok(parse_version(a)?.cmp_precedence(&parse_version(b)?))
}

/// Checks whether a version string satisfies a range constraint string.
pub fn satisfies(version: &str, range: &str) -> Result<bool, VersionError> {
    let parsed = parse_version(version)?;
    Ok(VersionRange::from_constraint(range)?.includes(&parsed))
}

fn strip_v_prefix(s: &str) -> &str {
    match s.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => s,
    }
}

/// Classification of how one version relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityLevel {
    /// The versions are identical.
    FullyCompatible,
    /// Same major version, target is equal or newer.
    BackwardCompatible,
    /// The major version increased.
    BreakingChanges,
    /// The target is a downgrade.
    Incompatible,
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompatibilityLevel::FullyCompatible => "fully-compatible",
            CompatibilityLevel::BackwardCompatible => "backward-compatible",
            CompatibilityLevel::BreakingChanges => "breaking-changes",
            CompatibilityLevel::Incompatible => "incompatible",
        };
        write!(f, "{}", s)
    }
}

/// Classifies the compatibility level when moving from `from` to `to`.
pub fn compatibility_level(from: &Version, to: &Version) -> CompatibilityLevel {
    // cmp_precedence, as in compare_versions: build metadata never
    // affects the classification.
    match to.cmp_precedence(from) {
        Ordering::Equal => CompatibilityLevel::FullyCompatible,
        Ordering::Less => CompatibilityLevel::Incompatible,
        Ordering::Greater if to.major > from.major => CompatibilityLevel::BreakingChanges,
        Ordering::Greater => CompatibilityLevel::BackwardCompatible,
    }
}

/// Picks the highest version from `available` that satisfies every constraint.
///
/// Unparsable candidates are skipped. Returns `None` when no candidate
/// satisfies all constraints.
pub fn find_best_version(available: &[String], constraints: &[VersionRange]) -> Option<Version> {
    let mut candidates: Vec<Version> = available
        .iter()
        .filter_map(|s| parse_version(s).ok())
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .rev()
        .find(|v| constraints.iter().all(|c| c.includes(v)))
}

/// Represents a version requirement range using semver constraints.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0")
    constraint: String,
    /// The parsed semver requirement
    req: VersionReq,
}

impl VersionRange {
    /// Creates a new version range from a constraint string.
    ///
    /// Beyond what `semver::VersionReq` parses natively (exact, caret, tilde,
    /// comparison operators, `*`), this accepts hyphen ranges
    /// (`"1.2.0 - 2.0.0"`, inclusive on both ends), `latest`, and a leading
    /// `v` on concrete versions.
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let normalized = normalize_constraint(constraint);
        let req = VersionReq::parse(&normalized).map_err(|e| VersionError::InvalidConstraint {
            constraint: constraint.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            constraint: constraint.to_string(),
            req,
        })
    }

    /// Checks if a specific `semver::Version` satisfies this range.
    pub fn includes(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    /// Returns a reference to the underlying `semver::VersionReq`.
    pub fn semver_req(&self) -> &VersionReq {
        &self.req
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

fn normalize_constraint(raw: &str) -> String {
    let c = raw.trim();
    if c.is_empty() || c == "latest" {
        return "*".to_string();
    }
    // Inclusive hyphen range. The surrounding spaces distinguish it from a
    // pre-release hyphen (`1.0.0-alpha`).
    if let Some((lo, hi)) = c.split_once(" - ") {
        return format!(
            ">={}, <={}",
            strip_v_prefix(lo.trim()),
            strip_v_prefix(hi.trim())
        );
    }
    strip_v_prefix(c).to_string()
}

/// Implement Display to show the original constraint string.
impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

/// Allow parsing directly from a string slice.
impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}

/// Serialized as the original constraint string.
impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.constraint)
    }
}
