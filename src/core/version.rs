//! Strict three-component version tags.
//!
//! Only `MAJOR.MINOR.PATCH` made of ASCII digits is recognised. Pre-release
//! and build metadata (`1.2.3-rc1`, `v1.2.3`) are not versions here.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a tag is not a strict `N.N.N` version
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a MAJOR.MINOR.PATCH version: {0}")]
pub struct InvalidVersion(pub String);

/// A parsed `MAJOR.MINOR.PATCH` tag.
///
/// The original spelling is kept so `01.2.3` round-trips as written while
/// ordering as `1.2.3`. Components are held as digit strings without leading
/// zeros, so there is no upper bound on their size. Equality and ordering look
/// only at the numbers.
#[derive(Debug, Clone)]
pub struct SemVer {
    raw: String,
    parts: [String; 3],
}

impl SemVer {
    /// Parse a tag, returning `None` when it does not match `^\d+\.\d+\.\d+$`
    pub fn parse(tag: &str) -> Option<Self> {
        tag.parse().ok()
    }

    /// Numeric components as canonical digit strings (`01.2.3` -> `["1", "2", "3"]`)
    pub fn components(&self) -> [&str; 3] {
        [&self.parts[0], &self.parts[1], &self.parts[2]]
    }

    /// The tag exactly as it appeared in the registry
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}

/// Canonical digit string of one component, `None` if it is not all ASCII digits
fn parse_component(s: &str) -> Option<String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        Some("0".to_string())
    } else {
        Some(trimmed.to_string())
    }
}

/// Numeric order of two canonical digit strings
fn cmp_component(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl FromStr for SemVer {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('.');
        let parsed = match (split.next(), split.next(), split.next(), split.next()) {
            (Some(a), Some(b), Some(c), None) => {
                match (parse_component(a), parse_component(b), parse_component(c)) {
                    (Some(a), Some(b), Some(c)) => Some([a, b, c]),
                    _ => None,
                }
            }
            _ => None,
        };

        parsed
            .map(|parts| Self {
                raw: s.to_string(),
                parts,
            })
            .ok_or_else(|| InvalidVersion(s.to_string()))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for SemVer {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for SemVer {}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts
            .iter()
            .zip(other.parts.iter())
            .map(|(a, b)| cmp_component(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// Pick the highest strict version out of a list of registry tags.
///
/// Non-matching tags are ignored. Among numerically equal tags the one that
/// appears last in the input wins.
pub fn latest_tag<I, S>(tags: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut versions: Vec<SemVer> = tags
        .into_iter()
        .filter_map(|t| SemVer::parse(t.as_ref()))
        .collect();

    // Stable sort, so the last of several equal versions is returned
    versions.sort();
    versions.pop().map(SemVer::into_string)
}

/// Bare repository name of an image (`harness/ci-addon` -> `ci-addon`)
pub fn repository_name(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}

/// Tag portion of an image reference (`harness/ci-addon:1.16.4` -> `1.16.4`)
pub fn reference_tag(reference: &str) -> Option<&str> {
    reference.rsplit_once(':').map(|(_, tag)| tag)
}

/// Repository portion of an image reference (everything before the last `:`)
pub fn reference_repository(reference: &str) -> &str {
    reference
        .rsplit_once(':')
        .map(|(repo, _)| repo)
        .unwrap_or(reference)
}
