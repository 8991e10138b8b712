//! Upgrade suggestions for container image tags.
//!
//! Registries mix semantic and arbitrary tags and attach flavor suffixes
//! (`-alpine`, `-bookworm`). A suggestion never crosses a suffix boundary,
//! never leaves the current major version and is never equal to or older
//! than the tag in use.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

pub static FLOATING_TAGS: [&str; 2] = ["latest", "stable"];
static DIGEST_PREFIX: &str = "sha256:";

static SEMVER_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?([0-9]+)(?:\.([0-9]+))?(?:\.([0-9]+))?$").expect("semver-like pattern is valid")
});

/// A non-negative decimal of any length. Leading zeros are ignored, so
/// `007` equals `7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionNumber(String);

static ZERO: VersionNumber = VersionNumber(String::new());

impl VersionNumber {
    /// `digits` must be ASCII digits.
    fn from_digits(digits: &str) -> Self {
        Self(digits.trim_start_matches('0').to_string())
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("0")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Parsed `v?MAJOR(.MINOR)?(.PATCH)?` tag base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVersion {
    pub major: VersionNumber,
    pub minor: Option<VersionNumber>,
    pub patch: Option<VersionNumber>,
    pub had_prefix: bool,
}

impl TagVersion {
    pub fn parse(base: &str) -> Option<Self> {
        let caps = SEMVER_LIKE.captures(base)?;
        let number = |i: usize| caps.get(i).map(|m| VersionNumber::from_digits(m.as_str()));

        Some(Self {
            major: number(1)?,
            minor: number(2),
            patch: number(3),
            had_prefix: base.starts_with('v'),
        })
    }

    /// Ranking key; absent components rank as 0.
    pub fn sort_key(&self) -> (&VersionNumber, &VersionNumber, &VersionNumber) {
        (
            &self.major,
            self.minor.as_ref().unwrap_or(&ZERO),
            self.patch.as_ref().unwrap_or(&ZERO),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCandidate<'a> {
    pub tag: &'a str,
    pub version: TagVersion,
}

/// Why no upgrade was suggested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoUpgradeReason {
    Floating(String),
    NotSemverLike,
    NoCandidates,
    NoneInMajor,
    AlreadyCurrent,
}

impl fmt::Display for NoUpgradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoUpgradeReason::Floating(tag) => write!(f, "'{}' is not a version tag", tag),
            NoUpgradeReason::NotSemverLike => {
                write!(f, "tag not semver-like; no safe upgrade suggestion")
            }
            NoUpgradeReason::NoCandidates => write!(f, "no semver-like candidate tags found"),
            NoUpgradeReason::NoneInMajor => write!(f, "no newer tag found in same major"),
            NoUpgradeReason::AlreadyCurrent => write!(f, "already at newest matching tag"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    Upgrade(String),
    NoUpgrade(NoUpgradeReason),
}

impl Suggestion {
    pub fn new_tag(&self) -> Option<&str> {
        match self {
            Suggestion::Upgrade(tag) => Some(tag),
            Suggestion::NoUpgrade(_) => None,
        }
    }

    pub fn note(&self) -> String {
        match self {
            Suggestion::Upgrade(_) => "newer version available".to_string(),
            Suggestion::NoUpgrade(reason) => reason.to_string(),
        }
    }
}

pub fn is_floating(tag: &str) -> bool {
    FLOATING_TAGS.contains(&tag)
}

/// Splits `2.7-alpine` into (`2.7`, Some(`alpine`)). Digests are never split.
pub fn split_suffix(tag: &str) -> (&str, Option<&str>) {
    if tag.starts_with(DIGEST_PREFIX) {
        return (tag, None);
    }
    match tag.split_once('-') {
        Some((base, suffix)) => (base, Some(suffix)),
        None => (tag, None),
    }
}

/// Picks the newest tag in `all_tags` that is a safe upgrade from `old_tag`.
///
/// When `old_tag` names a minor version, tags sharing that minor are
/// preferred and other minors of the same major are only considered when no
/// tag shares it. A preferred pool without anything newer therefore yields
/// [`NoUpgradeReason::AlreadyCurrent`] even if a higher minor exists.
pub fn choose_newer_tag<S: AsRef<str>>(old_tag: &str, all_tags: &[S]) -> Suggestion {
    if is_floating(old_tag) {
        return Suggestion::NoUpgrade(NoUpgradeReason::Floating(old_tag.to_string()));
    }

    let (old_base, old_suffix) = split_suffix(old_tag);
    let Some(old) = TagVersion::parse(old_base) else {
        return Suggestion::NoUpgrade(NoUpgradeReason::NotSemverLike);
    };

    let candidates: Vec<TagCandidate> = all_tags
        .iter()
        .map(|tag| tag.as_ref())
        .filter_map(|tag| {
            let (base, suffix) = split_suffix(tag);
            if suffix != old_suffix {
                return None;
            }
            TagVersion::parse(base).map(|version| TagCandidate { tag, version })
        })
        .collect();

    if candidates.is_empty() {
        return Suggestion::NoUpgrade(NoUpgradeReason::NoCandidates);
    }

    let (preferred, fallback): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .filter(|c| c.version.major == old.major)
        .partition(|c| old.minor.is_none() || c.version.minor == old.minor);

    let pool = if preferred.is_empty() {
        fallback
    } else {
        preferred
    };

    // max_by keeps the last of equal keys, so registry order breaks ties
    let Some(best) = pool
        .iter()
        .max_by(|a, b| a.version.sort_key().cmp(&b.version.sort_key()))
    else {
        return Suggestion::NoUpgrade(NoUpgradeReason::NoneInMajor);
    };

    match best.version.sort_key().cmp(&old.sort_key()) {
        Ordering::Greater => Suggestion::Upgrade(best.tag.to_string()),
        _ => Suggestion::NoUpgrade(NoUpgradeReason::AlreadyCurrent),
    }
}
