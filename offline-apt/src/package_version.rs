// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling. */

use {
    crate::error::OfflineAptError,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    strum_macros::{AsRefStr, Display as StrumDisplay, EnumString},
    thiserror::Error,
};

static VALID_EPOCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static VALID_UPSTREAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9][A-Za-z0-9+:.~-]*$").unwrap());
static VALID_REVISION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9+.~]+$").unwrap());

/// Sort order of characters in the non-digit runs of a version component.
///
/// `~` is special cased in [char_order] so it sorts before the end of a string.
const CHARACTER_ORDER: &str = "~ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz+-.:";

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("version string cannot be empty")]
    Empty,

    #[error("the epoch component is empty: {0}")]
    EpochEmpty(String),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component is empty: {0}")]
    UpstreamVersionEmpty(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component is empty: {0}")]
    DebianRevisionEmpty(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A version relationship operator as used in dependency expressions.
#[derive(AsRefStr, Clone, Copy, Debug, EnumString, Eq, Hash, PartialEq, StrumDisplay)]
pub enum VersionOperator {
    #[strum(serialize = "<<")]
    StrictlyLess,
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = "=")]
    Exactly,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
    #[strum(serialize = ">>")]
    StrictlyGreater,
}

impl VersionOperator {
    /// Parse an operator token, failing with [OfflineAptError::UnknownOperator].
    pub fn parse(s: &str) -> std::result::Result<Self, OfflineAptError> {
        Self::from_str(s).map_err(|_| OfflineAptError::UnknownOperator(s.to_string()))
    }

    /// Whether an [Ordering] of `lhs.cmp(rhs)` satisfies this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::StrictlyLess => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Exactly => ordering == Ordering::Equal,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::StrictlyGreater => ordering == Ordering::Greater,
        }
    }
}

/// A Debian package version.
///
/// The concise version is the format is `[epoch:]upstream_version[-debian_revision]`
/// and each component has rules about what characters are allowed.
///
/// Equality is defined by the Debian ordering rules, so `1.0` and `0:1.0` are equal
/// even though they format differently.
#[derive(Clone, Debug)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        // Epoch is the part before the first colon. The revision is whatever follows
        // the last hyphen of the remainder.
        let (epoch, remainder) = if let Some(pos) = s.find(':') {
            (Some(&s[0..pos]), &s[pos + 1..])
        } else {
            (None, s)
        };

        let (upstream, debian) = if let Some(pos) = remainder.rfind('-') {
            (&remainder[0..pos], Some(&remainder[pos + 1..]))
        } else {
            (remainder, None)
        };

        let epoch = if let Some(epoch) = epoch {
            if epoch.is_empty() {
                return Err(VersionError::EpochEmpty(s.to_string()));
            }
            if !VALID_EPOCH.is_match(epoch) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        let debian_revision = if let Some(debian) = debian {
            if debian.is_empty() {
                return Err(VersionError::DebianRevisionEmpty(s.to_string()));
            }
            if !VALID_REVISION.is_match(debian) {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }

            Some(debian.to_string())
        } else {
            None
        };

        if upstream.is_empty() {
            return Err(VersionError::UpstreamVersionEmpty(s.to_string()));
        }
        if !VALID_UPSTREAM.is_match(upstream) {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The `epoch` component of the version string.
    ///
    /// Only `Some` if present or defined explicitly.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Assumed value of `epoch` component.
    ///
    /// If the component isn't explicitly defined, a default of `0` will be assumed.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// `upstream` component of the version string.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// `debian_revision` component of the version string.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }

    /// Whether this is a native version (one without a Debian revision).
    pub fn is_native(&self) -> bool {
        self.debian_revision.is_none()
    }

    /// The version string without its epoch.
    pub fn without_epoch(&self) -> String {
        match &self.debian_revision {
            Some(revision) => format!("{}-{}", self.upstream_version, revision),
            None => self.upstream_version.clone(),
        }
    }

    /// Whether this version satisfies `<op> <version>`, with both given as strings.
    ///
    /// Fails if the operator is unknown or `other` isn't a valid version.
    pub fn satisfies(&self, op: &str, other: &str) -> std::result::Result<bool, OfflineAptError> {
        let op = VersionOperator::parse(op)?;
        let other = Self::parse(other)?;

        Ok(self.satisfies_operator(op, &other))
    }

    /// Whether this version satisfies a parsed operator and version.
    pub fn satisfies_operator(&self, op: VersionOperator, other: &Self) -> bool {
        op.accepts(self.cmp(other))
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // [epoch:]upstream_version[-debian_revision]
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.without_epoch())
    }
}

/// Ordinal of the character at `idx`.
///
/// The end of the string sorts after `~` and before everything else.
fn char_order(chars: &[char], idx: usize) -> i64 {
    match chars.get(idx) {
        None => 0,
        Some('~') => -1,
        Some(c) => match CHARACTER_ORDER.find(*c) {
            Some(pos) => pos as i64,
            // Not reachable for validated versions. Keep a stable order anyway.
            None => CHARACTER_ORDER.len() as i64 + *c as i64,
        },
    }
}

fn lexical_compare(a: &str, b: &str) -> Ordering {
    let a_chars = a.chars().collect::<Vec<_>>();
    let b_chars = b.chars().collect::<Vec<_>>();

    for idx in 0..std::cmp::max(a_chars.len(), b_chars.len()) {
        match char_order(&a_chars, idx).cmp(&char_order(&b_chars, idx)) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }
    }

    Ordering::Equal
}

/// Compare runs of ASCII digits as unbounded integers.
fn numeric_compare(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Split a string at the first character matching `predicate`.
fn split_at_first(s: &str, predicate: impl Fn(char) -> bool) -> (&str, &str) {
    match s.find(predicate) {
        Some(pos) => (&s[0..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Compare a version component string using Debian rules.
fn compare_component(a: &str, b: &str) -> Ordering {
    // Alternate between the leading non-digit run, compared lexically, and the
    // leading digit run, compared numerically, until both inputs are exhausted.
    let mut a_remaining = a;
    let mut b_remaining = b;

    while !a_remaining.is_empty() || !b_remaining.is_empty() {
        let (a_lexical, a_rest) = split_at_first(a_remaining, |c| c.is_ascii_digit());
        let (b_lexical, b_rest) = split_at_first(b_remaining, |c| c.is_ascii_digit());

        match lexical_compare(a_lexical, b_lexical) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        let (a_digits, a_rest) = split_at_first(a_rest, |c| !c.is_ascii_digit());
        let (b_digits, b_rest) = split_at_first(b_rest, |c| !c.is_ascii_digit());

        match numeric_compare(a_digits, b_digits) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        a_remaining = a_rest;
        b_remaining = b_rest;
    }

    Ordering::Equal
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epoch is compared numerically. Then upstream and debian components are compared
        // using a custom algorithm. A missing debian revision compares as an empty string.
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or(""),
                    other.debian_revision.as_deref().unwrap_or(""),
                )
            })
    }
}
