// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency expressions.

A dependency field such as `Depends` holds comma separated expressions. Each
expression is a `|` separated list of alternatives, each alternative a package
name optionally followed by a parenthesized version constraint:
`libfoo (>= 2.0) | libfoo-compat`.
*/

use {
    crate::{
        error::{OfflineAptError, Result},
        package_version::{PackageVersion, VersionOperator},
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::fmt::{Display, Formatter},
};

/// Regular expression to parse a single dependency option.
///
/// Architecture qualifiers (`foo:any`), architecture restrictions (`[amd64]`) and
/// build profiles (`<!nocheck>`) are accepted and discarded.
static RE_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?P<name>[^\s:(\[<]+)
        (?::[^\s(]+)?
        \s*
        (?:\(\s*(?P<op>[^\s0-9)]+)\s*(?P<version>[^\s)]+)\s*\))?
        \s*
        (?:\[[^\]]*\])?
        \s*
        (?:<[^>]*>)*
        $
        ",
    )
    .unwrap()
});

/// A version requirement on a dependency.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionConstraint {
    pub operator: VersionOperator,
    pub version: PackageVersion,
}

impl VersionConstraint {
    /// Whether a version satisfies this constraint.
    pub fn accepts(&self, version: &PackageVersion) -> bool {
        version.satisfies_operator(self.operator, &self.version)
    }
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.operator, self.version)
    }
}

/// One alternative of a dependency expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DependencyOption {
    pub name: String,
    pub constraint: Option<VersionConstraint>,
}

impl DependencyOption {
    /// Parse a single alternative like `libc6 (>= 2.4)`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        let caps = RE_DEPENDENCY
            .captures(s)
            .ok_or_else(|| OfflineAptError::ControlParse(format!("bad dependency: {}", s)))?;

        let name = caps["name"].to_string();

        let constraint = match (caps.name("op"), caps.name("version")) {
            (Some(op), Some(version)) => Some(VersionConstraint {
                operator: VersionOperator::parse(op.as_str())?,
                version: PackageVersion::parse(version.as_str())?,
            }),
            _ => None,
        };

        Ok(Self { name, constraint })
    }

    /// Whether an available or installed version satisfies this option.
    ///
    /// An option without a constraint accepts any version.
    pub fn accepts(&self, version: Option<&PackageVersion>) -> bool {
        match (&self.constraint, version) {
            (None, _) => true,
            (Some(constraint), Some(version)) => constraint.accepts(version),
            (Some(_), None) => false,
        }
    }
}

impl Display for DependencyOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(constraint) = &self.constraint {
            write!(f, "{} {}", self.name, constraint)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// A dependency expression: alternatives tried left to right.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DependencyAlternatives(Vec<DependencyOption>);

impl DependencyAlternatives {
    /// Parse an expression like `libfoo (>= 2.0) | libfoo-compat`.
    pub fn parse(s: &str) -> Result<Self> {
        let options = s
            .split('|')
            .map(DependencyOption::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(options))
    }

    /// Iterate over alternatives in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &DependencyOption> {
        self.0.iter()
    }

    /// The first alternative, which is the one chosen when nothing is satisfied.
    pub fn first(&self) -> Option<&DependencyOption> {
        self.0.first()
    }
}

impl Display for DependencyAlternatives {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts = self.0.iter().map(|o| o.to_string()).collect::<Vec<_>>();
        write!(f, "{}", parts.join(" | "))
    }
}

/// Parse a whole dependency field into its comma separated expressions.
pub fn parse_dependency_list(s: &str) -> Result<Vec<DependencyAlternatives>> {
    s.split(',')
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(DependencyAlternatives::parse)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_options() -> Result<()> {
        let o = DependencyOption::parse("libc6")?;
        assert_eq!(o.name, "libc6");
        assert!(o.constraint.is_none());

        let o = DependencyOption::parse("libc6 (>= 2.4)")?;
        assert_eq!(o.name, "libc6");
        let c = o.constraint.as_ref().unwrap();
        assert_eq!(c.operator, VersionOperator::GreaterOrEqual);
        assert_eq!(c.version, PackageVersion::parse("2.4")?);
        assert_eq!(o.to_string(), "libc6 (>= 2.4)");

        let o = DependencyOption::parse("python3:any (<<3.12~)")?;
        assert_eq!(o.name, "python3");
        assert_eq!(
            o.constraint.unwrap().operator,
            VersionOperator::StrictlyLess
        );

        let o = DependencyOption::parse("foo [amd64 i386] <!nocheck>")?;
        assert_eq!(o.name, "foo");

        Ok(())
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            DependencyOption::parse("libc6 (> 2.4)"),
            Err(OfflineAptError::UnknownOperator(op)) if op == ">"
        ));
        assert!(matches!(
            DependencyOption::parse("libc6 (>= a.b)"),
            Err(OfflineAptError::MalformedVersion(_))
        ));
        assert!(matches!(
            DependencyOption::parse(""),
            Err(OfflineAptError::ControlParse(_))
        ));
    }

    #[test]
    fn alternatives() -> Result<()> {
        let deps = DependencyAlternatives::parse("libfoo (>= 2.0) | libfoo-compat")?;

        let names = deps.iter().map(|o| o.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["libfoo", "libfoo-compat"]);
        assert_eq!(deps.first().unwrap().name, "libfoo");
        assert_eq!(deps.to_string(), "libfoo (>= 2.0) | libfoo-compat");

        let first = deps.first().unwrap();
        assert!(first.accepts(Some(&PackageVersion::parse("2.1")?)));
        assert!(!first.accepts(Some(&PackageVersion::parse("1.9")?)));
        assert!(!first.accepts(None));
        assert!(deps.iter().nth(1).unwrap().accepts(None));

        Ok(())
    }

    #[test]
    fn dependency_list() -> Result<()> {
        let list = parse_dependency_list("libc6 (>= 2.4), zlib1g | zlib-ng, ")?;
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].iter().count(), 2);

        Ok(())
    }
}
