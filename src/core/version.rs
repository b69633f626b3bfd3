// Version and range checks used by specifier parsing and registry installs.
use std::fmt;

use semver::{Version, VersionReq};

use crate::core::error::{Error, ErrorKind};

/// An npm-style range: one or more `||` alternatives, each a `VersionReq`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn alternatives(&self) -> &[VersionReq] {
        &self.alternatives
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, req) in self.alternatives.iter().enumerate() {
            if index > 0 {
                f.write_str(" || ")?;
            }
            write!(f, "{req}")?;
        }
        Ok(())
    }
}

/// Parse an npm-style range.
///
/// A bare version pins exactly (`1.2.3` means `=1.2.3`), whitespace-separated comparators
/// are a conjunction, and `||` separates alternatives.
pub fn parse_constraint(input: &str) -> Result<Constraint, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(empty_range());
    }
    let alternatives = trimmed
        .split("||")
        .map(|part| parse_alternative(trimmed, part.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Constraint { alternatives })
}

fn parse_alternative(range: &str, part: &str) -> Result<VersionReq, Error> {
    if part.is_empty() {
        return Err(Error::new(ErrorKind::SpecifierParse)
            .with_message(format!("invalid version range `{range}`: empty alternative"))
            .with_hint("Write unions as `^1.0.0 || ^2.0.0`."));
    }
    if let Ok(exact) = Version::parse(part.trim_start_matches('v')) {
        return Ok(VersionReq {
            comparators: vec![semver::Comparator {
                op: semver::Op::Exact,
                major: exact.major,
                minor: Some(exact.minor),
                patch: Some(exact.patch),
                pre: exact.pre,
            }],
        });
    }
    let normalized = normalize_comparators(part);
    VersionReq::parse(&normalized).map_err(|err| {
        Error::new(ErrorKind::SpecifierParse)
            .with_message(format!("invalid version range `{range}`"))
            .with_source(err)
    })
}

fn empty_range() -> Error {
    Error::new(ErrorKind::SpecifierParse)
        .with_message("version range is empty")
        .with_hint("Use a range like ^1.2.0 or an exact version like 1.2.3.")
}

pub fn parse_version(input: &str) -> Result<Version, Error> {
    Version::parse(input.trim().trim_start_matches('v')).map_err(|err| {
        Error::new(ErrorKind::Manifest)
            .with_message(format!("invalid version `{input}`"))
            .with_source(err)
    })
}

pub fn is_valid(version: &str) -> bool {
    parse_version(version).is_ok()
}

pub fn satisfies(version: &str, constraint: &str) -> Result<bool, Error> {
    let version = parse_version(version)?;
    let req = parse_constraint(constraint)?;
    Ok(req.matches(&version))
}

// `>=1.0.0 <2.0.0` is npm's spelling of `>=1.0.0, <2.0.0`.
fn normalize_comparators(input: &str) -> String {
    if input.contains(',') {
        return input.to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    for token in input.split_whitespace() {
        match parts.last_mut() {
            Some(last) if is_bare_operator(last) => last.push_str(token),
            _ => parts.push(token.to_string()),
        }
    }
    parts.join(", ")
}

fn is_bare_operator(token: &str) -> bool {
    matches!(token, ">" | ">=" | "<" | "<=" | "=" | "~" | "^")
}

#[cfg(test)]
mod tests {
    use super::{is_valid, parse_constraint, satisfies};
    use crate::core::error::ErrorKind;

    #[test]
    fn bare_version_is_exact() {
        assert!(satisfies("1.2.3", "1.2.3").unwrap());
        assert!(!satisfies("1.2.4", "1.2.3").unwrap());
    }

    #[test]
    fn caret_and_tilde_ranges() {
        assert!(satisfies("1.9.0", "^1.2.0").unwrap());
        assert!(!satisfies("2.0.0", "^1.2.0").unwrap());
        assert!(satisfies("1.2.9", "~1.2.0").unwrap());
        assert!(!satisfies("1.3.0", "~1.2.0").unwrap());
    }

    #[test]
    fn whitespace_comparators_are_a_conjunction() {
        assert!(satisfies("1.5.0", ">=1.0.0 <2.0.0").unwrap());
        assert!(!satisfies("2.1.0", ">=1.0.0 <2.0.0").unwrap());
        assert!(satisfies("1.5.0", ">= 1.0.0 < 2.0.0").unwrap());
    }

    #[test]
    fn wildcards_are_accepted() {
        assert!(satisfies("1.4.2", "1.x").unwrap());
        assert!(satisfies("7.0.0", "*").unwrap());
    }

    #[test]
    fn malformed_ranges_are_parse_errors() {
        for bad in ["", "not-a-range", ">=>1", "^1.0.0 ||", "|| ^2.0.0", "^1 || nope"] {
            let err = parse_constraint(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SpecifierParse, "range {bad:?}");
        }
    }

    #[test]
    fn unions_match_any_alternative() {
        let range = parse_constraint("^1.0.0 || ^3.0.0").expect("union");
        assert_eq!(range.alternatives().len(), 2);
        assert!(satisfies("1.4.0", "^1.0.0 || ^3.0.0").unwrap());
        assert!(satisfies("3.0.1", "^1.0.0 || ^3.0.0").unwrap());
        assert!(!satisfies("2.0.0", "^1.0.0 || ^3.0.0").unwrap());
        assert!(satisfies("1.5.0", ">=1.0.0 <2.0.0 || 5.0.0").unwrap());
        assert!(satisfies("5.0.0", ">=1.0.0 <2.0.0 || 5.0.0").unwrap());
    }

    #[test]
    fn version_validity() {
        assert!(is_valid("0.0.0"));
        assert!(is_valid("v1.2.3"));
        assert!(!is_valid("1.2"));
    }
}
