//! Semantic versions, as resolved from target binaries.
//!
//! Catalog and symbol-offset selection is keyed on versions detected at
//! runtime (node releases, OpenSSL releases, Go toolchains). Only the
//! `major.minor.patch` triple matters here; pre-release tags and build
//! metadata are ignored.

use std::fmt;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct SemVer {
    pub(crate) major: u32,
    pub(crate) minor: u32,
    pub(crate) patch: u32,
}

impl SemVer {
    pub(crate) const fn new(major: u32, minor: u32, patch: u32) -> SemVer {
        SemVer {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first version triple found in `input`. Accepts bare
    /// ("12.3.1") and prefixed ("v12.3.1", "go1.18.4", "OpenSSL 1.1.1k")
    /// forms; a missing patch component defaults to 0.
    pub(crate) fn parse(input: &str) -> Result<SemVer> {
        static VERSION_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").unwrap());

        let caps = VERSION_RE
            .captures(input)
            .ok_or_else(|| anyhow!("No version found in '{input}'"))?;

        Ok(SemVer {
            major: caps[1].parse()?,
            minor: caps[2].parse()?,
            patch: caps.get(3).map_or(Ok(0), |m| m.as_str().parse())?,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Floor lookup in a sorted (version, value) table: the entry with the
/// greatest version not exceeding `ver`, or None if `ver` predates them all.
pub(crate) fn floor_lookup<'a, T>(table: &'a [(SemVer, T)], ver: &SemVer) -> Option<&'a T> {
    debug_assert!(table.windows(2).all(|w| w[0].0 < w[1].0));
    table
        .iter()
        .rev()
        .find(|(entry_ver, _)| entry_ver <= ver)
        .map(|(_, val)| val)
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_case::test_case;

    #[test_case("12.3.1", SemVer::new(12, 3, 1); "bare")]
    #[test_case("v15.0.0\n", SemVer::new(15, 0, 0); "node style")]
    #[test_case("go1.18", SemVer::new(1, 18, 0); "go without patch")]
    #[test_case("OpenSSL 1.1.1k  25 Mar 2021", SemVer::new(1, 1, 1); "openssl banner")]
    fn parse_versions(input: &str, expected: SemVer) {
        assert_eq!(SemVer::parse(input).unwrap(), expected);
    }

    #[test]
    fn parse_rejects_versionless_input() {
        assert!(SemVer::parse("no digits here").is_err());
    }

    #[test]
    fn ordering() {
        assert!(SemVer::new(12, 16, 2) < SemVer::new(13, 0, 0));
        assert!(SemVer::new(1, 1, 0) < SemVer::new(1, 1, 1));
    }

    #[test]
    fn floor_semantics() {
        let table = [
            (SemVer::new(12, 3, 1), "v12"),
            (SemVer::new(15, 0, 0), "v15"),
        ];
        assert_eq!(floor_lookup(&table, &SemVer::new(12, 3, 1)), Some(&"v12"));
        assert_eq!(floor_lookup(&table, &SemVer::new(14, 5, 0)), Some(&"v12"));
        assert_eq!(floor_lookup(&table, &SemVer::new(16, 9, 0)), Some(&"v15"));
        assert_eq!(floor_lookup(&table, &SemVer::new(12, 0, 0)), None);
    }
}
