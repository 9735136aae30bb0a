// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! RPM label ordering
//!
//! Versions are compared the way `rpm` does it, segment by segment, so that the
//! channel baseline and the installed packages agree with what the package
//! manager on the managed systems would consider an update.

use core::fmt;
use std::{cmp::Ordering, fmt::Display};

use anyhow::{Result, bail};

use crate::package::PackageRecord;

/// Epoch, version and release of a package
///
/// Equality follows the ordering: `1.0` and `1.00` are the same version.
#[derive(Debug, Clone, Copy)]
pub struct Evr<'a> {
    pub epoch: &'a str,
    pub version: &'a str,
    pub release: &'a str,
}

impl<'a> Evr<'a> {
    /// The epoch is sometimes an empty string and sometimes a single space in
    /// server data, both mean "no epoch".
    pub fn new(epoch: &'a str, version: &'a str, release: &'a str) -> Self {
        Self {
            epoch: epoch.trim(),
            version,
            release,
        }
    }

    /// Parse a `[epoch:]version-release` label
    pub fn parse(raw: &'a str) -> Result<Self> {
        let Some((ev, release)) = raw.rsplit_once('-') else {
            bail!("Unparsable package label '{}', expected [epoch:]version-release", raw)
        };
        let (epoch, version) = ev.split_once(':').unwrap_or(("", ev));
        if version.is_empty() || release.is_empty() {
            bail!("Unparsable package label '{}', empty version or release", raw)
        }
        Ok(Self::new(epoch, version, release))
    }
}

impl Display for Evr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.epoch.is_empty() {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}", self.version, self.release)
    }
}

impl Ord for Evr<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        rpmvercmp(self.epoch, other.epoch)
            .then_with(|| rpmvercmp(self.version, other.version))
            .then_with(|| rpmvercmp(self.release, other.release))
    }
}

impl PartialOrd for Evr<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Evr<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Evr<'_> {}

/// Compare two records of the same package
///
/// Comparing packages with different names is meaningless and the architecture
/// is ignored.
pub fn compare_versions(a: &PackageRecord, b: &PackageRecord) -> Ordering {
    a.evr().cmp(&b.evr())
}

fn is_separator(c: u8) -> bool {
    !c.is_ascii_alphanumeric() && c != b'~' && c != b'^'
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|c| !is_separator(*c)).unwrap_or(s.len());
    &s[start..]
}

/// Split the leading run of digits (or letters) from the rest
fn split_run(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let end = s
        .iter()
        .position(|c| {
            if numeric {
                !c.is_ascii_digit()
            } else {
                !c.is_ascii_alphabetic()
            }
        })
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Numeric runs can be longer than any integer type, compare them as strings
fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = &a[a.iter().position(|c| *c != b'0').unwrap_or(a.len())..];
    let b = &b[b.iter().position(|c| *c != b'0').unwrap_or(b.len())..];
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare two version (or release) strings like `rpmvercmp`
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        one = skip_separators(one);
        two = skip_separators(two);

        // "~" sorts before anything, even the end of the string
        match (one.first(), two.first()) {
            (Some(b'~'), Some(b'~')) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (Some(b'~'), _) => return Ordering::Less,
            (_, Some(b'~')) => return Ordering::Greater,
            _ => (),
        }

        // "^" sorts after the end of the string but before any other segment
        match (one.first(), two.first()) {
            (Some(b'^'), Some(b'^')) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (Some(b'^'), None) => return Ordering::Greater,
            (None, Some(b'^')) => return Ordering::Less,
            (Some(b'^'), _) => return Ordering::Less,
            (_, Some(b'^')) => return Ordering::Greater,
            _ => (),
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg1, rest1) = split_run(one, numeric);
        let (seg2, rest2) = split_run(two, numeric);

        // Segments of different types, numbers are newer
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let res = if numeric {
            compare_numeric(seg1, seg2)
        } else {
            seg1.cmp(seg2)
        };
        if res != Ordering::Equal {
            return res;
        }
        one = rest1;
        two = rest2;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, _) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("1.0", "1.0", Ordering::Equal)]
    #[case("1.0", "2.0", Ordering::Less)]
    #[case("2.0.1", "2.0", Ordering::Greater)]
    #[case("1.0", "1.0.1", Ordering::Less)]
    #[case("2.0.1a", "2.0.1", Ordering::Greater)]
    #[case("5.5p1", "5.5p10", Ordering::Less)]
    #[case("10xyz", "10.1xyz", Ordering::Less)]
    #[case("xyz10.1", "xyz10", Ordering::Greater)]
    #[case("1.a", "1.1", Ordering::Less)]
    #[case("a", "1", Ordering::Less)]
    #[case("1.010", "1.10", Ordering::Equal)]
    #[case("1.0", "1.00", Ordering::Equal)]
    #[case("1_0", "1.0", Ordering::Equal)]
    #[case("fc4", "fc.4", Ordering::Equal)]
    #[case("1.0~rc1", "1.0", Ordering::Less)]
    #[case("1.0~rc1", "1.0~rc2", Ordering::Less)]
    #[case("1.0~rc1~git123", "1.0~rc1", Ordering::Less)]
    #[case("1.0^", "1.0", Ordering::Greater)]
    #[case("1.0^git1", "1.0.1", Ordering::Less)]
    #[case("1.0^git1", "1.0^git2", Ordering::Less)]
    #[case("1.0^git1~pre", "1.0^git1", Ordering::Less)]
    #[case("123456789012345678901234567890", "123456789012345678901234567891", Ordering::Less)]
    #[case("", "0", Ordering::Less)]
    #[case("+", "_", Ordering::Equal)]
    fn it_compares_like_rpm(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(rpmvercmp(a, b), expected, "rpmvercmp({a:?}, {b:?})");
        assert_eq!(rpmvercmp(b, a), expected.reverse(), "rpmvercmp({b:?}, {a:?})");
    }

    #[rstest]
    #[case("1:1.0-1", "2.0-1")]
    #[case("1.0-10", "1.0-9")]
    #[case("1.0.1-1", "1.0-99")]
    #[case("2:0.1-1", "1:9.9-9")]
    fn it_orders_labels(#[case] newer: &str, #[case] older: &str) {
        let newer = Evr::parse(newer).unwrap();
        let older = Evr::parse(older).unwrap();
        assert!(newer > older, "{newer} is not greater than {older}");
    }

    #[test]
    fn it_ignores_blank_epochs() {
        assert_eq!(Evr::new(" ", "1.0", "1"), Evr::new("", "1.0", "1"));
        assert_eq!(Evr::new(" ", "1.0", "1").to_string(), "1.0-1");
    }

    #[rstest]
    #[case("1.0-1", "", "1.0", "1")]
    #[case("3:1.0-1.el5", "3", "1.0", "1.el5")]
    #[case("1.0-beta-1", "", "1.0-beta", "1")]
    fn it_parses_labels(
        #[case] raw: &str,
        #[case] epoch: &str,
        #[case] version: &str,
        #[case] release: &str,
    ) {
        let evr = Evr::parse(raw).unwrap();
        assert_eq!(evr.epoch, epoch);
        assert_eq!(evr.version, version);
        assert_eq!(evr.release, release);
    }

    #[rstest]
    #[should_panic]
    #[case("1.0")]
    #[should_panic]
    #[case("1.0-")]
    fn it_rejects_bogus_labels(#[case] raw: &str) {
        let _ = Evr::parse(raw).unwrap();
    }

    #[test]
    fn it_compares_records() {
        let a = PackageRecord::new("foo", "", "1.0", "1", "x86_64");
        let b = PackageRecord::new("foo", " ", "1.0", "1", "i386");
        let c = PackageRecord::new("foo", "", "1.1", "1", "x86_64");
        assert_eq!(compare_versions(&a, &b), Ordering::Equal);
        assert_eq!(compare_versions(&a, &c), Ordering::Less);
        assert_eq!(compare_versions(&c, &b), Ordering::Greater);
    }
}
