// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Classification of the packages installed on a system against a channel
//! baseline.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    fmt::{self, Display},
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{package::PackageRecord, versions::compare_versions};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DiffError {
    /// Happens with old up2date versions, the inventory can't be trusted
    #[error("package inventory is unreliable, '{package}' has an unknown architecture")]
    UnreliableInventory { package: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    /// No package with this name in the channel
    Missing,
    /// The channel has a newer version
    Older,
    /// Updated beyond the channel, out of band
    Newer,
    Same,
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Status::Missing => "missing",
                Status::Older => "older",
                Status::Newer => "newer",
                Status::Same => "same",
            }
        )
    }
}

/// Result of the comparison of one installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStatus {
    pub installed: PackageRecord,
    pub status: Status,
    /// The channel record it was compared with
    pub channel_latest: Option<PackageRecord>,
    /// Advisories providing the newest of both versions
    pub advisories: Vec<String>,
}

impl PackageStatus {
    /// The package whose advisories are relevant: the channel one when it is
    /// newer, the installed one otherwise.
    pub fn newest(&self) -> &PackageRecord {
        match (&self.status, &self.channel_latest) {
            (Status::Older, Some(c)) => c,
            _ => &self.installed,
        }
    }
}

/// Refuse inventories containing packages with an `unknown` architecture
pub fn check_inventory(installed: &[PackageRecord]) -> Result<(), DiffError> {
    match installed.iter().find(|p| p.has_unknown_arch()) {
        Some(p) => Err(DiffError::UnreliableInventory {
            package: p.to_string(),
        }),
        None => Ok(()),
    }
}

/// Channel records indexed by package name
struct ChannelIndex<'a> {
    by_name: HashMap<&'a str, Vec<&'a PackageRecord>>,
}

impl<'a> ChannelIndex<'a> {
    fn new(reduced: &'a [PackageRecord]) -> Self {
        let mut by_name: HashMap<&str, Vec<&PackageRecord>> = HashMap::new();
        for p in reduced {
            by_name.entry(p.name.as_str()).or_default().push(p);
        }
        Self { by_name }
    }

    /// Channel record to compare an installed package with
    ///
    /// The greatest record with the same name, whatever its architecture.
    /// The first one seen wins on ties.
    fn baseline(&self, installed: &PackageRecord) -> Option<&'a PackageRecord> {
        let matches = self.by_name.get(installed.name.as_str())?;
        if matches.len() > 1 {
            debug!(
                "Found {} channel packages for {}, using the latest one",
                matches.len(),
                installed.name
            );
        }
        matches.iter().copied().reduce(|latest, p| {
            if compare_versions(p, latest) == Ordering::Greater {
                p
            } else {
                latest
            }
        })
    }
}

/// Classify installed packages against a reduced channel package list
///
/// The output keeps the order of `installed`.
pub fn diff(
    installed: &[PackageRecord],
    reduced: &[PackageRecord],
) -> Result<Vec<PackageStatus>, DiffError> {
    check_inventory(installed)?;
    let index = ChannelIndex::new(reduced);

    Ok(installed
        .iter()
        .map(|p| {
            let channel_latest = index.baseline(p);
            let status = match channel_latest {
                None => {
                    info!("{} is not found in channel", p);
                    Status::Missing
                }
                Some(c) => match compare_versions(p, c) {
                    Ordering::Less => {
                        info!("{} is older than channel latest version {}", p, c);
                        Status::Older
                    }
                    Ordering::Greater => {
                        info!("{} is newer than channel latest version {}", p, c);
                        Status::Newer
                    }
                    Ordering::Equal => {
                        debug!("{} is the same as channel version {}", p, c);
                        Status::Same
                    }
                },
            };
            PackageStatus {
                installed: p.clone(),
                status,
                channel_latest: channel_latest.cloned(),
                advisories: vec![],
            }
        })
        .collect())
}

/// Packages differing from the channel baseline, by status
///
/// Can be merged across systems, each package label appears at most once per
/// bucket.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub missing: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub older: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub newer: BTreeSet<String>,
}

impl DiffResult {
    pub fn from_statuses(statuses: &[PackageStatus]) -> Self {
        let mut res = Self::default();
        for s in statuses {
            let label = s.installed.to_string();
            match s.status {
                Status::Missing => res.missing.insert(label),
                Status::Older => res.older.insert(label),
                Status::Newer => res.newer.insert(label),
                Status::Same => false,
            };
        }
        res
    }

    pub fn merge(&mut self, other: DiffResult) {
        self.missing.extend(other.missing);
        self.older.extend(other.older);
        self.newer.extend(other.newer);
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.older.is_empty() && self.newer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.missing.len() + self.older.len() + self.newer.len()
    }

    /// All entries, by status then label
    pub fn entries(&self) -> impl Iterator<Item = (Status, &str)> {
        self.missing
            .iter()
            .map(|p| (Status::Missing, p.as_str()))
            .chain(self.older.iter().map(|p| (Status::Older, p.as_str())))
            .chain(self.newer.iter().map(|p| (Status::Newer, p.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::reduce::reduce;

    fn pkg(name: &str, version: &str, release: &str, arch: &str) -> PackageRecord {
        PackageRecord::new(name, "", version, release, arch)
    }

    fn statuses(installed: &[PackageRecord], channel: &[PackageRecord]) -> Vec<Status> {
        diff(installed, &reduce(channel))
            .unwrap()
            .into_iter()
            .map(|s| s.status)
            .collect()
    }

    #[rstest]
    #[case("1.0", "1", Status::Same)]
    #[case("0.9", "1", Status::Older)]
    #[case("1.1", "1", Status::Newer)]
    #[case("1.0", "0.el5", Status::Older)]
    #[case("1.0~rc1", "1", Status::Older)]
    fn it_classifies_against_channel(
        #[case] version: &str,
        #[case] release: &str,
        #[case] expected: Status,
    ) {
        let channel = vec![pkg("foo", "1.0", "1", "x86_64")];
        let installed = vec![pkg("foo", version, release, "x86_64")];
        assert_eq!(statuses(&installed, &channel), vec![expected]);
    }

    #[test]
    fn it_reports_missing_packages() {
        let channel = vec![pkg("foo", "1.0", "1", "x86_64")];
        let installed = vec![pkg("bar", "2.0", "1", "x86_64")];
        let res = diff(&installed, &reduce(&channel)).unwrap();
        assert_eq!(res[0].status, Status::Missing);
        assert_eq!(res[0].channel_latest, None);
        let result = DiffResult::from_statuses(&res);
        assert_eq!(
            result.missing,
            BTreeSet::from(["bar-2.0-1.x86_64".to_string()])
        );
        assert!(result.older.is_empty());
        assert!(result.newer.is_empty());
    }

    #[test]
    fn it_fills_buckets() {
        let channel = vec![
            pkg("foo", "1.0", "1", "x86_64"),
            pkg("foo", "0.8", "1", "x86_64"),
            pkg("baz", "3.0", "1", "noarch"),
            pkg("qux", "1.0", "1", "x86_64"),
        ];
        let installed = vec![
            pkg("foo", "0.9", "1", "x86_64"),
            pkg("bar", "2.0", "1", "x86_64"),
            pkg("baz", "3.1", "1", "noarch"),
            pkg("qux", "1.0", "1", "AMD64"),
        ];
        let res = diff(&installed, &reduce(&channel)).unwrap();
        assert_eq!(
            res.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![Status::Older, Status::Missing, Status::Newer, Status::Same]
        );
        assert_eq!(
            res[0].channel_latest.as_ref().unwrap().to_string(),
            "foo-1.0-1.x86_64"
        );
        let result = DiffResult::from_statuses(&res);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "missing": ["bar-2.0-1.x86_64"],
                "older": ["foo-0.9-1.x86_64"],
                "newer": ["baz-3.1-1.noarch"],
            })
        );
    }

    #[test]
    fn it_rejects_unknown_arch() {
        let channel = vec![pkg("foo", "1.0", "1", "x86_64")];
        let installed = vec![
            pkg("foo", "0.9", "1", "x86_64"),
            pkg("bar", "1", "1", "UNKNOWN"),
        ];
        assert_eq!(
            diff(&installed, &reduce(&channel)),
            Err(DiffError::UnreliableInventory {
                package: "bar-1-1.UNKNOWN".to_string()
            })
        );
    }

    #[test]
    fn it_compares_with_latest_same_name_across_arches() {
        let channel = vec![
            pkg("glibc", "2.5", "42", "i686"),
            pkg("glibc", "2.5", "58", "x86_64"),
        ];
        let installed = vec![pkg("glibc", "2.5", "42", "i686")];
        let res = diff(&installed, &reduce(&channel)).unwrap();
        assert_eq!(res[0].status, Status::Older);
        assert_eq!(
            res[0].channel_latest.as_ref().unwrap().to_string(),
            "glibc-2.5-58.x86_64"
        );
    }

    #[test]
    fn it_keeps_first_seen_baseline_on_ties() {
        let channel = vec![
            pkg("tzdata", "2012b", "3.el5", "noarch").with_id(1),
            pkg("tzdata", "2012b", "3.el5", "x86_64").with_id(2),
        ];
        let installed = vec![pkg("tzdata", "2012b", "3.el5", "i386")];
        let res = diff(&installed, &reduce(&channel)).unwrap();
        assert_eq!(res[0].status, Status::Same);
        assert_eq!(res[0].channel_latest.as_ref().unwrap().id, Some(1));
    }

    #[test]
    fn it_falls_back_to_latest_same_name() {
        let channel = vec![
            pkg("glibc", "2.5", "42", "i686"),
            pkg("glibc", "2.5", "58", "x86_64"),
        ];
        let installed = vec![pkg("glibc", "2.5", "50", "i386")];
        let res = diff(&installed, &reduce(&channel)).unwrap();
        assert_eq!(res[0].status, Status::Older);
        assert_eq!(
            res[0].channel_latest.as_ref().unwrap().to_string(),
            "glibc-2.5-58.x86_64"
        );
    }

    #[test]
    fn it_merges_results() {
        let channel = reduce(&[pkg("foo", "1.0", "1", "x86_64")]);
        let mut acc = DiffResult::default();
        for installed in [
            vec![pkg("foo", "0.9", "1", "x86_64"), pkg("bar", "1", "1", "x86_64")],
            vec![pkg("foo", "0.9", "1", "x86_64")],
            vec![pkg("foo", "1.0", "1", "x86_64")],
        ] {
            acc.merge(DiffResult::from_statuses(&diff(&installed, &channel).unwrap()));
        }
        assert_eq!(acc.len(), 2);
        assert_eq!(
            acc.entries().collect::<Vec<_>>(),
            vec![
                (Status::Missing, "bar-1-1.x86_64"),
                (Status::Older, "foo-0.9-1.x86_64")
            ]
        );
    }

    #[test]
    fn it_picks_newest_for_advisories() {
        let channel = vec![pkg("foo", "1.0", "1", "x86_64").with_id(1)];
        let installed = vec![
            pkg("foo", "0.9", "1", "x86_64").with_id(2),
            pkg("foo", "1.1", "1", "i386").with_id(3),
        ];
        let res = diff(&installed, &channel).unwrap();
        assert_eq!(res[0].newest().id, Some(1));
        assert_eq!(res[1].newest().id, Some(3));
    }
}
