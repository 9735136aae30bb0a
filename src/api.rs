// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Calls to the management server used by the reports
//!
//! Responses are validated here and turned into typed records.

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::package::PackageRecord;

/// A registered system
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SystemRecord {
    pub id: i64,
    pub name: String,
    /// ISO 8601 timestamp, sortable as a string
    #[serde(default)]
    pub last_checkin: Option<String>,
}

/// An advisory (erratum)
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "RawErratum")]
pub struct Erratum {
    pub advisory: String,
    pub synopsis: String,
    pub issue_date: String,
    pub last_modified_date: String,
}

/// Older servers use the short field names, newer ones the `advisory_`
/// prefixed ones, some send both.
#[derive(Deserialize)]
struct RawErratum {
    #[serde(default)]
    advisory: Option<String>,
    #[serde(default)]
    advisory_name: Option<String>,
    #[serde(default)]
    synopsis: Option<String>,
    #[serde(default)]
    advisory_synopsis: Option<String>,
    #[serde(default)]
    issue_date: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    last_modified_date: Option<String>,
    #[serde(default)]
    update_date: Option<String>,
}

impl From<RawErratum> for Erratum {
    fn from(r: RawErratum) -> Self {
        Self {
            advisory: r.advisory.or(r.advisory_name).unwrap_or_default(),
            synopsis: r.synopsis.or(r.advisory_synopsis).unwrap_or_default(),
            issue_date: r.issue_date.or(r.date).unwrap_or_default(),
            last_modified_date: r.last_modified_date.or(r.update_date).unwrap_or_default(),
        }
    }
}

/// Decode a list of records, skipping invalid entries
pub fn decode_list<T: serde::de::DeserializeOwned>(
    kind: &str,
    values: Vec<serde_json::Value>,
) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry.clone()) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Could not parse {} entry '{}': {:?}", kind, entry, e);
                None
            }
        })
        .collect()
}

/// Capabilities of the management server
///
/// Every call is a blocking round trip, errors abort the run.
pub trait Satellite {
    fn system(&self, id: i64) -> Result<SystemRecord>;

    /// Several systems can share a profile name
    fn systems_named(&self, name: &str) -> Result<Vec<SystemRecord>>;

    fn base_channel(&self, system_id: i64) -> Result<Option<String>>;

    fn subscribed_child_channels(&self, system_id: i64) -> Result<Vec<String>>;

    fn channel_children(&self, channel: &str) -> Result<Vec<String>>;

    fn subscribed_systems(&self, channel: &str) -> Result<Vec<SystemRecord>>;

    /// Installed packages come without identifier
    fn installed_packages(&self, system_id: i64) -> Result<Vec<PackageRecord>>;

    fn channel_packages(&self, channel: &str) -> Result<Vec<PackageRecord>>;

    /// Identifier of the package matching exactly, if there is only one
    fn find_package_id(&self, package: &PackageRecord) -> Result<Option<i64>>;

    fn providing_errata(&self, package_id: i64) -> Result<Vec<Erratum>>;

    /// Lucene query on the package index
    fn search_packages(&self, query: &str) -> Result<Vec<PackageRecord>>;

    fn channel_errata(&self, channel: &str, since: Option<NaiveDateTime>)
    -> Result<Vec<Erratum>>;
}

/// Fill missing identifiers, packages that can't be resolved keep none
pub fn resolve_ids(api: &dyn Satellite, packages: &mut [PackageRecord]) -> Result<()> {
    for p in packages.iter_mut().filter(|p| p.id.is_none()) {
        p.id = api.find_package_id(p)?;
        if p.id.is_none() {
            debug!("Could not find a unique package id for {}", p);
        }
    }
    Ok(())
}

/// Advisories providing a package, empty when it has no identifier
pub fn advisories(api: &dyn Satellite, package: &PackageRecord) -> Result<Vec<String>> {
    Ok(match package.id {
        None => vec![],
        Some(id) => api
            .providing_errata(id)?
            .into_iter()
            .map(|e| e.advisory)
            .collect(),
    })
}

/// In-memory server for tests
#[cfg(test)]
pub(crate) mod fake;
