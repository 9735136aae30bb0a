// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Errata released in a source channel but missing from its clone

use std::{
    collections::{HashMap, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    api::{Erratum, Satellite},
    config::expand_home,
};

/// Searched in order when no mapping file is given
pub const CHANNEL_MAPPING_PATHS: [&str; 2] =
    ["~/.rhn-channels.conf", "/etc/sysconfig/rhn-channels.conf"];

/// A cloned channel and the channel it was cloned from
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelPair {
    pub source: String,
    pub chan: String,
    #[serde(default)]
    pub children: Vec<ChannelPair>,
}

/// Channel pairs by group name
pub type ChannelMappings = HashMap<String, ChannelPair>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummaryOptions {
    pub channel: Option<String>,
    pub source: Option<String>,
    pub date: Option<String>,
    pub output: Option<PathBuf>,
    pub channel_mapping: Option<PathBuf>,
    pub group: Option<String>,
}

impl PatchSummaryOptions {
    /// Checked before connecting to the server
    pub fn check(&self) -> Result<()> {
        if self.group.is_none() {
            match (&self.channel, &self.source) {
                (None, _) => bail!("You must provide a channel to summarise"),
                (Some(c), None) => bail!("Which channel was {c} cloned from?"),
                _ => (),
            }
        }
        if let Some(d) = &self.date {
            parse_date(d)?;
        }
        Ok(())
    }

    fn mapping_paths(&self) -> Vec<PathBuf> {
        match &self.channel_mapping {
            Some(p) => vec![p.clone()],
            None => CHANNEL_MAPPING_PATHS
                .iter()
                .map(|p| expand_home(p))
                .collect(),
        }
    }

    /// Channels to summarise, from the group or the command line
    pub fn channel_pair(&self) -> Result<ChannelPair> {
        if let Some(group) = &self.group {
            let paths = self.mapping_paths();
            let mappings = read_mappings(&paths).ok_or_else(|| {
                anyhow!(
                    "Could not read channel mappings from {}",
                    paths.iter().map(|p| format!("'{}'", p.display())).join(", ")
                )
            })?;
            return mappings
                .get(group)
                .cloned()
                .ok_or_else(|| anyhow!("Channel group '{group}' not found in channel mappings"));
        }
        match (&self.channel, &self.source) {
            (Some(chan), Some(source)) => Ok(ChannelPair {
                source: source.clone(),
                chan: chan.clone(),
                children: vec![],
            }),
            _ => bail!("You must provide a channel and its source channel, or a channel group"),
        }
    }
}

/// First readable mapping file
///
/// Files that can't be read or parsed are skipped.
pub fn read_mappings(paths: &[PathBuf]) -> Option<ChannelMappings> {
    for path in paths {
        if !path.is_file() {
            debug!("No channel mappings in '{}'", path.display());
            continue;
        }
        match read_mapping_file(path) {
            Ok(m) => {
                info!("Using channel mappings from '{}'", path.display());
                return Some(m);
            }
            Err(e) => warn!("Skipping channel mappings: {:?}", e),
        }
    }
    None
}

fn read_mapping_file(path: &Path) -> Result<ChannelMappings> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Reading channel mappings from '{}'", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Parsing channel mappings from '{}'", path.display()))
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{date}', expected YYYY-MM-DD"))
}

/// Given date at midnight, or the first day of the month of `today`
pub fn start_date(date: Option<&str>, today: NaiveDate) -> Result<NaiveDateTime> {
    let day = match date {
        Some(d) => {
            let day = parse_date(d)?;
            info!("Using date provided on command line ({})", day);
            day
        }
        None => {
            let day = today.with_day(1).unwrap_or(today);
            info!("No date provided, using the beginning of the month ({})", day);
            day
        }
    };
    Ok(day.and_time(NaiveTime::MIN))
}

/// A line of the CSV output
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub advisory: String,
    pub synopsis: String,
    pub issue_date: String,
    pub last_modified_date: String,
    pub urgency: String,
    pub channel: String,
}

impl SummaryRow {
    fn new(erratum: Erratum, channel: &str) -> Self {
        Self {
            urgency: urgency(&erratum.synopsis),
            advisory: erratum.advisory,
            synopsis: erratum.synopsis,
            issue_date: erratum.issue_date,
            last_modified_date: erratum.last_modified_date,
            channel: channel.to_string(),
        }
    }
}

/// `Important: kernel security update` has urgency `Important`
pub fn urgency(synopsis: &str) -> String {
    match synopsis.split(':').collect::<Vec<_>>().as_slice() {
        [u, _] => u.to_string(),
        _ => "None".to_string(),
    }
}

/// Identifies an erratum across clones, `RHSA-2012:0001` and
/// `CLA-2012:0001` share `2012:0001`
fn advisory_key(advisory: &str) -> &str {
    advisory.split('-').nth(1).unwrap_or(advisory)
}

/// Errata of `source` released since `since` that were not cloned to `chan`
pub fn unsynced_errata(
    api: &dyn Satellite,
    chan: &str,
    source: &str,
    since: NaiveDateTime,
) -> Result<Vec<SummaryRow>> {
    let chan_errata = api.channel_errata(chan, None)?;
    let cloned: HashSet<&str> = chan_errata
        .iter()
        .map(|e| advisory_key(&e.advisory))
        .collect();

    let rows: Vec<SummaryRow> = api
        .channel_errata(source, Some(since))?
        .into_iter()
        .filter(|e| !cloned.contains(advisory_key(&e.advisory)))
        .map(|e| SummaryRow::new(e, chan))
        .collect();
    info!("{} errata from {} are missing in {}", rows.len(), source, chan);
    Ok(rows)
}

/// Unsynced errata of the channel and its children
pub fn summarise(
    api: &dyn Satellite,
    pair: &ChannelPair,
    since: NaiveDateTime,
) -> Result<Vec<SummaryRow>> {
    info!("Processing base channel {}", pair.chan);
    let mut rows = unsynced_errata(api, &pair.chan, &pair.source, since)?;
    for child in &pair.children {
        info!("Processing child channel {}", child.chan);
        rows.extend(unsynced_errata(api, &child.chan, &child.source, since)?);
    }
    Ok(rows)
}

pub fn write_csv(rows: &[SummaryRow], out: &mut dyn Write) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for r in rows {
        writer.serialize(r)?;
    }
    if rows.is_empty() {
        writer.write_record([
            "advisory",
            "synopsis",
            "issue_date",
            "last_modified_date",
            "urgency",
            "channel",
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs::File};

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;
    use crate::api::fake::{FakeSatellite, erratum};

    #[rstest]
    #[case("Important: kernel security update", "Important")]
    #[case("bash bug fix update", "None")]
    #[case("Moderate: foo: bar", "None")]
    fn it_extracts_urgency(#[case] synopsis: &str, #[case] expected: &str) {
        assert_eq!(urgency(synopsis), expected);
    }

    #[test]
    fn it_computes_start_date() {
        let today = NaiveDate::from_ymd_opt(2012, 3, 14).unwrap();
        assert_eq!(
            start_date(None, today).unwrap().to_string(),
            "2012-03-01 00:00:00"
        );
        assert_eq!(
            start_date(Some("2012-02-10"), today).unwrap().to_string(),
            "2012-02-10 00:00:00"
        );
        assert!(start_date(Some("10/02/2012"), today).is_err());
    }

    #[test]
    fn it_reads_channel_mappings() {
        let mappings = read_mappings(&[
            PathBuf::from("./tests/channels/missing.conf"),
            PathBuf::from("./tests/channels/invalid.conf"),
            PathBuf::from("./tests/channels/rhn-channels.conf"),
        ])
        .unwrap();
        let group = &mappings["lgb-3.0"];
        assert_eq!(group.chan, "lgb-rhel-x86_64-server-5");
        assert_eq!(group.children.len(), 2);
        assert_eq!(group.children[1].source, "rhn-tools-rhel-x86_64-server-5");

        let opts = PatchSummaryOptions {
            group: Some("lgb-3.0".into()),
            channel_mapping: Some(PathBuf::from("./tests/channels/rhn-channels.conf")),
            ..Default::default()
        };
        assert_eq!(&opts.channel_pair().unwrap(), group);

        let opts = PatchSummaryOptions {
            group: Some("nope".into()),
            ..opts
        };
        assert!(opts.channel_pair().is_err());
    }

    #[test]
    fn it_requires_channels() {
        assert!(PatchSummaryOptions::default().check().is_err());
        let opts = PatchSummaryOptions {
            channel: Some("lgb-rhel-x86_64-server-5".into()),
            ..Default::default()
        };
        assert!(opts.check().is_err());
        let opts = PatchSummaryOptions {
            source: Some("rhel-x86_64-server-5".into()),
            ..opts
        };
        opts.check().unwrap();
        assert!(opts.channel_pair().unwrap().children.is_empty());
    }

    #[test]
    fn it_summarises_unsynced_errata() {
        let api = FakeSatellite {
            channel_errata: HashMap::from([
                (
                    "rhel-x86_64-server-5".to_string(),
                    vec![
                        erratum("RHSA-2012:0001", "Important: kernel security update", "2012-03-02"),
                        erratum("RHBA-2012:0002", "bash bug fix", "2012-03-05"),
                        erratum("RHBA-2012:0003", "old bug fix", "2012-02-05"),
                    ],
                ),
                (
                    "lgb-rhel-x86_64-server-5".to_string(),
                    vec![erratum("CLA-2012:0001", "Important: kernel security update", "2012-03-03")],
                ),
                (
                    "rhn-tools-rhel-x86_64-server-5".to_string(),
                    vec![erratum("RHEA-2012:0010", "Low: rhncfg enhancement", "2012-03-10")],
                ),
            ]),
            ..Default::default()
        };
        let pair = ChannelPair {
            source: "rhel-x86_64-server-5".into(),
            chan: "lgb-rhel-x86_64-server-5".into(),
            children: vec![ChannelPair {
                source: "rhn-tools-rhel-x86_64-server-5".into(),
                chan: "lgb30-tools-rhel-x86_64-server-5".into(),
                children: vec![],
            }],
        };
        let since = start_date(None, NaiveDate::from_ymd_opt(2012, 3, 14).unwrap()).unwrap();
        let rows = summarise(&api, &pair, since).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        write_csv(&rows, &mut File::create(&path).unwrap()).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "advisory,synopsis,issue_date,last_modified_date,urgency,channel
RHBA-2012:0002,bash bug fix,2012-03-05,2012-03-05,None,lgb-rhel-x86_64-server-5
RHEA-2012:0010,Low: rhncfg enhancement,2012-03-10,2012-03-10,Low,lgb30-tools-rhel-x86_64-server-5
"
        );
    }

    #[test]
    fn it_writes_header_without_rows() {
        let mut out = vec![];
        write_csv(&[], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "advisory,synopsis,issue_date,last_modified_date,urgency,channel\n"
        );
    }
}
