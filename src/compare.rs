// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Comparison of systems with their channels
//!
//! The channel baseline is fetched and reduced once, then each system is
//! compared with it. Systems with an unreliable inventory are skipped.

use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

use crate::{
    api::{Satellite, SystemRecord, advisories, resolve_ids},
    diff::{DiffError, DiffResult, PackageStatus, Status, check_inventory, diff},
    package::PackageRecord,
    progress::Progress,
    reduce::reduce,
    report::{write_report_lines, write_system_header},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompareOptions {
    pub profile: Option<String>,
    pub system_id: Option<i64>,
    pub channel: Option<String>,
    pub child: bool,
    pub report: bool,
    pub output: Option<PathBuf>,
    pub force: bool,
}

impl CompareOptions {
    /// Checked before connecting to the server
    pub fn check(&self) -> Result<()> {
        if self.profile.is_none() && self.system_id.is_none() && self.channel.is_none() {
            bail!("You must provide either a system profile name, an ID or a channel label");
        }
        if let Some(o) = self.output.as_ref().filter(|o| o.exists() && !self.force) {
            bail!(
                "Output file '{}' already exists, use --force to overwrite it",
                o.display()
            );
        }
        Ok(())
    }
}

/// Systems and channels to compare
#[derive(Debug, PartialEq, Eq)]
pub struct Selection {
    pub systems: Vec<SystemRecord>,
    pub base: String,
    pub children: Vec<String>,
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct CompareRun {
    pub result: DiffResult,
    pub compared: usize,
    pub skipped: Vec<(SystemRecord, DiffError)>,
}

/// Outcome for one system
#[derive(Debug)]
pub enum SystemDiff {
    Compared(Vec<PackageStatus>),
    Unreliable(DiffError),
}

/// The system given by ID, or the last one to check in among those with the
/// given profile name
fn find_system(api: &dyn Satellite, opts: &CompareOptions) -> Result<Option<SystemRecord>> {
    Ok(match (opts.system_id, &opts.profile) {
        (Some(id), _) => Some(
            api.system(id)
                .with_context(|| format!("Unable to look up system with ID {id}"))?,
        ),
        (None, Some(name)) => {
            let mut systems = api.systems_named(name)?;
            if systems.len() > 1 {
                warn!(
                    "{} systems are named '{}', using the last one to check in",
                    systems.len(),
                    name
                );
            }
            systems.sort_by(|a, b| b.last_checkin.cmp(&a.last_checkin));
            Some(
                systems
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("Unable to find a system named '{name}'"))?,
            )
        }
        (None, None) => None,
    })
}

pub fn select(api: &dyn Satellite, opts: &CompareOptions) -> Result<Selection> {
    let system = find_system(api, opts)?;

    match (&opts.channel, system) {
        (Some(channel), system) => {
            let children = if opts.child {
                api.channel_children(channel)?
            } else {
                vec![]
            };
            let systems = match system {
                Some(s) => vec![s],
                None => api.subscribed_systems(channel)?,
            };
            Ok(Selection {
                systems,
                base: channel.clone(),
                children,
            })
        }
        (None, Some(system)) => {
            let base = api
                .base_channel(system.id)?
                .ok_or_else(|| anyhow!("System '{}' has no base channel", system.name))?;
            info!("Using base channel {} of {}", base, system.name);
            let children = if opts.child {
                api.subscribed_child_channels(system.id)?
            } else {
                vec![]
            };
            Ok(Selection {
                systems: vec![system],
                base,
                children,
            })
        }
        (None, None) => {
            bail!("You must provide either a system profile name, an ID or a channel label")
        }
    }
}

/// Latest packages of the base channel and its children
pub fn channel_baseline(api: &dyn Satellite, selection: &Selection) -> Result<Vec<PackageRecord>> {
    let progress = Progress::new(format!("Getting packages of {}", selection.base));
    let mut packages = api.channel_packages(&selection.base)?;
    for child in &selection.children {
        packages.extend(api.channel_packages(child)?);
    }
    progress.stop_with_success();

    let reduced = reduce(&packages);
    info!(
        "Found {} packages in channels, {} after keeping the latest ones",
        packages.len(),
        reduced.len()
    );
    Ok(reduced)
}

/// Attach the advisories providing the newest version of each differing package
pub fn enrich(api: &dyn Satellite, statuses: &mut [PackageStatus]) -> Result<()> {
    for s in statuses.iter_mut().filter(|s| s.status != Status::Same) {
        s.advisories = advisories(api, s.newest())?;
    }
    Ok(())
}

pub fn compare_system(
    api: &dyn Satellite,
    system: &SystemRecord,
    reduced: &[PackageRecord],
) -> Result<SystemDiff> {
    let mut installed = api.installed_packages(system.id)?;
    if let Err(e) = check_inventory(&installed) {
        return Ok(SystemDiff::Unreliable(e));
    }
    installed.sort_by(|a, b| a.name.cmp(&b.name));

    let progress = Progress::new(format!("Getting package details for {}", system.name));
    resolve_ids(api, &mut installed)?;
    progress.stop_with_success();

    let mut statuses = match diff(&installed, reduced) {
        Ok(s) => s,
        Err(e) => return Ok(SystemDiff::Unreliable(e)),
    };
    enrich(api, &mut statuses)?;
    Ok(SystemDiff::Compared(statuses))
}

/// Compare all selected systems, with an optional line report
pub fn compare(
    api: &dyn Satellite,
    opts: &CompareOptions,
    out: &mut dyn Write,
) -> Result<CompareRun> {
    let selection = select(api, opts)?;
    if selection.systems.is_empty() {
        warn!("No system is subscribed to {}", selection.base);
    }
    let reduced = channel_baseline(api, &selection)?;

    let mut run = CompareRun::default();
    for system in selection.systems {
        info!("Comparing {} ({})", system.name, system.id);
        if opts.report {
            write_system_header(out, &system, &selection.base, &selection.children)?;
        }
        match compare_system(api, &system, &reduced)? {
            SystemDiff::Compared(statuses) => {
                if opts.report {
                    write_report_lines(out, &statuses)?;
                }
                run.result.merge(DiffResult::from_statuses(&statuses));
                run.compared += 1;
            }
            SystemDiff::Unreliable(e) => {
                warn!(
                    "Skipping {} ({}), please upgrade its up2date client: {}",
                    system.name, system.id, e
                );
                run.skipped.push((system, e));
            }
        }
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::api::fake::{FakeSatellite, erratum};

    const BASE: &str = "rhel-x86_64-server-5";
    const TOOLS: &str = "rhn-tools-rhel-x86_64-server-5";

    fn pkg(name: &str, version: &str, release: &str, arch: &str) -> PackageRecord {
        PackageRecord::new(name, "", version, release, arch)
    }

    fn system(id: i64, name: &str, last_checkin: &str) -> SystemRecord {
        SystemRecord {
            id,
            name: name.to_string(),
            last_checkin: Some(last_checkin.to_string()),
        }
    }

    fn satellite() -> FakeSatellite {
        FakeSatellite {
            systems: vec![
                system(1, "web01", "20120101T10:00:00"),
                system(2, "web01", "20120301T10:00:00"),
                system(3, "db01", "20120301T10:00:00"),
            ],
            base_channels: HashMap::from([
                (1, BASE.to_string()),
                (2, BASE.to_string()),
                (3, BASE.to_string()),
            ]),
            subscribed_children: HashMap::from([(2, vec![TOOLS.to_string()])]),
            children: HashMap::from([(BASE.to_string(), vec![TOOLS.to_string()])]),
            subscribers: HashMap::from([(BASE.to_string(), vec![2, 3])]),
            installed: HashMap::from([
                (
                    2,
                    vec![
                        pkg("zsh", "4.2.6", "1.el5", "x86_64"),
                        pkg("custom", "1.0", "1", "noarch"),
                        pkg("bash", "3.2", "24.el5", "AMD64"),
                        pkg("rhncfg", "5.1", "9", "noarch"),
                    ],
                ),
                (
                    3,
                    vec![
                        pkg("zsh", "4.2.6", "1.el5", "x86_64"),
                        pkg("legacy", "1", "1", "unknown"),
                    ],
                ),
            ]),
            channels: HashMap::from([
                (
                    BASE.to_string(),
                    vec![
                        pkg("zsh", "4.2.6", "1.el5", "x86_64").with_id(10),
                        pkg("zsh", "4.2.6", "3.el5", "x86_64").with_id(11),
                        pkg("bash", "3.2", "24.el5", "x86_64").with_id(20),
                    ],
                ),
                (
                    TOOLS.to_string(),
                    vec![pkg("rhncfg", "5.1", "3", "noarch").with_id(30)],
                ),
            ]),
            errata: HashMap::from([
                (
                    11,
                    vec![erratum("RHBA-2012:0002", "zsh bug fix", "2012-01-05")],
                ),
                (10, vec![erratum("RHEA-2011:0001", "zsh", "2011-01-05")]),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn it_requires_a_target() {
        assert!(CompareOptions::default().check().is_err());
        assert!(
            CompareOptions {
                channel: Some(BASE.into()),
                ..Default::default()
            }
            .check()
            .is_ok()
        );
    }

    #[test]
    fn it_selects_last_checked_in_system() {
        let api = satellite();
        let opts = CompareOptions {
            profile: Some("web01".into()),
            child: true,
            ..Default::default()
        };
        assert_eq!(
            select(&api, &opts).unwrap(),
            Selection {
                systems: vec![system(2, "web01", "20120301T10:00:00")],
                base: BASE.into(),
                children: vec![TOOLS.into()],
            }
        );
    }

    #[test]
    fn it_selects_channel_subscribers() {
        let api = satellite();
        let opts = CompareOptions {
            channel: Some(BASE.into()),
            ..Default::default()
        };
        let selection = select(&api, &opts).unwrap();
        assert_eq!(
            selection.systems.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(selection.children.is_empty());
    }

    #[test]
    fn it_fails_on_unknown_system() {
        let api = satellite();
        let opts = CompareOptions {
            profile: Some("nope".into()),
            ..Default::default()
        };
        assert!(select(&api, &opts).is_err());
    }

    #[test]
    fn it_compares_a_system() {
        let api = satellite();
        let selection = Selection {
            systems: vec![],
            base: BASE.into(),
            children: vec![],
        };
        let reduced = channel_baseline(&api, &selection).unwrap();
        let SystemDiff::Compared(statuses) =
            compare_system(&api, &system(2, "web01", ""), &reduced).unwrap()
        else {
            panic!("system should be compared")
        };

        // sorted by name
        assert_eq!(
            statuses
                .iter()
                .map(|s| (s.installed.name.as_str(), s.status))
                .collect::<Vec<_>>(),
            vec![
                ("bash", Status::Same),
                ("custom", Status::Missing),
                ("rhncfg", Status::Missing),
                ("zsh", Status::Older),
            ]
        );
        let zsh = &statuses[3];
        assert_eq!(zsh.installed.id, Some(10));
        assert_eq!(zsh.advisories, vec!["RHBA-2012:0002".to_string()]);
        assert!(statuses[1].advisories.is_empty());
    }

    #[test]
    fn it_skips_unreliable_inventories() {
        let api = satellite();
        let opts = CompareOptions {
            channel: Some(BASE.into()),
            child: true,
            report: true,
            ..Default::default()
        };
        let mut out = vec![];
        let run = compare(&api, &opts, &mut out).unwrap();

        assert_eq!(run.compared, 1);
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].0.id, 3);
        assert_eq!(
            run.skipped[0].1,
            DiffError::UnreliableInventory {
                package: "legacy-1-1.unknown".into()
            }
        );
        assert_eq!(
            run.result.entries().collect::<Vec<_>>(),
            vec![
                (Status::Missing, "custom-1.0-1.noarch"),
                (Status::Older, "zsh-4.2.6-1.el5.x86_64"),
                (Status::Newer, "rhncfg-5.1-9.noarch"),
            ]
        );

        let report = String::from_utf8(out).unwrap();
        assert_eq!(
            report.lines().collect::<Vec<_>>(),
            vec![
                "SYSTEM(web01,2) : ----- : CHANNELS(rhel-x86_64-server-5,rhn-tools-rhel-x86_64-server-5)",
                "SYSTEM_PACKAGE STATUS CHANNEL_LATEST ERRATA_CONTAINING_NEWEST",
                "custom-1.0-1.noarch NOT_FOUND_IN_CHANNEL None ",
                "rhncfg-5.1-9.noarch NEWER_THAN_CHANNEL_LATEST rhncfg-5.1-3.noarch ",
                "zsh-4.2.6-1.el5.x86_64 OLDER_THAN_CHANNEL_LATEST zsh-4.2.6-3.el5.x86_64 RHBA-2012:0002",
                "SYSTEM(db01,3) : ----- : CHANNELS(rhel-x86_64-server-5,rhn-tools-rhel-x86_64-server-5)",
            ]
        );
    }

    #[test]
    fn it_reports_nothing_for_up_to_date_systems() {
        let mut api = satellite();
        api.installed
            .insert(1, vec![pkg("zsh", "4.2.6", "3.el5", "x86_64")]);
        let opts = CompareOptions {
            system_id: Some(1),
            ..Default::default()
        };
        let run = compare(&api, &opts, &mut std::io::sink()).unwrap();
        assert_eq!(run.compared, 1);
        assert!(run.result.is_empty());
    }
}
