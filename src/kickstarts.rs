// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Import of exported kickstart profiles
//!
//! Everything a profile refers to is created before the profile: system
//! groups, then activation keys, then stored GPG/SSL keys and file
//! preservation lists.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    activation_keys::{ActivationKey, ImportRun, KeyImporter, flag},
    admin::{Admin, ProfileUpdate},
};

/// A kickstart profile as exported from another server
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Kickstart {
    pub label: String,
    /// Kickstartable tree, has to exist on the server
    pub ks_tree: String,
    #[serde(default)]
    pub child_channels: Vec<String>,
    #[serde(default)]
    pub advanced_opts: Vec<AdvancedOption>,
    #[serde(default)]
    pub partitioning_scheme: Vec<String>,
    #[serde(default)]
    pub software_list: Vec<String>,
    #[serde(default)]
    pub custom_opts: Vec<CustomOption>,
    #[serde(default)]
    pub script_list: Vec<Script>,
    #[serde(default)]
    pub ip_ranges: Vec<IpRange>,
    #[serde(default)]
    pub variable_list: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub reg_type: Option<String>,
    #[serde(default)]
    pub file_preservations: Vec<FilePreservation>,
    #[serde(default, deserialize_with = "flag")]
    pub config_mgmt: bool,
    #[serde(default, deserialize_with = "flag")]
    pub remote_cmds: bool,
    #[serde(default)]
    pub activation_keys: Vec<ActivationKey>,
    #[serde(default)]
    pub gpg_ssl_keys: Vec<CryptoKey>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdvancedOption {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Plain lines or `{ "id": 1, "arguments": "..." }` entries
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CustomOption {
    Line(String),
    Entry { arguments: String },
}

impl CustomOption {
    pub fn arguments(&self) -> &str {
        match self {
            CustomOption::Line(l) => l,
            CustomOption::Entry { arguments } => arguments,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub contents: String,
    /// `pre` or `post`
    pub script_type: String,
    #[serde(default, deserialize_with = "flag")]
    pub chroot: bool,
    #[serde(default)]
    pub interpreter: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    pub min: String,
    pub max: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FilePreservation {
    pub name: String,
    #[serde(default)]
    pub file_names: Vec<String>,
}

/// Stored GPG or SSL key
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CryptoKey {
    pub description: String,
    /// `GPG` or `SSL`
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

pub fn read_kickstarts(path: &Path) -> Result<Vec<Kickstart>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Reading kickstart profiles from '{}'", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Parsing kickstart profiles from '{}'", path.display()))
}

#[derive(Debug, Default)]
pub struct KickstartImportOptions {
    pub file: PathBuf,
    /// Only import these labels
    pub labels: Vec<String>,
    /// Set on new profiles, exports don't contain it
    pub root_password: Option<SecretString>,
    pub dry_run: bool,
    pub list: bool,
    pub pretty_print: bool,
}

impl KickstartImportOptions {
    /// Reading the file is enough to list or print profiles
    pub fn is_offline(&self) -> bool {
        self.list || self.pretty_print
    }

    pub fn check(&self) -> Result<()> {
        if !self.is_offline() && !self.dry_run && self.root_password.is_none() {
            bail!("A root password is needed for the new kickstart profiles");
        }
        Ok(())
    }

    pub fn select(&self, profiles: Vec<Kickstart>) -> Vec<Kickstart> {
        profiles
            .into_iter()
            .filter(|p| self.labels.is_empty() || self.labels.contains(&p.label))
            .collect()
    }
}

/// Labels of the profiles, one per line
pub fn write_labels(out: &mut dyn Write, profiles: &[Kickstart]) -> Result<()> {
    for p in profiles {
        writeln!(out, "{}", p.label)?;
    }
    Ok(())
}

pub fn write_details(out: &mut dyn Write, profiles: &[Kickstart]) -> Result<()> {
    for p in profiles {
        writeln!(
            out,
            "## ------------- Kickstart Details for {} ----------------- ##",
            p.label
        )?;
        writeln!(out, "{p:#?}")?;
        writeln!(out)?;
    }
    Ok(())
}

/// What a profile refers to, created on demand
struct Dependencies<'a> {
    api: &'a dyn Admin,
    keys: KeyImporter<'a>,
    crypto_keys: HashSet<String>,
    file_preservations: HashSet<String>,
}

impl<'a> Dependencies<'a> {
    fn new(api: &'a dyn Admin) -> Result<Self> {
        Ok(Self {
            api,
            keys: KeyImporter::new(api)?,
            crypto_keys: api.crypto_keys()?.into_iter().collect(),
            file_preservations: api.file_preservations()?.into_iter().collect(),
        })
    }

    /// Keys to add to the profile, the ones that can't be created are left out
    fn activation_keys(&mut self, keys: &[ActivationKey]) -> Vec<String> {
        let mut found = vec![];
        for k in keys {
            if let Some(existing) = self.keys.existing(k) {
                debug!("Activation key {} exists as {}", k.key, existing);
                found.push(existing.to_string());
                continue;
            }
            match self.keys.create(k) {
                Ok(created) => {
                    info!("Created activation key {} as {}", k.key, created);
                    found.push(created);
                }
                Err(e) => warn!("Could not create activation key {}, skipping it: {:?}", k.key, e),
            }
        }
        found
    }

    fn crypto_keys<'k>(&mut self, keys: &'k [CryptoKey]) -> Vec<&'k str> {
        let mut found = vec![];
        for k in keys {
            if !self.crypto_keys.contains(&k.description) {
                if let Err(e) = self.api.create_crypto_key(k) {
                    warn!("Could not create key '{}', skipping it: {:?}", k.description, e);
                    continue;
                }
                info!("Created {} key '{}'", k.kind, k.description);
                self.crypto_keys.insert(k.description.clone());
            }
            found.push(k.description.as_str());
        }
        found
    }

    fn file_preservations<'k>(&mut self, lists: &'k [FilePreservation]) -> Vec<&'k str> {
        let mut found = vec![];
        for l in lists {
            if !self.file_preservations.contains(&l.name) {
                if let Err(e) = self.api.create_file_preservation(l) {
                    warn!(
                        "Could not create file preservation list '{}', skipping it: {:?}",
                        l.name, e
                    );
                    continue;
                }
                info!("Created file preservation list '{}'", l.name);
                self.file_preservations.insert(l.name.clone());
            }
            found.push(l.name.as_str());
        }
        found
    }
}

fn import_profile(
    deps: &mut Dependencies,
    profile: &Kickstart,
    root_password: &SecretString,
) -> Result<()> {
    let api = deps.api;
    let keys = deps.activation_keys(&profile.activation_keys);
    let crypto_keys = deps.crypto_keys(&profile.gpg_ssl_keys);
    let file_preservations = deps.file_preservations(&profile.file_preservations);

    let label = profile.label.as_str();
    api.create_kickstart(label, &profile.ks_tree, root_password.expose_secret())
        .with_context(|| format!("Creating kickstart profile {label}"))?;

    let mut updates = vec![];
    if !profile.child_channels.is_empty() {
        updates.push(ProfileUpdate::ChildChannels(&profile.child_channels));
    }
    if !profile.advanced_opts.is_empty() {
        updates.push(ProfileUpdate::AdvancedOptions(&profile.advanced_opts));
    }
    if !profile.partitioning_scheme.is_empty() {
        updates.push(ProfileUpdate::PartitioningScheme(
            &profile.partitioning_scheme,
        ));
    }
    if !profile.software_list.is_empty() {
        updates.push(ProfileUpdate::SoftwareList(&profile.software_list));
    }
    if !profile.custom_opts.is_empty() {
        updates.push(ProfileUpdate::CustomOptions(
            profile.custom_opts.iter().map(|o| o.arguments()).collect(),
        ));
    }
    for setting in updates {
        api.update_kickstart(label, &setting)?;
    }
    // scripts and ranges are independent of each other
    let scripts = profile.script_list.iter().map(ProfileUpdate::Script);
    let ranges = profile.ip_ranges.iter().map(ProfileUpdate::IpRange);
    for setting in scripts.chain(ranges) {
        if let Err(e) = api.update_kickstart(label, &setting) {
            warn!("Could not apply {:?} to {}: {:?}", setting, label, e);
        }
    }

    let mut updates = vec![];
    if !profile.variable_list.is_empty() {
        updates.push(ProfileUpdate::Variables(&profile.variable_list));
    }
    if let Some(t) = &profile.reg_type {
        updates.push(ProfileUpdate::RegistrationType(t));
    }
    if !file_preservations.is_empty() {
        updates.push(ProfileUpdate::FilePreservations(file_preservations));
    }
    if profile.config_mgmt {
        updates.push(ProfileUpdate::ConfigManagement);
    }
    if profile.remote_cmds {
        updates.push(ProfileUpdate::RemoteCommands);
    }
    updates.extend(keys.iter().map(|k| ProfileUpdate::ActivationKey(k.as_str())));
    if !crypto_keys.is_empty() {
        updates.push(ProfileUpdate::CryptoKeys(crypto_keys));
    }
    for setting in updates {
        api.update_kickstart(label, &setting)?;
    }
    Ok(())
}

/// Create the profiles missing from the server
///
/// A profile that fails is reported and the import goes on with the next one.
pub fn import_kickstarts(
    api: &dyn Admin,
    profiles: &[Kickstart],
    opts: &KickstartImportOptions,
) -> Result<ImportRun> {
    let existing: HashSet<String> = api.kickstarts()?.into_iter().collect();
    let mut deps = Dependencies::new(api)?;
    let mut run = ImportRun::default();

    for profile in profiles {
        if existing.contains(&profile.label) {
            info!("Kickstart profile {} already exists, skipping", profile.label);
            run.skipped.push(profile.label.clone());
            continue;
        }
        let root_password = match (&opts.root_password, opts.dry_run) {
            (Some(p), false) => p,
            _ => {
                info!("Would import kickstart profile {}", profile.label);
                for k in profile
                    .activation_keys
                    .iter()
                    .filter(|k| deps.keys.existing(k).is_none())
                {
                    info!("Would create activation key {} [{}]", k.key, k.description);
                }
                continue;
            }
        };
        match import_profile(&mut deps, profile, root_password) {
            Ok(()) => {
                info!("Imported kickstart profile {}", profile.label);
                run.created.push(profile.label.clone());
            }
            Err(e) => {
                warn!("Failed to import kickstart profile {}: {:?}", profile.label, e);
                run.failed.push(profile.label.clone());
            }
        }
    }
    Ok(run)
}
