// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Import of exported activation keys
//!
//! Keys depend on system groups, which are created first when missing.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::admin::{Admin, KeyUpdate, SystemGroup};

/// Descriptions the server gives to keys generated for re-registration
const REACTIVATION_KEY_PATTERN: &str = r"(?i)^(Kickstart )?(Reactivation|re-activation) Key.*$";

/// An activation key as exported from another server
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActivationKey {
    /// Prefixed with the organization id, like `1-web`
    pub key: String,
    #[serde(default)]
    pub description: String,
    /// Empty for the default base channel
    #[serde(default)]
    pub base_channel_label: String,
    #[serde(default)]
    pub entitlements: Vec<String>,
    #[serde(default)]
    pub child_channel_labels: Vec<String>,
    #[serde(default)]
    pub packages: Vec<KeyPackage>,
    #[serde(default)]
    pub config_channels: Vec<ConfigChannelRef>,
    #[serde(default, deserialize_with = "flag")]
    pub config_deploy: bool,
    #[serde(default)]
    pub server_groups: Vec<GroupRef>,
    /// 0 means unlimited
    #[serde(default)]
    pub usage_limit: Option<i64>,
    #[serde(default, deserialize_with = "flag")]
    pub universal_default: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyPackage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigChannelRef {
    pub label: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GroupRef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Exports contain `0`/`1` as often as booleans
pub(crate) fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

impl ActivationKey {
    /// The key without its organization prefix, the server adds its own
    pub fn unprefixed(&self) -> &str {
        unprefixed(&self.key)
    }

    /// Limit to send on creation, if any
    pub fn usage_limit(&self) -> Option<i64> {
        self.usage_limit.filter(|l| *l > 0)
    }
}

fn unprefixed(key: &str) -> &str {
    key.split_once('-').map_or(key, |(_, k)| k)
}

pub fn read_keys(path: &Path) -> Result<Vec<ActivationKey>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Reading activation keys from '{}'", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Parsing activation keys from '{}'", path.display()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyImportOptions {
    pub file: PathBuf,
    /// Only import these keys
    pub keys: Vec<String>,
    pub reactivation_keys: bool,
    pub dry_run: bool,
    pub list: bool,
}

impl KeyImportOptions {
    /// Keys of the file to import, reactivation keys are left out unless asked
    pub fn select(&self, keys: Vec<ActivationKey>) -> Result<Vec<ActivationKey>> {
        let reactivation = Regex::new(REACTIVATION_KEY_PATTERN)?;
        Ok(keys
            .into_iter()
            .filter(|k| {
                let keep = self.reactivation_keys || !reactivation.is_match(&k.description);
                if !keep {
                    debug!("Leaving out reactivation key {}", k.key);
                }
                keep
            })
            .filter(|k| self.keys.is_empty() || self.keys.contains(&k.key))
            .collect())
    }
}

/// `Activation Key` and `Description` columns
pub fn write_key_table(out: &mut dyn Write, keys: &[ActivationKey]) -> Result<()> {
    if keys.is_empty() {
        writeln!(out, "(No Activation Keys found)")?;
        return Ok(());
    }
    writeln!(out, "{:<36} Description", "Activation Key")?;
    writeln!(out, "{:-<36} {:-<36}", "", "")?;
    for k in keys {
        writeln!(out, "{:<36} {}", k.key, k.description)?;
    }
    Ok(())
}

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRun {
    pub created: Vec<String>,
    /// Already on the server
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Creates keys and the groups they need, remembering what exists
pub struct KeyImporter<'a> {
    api: &'a dyn Admin,
    /// Unprefixed key to key on the server
    keys: HashMap<String, String>,
    groups: HashMap<String, i64>,
}

impl<'a> KeyImporter<'a> {
    pub fn new(api: &'a dyn Admin) -> Result<Self> {
        let keys = api
            .activation_keys()?
            .into_iter()
            .map(|k| (unprefixed(&k).to_string(), k))
            .collect();
        let groups = api
            .system_groups()?
            .into_iter()
            .map(|g| (g.name, g.id))
            .collect();
        Ok(Self { api, keys, groups })
    }

    /// Key on the server matching an exported one
    ///
    /// Organizations differ between servers, keys are matched without
    /// prefix.
    pub fn existing(&self, key: &ActivationKey) -> Option<&str> {
        self.keys.get(key.unprefixed()).map(|k| k.as_str())
    }

    /// Group ids, creating missing groups
    ///
    /// A group that can't be created is left out.
    fn group_ids(&mut self, groups: &[GroupRef]) -> Vec<i64> {
        let mut ids = vec![];
        for g in groups {
            if let Some(id) = self.groups.get(&g.name) {
                ids.push(*id);
                continue;
            }
            match self.api.create_system_group(&g.name, &g.description) {
                Ok(SystemGroup { id, name, .. }) => {
                    info!("Created system group {}", name);
                    self.groups.insert(name, id);
                    ids.push(id);
                }
                Err(e) => warn!("Could not create system group {}, skipping it: {:?}", g.name, e),
            }
        }
        ids
    }

    /// Create a key with its channels, packages, configuration and groups
    ///
    /// Returns the key given by the server.
    pub fn create(&mut self, key: &ActivationKey) -> Result<String> {
        // groups first, they have to exist when added to the key
        let groups = self.group_ids(&key.server_groups);

        let created = self
            .api
            .create_activation_key(key)
            .with_context(|| format!("Creating activation key {}", key.key))?;
        debug!("Created activation key {} as {}", key.key, created);
        self.keys
            .insert(key.unprefixed().to_string(), created.clone());

        if !key.child_channel_labels.is_empty() {
            self.api.update_activation_key(
                &created,
                &KeyUpdate::ChildChannels(&key.child_channel_labels),
            )?;
        }
        if !key.packages.is_empty() {
            self.api
                .update_activation_key(&created, &KeyUpdate::Packages(&key.packages))?;
        }

        let mut config_channels = vec![];
        for c in &key.config_channels {
            if self.api.config_channel_exists(&c.label)? {
                config_channels.push(c.label.as_str());
            } else {
                warn!(
                    "Configuration channel {} does not exist, not adding it to {}",
                    c.label, created
                );
            }
        }
        if !config_channels.is_empty() {
            self.api
                .update_activation_key(&created, &KeyUpdate::ConfigChannels(config_channels))?;
        }
        self.api
            .update_activation_key(&created, &KeyUpdate::ConfigDeployment(key.config_deploy))?;

        if !groups.is_empty() {
            self.api
                .update_activation_key(&created, &KeyUpdate::ServerGroups(groups))?;
        }
        Ok(created)
    }
}

/// Create the keys missing from the server
///
/// A key that fails is reported and the import goes on with the next one.
pub fn import_keys(api: &dyn Admin, keys: &[ActivationKey], dry_run: bool) -> Result<ImportRun> {
    let mut importer = KeyImporter::new(api)?;
    let mut run = ImportRun::default();

    for key in keys {
        if let Some(existing) = importer.existing(key) {
            info!("Skipping existing activation key {} ({})", key.key, existing);
            run.skipped.push(key.key.clone());
            continue;
        }
        if dry_run {
            info!("Would import activation key {} [{}]", key.key, key.description);
            continue;
        }
        match importer.create(key) {
            Ok(created) => {
                info!("Imported activation key {} as {}", key.key, created);
                run.created.push(created);
            }
            Err(e) => {
                warn!("Failed to import activation key {}: {:?}", key.key, e);
                run.failed.push(key.key.clone());
            }
        }
    }
    Ok(run)
}
