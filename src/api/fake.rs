// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use anyhow::{Result, anyhow, bail};
use chrono::NaiveDateTime;
use itertools::Itertools;

use super::{Erratum, Satellite, SystemRecord};
use crate::{
    activation_keys::ActivationKey,
    admin::{
        Admin, ChannelDetails, CloneDetails, ConfigChannel, ConfigFile, ConfigFileKind,
        KeyUpdate, Org, ProfileUpdate, Sharing, SoftwareChannel, SystemGroup,
    },
    kickstarts::{CryptoKey, FilePreservation},
    package::PackageRecord,
};

#[derive(Default)]
pub struct FakeSatellite {
    pub systems: Vec<SystemRecord>,
    pub base_channels: HashMap<i64, String>,
    pub subscribed_children: HashMap<i64, Vec<String>>,
    pub children: HashMap<String, Vec<String>>,
    pub subscribers: HashMap<String, Vec<i64>>,
    pub installed: HashMap<i64, Vec<PackageRecord>>,
    pub channels: HashMap<String, Vec<PackageRecord>>,
    pub errata: HashMap<i64, Vec<Erratum>>,
    pub channel_errata: HashMap<String, Vec<Erratum>>,
    pub search_results: HashMap<String, Vec<PackageRecord>>,

    pub groups: RefCell<Vec<SystemGroup>>,
    pub activation_keys: RefCell<Vec<String>>,
    pub config_channels: RefCell<Vec<ConfigChannel>>,
    pub config_files: RefCell<HashMap<String, Vec<ConfigFile>>>,
    pub kickstarts: RefCell<Vec<String>>,
    pub crypto_keys: RefCell<Vec<String>>,
    pub file_preservations: RefCell<Vec<String>>,
    pub software_channels: RefCell<Vec<SoftwareChannel>>,
    pub channel_details: HashMap<String, ChannelDetails>,
    pub clones: RefCell<Vec<CloneDetails>>,
    pub sharing: RefCell<HashMap<String, String>>,
    pub orgs: Vec<Org>,
    /// Keys, profiles and file paths the server refuses to create
    pub failing: HashSet<String>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeSatellite {
    /// Changes made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn refuse(&self, name: &str) -> Result<()> {
        if self.failing.contains(name) {
            bail!("Server refused {name}");
        }
        Ok(())
    }
}

pub fn erratum(advisory: &str, synopsis: &str, issue_date: &str) -> Erratum {
    Erratum {
        advisory: advisory.to_string(),
        synopsis: synopsis.to_string(),
        issue_date: issue_date.to_string(),
        last_modified_date: issue_date.to_string(),
    }
}

pub fn config_channel(label: &str) -> ConfigChannel {
    ConfigChannel {
        label: label.to_string(),
        name: label.to_string(),
        description: String::new(),
    }
}

pub fn software_channel(label: &str, parent: &str) -> SoftwareChannel {
    SoftwareChannel {
        label: label.to_string(),
        parent_label: parent.to_string(),
    }
}

impl Satellite for FakeSatellite {
    fn system(&self, id: i64) -> Result<SystemRecord> {
        self.systems
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("No such system {id}"))
    }

    fn systems_named(&self, name: &str) -> Result<Vec<SystemRecord>> {
        Ok(self
            .systems
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect())
    }

    fn base_channel(&self, system_id: i64) -> Result<Option<String>> {
        Ok(self.base_channels.get(&system_id).cloned())
    }

    fn subscribed_child_channels(&self, system_id: i64) -> Result<Vec<String>> {
        Ok(self
            .subscribed_children
            .get(&system_id)
            .cloned()
            .unwrap_or_default())
    }

    fn channel_children(&self, channel: &str) -> Result<Vec<String>> {
        Ok(self.children.get(channel).cloned().unwrap_or_default())
    }

    fn subscribed_systems(&self, channel: &str) -> Result<Vec<SystemRecord>> {
        let ids = self.subscribers.get(channel).cloned().unwrap_or_default();
        ids.into_iter().map(|id| self.system(id)).collect()
    }

    fn installed_packages(&self, system_id: i64) -> Result<Vec<PackageRecord>> {
        Ok(self
            .installed
            .get(&system_id)
            .cloned()
            .unwrap_or_default())
    }

    fn channel_packages(&self, channel: &str) -> Result<Vec<PackageRecord>> {
        self.channels
            .get(channel)
            .cloned()
            .ok_or_else(|| anyhow!("No such channel {channel}"))
    }

    fn find_package_id(&self, package: &PackageRecord) -> Result<Option<i64>> {
        let found: Vec<i64> = self
            .channels
            .values()
            .flatten()
            .filter(|p| {
                p.name == package.name
                    && p.evr() == package.evr()
                    && p.grouping_arch() == package.grouping_arch()
            })
            .filter_map(|p| p.id)
            .collect();
        Ok(match found.as_slice() {
            [id] => Some(*id),
            _ => None,
        })
    }

    fn providing_errata(&self, package_id: i64) -> Result<Vec<Erratum>> {
        Ok(self.errata.get(&package_id).cloned().unwrap_or_default())
    }

    fn search_packages(&self, query: &str) -> Result<Vec<PackageRecord>> {
        Ok(self.search_results.get(query).cloned().unwrap_or_default())
    }

    fn channel_errata(
        &self,
        channel: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<Erratum>> {
        let since = since.map(|d| d.format("%Y-%m-%d").to_string());
        Ok(self
            .channel_errata
            .get(channel)
            .into_iter()
            .flatten()
            .filter(|e| since.as_ref().is_none_or(|d| &e.issue_date >= d))
            .cloned()
            .collect())
    }
}

impl Admin for FakeSatellite {
    fn system_groups(&self) -> Result<Vec<SystemGroup>> {
        Ok(self.groups.borrow().clone())
    }

    fn create_system_group(&self, name: &str, description: &str) -> Result<SystemGroup> {
        self.refuse(name)?;
        let created = self
            .calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("systemgroup.create "))
            .count();
        let group = SystemGroup {
            id: 100 + created as i64,
            name: name.to_string(),
            description: description.to_string(),
        };
        self.record(format!("systemgroup.create {name}"));
        self.groups.borrow_mut().push(group.clone());
        Ok(group)
    }

    fn activation_keys(&self) -> Result<Vec<String>> {
        Ok(self.activation_keys.borrow().clone())
    }

    fn create_activation_key(&self, key: &ActivationKey) -> Result<String> {
        let name = key.unprefixed();
        self.refuse(name)?;
        self.record(format!("activationkey.create {name}"));
        let created = format!("1-{name}");
        self.activation_keys.borrow_mut().push(created.clone());
        Ok(created)
    }

    fn update_activation_key(&self, key: &str, update: &KeyUpdate) -> Result<()> {
        let call = match update {
            KeyUpdate::ConfigChannels(labels) => {
                format!("{} {key} {}", update.method(), labels.join(","))
            }
            KeyUpdate::ServerGroups(ids) => {
                format!("{} {key} {}", update.method(), ids.iter().join(","))
            }
            _ => format!("{} {key}", update.method()),
        };
        self.record(call);
        Ok(())
    }

    fn config_channels(&self) -> Result<Vec<ConfigChannel>> {
        Ok(self.config_channels.borrow().clone())
    }

    fn config_channel_exists(&self, label: &str) -> Result<bool> {
        Ok(self.config_channels.borrow().iter().any(|c| c.label == label))
    }

    fn config_files(&self, label: &str) -> Result<Vec<ConfigFile>> {
        Ok(self
            .config_files
            .borrow()
            .get(label)
            .cloned()
            .unwrap_or_default())
    }

    fn create_config_channel(&self, channel: &ConfigChannel) -> Result<()> {
        self.record(format!("configchannel.create {}", channel.label));
        self.config_channels.borrow_mut().push(channel.clone());
        Ok(())
    }

    fn delete_config_channel(&self, label: &str) -> Result<()> {
        self.record(format!("configchannel.deleteChannels {label}"));
        self.config_channels.borrow_mut().retain(|c| c.label != label);
        self.config_files.borrow_mut().remove(label);
        Ok(())
    }

    fn put_config_file(&self, label: &str, file: &ConfigFile) -> Result<()> {
        self.refuse(&file.path)?;
        let method = match file.kind {
            ConfigFileKind::Symlink => "configchannel.createOrUpdateSymlink",
            _ => "configchannel.createOrUpdatePath",
        };
        self.record(format!("{method} {label} {}", file.path));
        self.config_files
            .borrow_mut()
            .entry(label.to_string())
            .or_default()
            .push(file.clone());
        Ok(())
    }

    fn kickstarts(&self) -> Result<Vec<String>> {
        Ok(self.kickstarts.borrow().clone())
    }

    fn crypto_keys(&self) -> Result<Vec<String>> {
        Ok(self.crypto_keys.borrow().clone())
    }

    fn file_preservations(&self) -> Result<Vec<String>> {
        Ok(self.file_preservations.borrow().clone())
    }

    fn create_kickstart(&self, label: &str, _tree: &str, _root_password: &str) -> Result<()> {
        self.refuse(label)?;
        self.record(format!("kickstart.createProfile {label}"));
        self.kickstarts.borrow_mut().push(label.to_string());
        Ok(())
    }

    fn update_kickstart(&self, label: &str, update: &ProfileUpdate) -> Result<()> {
        let call = match update {
            ProfileUpdate::ActivationKey(key) => format!("{} {label} {key}", update.method()),
            _ => format!("{} {label}", update.method()),
        };
        self.record(call);
        Ok(())
    }

    fn create_crypto_key(&self, key: &CryptoKey) -> Result<()> {
        self.record(format!("kickstart.keys.create {}", key.description));
        self.crypto_keys.borrow_mut().push(key.description.clone());
        Ok(())
    }

    fn create_file_preservation(&self, list: &FilePreservation) -> Result<()> {
        self.record(format!("kickstart.filepreservation.create {}", list.name));
        self.file_preservations.borrow_mut().push(list.name.clone());
        Ok(())
    }

    fn software_channels(&self) -> Result<Vec<SoftwareChannel>> {
        Ok(self.software_channels.borrow().clone())
    }

    fn custom_channels(&self) -> Result<Vec<SoftwareChannel>> {
        self.software_channels()
    }

    fn channel_details(&self, label: &str) -> Result<ChannelDetails> {
        Ok(self
            .channel_details
            .get(label)
            .cloned()
            .unwrap_or_else(|| ChannelDetails {
                label: label.to_string(),
                ..Default::default()
            }))
    }

    fn clone_channel(
        &self,
        source: &str,
        details: &CloneDetails,
        original_state: bool,
    ) -> Result<()> {
        self.refuse(&details.label)?;
        let suffix = if original_state { " original" } else { "" };
        self.record(format!(
            "channel.software.clone {source} {}{suffix}",
            details.label
        ));
        self.software_channels.borrow_mut().push(software_channel(
            &details.label,
            details.parent_label.as_deref().unwrap_or_default(),
        ));
        self.clones.borrow_mut().push(details.clone());
        Ok(())
    }

    fn delete_channel(&self, label: &str) -> Result<()> {
        self.record(format!("channel.software.delete {label}"));
        self.software_channels.borrow_mut().retain(|c| c.label != label);
        Ok(())
    }

    fn channel_sharing(&self, label: &str) -> Result<String> {
        Ok(self
            .sharing
            .borrow()
            .get(label)
            .cloned()
            .unwrap_or_else(|| "private".to_string()))
    }

    fn set_channel_sharing(&self, label: &str, sharing: Sharing) -> Result<()> {
        self.record(format!("channel.access.setOrgSharing {label} {sharing}"));
        self.sharing
            .borrow_mut()
            .insert(label.to_string(), sharing.to_string());
        Ok(())
    }

    fn orgs(&self) -> Result<Vec<Org>> {
        Ok(self.orgs.clone())
    }

    fn enable_org_access(&self, label: &str, org_id: i64) -> Result<()> {
        self.record(format!("channel.org.enableAccess {label} {org_id}"));
        Ok(())
    }
}
