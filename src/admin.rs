// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Calls changing the server: imports, channel clones and deletions
//!
//! Listing calls used to find what already exists are here too.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use anyhow::{Error, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{
    activation_keys::{ActivationKey, KeyPackage, flag},
    api::Satellite,
    kickstarts::{AdvancedOption, CryptoKey, FilePreservation, IpRange, Script},
};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SystemGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SoftwareChannel {
    pub label: String,
    /// Empty for base channels
    #[serde(default)]
    pub parent_label: String,
}

impl SoftwareChannel {
    pub fn is_base(&self) -> bool {
        self.parent_label.is_empty()
    }
}

/// Details of a software channel kept by its clones
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDetails {
    pub label: String,
    #[serde(default)]
    pub gpg_key_url: String,
    #[serde(default)]
    pub gpg_key_id: String,
    #[serde(default)]
    pub gpg_key_fp: String,
}

/// Details of a new channel cloned from an existing one
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CloneDetails {
    pub label: String,
    pub name: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_fingerprint: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Org {
    pub id: i64,
    pub name: String,
}

/// Which organizations can use a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    Public,
    Private,
    /// Only the organizations given access
    Protected,
}

impl Display for Sharing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Sharing::Public => "public",
                Sharing::Private => "private",
                Sharing::Protected => "protected",
            }
        )
    }
}

impl FromStr for Sharing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_lowercase().as_str() {
            "public" => Sharing::Public,
            "private" => Sharing::Private,
            "protected" => Sharing::Protected,
            _ => bail!("Unknown sharing '{}', expected public, private or protected", s),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigChannel {
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFileKind {
    #[default]
    File,
    Directory,
    Symlink,
}

/// Latest revision of a file, directory or symlink of a configuration channel
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: ConfigFileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
    /// Octal, like `644`
    #[serde(default)]
    pub permissions_mode: String,
    #[serde(default)]
    pub selinux_ctx: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(
        rename = "macro-start-delimiter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub macro_start_delimiter: Option<String>,
    #[serde(
        rename = "macro-end-delimiter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub macro_end_delimiter: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub binary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
}

/// A change applied to an existing activation key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUpdate<'a> {
    ChildChannels(&'a [String]),
    Packages(&'a [KeyPackage]),
    ConfigChannels(Vec<&'a str>),
    ConfigDeployment(bool),
    ServerGroups(Vec<i64>),
}

impl KeyUpdate<'_> {
    pub fn method(&self) -> &'static str {
        match self {
            KeyUpdate::ChildChannels(_) => "activationkey.addChildChannels",
            KeyUpdate::Packages(_) => "activationkey.addPackages",
            KeyUpdate::ConfigChannels(_) => "activationkey.addConfigChannels",
            KeyUpdate::ConfigDeployment(true) => "activationkey.enableConfigDeployment",
            KeyUpdate::ConfigDeployment(false) => "activationkey.disableConfigDeployment",
            KeyUpdate::ServerGroups(_) => "activationkey.addServerGroups",
        }
    }
}

/// A setting applied to an existing kickstart profile
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileUpdate<'a> {
    ChildChannels(&'a [String]),
    AdvancedOptions(&'a [AdvancedOption]),
    PartitioningScheme(&'a [String]),
    SoftwareList(&'a [String]),
    CustomOptions(Vec<&'a str>),
    Script(&'a Script),
    IpRange(&'a IpRange),
    Variables(&'a BTreeMap<String, serde_json::Value>),
    RegistrationType(&'a str),
    FilePreservations(Vec<&'a str>),
    ConfigManagement,
    RemoteCommands,
    ActivationKey(&'a str),
    CryptoKeys(Vec<&'a str>),
}

impl ProfileUpdate<'_> {
    pub fn method(&self) -> &'static str {
        match self {
            ProfileUpdate::ChildChannels(_) => "kickstart.profile.setChildChannels",
            ProfileUpdate::AdvancedOptions(_) => "kickstart.profile.setAdvancedOptions",
            ProfileUpdate::PartitioningScheme(_) => {
                "kickstart.profile.system.setPartitioningScheme"
            }
            ProfileUpdate::SoftwareList(_) => "kickstart.profile.software.setSoftwareList",
            ProfileUpdate::CustomOptions(_) => "kickstart.profile.setCustomOptions",
            ProfileUpdate::Script(_) => "kickstart.profile.addScript",
            ProfileUpdate::IpRange(_) => "kickstart.profile.addIpRange",
            ProfileUpdate::Variables(_) => "kickstart.profile.setVariables",
            ProfileUpdate::RegistrationType(_) => "kickstart.profile.system.setRegistrationType",
            ProfileUpdate::FilePreservations(_) => {
                "kickstart.profile.system.addFilePreservations"
            }
            ProfileUpdate::ConfigManagement => "kickstart.profile.system.enableConfigManagement",
            ProfileUpdate::RemoteCommands => "kickstart.profile.system.enableRemoteCommands",
            ProfileUpdate::ActivationKey(_) => "kickstart.profile.keys.addActivationKey",
            ProfileUpdate::CryptoKeys(_) => "kickstart.profile.system.addKeys",
        }
    }
}

/// Administration capabilities of the management server
///
/// Creation calls fail when the entity already exists, callers check first.
pub trait Admin: Satellite {
    fn system_groups(&self) -> Result<Vec<SystemGroup>>;

    fn create_system_group(&self, name: &str, description: &str) -> Result<SystemGroup>;

    /// Keys with their organization prefix
    fn activation_keys(&self) -> Result<Vec<String>>;

    /// Returns the key given by the server
    fn create_activation_key(&self, key: &ActivationKey) -> Result<String>;

    fn update_activation_key(&self, key: &str, update: &KeyUpdate) -> Result<()>;

    fn config_channels(&self) -> Result<Vec<ConfigChannel>>;

    fn config_channel_exists(&self, label: &str) -> Result<bool>;

    /// Latest revision of every file of the channel
    fn config_files(&self, label: &str) -> Result<Vec<ConfigFile>>;

    fn create_config_channel(&self, channel: &ConfigChannel) -> Result<()>;

    fn delete_config_channel(&self, label: &str) -> Result<()>;

    /// Creates a new revision when the path exists
    fn put_config_file(&self, label: &str, file: &ConfigFile) -> Result<()>;

    /// Labels of the kickstart profiles
    fn kickstarts(&self) -> Result<Vec<String>>;

    /// Descriptions of the stored GPG and SSL keys
    fn crypto_keys(&self) -> Result<Vec<String>>;

    /// Names of the file preservation lists
    fn file_preservations(&self) -> Result<Vec<String>>;

    fn create_kickstart(&self, label: &str, tree: &str, root_password: &str) -> Result<()>;

    fn update_kickstart(&self, label: &str, update: &ProfileUpdate) -> Result<()>;

    fn create_crypto_key(&self, key: &CryptoKey) -> Result<()>;

    fn create_file_preservation(&self, list: &FilePreservation) -> Result<()>;

    fn software_channels(&self) -> Result<Vec<SoftwareChannel>>;

    /// Channels owned by the organization, the only ones that can be deleted
    fn custom_channels(&self) -> Result<Vec<SoftwareChannel>>;

    fn channel_details(&self, label: &str) -> Result<ChannelDetails>;

    /// `original_state` clones the packages without the errata
    fn clone_channel(&self, source: &str, details: &CloneDetails, original_state: bool)
    -> Result<()>;

    fn delete_channel(&self, label: &str) -> Result<()>;

    fn channel_sharing(&self, label: &str) -> Result<String>;

    fn set_channel_sharing(&self, label: &str, sharing: Sharing) -> Result<()>;

    fn orgs(&self) -> Result<Vec<Org>>;

    fn enable_org_access(&self, label: &str, org_id: i64) -> Result<()>;
}
