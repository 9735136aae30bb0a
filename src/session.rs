// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use reqwest::{Proxy, StatusCode, Url, blocking::Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::{
    activation_keys::{ActivationKey, flag},
    admin::{
        Admin, ChannelDetails, CloneDetails, ConfigChannel, ConfigFile, ConfigFileKind,
        KeyUpdate, Org, ProfileUpdate, Sharing, SoftwareChannel, SystemGroup,
    },
    api::{Erratum, Satellite, SystemRecord, decode_list},
    kickstarts::{CryptoKey, FilePreservation},
    config::ServerConfiguration,
    package::{PackageRecord, normalize_arch},
    xmlrpc::{Value, decode_response, encode_call},
};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Format of `dateTime.iso8601` values
const XMLRPC_DATE_FORMAT: &str = "%Y%m%dT%H:%M:%S";

/// Channels and kickstart profiles are listed as records with a label
#[derive(Deserialize)]
struct Labelled {
    #[serde(default)]
    label: Option<String>,
}

#[derive(Deserialize)]
struct KeyEntry {
    key: String,
}

#[derive(Deserialize)]
struct Described {
    description: String,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct FilePath {
    path: String,
}

/// `1`/`0` answers
#[derive(Deserialize)]
struct Answer(#[serde(deserialize_with = "flag")] bool);

fn record<T: Serialize>(value: &T) -> Result<Value> {
    Ok(Value::from(serde_json::to_value(value)?))
}

/// Authenticated session on the XML-RPC API
pub struct Session {
    inner: Client,
    server: Url,
    key: String,
}

impl Session {
    fn client(config: &ServerConfiguration) -> Result<Client> {
        let mut client = Client::builder()
            .use_native_tls()
            .user_agent(APP_USER_AGENT);

        if let Some(proxy_cfg) = &config.proxy {
            let mut proxy = Proxy::all(proxy_cfg.url.clone())?;
            if let Some(creds) = &proxy_cfg.credentials {
                proxy = proxy.basic_auth(&creds.username, creds.password.expose_secret());
            }
            client = client.proxy(proxy)
        }
        if config.insecure {
            warn!("TLS certificate verification is disabled for {}", config.url);
            client = client.danger_accept_invalid_certs(true);
        }
        Ok(client.build()?)
    }

    fn post(client: &Client, server: &Url, method: &str, params: &[Value]) -> Result<Value> {
        let body = encode_call(method, params)?;
        let res = client
            .post(server.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()?;

        // Special error messages for common errors
        match res.status() {
            StatusCode::UNAUTHORIZED => bail!("Received an HTTP 401 Unauthorized error when calling {}. Please check your credentials in the configuration.", method),
            StatusCode::FORBIDDEN => bail!("Received an HTTP 403 Forbidden error when calling {}. Please check your credentials in the configuration.", method),
            StatusCode::NOT_FOUND => bail!("Received an HTTP 404 Not found error from {}. Please check the server name.", server),
            _ => ()
        }

        let text = res.error_for_status()?.text()?;
        decode_response(&text).with_context(|| format!("Calling {method}"))
    }

    pub fn login(config: &ServerConfiguration) -> Result<Self> {
        let inner = Self::client(config)?;
        let creds = &config.credentials;
        let key = match Self::post(
            &inner,
            &config.url,
            "auth.login",
            &[
                Value::from(creds.username.as_str()),
                Value::from(creds.password.expose_secret()),
            ],
        )
        .with_context(|| format!("Logging in to {} as {}", config.url, creds.username))?
        {
            Value::String(k) => k,
            v => bail!("Unexpected session key {:?}", v),
        };
        info!("Logged in to {} as {}", config.url, creds.username);
        Ok(Self {
            inner,
            server: config.url.clone(),
            key,
        })
    }

    pub fn logout(self) -> Result<()> {
        Self::post(
            &self.inner,
            &self.server,
            "auth.logout",
            &[Value::from(self.key.as_str())],
        )?;
        debug!("Logged out from {}", self.server);
        Ok(())
    }

    /// Call a method with the session key as first parameter
    fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        debug!("Calling {}", method);
        let mut all = vec![Value::from(self.key.as_str())];
        all.extend(params);
        let value: serde_json::Value = Self::post(&self.inner, &self.server, method, &all)?.into();
        serde_json::from_value(value).with_context(|| format!("Decoding the {method} response"))
    }

    fn call_list<T: DeserializeOwned>(
        &self,
        kind: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Vec<T>> {
        let raw: Vec<serde_json::Value> = self.call(method, params)?;
        Ok(decode_list(kind, raw))
    }

    /// Call a method returning `1` on success
    fn call_done(&self, method: &str, params: Vec<Value>) -> Result<()> {
        let _: serde_json::Value = self.call(method, params)?;
        Ok(())
    }

    fn labels(&self, kind: &str, method: &str, params: Vec<Value>) -> Result<Vec<String>> {
        Ok(self
            .call_list::<Labelled>(kind, method, params)?
            .into_iter()
            .filter_map(|c| c.label)
            .collect())
    }

    fn channel_labels(&self, method: &str, params: Vec<Value>) -> Result<Vec<String>> {
        self.labels("channel", method, params)
    }
}

impl Satellite for Session {
    fn system(&self, id: i64) -> Result<SystemRecord> {
        self.call("system.getName", vec![Value::from(id)])
    }

    fn systems_named(&self, name: &str) -> Result<Vec<SystemRecord>> {
        self.call_list("system", "system.getId", vec![Value::from(name)])
    }

    fn base_channel(&self, system_id: i64) -> Result<Option<String>> {
        let c: Labelled =
            self.call("system.getSubscribedBaseChannel", vec![Value::from(system_id)])?;
        Ok(c.label.filter(|l| !l.is_empty()))
    }

    fn subscribed_child_channels(&self, system_id: i64) -> Result<Vec<String>> {
        self.channel_labels(
            "system.listSubscribedChildChannels",
            vec![Value::from(system_id)],
        )
    }

    fn channel_children(&self, channel: &str) -> Result<Vec<String>> {
        self.channel_labels("channel.software.listChildren", vec![Value::from(channel)])
    }

    fn subscribed_systems(&self, channel: &str) -> Result<Vec<SystemRecord>> {
        self.call_list(
            "system",
            "channel.software.listSubscribedSystems",
            vec![Value::from(channel)],
        )
    }

    fn installed_packages(&self, system_id: i64) -> Result<Vec<PackageRecord>> {
        self.call_list("package", "system.listPackages", vec![Value::from(system_id)])
    }

    fn channel_packages(&self, channel: &str) -> Result<Vec<PackageRecord>> {
        self.call_list(
            "package",
            "channel.software.listAllPackages",
            vec![Value::from(channel)],
        )
    }

    fn find_package_id(&self, package: &PackageRecord) -> Result<Option<i64>> {
        let found: Vec<PackageRecord> = self.call_list(
            "package",
            "packages.findByNvrea",
            vec![
                Value::from(package.name.as_str()),
                Value::from(package.version.as_str()),
                Value::from(package.release.as_str()),
                Value::from(package.epoch.trim()),
                Value::from(normalize_arch(&package.arch)),
            ],
        )?;
        Ok(match found.as_slice() {
            [p] => p.id,
            _ => None,
        })
    }

    fn providing_errata(&self, package_id: i64) -> Result<Vec<Erratum>> {
        self.call_list(
            "erratum",
            "packages.listProvidingErrata",
            vec![Value::from(package_id)],
        )
    }

    fn search_packages(&self, query: &str) -> Result<Vec<PackageRecord>> {
        self.call_list("package", "packages.search.advanced", vec![Value::from(query)])
    }

    fn channel_errata(
        &self,
        channel: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<Erratum>> {
        let mut params = vec![Value::from(channel)];
        if let Some(d) = since {
            params.push(Value::DateTime(d.format(XMLRPC_DATE_FORMAT).to_string()));
        }
        self.call_list("erratum", "channel.software.listErrata", params)
    }
}

/// Parameters of `configchannel.createOrUpdatePath` and `createOrUpdateSymlink`
fn file_info(file: &ConfigFile) -> Value {
    let mut info = BTreeMap::new();
    let mut set = |k: &str, v: Value| {
        info.insert(k.to_string(), v);
    };
    if let Some(r) = file.revision {
        set("revision", Value::from(r));
    }
    set("selinux_ctx", Value::from(file.selinux_ctx.as_str()));
    match file.kind {
        ConfigFileKind::Symlink => {
            set(
                "target_path",
                Value::from(file.target_path.clone().unwrap_or_default()),
            );
        }
        ConfigFileKind::File | ConfigFileKind::Directory => {
            set("owner", Value::from(file.owner.as_str()));
            set("group", Value::from(file.group.as_str()));
            set("permissions", Value::from(file.permissions_mode.as_str()));
        }
    }
    if file.kind == ConfigFileKind::File {
        set("contents", Value::from(file.contents.clone().unwrap_or_default()));
        set("binary", Value::from(file.binary));
        if let Some(d) = &file.macro_start_delimiter {
            set("macro-start-delimiter", Value::from(d.as_str()));
        }
        if let Some(d) = &file.macro_end_delimiter {
            set("macro-end-delimiter", Value::from(d.as_str()));
        }
    }
    Value::Struct(info)
}

impl Admin for Session {
    fn system_groups(&self) -> Result<Vec<SystemGroup>> {
        self.call_list("system group", "systemgroup.listAllGroups", vec![])
    }

    fn create_system_group(&self, name: &str, description: &str) -> Result<SystemGroup> {
        self.call(
            "systemgroup.create",
            vec![Value::from(name), Value::from(description)],
        )
    }

    fn activation_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .call_list::<KeyEntry>("activation key", "activationkey.listActivationKeys", vec![])?
            .into_iter()
            .map(|k| k.key)
            .collect())
    }

    fn create_activation_key(&self, key: &ActivationKey) -> Result<String> {
        let mut params = vec![
            Value::from(key.unprefixed()),
            Value::from(key.description.as_str()),
            Value::from(key.base_channel_label.as_str()),
        ];
        if let Some(limit) = key.usage_limit() {
            params.push(Value::from(limit));
        }
        params.push(Value::from(key.entitlements.clone()));
        params.push(Value::from(key.universal_default));
        self.call("activationkey.create", params)
    }

    fn update_activation_key(&self, key: &str, update: &KeyUpdate) -> Result<()> {
        let params = match update {
            KeyUpdate::ChildChannels(labels) => {
                vec![Value::from(key), Value::from(labels.to_vec())]
            }
            KeyUpdate::Packages(packages) => vec![Value::from(key), record(packages)?],
            KeyUpdate::ConfigChannels(labels) => vec![
                Value::from(vec![key]),
                Value::from(labels.clone()),
                // keep the order of the export
                Value::from(false),
            ],
            KeyUpdate::ConfigDeployment(_) => vec![Value::from(key)],
            KeyUpdate::ServerGroups(ids) => vec![Value::from(key), Value::from(ids.clone())],
        };
        self.call_done(update.method(), params)
    }

    fn config_channels(&self) -> Result<Vec<ConfigChannel>> {
        self.call_list("configuration channel", "configchannel.listGlobals", vec![])
    }

    fn config_channel_exists(&self, label: &str) -> Result<bool> {
        let Answer(exists) = self.call("configchannel.channelExists", vec![Value::from(label)])?;
        Ok(exists)
    }

    fn config_files(&self, label: &str) -> Result<Vec<ConfigFile>> {
        let paths: Vec<String> = self
            .call_list::<FilePath>("file", "configchannel.listFiles", vec![Value::from(label)])?
            .into_iter()
            .map(|f| f.path)
            .collect();
        if paths.is_empty() {
            return Ok(vec![]);
        }
        self.call_list(
            "file",
            "configchannel.lookupFileInfo",
            vec![Value::from(label), Value::from(paths)],
        )
    }

    fn create_config_channel(&self, channel: &ConfigChannel) -> Result<()> {
        self.call_done(
            "configchannel.create",
            vec![
                Value::from(channel.label.as_str()),
                Value::from(channel.name.as_str()),
                Value::from(channel.description.as_str()),
            ],
        )
    }

    fn delete_config_channel(&self, label: &str) -> Result<()> {
        self.call_done("configchannel.deleteChannels", vec![Value::from(vec![label])])
    }

    fn put_config_file(&self, label: &str, file: &ConfigFile) -> Result<()> {
        let (method, mut params) = match file.kind {
            ConfigFileKind::Symlink => (
                "configchannel.createOrUpdateSymlink",
                vec![Value::from(label), Value::from(file.path.as_str())],
            ),
            kind => (
                "configchannel.createOrUpdatePath",
                vec![
                    Value::from(label),
                    Value::from(file.path.as_str()),
                    Value::from(kind == ConfigFileKind::Directory),
                ],
            ),
        };
        params.push(file_info(file));
        self.call_done(method, params)
    }

    fn kickstarts(&self) -> Result<Vec<String>> {
        self.labels("kickstart", "kickstart.listKickstarts", vec![])
    }

    fn crypto_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .call_list::<Described>("crypto key", "kickstart.keys.listAllKeys", vec![])?
            .into_iter()
            .map(|k| k.description)
            .collect())
    }

    fn file_preservations(&self) -> Result<Vec<String>> {
        Ok(self
            .call_list::<Named>(
                "file preservation",
                "kickstart.filepreservation.listAllFilePreservations",
                vec![],
            )?
            .into_iter()
            .map(|l| l.name)
            .collect())
    }

    fn create_kickstart(&self, label: &str, tree: &str, root_password: &str) -> Result<()> {
        self.call_done(
            "kickstart.createProfile",
            vec![
                Value::from(label),
                Value::from("none"),
                Value::from(tree),
                // default kickstart host
                Value::from(""),
                Value::from(root_password),
            ],
        )
    }

    fn update_kickstart(&self, label: &str, update: &ProfileUpdate) -> Result<()> {
        let mut params = vec![Value::from(label)];
        match update {
            ProfileUpdate::ChildChannels(v)
            | ProfileUpdate::PartitioningScheme(v)
            | ProfileUpdate::SoftwareList(v) => params.push(Value::from(v.to_vec())),
            ProfileUpdate::AdvancedOptions(opts) => params.push(record(opts)?),
            ProfileUpdate::CustomOptions(v)
            | ProfileUpdate::FilePreservations(v)
            | ProfileUpdate::CryptoKeys(v) => params.push(Value::from(v.clone())),
            ProfileUpdate::Script(s) => params.extend([
                Value::from(s.contents.as_str()),
                Value::from(s.interpreter.as_str()),
                Value::from(s.script_type.as_str()),
                Value::from(s.chroot),
            ]),
            ProfileUpdate::IpRange(r) => {
                params.extend([Value::from(r.min.as_str()), Value::from(r.max.as_str())])
            }
            ProfileUpdate::Variables(vars) => params.push(record(vars)?),
            ProfileUpdate::RegistrationType(t) | ProfileUpdate::ActivationKey(t) => {
                params.push(Value::from(*t))
            }
            ProfileUpdate::ConfigManagement | ProfileUpdate::RemoteCommands => (),
        }
        self.call_done(update.method(), params)
    }

    fn create_crypto_key(&self, key: &CryptoKey) -> Result<()> {
        self.call_done(
            "kickstart.keys.create",
            vec![
                Value::from(key.description.as_str()),
                Value::from(key.kind.as_str()),
                Value::from(key.content.as_str()),
            ],
        )
    }

    fn create_file_preservation(&self, list: &FilePreservation) -> Result<()> {
        self.call_done(
            "kickstart.filepreservation.create",
            vec![
                Value::from(list.name.as_str()),
                Value::from(list.file_names.clone()),
            ],
        )
    }

    fn software_channels(&self) -> Result<Vec<SoftwareChannel>> {
        self.call_list("channel", "channel.listSoftwareChannels", vec![])
    }

    fn custom_channels(&self) -> Result<Vec<SoftwareChannel>> {
        // listMyChannels has no parent labels
        let mine: HashSet<String> = self
            .channel_labels("channel.listMyChannels", vec![])?
            .into_iter()
            .collect();
        Ok(self
            .software_channels()?
            .into_iter()
            .filter(|c| mine.contains(&c.label))
            .collect())
    }

    fn channel_details(&self, label: &str) -> Result<ChannelDetails> {
        self.call("channel.software.getDetails", vec![Value::from(label)])
    }

    fn clone_channel(
        &self,
        source: &str,
        details: &CloneDetails,
        original_state: bool,
    ) -> Result<()> {
        self.call_done(
            "channel.software.clone",
            vec![
                Value::from(source),
                record(details)?,
                Value::from(original_state),
            ],
        )
    }

    fn delete_channel(&self, label: &str) -> Result<()> {
        self.call_done("channel.software.delete", vec![Value::from(label)])
    }

    fn channel_sharing(&self, label: &str) -> Result<String> {
        self.call("channel.access.getOrgSharing", vec![Value::from(label)])
    }

    fn set_channel_sharing(&self, label: &str, sharing: Sharing) -> Result<()> {
        self.call_done(
            "channel.access.setOrgSharing",
            vec![Value::from(label), Value::from(sharing.to_string())],
        )
    }

    fn orgs(&self) -> Result<Vec<Org>> {
        self.call_list("organization", "org.listOrgs", vec![])
    }

    fn enable_org_access(&self, label: &str, org_id: i64) -> Result<()> {
        self.call_done(
            "channel.org.enableAccess",
            vec![Value::from(label), Value::from(org_id)],
        )
    }
}
