// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::{
    collections::HashMap,
    env,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};
use reqwest::Url;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

/// Section used for every server without its own section
const DEFAULT_SECTION: &str = "DEFAULT";
const API_PATH: &str = "/rpc/api";

// Note, "key = " lines produce Some("") when using Option
// So let's use String everywhere and clean afterwards.
#[derive(Deserialize, Debug, PartialEq, Eq, Default)]
struct RawSection {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    proxy_url: String,
    #[serde(default)]
    proxy_user: String,
    #[serde(default)]
    proxy_password: String,
    #[serde(default)]
    insecure: String,
}

/// Content of the credentials file, one section per server hostname
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    sections: HashMap<String, RawSection>,
}

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug)]
pub struct ProxyConfiguration {
    pub url: String,
    pub credentials: Option<Credentials>,
}

/// Everything needed to open a session on a server
#[derive(Debug)]
pub struct ServerConfiguration {
    pub url: Url,
    pub credentials: Credentials,
    pub proxy: Option<ProxyConfiguration>,
    /// Skip TLS certificate verification, for self-signed servers
    pub insecure: bool,
}

impl Configuration {
    fn parse(src: &str) -> Result<Self> {
        let sections: HashMap<String, RawSection> = serde_ini::from_str(src)?;
        Ok(Self { sections })
    }

    /// A missing file is an empty configuration, credentials can come from the
    /// command line.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(
                "Configuration file '{}' does not exist, using an empty configuration",
                path.display()
            );
            return Ok(Self::default());
        }
        let c = read_to_string(path)?;
        Self::parse(&c)
    }

    /// Value from the server section, or from the default section
    fn value<'a>(&'a self, server: &str, field: fn(&'a RawSection) -> &'a String) -> &'a str {
        [server, DEFAULT_SECTION]
            .iter()
            .filter_map(|s| self.sections.get(*s))
            .map(field)
            .find(|v| !v.is_empty())
            .map(|v| v.as_str())
            .unwrap_or("")
    }

    /// Resolve the configuration for a server, command line values win
    pub fn server(
        &self,
        server: &str,
        login: Option<String>,
        password: Option<String>,
    ) -> Result<ServerConfiguration> {
        let host = server_host(server);
        let username = login
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.value(host, |s| &s.login).to_string());
        let password = password
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.value(host, |s| &s.password).to_string());
        if username.is_empty() || password.is_empty() {
            bail!(
                "No credentials configured for server '{}', add a '[{}]' section with 'login' and 'password' or use the --login and --password options",
                host,
                host
            )
        }

        let proxy_url = self.value(host, |s| &s.proxy_url);
        let proxy_user = self.value(host, |s| &s.proxy_user);
        let proxy_password = self.value(host, |s| &s.proxy_password);
        let proxy = if proxy_url.is_empty() {
            None
        } else {
            let credentials = match (proxy_user.is_empty(), proxy_password.is_empty()) {
                (false, false) => Some(Credentials {
                    username: proxy_user.to_string(),
                    password: SecretString::from(proxy_password.to_string()),
                }),
                _ => None,
            };
            Some(ProxyConfiguration {
                url: proxy_url.to_string(),
                credentials,
            })
        };

        let insecure = matches!(
            self.value(host, |s| &s.insecure).to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );

        Ok(ServerConfiguration {
            url: api_url(server)?,
            credentials: Credentials {
                username,
                password: SecretString::from(password),
            },
            proxy,
            insecure,
        })
    }
}

/// Replace a leading `~/` with the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Hostname used to find the configuration section
fn server_host(server: &str) -> &str {
    let s = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    s.split('/').next().unwrap_or(s)
}

/// API endpoint for a server given as a hostname or as a URL
pub fn api_url(server: &str) -> Result<Url> {
    if server.starts_with("http://") || server.starts_with("https://") {
        let mut url = Url::parse(server)?;
        if url.path().is_empty() || url.path() == "/" {
            url.set_path(API_PATH);
        }
        Ok(url)
    } else {
        Ok(Url::parse(&format!("https://{server}{API_PATH}"))?)
    }
}
