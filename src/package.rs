// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::fmt::{self, Display};

use anyhow::{Error, bail};
use serde::{Deserialize, Deserializer, de};

use crate::versions::Evr;

/// Some clients report 64-bit Intel systems with the Windows-style label
const LEGACY_X86_64_ARCH: &str = "AMD64";
const X86_64_ARCH: &str = "x86_64";
const UNKNOWN_ARCH: &str = "unknown";

/// Architecture label used to group packages
pub fn normalize_arch(arch: &str) -> &str {
    if arch.trim() == LEGACY_X86_64_ARCH {
        X86_64_ARCH
    } else {
        arch
    }
}

/// A package installed on a system or available in a channel
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "RawPackage")]
pub struct PackageRecord {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    /// Label as reported by the server, only normalized for grouping
    pub arch: String,
    /// Server-side identifier, needed to look up errata
    pub id: Option<i64>,
}

impl PackageRecord {
    pub fn new(name: &str, epoch: &str, version: &str, release: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            epoch: epoch.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn evr(&self) -> Evr<'_> {
        Evr::new(&self.epoch, &self.version, &self.release)
    }

    pub fn grouping_arch(&self) -> &str {
        normalize_arch(&self.arch)
    }

    /// Old up2date versions report packages without architecture
    pub fn has_unknown_arch(&self) -> bool {
        self.arch.trim().eq_ignore_ascii_case(UNKNOWN_ARCH)
    }
}

/// `name-version-release.arch`
impl Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}.{}",
            self.name, self.version, self.release, self.arch
        )
    }
}

/// Package as sent by the server
///
/// Depending on the call, the architecture is in `arch` or `arch_label`, and
/// the epoch is a string, a blank string or missing.
#[derive(Deserialize)]
struct RawPackage {
    name: String,
    #[serde(deserialize_with = "lenient_string")]
    version: String,
    #[serde(deserialize_with = "lenient_string")]
    release: String,
    #[serde(default, deserialize_with = "lenient_string")]
    epoch: String,
    #[serde(default)]
    arch: Option<String>,
    #[serde(default)]
    arch_label: Option<String>,
    #[serde(default)]
    id: Option<i64>,
}

impl TryFrom<RawPackage> for PackageRecord {
    type Error = Error;

    fn try_from(raw: RawPackage) -> Result<Self, Self::Error> {
        let arch = match (raw.arch_label, raw.arch) {
            (Some(a), _) if !a.is_empty() => a,
            (_, Some(a)) if !a.is_empty() => a,
            _ => bail!("Package '{}' has no architecture", raw.name),
        };
        if raw.name.is_empty() {
            bail!("Package has an empty name")
        }
        Ok(Self {
            name: raw.name,
            epoch: raw.epoch,
            version: raw.version,
            release: raw.release,
            arch,
            id: raw.id,
        })
    }
}

/// Accept numbers and null where strings are expected
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        v => Err(de::Error::custom(format!("expected a string, got '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::api::decode_list;

    fn decode_packages(raw: Vec<serde_json::Value>) -> Vec<PackageRecord> {
        decode_list("package", raw)
    }

    #[test]
    fn it_decodes_installed_packages() {
        let raw = vec![
            json!({"name": "zsh", "version": "4.2.6", "release": "3.el5", "epoch": " ", "arch": "x86_64"}),
            json!({"name": "bash", "version": "3.2", "release": "24.el5", "epoch": "", "arch": "AMD64", "installtime": "20120101T00:00:00"}),
        ];
        let packages = decode_packages(raw);
        assert_eq!(
            packages,
            vec![
                PackageRecord::new("zsh", " ", "4.2.6", "3.el5", "x86_64"),
                PackageRecord::new("bash", "", "3.2", "24.el5", "AMD64"),
            ]
        );
    }

    #[test]
    fn it_decodes_channel_packages() {
        let raw = vec![json!({
            "id": 1234,
            "name": "openssl",
            "version": "0.9.8e",
            "release": "22.el5",
            "epoch": 1,
            "arch_label": "i686",
            "checksum": "abcd"
        })];
        let packages = decode_packages(raw);
        assert_eq!(
            packages,
            vec![PackageRecord::new("openssl", "1", "0.9.8e", "22.el5", "i686").with_id(1234)]
        );
    }

    #[test]
    fn it_prefers_arch_label() {
        let raw = vec![json!({
            "name": "openssl", "version": "1", "release": "1",
            "arch": "Intel i686", "arch_label": "i686"
        })];
        assert_eq!(decode_packages(raw)[0].arch, "i686");
    }

    #[test]
    fn it_skips_invalid_entries() {
        let raw = vec![
            json!({"name": "noarch-less", "version": "1", "release": "1"}),
            json!({"version": "1", "release": "1", "arch": "x86_64"}),
            json!("not a package"),
            json!({"name": "ok", "version": "1", "release": "1", "arch": "noarch"}),
        ];
        let packages = decode_packages(raw);
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "ok");
    }

    #[rstest]
    #[case("AMD64", "x86_64")]
    #[case(" AMD64", "x86_64")]
    #[case("x86_64", "x86_64")]
    #[case("amd64", "amd64")]
    #[case("i386", "i386")]
    fn it_normalizes_arch(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_arch(raw), expected);
    }

    #[test]
    fn it_formats_records() {
        let p = PackageRecord::new("foo", "2", "1.0", "1.el5", "AMD64");
        assert_eq!(p.to_string(), "foo-1.0-1.el5.AMD64");
        assert_eq!(p.grouping_arch(), "x86_64");
        assert!(PackageRecord::new("foo", "", "1", "1", "Unknown").has_unknown_arch());
    }
}
