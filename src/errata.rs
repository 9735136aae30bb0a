// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::io::Write;

use anyhow::{Result, bail};
use cli_table::{
    Cell, Style, Table,
    format::{HorizontalLine, Separator, VerticalLine},
};
use itertools::Itertools;
use regex::Regex;
use tracing::{debug, warn};

use crate::{api::Satellite, package::PackageRecord, versions::Evr};

/// Architectures that can end an RPM file name
const RPM_ARCHES: &[&str] = &[
    "noarch", "src", "nosrc", "i386", "i486", "i586", "i686", "athlon", "x86_64", "amd64",
    "AMD64", "ia32e", "ia64", "ppc", "ppc64", "ppc64le", "ppc64p7", "s390", "s390x", "aarch64",
    "armv7hl",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrataOptions {
    pub name: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub query: Option<String>,
    pub filename: Option<String>,
}

impl ErrataOptions {
    /// The raw query wins over the file name, which wins over the fields
    pub fn query(&self) -> Result<String> {
        if let Some(q) = self.query.as_ref().filter(|q| !q.trim().is_empty()) {
            return Ok(q.clone());
        }
        if let Some(f) = &self.filename {
            return query_from_filename(f);
        }
        let query = query_from_fields(&[
            ("name", self.name.as_deref()),
            ("version", self.version.as_deref()),
            ("release", self.release.as_deref()),
            ("arch", self.arch.as_deref()),
        ]);
        if query.is_empty() {
            bail!("You must provide a package name, a file name or a query");
        }
        Ok(query)
    }
}

/// `name:"zsh" AND version:"4.2.6"`, skipping empty fields
pub fn query_from_fields(fields: &[(&str, Option<&str>)]) -> String {
    fields
        .iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| format!("{k}:\"{v}\"")))
        .join(" AND ")
}

/// Parse `name-[epoch:]version-release[.arch][.rpm]`
pub fn query_from_filename(filename: &str) -> Result<String> {
    let nevr = Regex::new(r"^(?<name>.+)-(?<evr>(?:\d+:)?[^-:]+-[^-:]+)$")?;

    let base = filename.trim();
    let base = base.strip_suffix(".rpm").unwrap_or(base);
    let (base, arch) = match base.rsplit_once('.') {
        Some((rest, a)) if RPM_ARCHES.contains(&a) => (rest, Some(a)),
        _ => (base, None),
    };

    let Some(caps) = nevr.captures(base) else {
        bail!("Could not parse package file name '{filename}', expected name-version-release.arch.rpm");
    };
    let evr = Evr::parse(&caps["evr"])?;
    let query = query_from_fields(&[
        ("name", Some(&caps["name"])),
        ("epoch", Some(evr.epoch)),
        ("version", Some(evr.version)),
        ("release", Some(evr.release)),
        ("arch", arch),
    ]);
    debug!("Parsed '{}' as '{}'", filename, query);
    Ok(query)
}

/// Print the packages matching the query with the errata providing them
///
/// Returns the number of matching packages.
pub fn list_errata(api: &dyn Satellite, query: &str, out: &mut dyn Write) -> Result<usize> {
    let mut packages = api.search_packages(query)?;
    if packages.is_empty() {
        warn!("No package matches '{}'", query);
        return Ok(0);
    }
    packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.evr().cmp(&b.evr())));

    let mut rows = vec![];
    for p in &packages {
        let Some(id) = p.id else {
            warn!("Package {} has no identifier, skipping", p);
            continue;
        };
        let errata = api.providing_errata(id)?;
        if errata.is_empty() {
            rows.push(row(id, p, "", ""));
        }
        for e in errata {
            rows.push(row(id, p, &e.advisory, &e.synopsis));
        }
    }

    let table = rows
        .into_iter()
        .map(|r| r.into_iter().map(|c| c.cell()).collect::<Vec<_>>())
        .table()
        .separator(
            Separator::builder()
                .column(Some(VerticalLine::new('|')))
                .title(Some(HorizontalLine::new('+', '+', '+', '-')))
                .build(),
        )
        .title(vec![
            "Package ID".cell().bold(true),
            "Package".cell().bold(true),
            "Advisory".cell().bold(true),
            "Synopsis".cell().bold(true),
        ]);
    writeln!(out, "{}", table.display()?)?;
    Ok(packages.len())
}

fn row(id: i64, package: &PackageRecord, advisory: &str, synopsis: &str) -> Vec<String> {
    vec![
        id.to_string(),
        package.to_string(),
        advisory.to_string(),
        synopsis.to_string(),
    ]
}
