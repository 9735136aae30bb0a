// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, bail};
use cli_table::{
    Cell, Style, Table,
    format::{HorizontalLine, Separator, VerticalLine},
};
use tracing::info;

use crate::{
    api::SystemRecord,
    cli::Format,
    diff::{DiffResult, PackageStatus, Status},
};

/// First line of the report of a system
pub fn write_system_header(
    out: &mut dyn Write,
    system: &SystemRecord,
    base: &str,
    children: &[String],
) -> io::Result<()> {
    let mut channels = vec![base];
    channels.extend(children.iter().map(|c| c.as_str()));
    writeln!(
        out,
        "SYSTEM({},{}) : ----- : CHANNELS({})",
        system.name,
        system.id,
        channels.join(",")
    )
}

/// Status column of the line report, packages matching the channel have none
fn report_label(status: Status) -> Option<&'static str> {
    match status {
        Status::Missing => Some("NOT_FOUND_IN_CHANNEL"),
        Status::Older => Some("OLDER_THAN_CHANNEL_LATEST"),
        Status::Newer => Some("NEWER_THAN_CHANNEL_LATEST"),
        Status::Same => None,
    }
}

/// `<pkg> <STATUS> <channel pkg|None> <advisory,...>`
pub fn report_line(s: &PackageStatus) -> Option<String> {
    let label = report_label(s.status)?;
    let channel = s
        .channel_latest
        .as_ref()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "None".to_string());
    Some(format!(
        "{} {} {} {}",
        s.installed,
        label,
        channel,
        s.advisories.join(",")
    ))
}

/// Lines for the packages differing from the channel
pub fn write_report_lines(out: &mut dyn Write, statuses: &[PackageStatus]) -> io::Result<()> {
    writeln!(
        out,
        "SYSTEM_PACKAGE STATUS CHANNEL_LATEST ERRATA_CONTAINING_NEWEST"
    )?;
    for line in statuses.iter().filter_map(report_line) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn write_summary(out: &mut dyn Write, result: &DiffResult, format: Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *out, result)?;
            writeln!(out)?;
        }
        Format::Human => {
            if result.is_empty() {
                writeln!(out, "All packages match the channel latest versions")?;
                return Ok(());
            }
            let table = result
                .entries()
                .map(|(status, package)| vec![status.cell(), package.cell()])
                .table()
                .separator(
                    Separator::builder()
                        .column(Some(VerticalLine::new('|')))
                        .title(Some(HorizontalLine::new('+', '+', '+', '-')))
                        .build(),
                )
                .title(vec!["Status".cell().bold(true), "Package".cell().bold(true)]);
            writeln!(out, "{}", table.display()?)?;
        }
    }
    Ok(())
}

/// Write the result as a JSON document
///
/// An existing file is only replaced with `force`.
pub fn write_output(path: &Path, result: &DiffResult, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Output file '{}' already exists, use --force to overwrite it",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .with_context(|| format!("Creating output file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writer.flush()?;
    info!("Wrote {} entries to {}", result.len(), path.display());
    Ok(())
}
