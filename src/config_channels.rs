// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Configuration channel clones
//!
//! Only the latest revision of each file is copied, the history stays with
//! the source channel.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::admin::{Admin, ConfigChannel, ConfigFile};

/// What to do when the destination channel exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Existing {
    #[default]
    Refuse,
    /// Add new revisions of the files
    Update,
    /// Delete and recreate the channel
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigCloneOptions {
    pub source: Option<String>,
    pub dest: Option<String>,
    pub existing: Existing,
    pub list: bool,
}

impl ConfigCloneOptions {
    /// Source and destination labels
    pub fn labels(&self) -> Result<(&str, &str)> {
        match (&self.source, &self.dest) {
            (Some(s), Some(d)) => Ok((s.as_str(), d.as_str())),
            _ => bail!("Both source and destination channel labels are needed"),
        }
    }

    pub fn check(&self) -> Result<()> {
        if !self.list {
            self.labels()?;
        }
        Ok(())
    }
}

/// Files that could not be copied
pub type Rejects = Vec<ConfigFile>;

/// Copy a configuration channel and its files
///
/// Returns the files that could not be copied, the others are kept.
pub fn clone_config_channel(
    api: &dyn Admin,
    source: &str,
    dest: &str,
    existing: Existing,
    now: NaiveDateTime,
) -> Result<Rejects> {
    let channels = api.config_channels()?;
    let Some(channel) = channels.iter().find(|c| c.label == source) else {
        bail!("Configuration channel {source} does not exist");
    };
    let mut files = api.config_files(source)?;
    debug!("Found {} files in {}", files.len(), source);

    let clone = ConfigChannel {
        label: dest.to_string(),
        name: dest.to_string(),
        description: format!(
            "{} [Cloned on {}]",
            channel.description,
            now.format("%Y-%m-%d %H:%M")
        ),
    };

    if channels.iter().any(|c| c.label == dest) {
        match existing {
            Existing::Refuse => bail!(
                "Configuration channel {dest} already exists, use --update or --replace"
            ),
            Existing::Update => {
                info!("Configuration channel {} exists, updating its files", dest);
                // new revisions on top of the existing ones
                for f in files.iter_mut() {
                    f.revision = None;
                }
            }
            Existing::Replace => {
                info!("Replacing configuration channel {}", dest);
                api.delete_config_channel(dest)?;
                api.create_config_channel(&clone)
                    .with_context(|| format!("Creating configuration channel {dest}"))?;
            }
        }
    } else {
        api.create_config_channel(&clone)
            .with_context(|| format!("Creating configuration channel {dest}"))?;
        info!("Created configuration channel {}", dest);
    }

    let mut rejects = vec![];
    for f in files {
        match api.put_config_file(dest, &f) {
            Ok(()) => debug!("Added {:?} {} to {}", f.kind, f.path, dest),
            Err(e) => {
                warn!("Could not add {} to {}: {:?}", f.path, dest, e);
                rejects.push(f);
            }
        }
    }
    Ok(rejects)
}

/// `<label>-rejects.json` in the current directory
pub fn rejects_path(dest: &str) -> PathBuf {
    PathBuf::from(format!("{dest}-rejects.json"))
}

/// Keep the files that could not be copied, to add them by hand
pub fn write_rejects(path: &Path, rejects: &Rejects) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Creating rejects file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, rejects)?;
    writer.flush()?;
    Ok(())
}

pub fn write_config_channels(out: &mut dyn Write, channels: &[ConfigChannel]) -> Result<()> {
    writeln!(out, "Existing Configuration Channels:")?;
    for c in channels {
        writeln!(out, "{}", c.label)?;
    }
    Ok(())
}
