// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Software channel administration: clones, deletions and organization access

use std::io::Write;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDateTime;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::admin::{Admin, CloneDetails, Sharing, SoftwareChannel};

/// Label words written in capitals in channel names
const CAPITAL_WORDS: &[&str] = &["rhn", "rhel", "as", "es", "ws", "lbg"];
/// Label words kept as-is in channel names
const ARCH_WORDS: &[&str] = &["i386", "x86_64"];

/// `rhel-x86_64-server-5` becomes `RHEL x86_64 Server 5`
pub fn label_to_name(label: &str) -> String {
    label
        .split('-')
        .flat_map(|word| {
            if ARCH_WORDS.contains(&word) {
                vec![word.to_string()]
            } else {
                word.split('_').map(name_word).collect()
            }
        })
        .join(" ")
}

fn name_word(word: &str) -> String {
    if CAPITAL_WORDS.contains(&word) {
        return word.to_uppercase();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// How clone labels are made from source labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The clone label, or a prefix when children are cloned too
    Label(String),
    /// `s/FROM/TO/` substitution on the source labels
    Replace { from: String, to: String },
}

impl Destination {
    pub fn new(dest: Option<String>, regex: Option<String>) -> Result<Self> {
        match (dest, regex) {
            (Some(d), None) => Ok(Destination::Label(d)),
            (None, Some(r)) => {
                let parts: Vec<&str> = r.split('/').collect();
                match parts.as_slice() {
                    [_, from, to, ..] if !from.is_empty() => Ok(Destination::Replace {
                        from: from.to_string(),
                        to: to.to_string(),
                    }),
                    _ => bail!("Invalid substitution '{}', expected s/FROM/TO/", r),
                }
            }
            (Some(_), Some(_)) => bail!("--dest and --regex can't be used together"),
            (None, None) => bail!("A destination label or a substitution is needed"),
        }
    }

    fn label(&self, source: &str, with_children: bool) -> String {
        match self {
            Destination::Label(d) if with_children => format!("{d}_{source}"),
            Destination::Label(d) => d.clone(),
            Destination::Replace { from, to } => source.replace(from.as_str(), to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOptions {
    pub source: String,
    pub destination: Destination,
    pub parent: Option<String>,
    pub child: bool,
    pub original_state: bool,
}

/// Source and clone labels, the base channel first
pub fn clone_plan(api: &dyn Admin, opts: &CloneOptions) -> Result<Vec<(String, String)>> {
    let channels = api.software_channels()?;
    if !channels.iter().any(|c| c.label == opts.source) {
        bail!(
            "Source channel {} does not exist, known channels are: {}",
            opts.source,
            channels.iter().map(|c| c.label.as_str()).join(", ")
        );
    }
    if let Some(parent) = opts
        .parent
        .as_ref()
        .filter(|p| !channels.iter().any(|c| c.is_base() && &c.label == *p))
    {
        bail!(
            "Parent channel {} is not an existing base channel, choose one of: {}",
            parent,
            channels
                .iter()
                .filter(|c| c.is_base())
                .map(|c| c.label.as_str())
                .join(", ")
        );
    }

    let mut sources = vec![opts.source.clone()];
    if opts.child {
        sources.extend(api.channel_children(&opts.source)?);
    }
    let plan: Vec<(String, String)> = sources
        .into_iter()
        .map(|s| {
            let clone = opts.destination.label(&s, opts.child);
            (s, clone)
        })
        .collect();

    if let Some((_, clone)) = plan
        .iter()
        .find(|(_, clone)| channels.iter().any(|c| &c.label == clone))
    {
        bail!("Destination channel {clone} already exists, choose another label");
    }
    Ok(plan)
}

/// Clone the channels of the plan
///
/// When children are cloned, they are attached to the clone of the base
/// channel.
pub fn clone_channels(
    api: &dyn Admin,
    opts: &CloneOptions,
    plan: &[(String, String)],
    now: NaiveDateTime,
) -> Result<()> {
    let mut parent = opts.parent.clone();
    for (i, (source, clone)) in plan.iter().enumerate() {
        let details = api.channel_details(source)?;
        let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
        let clone_details = CloneDetails {
            label: clone.clone(),
            name: label_to_name(clone),
            summary: format!(
                "Clone of {}, created on {}",
                source,
                now.format("%Y-%m-%d %H:%M:%S")
            ),
            parent_label: parent.clone(),
            gpg_url: non_empty(&details.gpg_key_url),
            gpg_id: non_empty(&details.gpg_key_id),
            gpg_fingerprint: non_empty(&details.gpg_key_fp),
        };
        debug!("Cloning {} with {:?}", source, clone_details);
        api.clone_channel(source, &clone_details, opts.original_state)
            .with_context(|| format!("Cloning {source} as {clone}"))?;
        info!("Cloned {} as {}", source, clone);

        if opts.child && i == 0 {
            parent = Some(clone.clone());
        }
    }
    Ok(())
}

/// Custom channels, children indented under their base channel
pub fn write_custom_channels(out: &mut dyn Write, channels: &[SoftwareChannel]) -> Result<()> {
    writeln!(out, "Custom Software Channels")?;
    writeln!(out, "========================")?;
    for base in channels.iter().filter(|c| c.is_base()) {
        writeln!(out, "{}", base.label)?;
        for child in channels.iter().filter(|c| c.parent_label == base.label) {
            writeln!(out, "  {}", child.label)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub channels: Vec<String>,
    pub recursive: bool,
    pub list: bool,
}

impl DeleteOptions {
    pub fn check(&self) -> Result<()> {
        if self.channels.is_empty() && !self.list {
            bail!("At least one channel label is needed");
        }
        if self.recursive && self.channels.len() > 1 {
            bail!("--recursive only works on one base channel at a time");
        }
        Ok(())
    }
}

/// Delete channels, children first with `recursive`
///
/// Unknown channels are skipped. Returns the deleted labels.
pub fn delete_channels(api: &dyn Admin, opts: &DeleteOptions) -> Result<Vec<String>> {
    let existing = api.software_channels()?;
    let mut deleted = vec![];
    for label in &opts.channels {
        if !existing.iter().any(|c| &c.label == label) {
            warn!("Channel {} does not exist, skipping it", label);
            continue;
        }
        let children = api.channel_children(label)?;
        if !children.is_empty() {
            if !opts.recursive {
                bail!(
                    "Channel {} has child channels ({}), delete them first or use --recursive",
                    label,
                    children.join(", ")
                );
            }
            for child in children {
                api.delete_channel(&child)
                    .with_context(|| format!("Deleting child channel {child}"))?;
                info!("Deleted child channel {}", child);
                deleted.push(child);
            }
        }
        api.delete_channel(label)
            .with_context(|| format!("Deleting channel {label}"))?;
        info!("Deleted channel {}", label);
        deleted.push(label.clone());
    }
    Ok(deleted)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessChange {
    Show,
    Set(Sharing),
    /// Only this organization, by name
    Org(String),
}

/// Show or change which organizations can use a channel
pub fn channel_access(
    api: &dyn Admin,
    channel: &str,
    change: &AccessChange,
    out: &mut dyn Write,
) -> Result<()> {
    let channels = api.software_channels()?;
    if !channels.iter().any(|c| c.label == channel) {
        bail!(
            "Channel {} does not exist, known channels are: {}",
            channel,
            channels.iter().map(|c| c.label.as_str()).join(", ")
        );
    }
    match change {
        AccessChange::Show => {
            let sharing = api.channel_sharing(channel)?;
            writeln!(out, "Org sharing for channel {channel} is {sharing}")?;
        }
        AccessChange::Set(sharing) => {
            api.set_channel_sharing(channel, *sharing)?;
            info!("Set org sharing of {} to {}", channel, sharing);
        }
        AccessChange::Org(name) => {
            let orgs = api.orgs()?;
            let org = orgs.iter().find(|o| &o.name == name).ok_or_else(|| {
                anyhow!(
                    "No organization named {}, known ones are: {}",
                    name,
                    orgs.iter().map(|o| o.name.as_str()).join(", ")
                )
            })?;
            debug!("Found organization {} with id {}", org.name, org.id);
            api.set_channel_sharing(channel, Sharing::Protected)?;
            api.enable_org_access(channel, org.id)?;
            info!("Gave organization {} access to {}", org.name, channel);
        }
    }
    Ok(())
}
