// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::{fmt::Display, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

/// Shared with the other API scripts
pub const DEFAULT_CONFIG_PATH: &str = "~/.rhninfo";
pub const DEFAULT_SERVER: &str = "localhost";

#[derive(ValueEnum, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Format {
    Json,
    #[default]
    Human,
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Json => "json",
                Self::Human => "human",
            }
        )
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file holding the credentials, one section per server
    #[arg(short, long, default_value_t = DEFAULT_CONFIG_PATH.into())]
    pub config: String,

    /// Server hostname or URL
    #[arg(short, long, default_value_t = DEFAULT_SERVER.into())]
    pub server: String,

    /// Login, overrides the configuration file
    #[arg(short, long)]
    pub login: Option<String>,

    /// Password, better kept in the configuration file
    #[arg(short, long)]
    pub password: Option<String>,

    /// Enable verbose logs
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,

    /// Disable non-error logs
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Output format of the logs and summaries
    #[arg(long, default_value_t = Format::Human)]
    pub format: Format,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compare the packages of systems with a channel
    ///
    /// Lists packages missing from the channel, older than the channel
    /// latest, or updated out of band, with the errata providing the newest
    /// version.
    #[command(visible_alias = "compare-system-to-channel")]
    Compare {
        #[arg(long, short, help = "Only process this system profile name")]
        profile: Option<String>,

        #[arg(
            long,
            short = 'i',
            help = "Only process this system ID (useful with duplicate profile names)"
        )]
        system_id: Option<i64>,

        #[arg(
            long,
            short,
            help = "Channel label to compare with, instead of the system's base channel"
        )]
        channel: Option<String>,

        #[arg(
            long,
            short = 'C',
            help = "Include child channels, subscribed ones for a system or all children of --channel"
        )]
        child: bool,

        #[arg(long, short, help = "Print a line-oriented report on stdout")]
        report: bool,

        #[arg(long, short, help = "Write the results to this file as JSON")]
        output: Option<PathBuf>,

        #[arg(long, help = "Overwrite the output file if it exists")]
        force: bool,
    },
    /// Search packages and list the errata providing them
    #[command(visible_alias = "list-errata-for-package")]
    Errata {
        #[arg(long, short, help = "Package name")]
        name: Option<String>,

        #[arg(long, short = 'V', help = "Package version")]
        pkg_version: Option<String>,

        #[arg(long, short, help = "Package release")]
        release: Option<String>,

        #[arg(long, short, help = "Package architecture")]
        arch: Option<String>,

        #[arg(
            long,
            short,
            help = "Raw Lucene query, overrides the other options"
        )]
        query: Option<String>,

        #[arg(
            long,
            short = 'F',
            help = "Build the query from an RPM file name (like 'zsh-4.2.6-3.el5.x86_64.rpm')"
        )]
        filename: Option<String>,
    },
    /// Export the errata of a source channel missing from its clone, as CSV
    #[command(visible_alias = "gen-patch-summary")]
    PatchSummary {
        #[arg(long, short, help = "Cloned channel label")]
        channel: Option<String>,

        #[arg(long, short, help = "Source channel label (where the channel was cloned from)")]
        source: Option<String>,

        #[arg(
            long,
            short,
            help = "Only consider errata released after this date (YYYY-MM-DD), defaults to the first day of the month"
        )]
        date: Option<String>,

        #[arg(long, short, help = "Output file, defaults to stdout")]
        output: Option<PathBuf>,

        #[arg(long, short = 'm', help = "JSON file grouping source and cloned channels")]
        channel_mapping: Option<PathBuf>,

        #[arg(long, short, help = "Channel group (from the mapping file) to summarise")]
        group: Option<String>,
    },
    /// Create the activation keys of a JSON export missing from the server
    ///
    /// Missing system groups are created, missing configuration channels
    /// are left out of the keys.
    #[command(visible_alias = "import-activationkeys")]
    ImportKeys {
        #[arg(help = "JSON file exported from another server")]
        file: PathBuf,

        #[arg(
            long,
            short,
            value_delimiter = ',',
            help = "Only import these keys (comma-separated), defaults to all keys of the file"
        )]
        key: Vec<String>,

        #[arg(long, short, help = "Import reactivation keys as well")]
        reactivation_keys: bool,

        #[arg(long, short = 'n', help = "Only report what would be imported")]
        dry_run: bool,

        #[arg(long, help = "List the keys of the file and exit")]
        list: bool,
    },
    /// Create the kickstart profiles of a JSON export missing from the server
    ///
    /// Activation keys, system groups, GPG/SSL keys and file preservation
    /// lists used by the profiles are created first.
    ImportKickstarts {
        #[arg(help = "JSON file exported from another server")]
        file: PathBuf,

        #[arg(
            long,
            short,
            value_delimiter = ',',
            help = "Only import these profiles (comma-separated), defaults to all profiles of the file"
        )]
        kickstart: Vec<String>,

        #[arg(long, help = "Root password of the new profiles")]
        root_password: Option<String>,

        #[arg(long, short = 'n', help = "Only report what would be imported")]
        dry_run: bool,

        #[arg(long, help = "List the profile labels of the file and exit")]
        list: bool,

        #[arg(long, short = 'P', help = "Print the profiles of the file and exit")]
        pretty_print: bool,
    },
    /// Clone a software channel, optionally with its children
    CloneChannel {
        #[arg(long = "source-channel", short = 'c', help = "Source channel label")]
        source: Option<String>,

        #[arg(
            long = "dest-channel",
            short = 'd',
            help = "Destination channel label, a prefix of the source labels with --child"
        )]
        dest: Option<String>,

        #[arg(
            long,
            short = 'x',
            help = "Substitution making the destination labels from the source ones, like 's/rhel/q1-rhel/'"
        )]
        regex: Option<String>,

        #[arg(long, short = 'r', help = "Clone the child channels too")]
        child: bool,

        #[arg(long, short, help = "Base channel of the clone")]
        parent: Option<String>,

        #[arg(long, short = 'n', help = "Clone the packages without the errata")]
        no_errata: bool,
    },
    /// Delete custom software channels
    DeleteChannel {
        #[arg(help = "Channel labels")]
        channels: Vec<String>,

        #[arg(long, short, help = "Delete the child channels first (dangerous)")]
        recursive: bool,

        #[arg(long, help = "List the custom channels and exit")]
        list: bool,
    },
    /// Show or change which organizations can use a software channel
    #[command(visible_alias = "channel-org-access")]
    ChannelAccess {
        #[arg(long, short, help = "Channel label")]
        channel: String,

        #[arg(long, short, help = "Set the sharing: public, private or protected")]
        sharing: Option<String>,

        #[arg(
            long,
            short,
            help = "Give this organization access, the channel becomes protected"
        )]
        org: Option<String>,
    },
    /// Copy a configuration channel and the latest revision of its files
    ///
    /// Files that can't be copied are written to `<DEST>-rejects.json`.
    #[command(visible_alias = "clone-configchannel")]
    CloneConfigChannel {
        #[arg(help = "Source configuration channel label")]
        source: Option<String>,

        #[arg(help = "Destination configuration channel label")]
        dest: Option<String>,

        #[arg(
            long,
            short,
            conflicts_with = "replace",
            help = "Add new file revisions to an existing destination"
        )]
        update: bool,

        #[arg(long, short, help = "Delete and recreate an existing destination")]
        replace: bool,

        #[arg(long, help = "List the configuration channels and exit")]
        list: bool,
    },
}

impl Command {
    /// Used as log file prefix
    pub fn name(&self) -> &'static str {
        match self {
            Command::Compare { .. } => "compare",
            Command::Errata { .. } => "errata",
            Command::PatchSummary { .. } => "patch-summary",
            Command::ImportKeys { .. } => "import-keys",
            Command::ImportKickstarts { .. } => "import-kickstarts",
            Command::CloneChannel { .. } => "clone-channel",
            Command::DeleteChannel { .. } => "delete-channel",
            Command::ChannelAccess { .. } => "channel-access",
            Command::CloneConfigChannel { .. } => "clone-config-channel",
        }
    }
}
