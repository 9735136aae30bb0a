// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

mod activation_keys;
mod admin;
mod api;
mod channels;
mod cli;
mod compare;
mod config;
mod config_channels;
mod diff;
mod errata;
mod kickstarts;
mod logs;
mod package;
mod patch_summary;
mod progress;
mod reduce;
mod report;
mod session;
mod versions;
mod xmlrpc;

use std::{
    fs::File,
    io::{self, BufWriter, Write},
};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use itertools::Itertools;
use secrecy::SecretString;
use tracing::{debug, error, info, warn};

use crate::{
    activation_keys::{ActivationKey, ImportRun, KeyImportOptions},
    admin::Admin,
    channels::{AccessChange, CloneOptions, DeleteOptions, Destination},
    cli::{Args, Command},
    compare::CompareOptions,
    config::{Configuration, expand_home},
    config_channels::{ConfigCloneOptions, Existing},
    errata::ErrataOptions,
    kickstarts::{Kickstart, KickstartImportOptions},
    logs::ok_output,
    patch_summary::PatchSummaryOptions,
    session::Session,
};

/// Options of a command, checked before logging in
enum Task {
    Compare(CompareOptions),
    Errata(ErrataOptions),
    PatchSummary(PatchSummaryOptions),
    /// Keys are read from the file before logging in
    ImportKeys(KeyImportOptions, Vec<ActivationKey>),
    ImportKickstarts(KickstartImportOptions, Vec<Kickstart>),
    CloneChannel(CloneOptions),
    DeleteChannel(DeleteOptions),
    ChannelAccess(String, AccessChange),
    CloneConfigChannel(ConfigCloneOptions),
}

impl Task {
    fn new(command: Command) -> Result<Self> {
        let task = match command {
            Command::Compare {
                profile,
                system_id,
                channel,
                child,
                report,
                output,
                force,
            } => {
                let opts = CompareOptions {
                    profile,
                    system_id,
                    channel,
                    child,
                    report,
                    output,
                    force,
                };
                opts.check()?;
                Task::Compare(opts)
            }
            Command::Errata {
                name,
                pkg_version,
                release,
                arch,
                query,
                filename,
            } => {
                let opts = ErrataOptions {
                    name,
                    version: pkg_version,
                    release,
                    arch,
                    query,
                    filename,
                };
                opts.query()?;
                Task::Errata(opts)
            }
            Command::PatchSummary {
                channel,
                source,
                date,
                output,
                channel_mapping,
                group,
            } => {
                let opts = PatchSummaryOptions {
                    channel,
                    source,
                    date,
                    output,
                    channel_mapping,
                    group,
                };
                opts.check()?;
                Task::PatchSummary(opts)
            }
            Command::ImportKeys {
                file,
                key,
                reactivation_keys,
                dry_run,
                list,
            } => {
                let opts = KeyImportOptions {
                    file,
                    keys: key,
                    reactivation_keys,
                    dry_run,
                    list,
                };
                let keys = opts.select(activation_keys::read_keys(&opts.file)?)?;
                Task::ImportKeys(opts, keys)
            }
            Command::ImportKickstarts {
                file,
                kickstart,
                root_password,
                dry_run,
                list,
                pretty_print,
            } => {
                let opts = KickstartImportOptions {
                    file,
                    labels: kickstart,
                    root_password: root_password.map(SecretString::from),
                    dry_run,
                    list,
                    pretty_print,
                };
                opts.check()?;
                let profiles = opts.select(kickstarts::read_kickstarts(&opts.file)?);
                Task::ImportKickstarts(opts, profiles)
            }
            Command::CloneChannel {
                source,
                dest,
                regex,
                child,
                parent,
                no_errata,
            } => Task::CloneChannel(CloneOptions {
                source: source.ok_or_else(|| anyhow!("A source channel label is needed"))?,
                destination: Destination::new(dest, regex)?,
                parent,
                child,
                original_state: no_errata,
            }),
            Command::DeleteChannel {
                channels,
                recursive,
                list,
            } => {
                let opts = DeleteOptions {
                    channels,
                    recursive,
                    list,
                };
                opts.check()?;
                Task::DeleteChannel(opts)
            }
            Command::ChannelAccess {
                channel,
                sharing,
                org,
            } => {
                let change = match (sharing, org) {
                    (None, None) => AccessChange::Show,
                    (Some(s), None) => AccessChange::Set(s.parse()?),
                    (None, Some(o)) => AccessChange::Org(o),
                    (Some(_), Some(_)) => bail!("--sharing and --org can't be used together"),
                };
                Task::ChannelAccess(channel, change)
            }
            Command::CloneConfigChannel {
                source,
                dest,
                update,
                replace,
                list,
            } => {
                let existing = match (update, replace) {
                    (true, _) => Existing::Update,
                    (false, true) => Existing::Replace,
                    (false, false) => Existing::Refuse,
                };
                let opts = ConfigCloneOptions {
                    source,
                    dest,
                    existing,
                    list,
                };
                opts.check()?;
                Task::CloneConfigChannel(opts)
            }
        };
        Ok(task)
    }

    /// Run the tasks only reading a local file, returns whether it was one
    fn run_offline(&self, out: &mut dyn Write) -> Result<bool> {
        match self {
            Task::ImportKeys(opts, keys) if opts.list => {
                activation_keys::write_key_table(out, keys)?;
            }
            Task::ImportKickstarts(opts, profiles) if opts.list => {
                kickstarts::write_labels(out, profiles)?;
            }
            Task::ImportKickstarts(opts, profiles) if opts.pretty_print => {
                kickstarts::write_details(out, profiles)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn import_output(kind: &str, run: &ImportRun) {
    if !run.failed.is_empty() {
        warn!("Could not import {} {}: {}", run.failed.len(), kind, run.failed.join(", "));
    }
    ok_output(
        "Imported",
        format!(
            "{} {}, {} already existing",
            run.created.len(),
            kind,
            run.skipped.len()
        ),
    );
}

/// CLI entry point
pub fn run() -> Result<()> {
    // Read CLI args
    let args = Args::parse();

    logs::exit_on_broken_pipe();
    // Setup logger early
    logs::init(
        args.debug,
        args.quiet,
        args.format,
        logs::command_log(args.log_dir.as_deref(), args.command.name()),
    )?;

    let r = run_inner(args);
    if let Err(ref e) = r {
        error!("{:?}", e);
    }
    r
}

pub fn run_inner(args: Args) -> Result<()> {
    // Not the whole arguments, they can contain passwords
    debug!("Running {}", args.command.name());
    let format = args.format;
    let task = Task::new(args.command)?;
    if task.run_offline(&mut io::stdout())? {
        return Ok(());
    }

    let config_path = expand_home(&args.config);
    let cfg = Configuration::read(&config_path)
        .with_context(|| format!("Reading configuration from '{}'", config_path.display()))?;
    let server = cfg.server(&args.server, args.login, args.password)?;

    let session = Session::login(&server)?;
    let r = run_task(&session, task, format);
    if let Err(e) = session.logout() {
        warn!("Could not log out: {:?}", e);
    }
    r
}

fn run_task(session: &Session, task: Task, format: cli::Format) -> Result<()> {
    // Not locked, spinners also write to stdout
    let mut out = io::stdout();

    match task {
        Task::Compare(opts) => {
            let run = compare::compare(session, &opts, &mut out)?;
            if !run.skipped.is_empty() {
                warn!(
                    "{} systems were skipped because of an unreliable inventory: {}",
                    run.skipped.len(),
                    run.skipped.iter().map(|(s, _)| s.name.as_str()).join(", ")
                );
            }
            ok_output(
                "Compared",
                format!("{} systems, {} differing packages", run.compared, run.result.len()),
            );
            match &opts.output {
                Some(path) => report::write_output(path, &run.result, opts.force)?,
                None if !opts.report => report::write_summary(&mut out, &run.result, format)?,
                None => (),
            }
        }
        Task::Errata(opts) => {
            let query = opts.query()?;
            info!("Searching packages matching '{}'", query);
            let found = errata::list_errata(session, &query, &mut out)?;
            ok_output("Found", format!("{found} packages"));
        }
        Task::PatchSummary(opts) => {
            let pair = opts.channel_pair()?;
            let since = patch_summary::start_date(
                opts.date.as_deref(),
                chrono::Local::now().date_naive(),
            )?;
            let rows = patch_summary::summarise(session, &pair, since)?;
            match &opts.output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Creating output file '{}'", path.display()))?;
                    let mut writer = BufWriter::new(file);
                    patch_summary::write_csv(&rows, &mut writer)?;
                    writer.flush()?;
                    ok_output("Wrote", format!("{} errata to {}", rows.len(), path.display()));
                }
                None => {
                    info!("No output file provided, using stdout");
                    patch_summary::write_csv(&rows, &mut out)?;
                }
            }
        }
        Task::ImportKeys(opts, keys) => {
            let run = activation_keys::import_keys(session, &keys, opts.dry_run)?;
            import_output("activation keys", &run);
        }
        Task::ImportKickstarts(opts, profiles) => {
            let run = kickstarts::import_kickstarts(session, &profiles, &opts)?;
            import_output("kickstart profiles", &run);
        }
        Task::CloneChannel(opts) => {
            let plan = channels::clone_plan(session, &opts)?;
            channels::clone_channels(session, &opts, &plan, chrono::Local::now().naive_local())?;
            ok_output(
                "Cloned",
                plan.iter().map(|(s, c)| format!("{s} as {c}")).join(", "),
            );
        }
        Task::DeleteChannel(opts) if opts.list => {
            channels::write_custom_channels(&mut out, &session.custom_channels()?)?;
        }
        Task::DeleteChannel(opts) => {
            let deleted = channels::delete_channels(session, &opts)?;
            ok_output("Deleted", format!("{} channels", deleted.len()));
        }
        Task::ChannelAccess(channel, change) => {
            channels::channel_access(session, &channel, &change, &mut out)?;
        }
        Task::CloneConfigChannel(opts) if opts.list => {
            config_channels::write_config_channels(&mut out, &session.config_channels()?)?;
        }
        Task::CloneConfigChannel(opts) => {
            let (source, dest) = opts.labels()?;
            let rejects = config_channels::clone_config_channel(
                session,
                source,
                dest,
                opts.existing,
                chrono::Local::now().naive_local(),
            )?;
            if !rejects.is_empty() {
                let path = config_channels::rejects_path(dest);
                config_channels::write_rejects(&path, &rejects)?;
                warn!(
                    "{} files could not be copied, they are kept in '{}'",
                    rejects.len(),
                    path.display()
                );
            }
            ok_output("Cloned", format!("configuration channel {source} as {dest}"));
        }
    }
    Ok(())
}
