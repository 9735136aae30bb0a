// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2022 Normation SAS

//! Log output
//!
//! Logs go to stderr so that reports and exports can be piped from stdout.
//! `RUST_LOG` directives are added to the level chosen on the command line.

use std::{env, fmt::Display, io, panic, path::{Path, PathBuf}, process::exit};

use anyhow::{Context, Result};
use colored::Colorize;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::LevelFilter, fmt, layer::SubscriberExt,
};

use crate::cli::Format;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Daily rotated log file, named after the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLog {
    pub dir: PathBuf,
    pub command: &'static str,
}

/// `--debug` wins over `--quiet`
pub fn level_filter(debug: bool, quiet: bool) -> LevelFilter {
    match (debug, quiet) {
        (true, _) => LevelFilter::DEBUG,
        (false, true) => LevelFilter::WARN,
        (false, false) => LevelFilter::INFO,
    }
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .from_env_lossy()
        .add_directive(level.into())
}

fn console_layer(format: Format, level: LevelFilter) -> BoxedLayer {
    match format {
        Format::Human => {
            // also handled by colored for the step output
            let color = env::var_os("NO_COLOR").is_none();
            fmt::layer()
                .event_format(
                    fmt::format()
                        .compact()
                        .without_time()
                        .with_target(false)
                        .with_ansi(color),
                )
                .with_writer(io::stderr)
                .with_filter(env_filter(level))
                .boxed()
        }
        Format::Json => fmt::layer()
            .event_format(fmt::format().without_time().with_target(false).json())
            .with_writer(io::stderr)
            .with_filter(env_filter(level))
            .boxed(),
    }
}

fn file_layer(log: &CommandLog, level: LevelFilter) -> Result<BoxedLayer> {
    let writer = RollingFileAppender::builder()
        .filename_prefix(log.command)
        .filename_suffix("log")
        .build(&log.dir)
        .with_context(|| format!("Creating log file in '{}'", log.dir.display()))?;
    Ok(fmt::layer()
        .event_format(fmt::format().compact().with_target(false).with_ansi(false))
        .with_writer(writer)
        .with_filter(env_filter(level))
        .boxed())
}

pub fn init(debug: bool, quiet: bool, format: Format, file: Option<CommandLog>) -> Result<()> {
    let level = level_filter(debug, quiet);
    let mut layers = vec![console_layer(format, level)];
    if let Some(log) = &file {
        layers.push(file_layer(log, level)?);
    }
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))?;
    Ok(())
}

/// `cargo` style step output, on stderr
pub fn ok_output<T: Display>(step: &'static str, message: T) {
    eprintln!("{:>12} {message}", step.green().bold());
}

/// Exit quietly when stdout is closed early, like when piped to `head`
///
/// See https://github.com/rust-lang/rust/issues/46016.
pub fn exit_on_broken_pipe() {
    let hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let message = info.to_string();
        if message.contains("Broken pipe") || message.contains("os error 32") {
            exit(0);
        }
        hook(info)
    }));
}

/// Where the log file of a run goes, if anywhere
pub fn command_log(dir: Option<&Path>, command: &'static str) -> Option<CommandLog> {
    dir.map(|d| CommandLog {
        dir: d.to_path_buf(),
        command,
    })
}
