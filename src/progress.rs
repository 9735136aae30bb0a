// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::io::IsTerminal;

use spinners::{Spinner, Spinners};
use tracing::{Level, enabled, info};

/// Feedback during slow server calls
///
/// Spins on interactive terminals when info logs are enabled, otherwise the
/// message is only logged.
pub enum Progress {
    Show(Spinner),
    Hidden,
}

impl Progress {
    pub fn new(message: String) -> Self {
        if std::io::stdout().is_terminal() && enabled!(Level::INFO) {
            Progress::Show(Spinner::new(Spinners::Dots, message))
        } else {
            info!(message);
            Progress::Hidden
        }
    }

    pub fn stop_with_success(self) {
        match self {
            Progress::Show(mut spinner) => spinner.stop_with_symbol("🗸"),
            Progress::Hidden => {}
        }
    }
}
