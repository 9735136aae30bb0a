// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

use std::{cmp::Ordering, collections::HashMap};

use tracing::{debug, info};

use crate::{package::PackageRecord, versions::compare_versions};

/// Keep only the latest version of each package, per architecture
///
/// Records are grouped by name and normalized architecture. In each group the
/// greatest version wins, and among equal versions the first one seen. Groups
/// appear in the output in the order they were first seen, so reducing an
/// already reduced list returns it unchanged.
pub fn reduce(packages: &[PackageRecord]) -> Vec<PackageRecord> {
    debug!(
        "Reducing package list ({} items) to latest versions for each architecture",
        packages.len()
    );
    let mut reduced: Vec<&PackageRecord> = vec![];
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();

    for p in packages {
        match index.get(&(p.name.as_str(), p.grouping_arch())) {
            None => {
                index.insert((p.name.as_str(), p.grouping_arch()), reduced.len());
                reduced.push(p);
            }
            Some(&i) => {
                if compare_versions(p, reduced[i]) == Ordering::Greater {
                    reduced[i] = p;
                }
            }
        }
    }

    info!("Reduced package list to {} entries", reduced.len());
    reduced.into_iter().cloned().collect()
}
