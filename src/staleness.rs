//! Timestamp-based staleness checks.

use crate::source::{ForceInclude, SourceModule};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Session-scoped cache of file modification times.
///
/// Missing files are cached as `None`.
#[derive(Debug, Default)]
pub struct MtimeCache {
    times: HashMap<PathBuf, Option<SystemTime>>,
}

impl MtimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modified(&mut self, path: &Path) -> Option<SystemTime> {
        if let Some(time) = self.times.get(path) {
            return *time;
        }
        let time = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        self.times.insert(path.to_path_buf(), time);
        time
    }

    /// Drops a cached entry, e.g. after the file was rewritten.
    pub fn forget(&mut self, path: &Path) {
        self.times.remove(path);
    }
}

/// Time of the previous output: the newest of the emitted files, or `None`
/// when any of them is missing (which forces a rebuild).
pub fn recorded_output_time(outputs: &[PathBuf], mtimes: &mut MtimeCache) -> Option<SystemTime> {
    let mut newest: Option<SystemTime> = None;
    for output in outputs {
        let time = mtimes.modified(output)?;
        newest = Some(newest.map_or(time, |n| n.max(time)));
    }
    newest
}

/// Returns true if `path` changed after `output_time`.
///
/// A missing input counts as changed, and so does anything when there is no
/// recorded output.
fn newer_than(path: &Path, output_time: Option<SystemTime>, mtimes: &mut MtimeCache) -> bool {
    let Some(output_time) = output_time else {
        return true;
    };
    match mtimes.modified(path) {
        Some(time) => time > output_time,
        None => true,
    }
}

/// Decides whether a module must be rebuilt.
///
/// The module is stale when it, any of its includes, or the force include and
/// its includes were modified after `output_time`.
pub fn is_stale(
    module: &SourceModule,
    force_include: Option<&ForceInclude>,
    output_time: Option<SystemTime>,
    mtimes: &mut MtimeCache,
) -> bool {
    if newer_than(&module.path, output_time, mtimes) {
        return true;
    }

    if module
        .includes
        .iter()
        .any(|include| newer_than(include, output_time, mtimes))
    {
        return true;
    }

    force_include.is_some_and(|force| {
        force
            .dependencies()
            .any(|dep| newer_than(dep, output_time, mtimes))
    })
}
