use std::path::{Path, PathBuf};

use crate::platform;

/// Pick the executable to relaunch.
///
/// The configured path wins when it exists. Otherwise the containing
/// directory is scanned for executables other than the watchdog itself,
/// preferring a case-insensitive match on the expected file name. If
/// nothing is found the configured path is returned unchanged so the launch
/// attempt fails visibly.
pub fn resolve_target(preferred: &Path, watchdog_exe: Option<&Path>) -> PathBuf {
    if preferred.is_file() {
        return preferred.to_path_buf();
    }

    let dir = platform::parent_dir(preferred);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot scan for executables");
            return preferred.to_path_buf();
        }
    };

    let expected = lowercase_name(preferred);
    let own = watchdog_exe.and_then(lowercase_name);

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = lowercase_name(p);
            name.is_some() && name != own && platform::is_executable(p)
        })
        .collect();
    candidates.sort();

    if let Some(exact) = candidates
        .iter()
        .find(|p| expected.is_some() && lowercase_name(p) == expected)
    {
        tracing::info!(path = %exact.display(), "resolved target by name");
        return exact.clone();
    }
    match candidates.into_iter().next() {
        Some(first) => {
            tracing::warn!(
                preferred = %preferred.display(),
                path = %first.display(),
                "target missing, using first executable found"
            );
            first
        }
        None => {
            tracing::warn!(preferred = %preferred.display(), "no executable found");
            preferred.to_path_buf()
        }
    }
}

fn lowercase_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
}
