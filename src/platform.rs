//! Platform conventions: executable suffixes, asset patterns, sibling paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Executable file suffix for the build target (`".exe"` on Windows, `""` elsewhere).
pub fn exe_suffix() -> &'static str {
    std::env::consts::EXE_SUFFIX
}

/// Build the default case-insensitive asset pattern for a repository.
///
/// With a suffix the asset must contain the repo name and end in the suffix;
/// without one any asset containing the repo name matches.
pub fn default_asset_pattern(repo: &str, exe_suffix: &str) -> String {
    if exe_suffix.is_empty() {
        format!("(?i){}", regex::escape(repo))
    } else {
        format!("(?i){}.*{}$", regex::escape(repo), regex::escape(exe_suffix))
    }
}

/// Append `suffix` to the file name of `path` (`/opt/app.exe` + `.old` → `/opt/app.exe.old`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Directory holding `path`, or `.` for bare file names.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `path` looks like something the OS can launch.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(exe_suffix().trim_start_matches('.')))
    }
}

/// Mark a file executable (no-op off Unix).
pub fn set_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    let _ = path;
    Ok(())
}
