//! OS process capabilities: detached spawning and liveness probing.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};

/// Whether a spawned process should get a visible window/console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Starts processes whose lifetime is independent of the caller.
///
/// The child must survive the caller's exit and must not share its
/// console, terminal session or process group.
pub trait DetachedSpawner: Send + Sync {
    /// Spawn `program` detached and return its pid.
    fn spawn_detached(&self, program: &Path, args: &[OsString], visibility: Visibility)
        -> Result<u32>;
}

/// Answers "is this pid still running?".
pub trait ProcessProbe: Send + Sync {
    fn is_running(&self, pid: u32) -> bool;
}

/// Spawner backed by the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl DetachedSpawner for SystemSpawner {
    fn spawn_detached(
        &self,
        program: &Path,
        args: &[OsString],
        visibility: Visibility,
    ) -> Result<u32> {
        let pid = sys::spawn_detached(program, args, visibility).map_err(|e| match e {
            SpawnError::Io(source) => UpdateError::Spawn {
                program: program.to_path_buf(),
                source,
            },
            SpawnError::Unsupported => UpdateError::Unsupported(format!(
                "detached process spawn on {}",
                std::env::consts::OS
            )),
        })?;
        tracing::debug!(program = %program.display(), pid, ?visibility, "spawned detached process");
        Ok(pid)
    }
}

/// Probe backed by the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_running(&self, pid: u32) -> bool {
        pid != 0 && sys::is_running(pid)
    }
}

/// Command that asks the desktop shell to open `path`, used as a last resort
/// when launching an executable directly fails.
pub fn shell_open_command(path: &Path) -> (PathBuf, Vec<OsString>) {
    if cfg!(target_os = "windows") {
        (
            PathBuf::from("cmd"),
            vec!["/c".into(), "start".into(), "".into(), path.as_os_str().to_owned()],
        )
    } else if cfg!(target_os = "macos") {
        (PathBuf::from("open"), vec![path.as_os_str().to_owned()])
    } else {
        (PathBuf::from("xdg-open"), vec![path.as_os_str().to_owned()])
    }
}

#[allow(dead_code)]
enum SpawnError {
    Io(std::io::Error),
    Unsupported,
}

impl From<std::io::Error> for SpawnError {
    fn from(e: std::io::Error) -> Self {
        SpawnError::Io(e)
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::OsString;
    use std::os::unix::process::CommandExt;
    use std::path::Path;
    use std::process::{Command, Stdio};

    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::{setsid, Pid};

    use super::{SpawnError, Visibility};

    pub(super) fn spawn_detached(
        program: &Path,
        args: &[OsString],
        _visibility: Visibility,
    ) -> Result<u32, SpawnError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        // New session: no controlling terminal, own process group, so the
        // caller's exit or a terminal hangup does not reach the child.
        unsafe {
            cmd.pre_exec(|| setsid().map(|_| ()).map_err(std::io::Error::from));
        }
        let child = cmd.spawn()?;
        Ok(child.id())
    }

    pub(super) fn is_running(pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::OsString;
    use std::os::windows::process::CommandExt;
    use std::path::Path;
    use std::process::{Command, Stdio};

    use windows_sys::Win32::Foundation::{CloseHandle, WAIT_TIMEOUT};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, WaitForSingleObject, PROCESS_SYNCHRONIZE,
    };

    use super::{SpawnError, Visibility};

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    pub(super) fn spawn_detached(
        program: &Path,
        args: &[OsString],
        visibility: Visibility,
    ) -> Result<u32, SpawnError> {
        let flags = match visibility {
            Visibility::Hidden => DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW,
            Visibility::Visible => CREATE_NEW_PROCESS_GROUP,
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(flags);
        if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn()?;
        Ok(child.id())
    }

    pub(super) fn is_running(pid: u32) -> bool {
        let handle = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, 0, pid) };
        if handle.is_null() {
            return false;
        }
        struct HandleGuard(windows_sys::Win32::Foundation::HANDLE);
        impl Drop for HandleGuard {
            fn drop(&mut self) {
                unsafe { CloseHandle(self.0) };
            }
        }
        let _guard = HandleGuard(handle);
        unsafe { WaitForSingleObject(handle, 0) == WAIT_TIMEOUT }
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::ffi::OsString;
    use std::path::Path;

    use super::{SpawnError, Visibility};

    pub(super) fn spawn_detached(
        _program: &Path,
        _args: &[OsString],
        _visibility: Visibility,
    ) -> Result<u32, SpawnError> {
        Err(SpawnError::Unsupported)
    }

    pub(super) fn is_running(_pid: u32) -> bool {
        false
    }
}
