use std::time::Duration;

use medialoader_core::fs_paths::{AppPaths, DesktopPaths};

fn enhanced_path() -> Option<String> {
    let bin_dir = DesktopPaths.bin_dir()?;
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

pub fn command<S: AsRef<std::ffi::OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = enhanced_path() {
        cmd.env("PATH", path);
    }
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd
}

/// Like [`command`], but the child leads its own process group so the whole
/// tree it spawns can be torn down with [`terminate_process_tree`].
pub fn group_command<S: AsRef<std::ffi::OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = command(program);
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000 | 0x00000200);
    cmd
}

/// Terminates the process `pid` and every process in its tree.
///
/// Sends a graceful terminate first and escalates to a forced kill once
/// `grace` has elapsed. Safe to call concurrently and repeatedly: a tree that
/// is already gone is not an error.
pub async fn terminate_process_tree(pid: u32, grace: Duration) {
    imp::terminate(pid, grace).await
}

#[cfg(unix)]
mod imp {
    use std::time::Duration;

    fn signal_group(pgid: u32, signal: libc::c_int) -> bool {
        // SAFETY: killpg only takes plain integers; a stale pgid yields ESRCH.
        unsafe { libc::killpg(pgid as libc::pid_t, signal) == 0 }
    }

    fn group_alive(pgid: u32) -> bool {
        signal_group(pgid, 0)
    }

    pub async fn terminate(pid: u32, grace: Duration) {
        if !signal_group(pid, libc::SIGTERM) {
            tracing::debug!("[process] group {} already gone", pid);
            return;
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !group_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        if signal_group(pid, libc::SIGKILL) {
            tracing::debug!("[process] group {} killed after {:?} grace", pid, grace);
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::process::Stdio;
    use std::time::Duration;

    pub async fn terminate(pid: u32, grace: Duration) {
        let pid = pid.to_string();
        let _ = super::command("taskkill")
            .args(["/PID", &pid, "/T"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        tokio::time::sleep(grace).await;
        let _ = super::command("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}
