//! External editor process: spawn, graceful termination, process tree

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::editor;
use crate::error::{OverlayError, OverlayResult};

/// One running editor instance; killed on drop if it was never reaped
#[derive(Debug)]
pub struct EditorProcess {
    child: Child,
    command: String,
    reaped: bool,
}

impl EditorProcess {
    /// Start `command args document`. On Unix the editor leads a new process
    /// group, so everything a launcher script forks is torn down with it.
    pub fn spawn(command: &str, args: &[String], document: &Path) -> OverlayResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .arg(document)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd
            .spawn()
            .map_err(|e| OverlayError::Launch(format!("failed to start '{command}': {e}")))?;
        info!(
            pid = child.id(),
            command = %command,
            document = %document.display(),
            "Started editor process"
        );
        Ok(Self {
            child,
            command: command.to_string(),
            reaped: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the process has already exited
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.reaped = true;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(pid = self.pid(), error = %e, "Failed to query editor process status");
                None
            }
        }
    }

    /// Ask the editor and everything it forked to quit, escalating to a
    /// forced kill after `grace`
    pub fn terminate(&mut self, grace: Duration) {
        let exited = self.reaped || self.try_exit_status().is_some();
        if exited && !self.group_alive() {
            debug!(pid = self.pid(), "Editor process already exited");
            return;
        }

        if self.signal_group(Signal::Term) {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                let root_done = self.reaped || self.try_exit_status().is_some();
                if root_done && !self.group_alive() {
                    info!(pid = self.pid(), "Editor process exited");
                    return;
                }
                std::thread::sleep(Duration::from_millis(editor::EXIT_POLL_INTERVAL_MS));
            }
            warn!(
                pid = self.pid(),
                grace_ms = grace.as_millis() as u64,
                "Editor ignored termination request, killing"
            );
        }
        self.kill();
    }

    /// Process group id, which equals the pid since the editor leads its group
    #[cfg(unix)]
    fn group(&self) -> Option<nix::unistd::Pid> {
        i32::try_from(self.pid()).ok().map(nix::unistd::Pid::from_raw)
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: Signal) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal as NixSignal};

        let Some(group) = self.group() else {
            return false;
        };
        let native = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        match killpg(group, native) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(pgid = group.as_raw(), signal = ?native, error = %e, "Failed to signal editor process group");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _signal: Signal) -> bool {
        false
    }

    /// Whether any member of the editor's process group still exists
    #[cfg(unix)]
    fn group_alive(&self) -> bool {
        self.group()
            .is_some_and(|group| nix::sys::signal::killpg(group, None::<nix::sys::signal::Signal>).is_ok())
    }

    #[cfg(not(unix))]
    fn group_alive(&self) -> bool {
        false
    }

    fn kill(&mut self) {
        self.signal_group(Signal::Kill);
        if !self.reaped {
            if let Err(e) = self.child.kill() {
                warn!(pid = self.pid(), command = %self.command, error = %e, "Failed to kill editor process");
            }
            match self.child.wait() {
                Ok(status) => info!(pid = self.pid(), exit = ?status.code(), "Editor process terminated"),
                Err(e) => warn!(pid = self.pid(), error = %e, "Failed to reap editor process"),
            }
        }
        self.reaped = true;
    }
}

impl Drop for EditorProcess {
    fn drop(&mut self) {
        let exited = self.reaped || self.try_exit_status().is_some();
        if !exited || self.group_alive() {
            self.kill();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Pid of the parent from the contents of `/proc/<pid>/stat`
fn parse_ppid(stat: &str) -> Option<u32> {
    // The command name is parenthesised and may itself contain spaces or ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// All transitive children of `root` given `(pid, ppid)` pairs
fn collect_descendants(root: u32, pairs: &[(u32, u32)]) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for &(pid, ppid) in pairs {
            if ppid == parent && pid != root && !found.contains(&pid) {
                found.push(pid);
                frontier.push(pid);
            }
        }
    }
    found
}

/// Descendant processes of `pid` (launcher scripts fork the real editor)
#[cfg(target_os = "linux")]
pub fn descendants(pid: u32) -> Vec<u32> {
    use crate::constants::paths;

    let Ok(entries) = std::fs::read_dir(paths::PROC_ROOT) else {
        return Vec::new();
    };
    let pairs: Vec<(u32, u32)> = entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|child| {
            let stat = std::fs::read_to_string(
                paths::PROC_STAT_FORMAT.replace("{}", &child.to_string()),
            )
            .ok()?;
            Some((child, parse_ppid(&stat)?))
        })
        .collect();
    collect_descendants(pid, &pairs)
}

/// Descendant processes of `pid` (not available on this platform)
#[cfg(not(target_os = "linux"))]
pub fn descendants(_pid: u32) -> Vec<u32> {
    Vec::new()
}
