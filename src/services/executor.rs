//! Command executor
//!
//! Runs one command to completion in a fixed working directory (the user's
//! home by default) and turns whatever happened into a single string:
//! stdout followed by stderr, `"(No output)"` when that is blank, or
//! `"Error: ..."` when the process could not be run or was stopped.
//!
//! stdin is never connected. The exit status is logged and otherwise dropped.
//! Each run carries an optional timeout and a cancellation token; either one
//! kills the whole process group so shell pipelines do not outlive the call.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::HostError;
use crate::models::{CommandSpec, NO_OUTPUT};

/// Shell used for `CommandSpec::Shell` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: String,
    flag: String,
}

impl Shell {
    pub fn new(program: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    /// `cmd /C` on Windows, `sh -c` everywhere else.
    pub fn platform() -> Self {
        #[cfg(target_os = "windows")]
        return Self::new("cmd", "/C");

        #[cfg(not(target_os = "windows"))]
        return Self::new("sh", "-c");
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform()
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    working_dir: PathBuf,
    shell: Shell,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            shell: Shell::platform(),
            timeout: None,
        }
    }

    /// Executor rooted at the host user's home directory.
    pub fn for_home(timeout: Option<Duration>) -> Result<Self, HostError> {
        let home = dirs::home_dir().ok_or(HostError::HomeUnavailable)?;
        Ok(Self::new(home).with_timeout(timeout))
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `spec` and normalize the outcome. Never fails.
    pub async fn execute(&self, spec: &CommandSpec, cancel: &CancellationToken) -> String {
        match self.run(spec, cancel).await {
            Ok(output) => normalize_output(&output.stdout, &output.stderr),
            Err(err) => {
                log::warn!("[Executor] {}: {}", spec.display(), err);
                err.render()
            }
        }
    }

    /// Run `spec` and hand back the raw process output.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Output, HostError> {
        let (mut command, program) = self.build(spec);

        let child = command
            .spawn()
            .map_err(|source| HostError::Spawn { program, source })?;
        let pid = child.id();

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            output = &mut wait => {
                let output = output?;
                log::debug!("[Executor] {} exited with {}", spec.display(), output.status);
                Ok(output)
            }
            _ = deadline => {
                terminate_process_group(pid).await;
                Err(HostError::TimedOut(self.timeout.unwrap_or_default()))
            }
            _ = cancel.cancelled() => {
                terminate_process_group(pid).await;
                Err(HostError::Cancelled)
            }
        }
    }

    fn build(&self, spec: &CommandSpec) -> (Command, String) {
        let (mut command, program) = match spec {
            CommandSpec::Shell { line } => {
                let mut command = Command::new(&self.shell.program);
                command.arg(&self.shell.flag).arg(line);
                (command, self.shell.program.clone())
            }
            CommandSpec::Exec { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                (command, program.clone())
            }
        };

        command
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down the whole pipeline
        #[cfg(unix)]
        command.process_group(0);

        (command, program)
    }
}

/// stdout then stderr, no separator; the sentinel when the result is blank.
pub fn normalize_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(stderr));

    if text.trim().is_empty() {
        NO_OUTPUT.to_string()
    } else {
        text
    }
}

/// SIGTERM the group first, SIGKILL shortly after if anything is left.
#[cfg(unix)]
async fn terminate_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };

    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

// kill_on_drop covers the child itself once the wait future is dropped
#[cfg(not(unix))]
async fn terminate_process_group(_pid: Option<u32>) {}
