//! Local command execution
//!
//! Fixed cleanup steps (`kubectl delete psp ...`), role bindings and the
//! carrier installer scripts run as local processes. They go through the
//! [`CommandRunner`] trait so lifecycle code can be tested without a shell.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// A local process invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalCommand {
    /// Executable name or path
    pub program: String,
    /// Arguments, passed without shell interpretation
    pub args: Vec<String>,
    /// Working directory; inherits the current one when unset
    pub dir: Option<PathBuf>,
}

impl LocalCommand {
    /// Build a command from a program and its arguments
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
        }
    }

    /// Shorthand for a `kubectl` invocation
    pub fn kubectl<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("kubectl", args)
    }

    /// Run inside the given directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl fmt::Display for LocalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs local commands and returns their stdout
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion; non-zero exit becomes `ExternalCommandFailed` carrying stderr
    async fn run(&self, command: &LocalCommand) -> Result<String>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    debug: bool,
}

impl ProcessRunner {
    /// Create a runner; with `debug` every command's output is logged
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &LocalCommand) -> Result<String> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.dir {
            cmd.current_dir(dir);
        }

        debug!(command = %command, "Running local command");
        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if self.debug && !stdout.is_empty() {
            debug!(command = %command, output = %stdout.trim_end(), "Command output");
        }

        if !output.status.success() {
            return Err(Error::command_failed(
                command.to_string(),
                String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            ));
        }

        Ok(stdout)
    }
}
