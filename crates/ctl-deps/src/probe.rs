//! "Already installed" probes.
//!
//! A dependency may carry a probe snippet. When the caller asks to exclude
//! installed dependencies, the resolver hands that snippet to an
//! [`InstallProbe`]; success means the dependency is already present.

use std::process::{Command, Stdio};

use crate::dependency::Dependency;

/// Decides whether a dependency is already installed.
pub trait InstallProbe {
    /// Run `probe` for `dependency`. Any failure to run counts as "not installed".
    fn is_installed(&self, dependency: &Dependency, probe: &str) -> bool;
}

/// Runs probe snippets through an interpreter, e.g. `python -c <probe>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    /// `program args... <probe>`.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `python -c <probe>`.
    pub fn python() -> Self {
        Self::new("python", ["-c"])
    }

    /// The system shell: `sh -c` on Unix, `cmd /C` on Windows.
    pub fn shell() -> Self {
        if cfg!(windows) {
            Self::new("cmd", ["/C"])
        } else {
            Self::new("sh", ["-c"])
        }
    }

    fn command(&self, probe: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(probe)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::python()
    }
}

impl InstallProbe for CommandProbe {
    fn is_installed(&self, dependency: &Dependency, probe: &str) -> bool {
        match self.command(probe).status() {
            Ok(status) => {
                tracing::debug!(
                    dependency = %dependency.name,
                    program = %self.program,
                    code = ?status.code(),
                    "Install probe finished"
                );
                status.success()
            }
            Err(e) => {
                tracing::debug!(
                    dependency = %dependency.name,
                    program = %self.program,
                    error = %e,
                    "Install probe could not run"
                );
                false
            }
        }
    }
}

/// Treats every dependency as missing without running anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverInstalled;

impl InstallProbe for NeverInstalled {
    fn is_installed(&self, _dependency: &Dependency, _probe: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn shell_probe_reports_exit_status() {
        let dep = Dependency::new("coreutils");
        let probe = CommandProbe::shell();
        assert!(probe.is_installed(&dep, "exit 0"));
        assert!(!probe.is_installed(&dep, "exit 3"));
    }

    #[test]
    fn missing_interpreter_counts_as_not_installed() {
        let dep = Dependency::new("anything");
        let probe = CommandProbe::new("definitely-not-a-real-interpreter-4821", ["-c"]);
        assert!(!probe.is_installed(&dep, "pass"));
    }

    #[test]
    fn never_installed() {
        assert!(!NeverInstalled.is_installed(&Dependency::new("x"), "true"));
    }
}
