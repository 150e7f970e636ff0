use crate::error::Error;

use std::io::{self, Write};
use std::process::{Command, Stdio};
use tracing::debug;

#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::{BTreeMap, BTreeSet};

/// Executes one shell command line on behalf of the parser (`$(shell ...)`)
/// and the maker (recipes).
pub trait CommandRunner {
    /// Runs `line` through a shell. With `capture`, standard output is
    /// collected and returned verbatim; otherwise it goes straight to ours
    /// and the returned text is empty.
    fn run(&self, line: &str, capture: bool) -> Result<String, Error>;

    /// Shows a recipe to the operator before it runs.
    fn echo(&self, line: &str) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        // a closed stdout must not abort the build
        let _ = writeln!(out, "{}", line).and_then(|_| out.flush());
    }
}

/// Runs commands with `sh -c`, inheriting stdin and stderr.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, line: &str, capture: bool) -> Result<String, Error> {
        debug!(command = %line, capture, "spawning shell");

        let mut command = shell_command(line);
        command.stdin(Stdio::inherit()).stderr(Stdio::inherit());

        let spawn_error = |source| Error::Spawn {
            command: line.to_string(),
            source,
        };

        let (status, stdout) = if capture {
            let output = command
                .stdout(Stdio::piped())
                .output()
                .map_err(spawn_error)?;
            (
                output.status,
                String::from_utf8_lossy(&output.stdout).into_owned(),
            )
        } else {
            let status = command
                .stdout(Stdio::inherit())
                .status()
                .map_err(spawn_error)?;
            (status, String::new())
        };

        if status.success() {
            Ok(stdout)
        } else {
            Err(Error::CommandFailed {
                command: line.to_string(),
                code: status.code(),
            })
        }
    }
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut command = Command::new("sh");
    command.arg("-c").arg(line).creation_flags(CREATE_NO_WINDOW);
    command
}

#[cfg(unix)]
#[test]
fn test_shell_runner_capture() {
    assert_eq!(ShellRunner.run("echo hi", true).unwrap(), "hi\n");
    assert_eq!(ShellRunner.run("printf 'a b'", true).unwrap(), "a b");
    assert_eq!(ShellRunner.run("true", false).unwrap(), "");
}

#[cfg(unix)]
#[test]
fn test_shell_runner_failure() {
    match ShellRunner.run("exit 3", false) {
        Err(Error::CommandFailed { command, code }) => {
            assert_eq!(command, "exit 3");
            assert_eq!(code, Some(3));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        ShellRunner.run("false", true),
        Err(Error::CommandFailed { code: Some(1), .. })
    ));
}

/// Test double that records what it was asked to do instead of spawning.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingRunner {
    pub runs: RefCell<Vec<String>>,
    pub echoes: RefCell<Vec<String>>,
    outputs: BTreeMap<String, String>,
    failures: BTreeSet<String>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn new() -> RecordingRunner {
        RecordingRunner::default()
    }

    pub fn with_output(mut self, line: &str, output: &str) -> RecordingRunner {
        self.outputs.insert(line.to_string(), output.to_string());
        self
    }

    pub fn failing(mut self, line: &str) -> RecordingRunner {
        self.failures.insert(line.to_string());
        self
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }

    pub fn echoes(&self) -> Vec<String> {
        self.echoes.borrow().clone()
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&self, line: &str, capture: bool) -> Result<String, Error> {
        self.runs.borrow_mut().push(line.to_string());
        if self.failures.contains(line) {
            return Err(Error::CommandFailed {
                command: line.to_string(),
                code: Some(1),
            });
        }

        Ok(match capture {
            true => self.outputs.get(line).cloned().unwrap_or_default(),
            false => String::new(),
        })
    }

    fn echo(&self, line: &str) {
        self.echoes.borrow_mut().push(line.to_string());
    }
}
