// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External tool invocation.
//!
//! Most of what nixwrap does is run somebody else's program with the right
//! arguments. An [`Invocation`] describes one such program call as plain data,
//! and a [`Runner`] decides what to do with it: run it for real, print it
//! for a dry run, or just record it.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    os::unix::process::ExitStatusExt,
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument, warn};

/// One call to an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    privileged: bool,
}

impl Invocation {
    /// Construct new invocation of target program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set environment variable for program.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run program with elevated privileges through sudo.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Check if program needs elevated privileges.
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Name of program being invoked.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument vector that will be executed, sudo included.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if self.privileged {
            argv.push("sudo".into());

            // INVARIANT: sudo scrubs the environment unless told otherwise.
            if !self.env.is_empty() {
                let keys = self
                    .env
                    .iter()
                    .map(|(key, _)| key.as_str())
                    .collect::<Vec<_>>();
                argv.push(format!("--preserve-env={}", keys.join(",")));
            }
        }

        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    fn command(&self) -> Command {
        let argv = self.argv();
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).envs(self.env.clone());
        command
    }
}

impl Display for Invocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let env = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={}", quote(value)));
        let argv = self.argv();
        let argv = argv.iter().map(|arg| quote(arg));
        let line = env.chain(argv).collect::<Vec<_>>().join(" ");

        fmt.write_str(&line)
    }
}

fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@#,+%~".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Execute invocations.
pub trait Runner {
    /// Run program attached to the current terminal.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if program cannot be started.
    /// - Return [`ExecError::Failed`] if program exits unsuccessfully.
    fn run(&self, invocation: &Invocation) -> Result<()>;

    /// Run program and capture its standard output.
    ///
    /// Only meant for read-only queries.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if program cannot be started.
    /// - Return [`ExecError::Failed`] if program exits unsuccessfully.
    fn output(&self, invocation: &Invocation) -> Result<String>;
}

impl<R> Runner for &R
where
    R: Runner + ?Sized,
{
    fn run(&self, invocation: &Invocation) -> Result<()> {
        (**self).run(invocation)
    }

    fn output(&self, invocation: &Invocation) -> Result<String> {
        (**self).output(invocation)
    }
}

/// Run invocations in order, stopping at the first failure.
///
/// # Errors
///
/// - Return [`ExecError`] of the first invocation that fails.
pub fn run_all<'a>(
    runner: &impl Runner,
    invocations: impl IntoIterator<Item = &'a Invocation>,
) -> Result<()> {
    for invocation in invocations {
        runner.run(invocation)?;
    }

    Ok(())
}

/// Run invocations as real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    /// Construct new system runner.
    ///
    /// In dry run mode, [`Runner::run`] prints the command line instead of
    /// executing it. Queries through [`Runner::output`] still execute, since
    /// they do not change anything.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl Runner for SystemRunner {
    #[instrument(skip(self), level = "debug")]
    fn run(&self, invocation: &Invocation) -> Result<()> {
        if self.dry_run {
            println!("{invocation}");
            return Ok(());
        }

        debug!("run {invocation}");
        let status = invocation
            .command()
            .status()
            .map_err(|err| ExecError::Spawn {
                source: err,
                program: invocation.program().to_string(),
            })?;

        check_status(invocation, status, String::new())
    }

    #[instrument(skip(self), level = "debug")]
    fn output(&self, invocation: &Invocation) -> Result<String> {
        debug!("query {invocation}");
        let output = invocation
            .command()
            .output()
            .map_err(|err| ExecError::Spawn {
                source: err,
                program: invocation.program().to_string(),
            })?;

        let stderr = String::from_utf8_lossy(output.stderr.as_slice());
        let stderr = stderr.trim_end();
        check_status(invocation, output.status, stderr.to_string())?;
        if !stderr.is_empty() {
            warn!("{stderr}");
        }

        Ok(String::from_utf8_lossy(output.stdout.as_slice()).into_owned())
    }
}

fn check_status(invocation: &Invocation, status: ExitStatus, detail: String) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    // INVARIANT: Death by signal maps to the shell convention of 128 + signal.
    let code = status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1);

    Err(ExecError::Failed {
        command: invocation.to_string(),
        code,
        detail,
    })
}

/// External invocation error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Program cannot be started at all.
    #[error("failed to start {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Program ran, but exited unsuccessfully.
    #[error("command `{command}` failed with exit code {code}{}", fmt_detail(detail))]
    Failed {
        command: String,
        code: i32,
        detail: String,
    },
}

impl ExecError {
    /// Exit code to hand back to the caller.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Spawn { .. } => 127,
            Self::Failed { code, .. } => *code,
        }
    }
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(":\n{detail}")
    }
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;
