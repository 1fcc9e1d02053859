use crate::RuntimeError;
use homevault_schema::Passphrase;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{error, info};

/// One external program invocation.
///
/// The secret environment entry is applied to the child process only and is
/// never part of [`command_line`](Self::command_line).
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub label: String,
    pub secret_env: Option<(String, Passphrase)>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            label: label.into(),
            secret_env: None,
            current_dir: None,
            stdin: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn secret_env(mut self, name: &str, value: &Passphrase) -> Self {
        self.secret_env = Some((name.to_owned(), value.clone()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program and arguments joined by spaces, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished program. `status` is `None` when the child
/// was terminated by a signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external programs. Implementors provide [`output`](Self::output);
/// callers use [`run`](Self::run), which adds the logging contract.
///
/// A non-zero exit status is never an `Err`: the caller decides whether it is
/// fatal. `Err` means the program could not be run at all.
pub trait CommandRunner: Send + Sync {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, RuntimeError>;

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RuntimeError> {
        let output = self.output(invocation)?;
        log_outcome(invocation, &output);
        Ok(output)
    }
}

fn log_outcome(invocation: &Invocation, output: &CommandOutput) {
    if output.success() {
        info!("running '{}' succeeded", invocation.label);
    } else {
        error!(
            "error when running '{}' (exit status {})",
            invocation.label,
            output
                .status
                .map_or_else(|| "signal".to_owned(), |c| c.to_string())
        );
        error!("original command: {}", invocation.command_line());
    }

    for stream in [&output.stdout, &output.stderr] {
        let trimmed = stream.trim();
        if !trimmed.is_empty() {
            info!("{trimmed}");
        }
    }
}

/// Runs programs as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, RuntimeError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some((name, value)) = &invocation.secret_env {
            cmd.env(name, value.expose());
        }
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        // Feed stdin from a separate thread so a child echoing its input cannot
        // fill the stdout pipe while we are still writing.
        let output = std::thread::scope(|scope| {
            let writer = match (&invocation.stdin, child.stdin.take()) {
                (Some(input), Some(mut pipe)) => Some(scope.spawn(move || {
                    match pipe.write_all(input.as_bytes()) {
                        // A child that exits without draining stdin is judged by its exit status.
                        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                        other => other,
                    }
                })),
                _ => None,
            };
            let output = child.wait_with_output()?;
            if let Some(writer) = writer {
                writer
                    .join()
                    .map_err(|_| RuntimeError::ExecFailed("stdin writer panicked".to_owned()))??;
            }
            Ok::<_, RuntimeError>(output)
        })?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
