use crate::exec::{CommandOutput, CommandRunner, Invocation};
use crate::RuntimeError;
use std::sync::Mutex;

struct Rule {
    prefix: Vec<String>,
    /// `None` simulates a program that cannot be started.
    output: Option<CommandOutput>,
    remaining: Option<usize>,
}

/// Scripted [`CommandRunner`] for tests.
///
/// Every invocation is recorded. Responses are chosen by the first rule whose
/// prefix matches `[program, args...]`; unmatched invocations succeed with
/// empty output.
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every matching invocation with `output`.
    pub fn on(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        self.push_rule(prefix, Some(output), None)
    }

    /// Answer the next matching invocation with `output`, then fall through.
    pub fn once(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        self.push_rule(prefix, Some(output), Some(1))
    }

    /// Fail to start any matching program.
    pub fn unavailable(&self, prefix: &[&str]) -> &Self {
        self.push_rule(prefix, None, None)
    }

    fn push_rule(
        &self,
        prefix: &[&str],
        output: Option<CommandOutput>,
        remaining: Option<usize>,
    ) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.iter().map(|s| (*s).to_owned()).collect(),
                output,
                remaining,
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded command lines, e.g. `"borg list /backup/alpha"`.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }
}

impl CommandRunner for MockRunner {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .push(invocation.clone());

        let argv: Vec<&str> = std::iter::once(invocation.program.as_str())
            .chain(invocation.args.iter().map(String::as_str))
            .collect();

        let mut rules = self
            .rules
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        let matched = rules.iter_mut().find(|rule| {
            rule.remaining != Some(0)
                && rule.prefix.len() <= argv.len()
                && rule.prefix.iter().zip(&argv).all(|(p, a)| p == a)
        });

        match matched {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.output.clone().ok_or_else(|| RuntimeError::Spawn {
                    program: invocation.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock: unavailable"),
                })
            }
            None => Ok(CommandOutput::ok("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_invocations_succeed() {
        let runner = MockRunner::new();
        let out = runner.run(&Invocation::new("umount", "unmount").arg("/mnt")).unwrap();
        assert!(out.success());
        assert_eq!(runner.command_lines(), vec!["umount /mnt"]);
    }

    #[test]
    fn first_matching_rule_wins() {
        let runner = MockRunner::new();
        runner
            .on(&["borg", "list", "--short"], CommandOutput::ok("archive-1\n"))
            .on(&["borg", "list"], CommandOutput::failed(2, "not a repository"));

        let last = runner
            .run(&Invocation::new("borg", "last").args(["list", "--short", "/r"]))
            .unwrap();
        assert_eq!(last.stdout, "archive-1\n");

        let probe = runner
            .run(&Invocation::new("borg", "probe").args(["list", "/r"]))
            .unwrap();
        assert_eq!(probe.status, Some(2));
    }

    #[test]
    fn once_rules_are_consumed() {
        let runner = MockRunner::new();
        runner.once(&["borg", "list"], CommandOutput::failed(2, ""));

        let inv = Invocation::new("borg", "probe").args(["list", "/r"]);
        assert!(!runner.run(&inv).unwrap().success());
        assert!(runner.run(&inv).unwrap().success());
    }

    #[test]
    fn unavailable_programs_fail_to_start() {
        let runner = MockRunner::new();
        runner.unavailable(&["sshfs"]);
        let err = runner.run(&Invocation::new("sshfs", "mount")).unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
