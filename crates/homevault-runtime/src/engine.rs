use crate::exec::{CommandOutput, CommandRunner, Invocation};
use crate::RuntimeError;
use homevault_schema::{BackupConfig, Passphrase};
use std::path::Path;
use std::sync::Arc;

/// Environment variable borg reads the repository passphrase from.
pub const PASSPHRASE_ENV: &str = "BORG_PASSPHRASE";

/// The borg command-line contract.
///
/// Every invocation carries the passphrase as a child-only environment entry;
/// it never appears in an argument vector.
pub struct RepositoryEngine {
    runner: Arc<dyn CommandRunner>,
    program: String,
    passphrase: Passphrase,
}

impl RepositoryEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        passphrase: Passphrase,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            passphrase,
        }
    }

    fn invoke(&self, label: &str, args: Vec<String>) -> Invocation {
        Invocation::new(&self.program, label)
            .args(args)
            .secret_env(PASSPHRASE_ENV, &self.passphrase)
    }

    /// `borg list <repo>`; success means the repository exists and is readable.
    pub fn probe(&self, repo: &str, label: &str) -> Result<CommandOutput, RuntimeError> {
        self.runner
            .run(&self.invoke(label, vec!["list".to_owned(), repo.to_owned()]))
    }

    pub fn init(&self, repo: &str, encryption: &str) -> Result<CommandOutput, RuntimeError> {
        self.runner.run(&self.invoke(
            "Initialising repository",
            vec![
                "init".to_owned(),
                "--encryption".to_owned(),
                encryption.to_owned(),
                repo.to_owned(),
            ],
        ))
    }

    pub fn key_import(&self, repo: &str, key_path: &Path) -> Result<CommandOutput, RuntimeError> {
        self.runner.run(&self.invoke(
            &format!("Importing key {}", key_path.display()),
            vec![
                "key".to_owned(),
                "import".to_owned(),
                repo.to_owned(),
                key_path.display().to_string(),
            ],
        ))
    }

    pub fn key_export(&self, repo: &str, key_path: &Path) -> Result<CommandOutput, RuntimeError> {
        self.runner.run(&self.invoke(
            &format!("Exporting key in '{}'", key_path.display()),
            vec![
                "key".to_owned(),
                "export".to_owned(),
                repo.to_owned(),
                key_path.display().to_string(),
            ],
        ))
    }

    pub fn create(&self, repo: &str, config: &BackupConfig) -> Result<CommandOutput, RuntimeError> {
        self.runner
            .run(&self.invoke("Creating backup", create_args(repo, config)))
    }

    pub fn prune(&self, repo: &str, config: &BackupConfig) -> Result<CommandOutput, RuntimeError> {
        self.runner
            .run(&self.invoke("Pruning repository", prune_args(repo, config)))
    }

    pub fn check(&self, repo: &str, verify_data: bool) -> Result<CommandOutput, RuntimeError> {
        let mut args = vec!["check".to_owned(), "--info".to_owned(), repo.to_owned()];
        if verify_data {
            args.push("--verify-data".to_owned());
        }
        self.runner.run(&self.invoke("Checking repository", args))
    }

    /// Name of the most recent archive, `None` for an empty repository.
    ///
    /// The raw output is returned alongside so a failed listing can be reported.
    pub fn last_archive(
        &self,
        repo: &str,
    ) -> Result<(Option<String>, CommandOutput), RuntimeError> {
        let output = self.runner.run(&self.invoke(
            "Getting last backup ID",
            vec![
                "list".to_owned(),
                "--short".to_owned(),
                "--last".to_owned(),
                "1".to_owned(),
                repo.to_owned(),
            ],
        ))?;
        let name = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_owned);
        Ok((name.filter(|_| output.success()), output))
    }

    /// Extract `archive` with `target` as the working directory.
    pub fn extract(
        &self,
        repo: &str,
        archive: &str,
        target: &Path,
    ) -> Result<CommandOutput, RuntimeError> {
        let invocation = self
            .invoke(
                "Restoring backup",
                vec![
                    "extract".to_owned(),
                    "--info".to_owned(),
                    format!("{repo}::{archive}"),
                ],
            )
            .current_dir(target);
        self.runner.run(&invocation)
    }
}

pub fn create_args(repo: &str, config: &BackupConfig) -> Vec<String> {
    let mut args = vec![
        "create".to_owned(),
        "--filter".to_owned(),
        "AME".to_owned(),
        "--verbose".to_owned(),
    ];
    if let Some(compression) = &config.compression {
        args.push("--compression".to_owned());
        args.push(compression.clone());
    }
    args.push("--exclude-caches".to_owned());
    if let Some(exclude) = &config.exclude_from {
        args.push("--exclude-from".to_owned());
        args.push(exclude.display().to_string());
    }
    if let Some(limit) = config.rate_limit {
        args.push("--remote-ratelimit".to_owned());
        args.push(limit.to_string());
    }
    args.push("--stats".to_owned());
    args.push("--show-rc".to_owned());
    args.push(format!("{repo}::{}-{{now}}", config.archive_prefix));
    args.extend(config.sources.iter().map(|p| p.display().to_string()));
    args
}

pub fn prune_args(repo: &str, config: &BackupConfig) -> Vec<String> {
    vec![
        "prune".to_owned(),
        "--glob-archives".to_owned(),
        format!("{}-*", config.archive_prefix),
        "-v".to_owned(),
        "--list".to_owned(),
        "--stats".to_owned(),
        "--show-rc".to_owned(),
        "--keep-daily".to_owned(),
        config.retention.daily.to_string(),
        "--keep-weekly".to_owned(),
        config.retention.weekly.to_string(),
        "--keep-monthly".to_owned(),
        config.retention.monthly.to_string(),
        repo.to_owned(),
    ]
}
