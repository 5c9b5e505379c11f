use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::cli::{Command, RemoteArgs, StateArgs, TransferArgs};
use crate::engine::{EngineConfig, Predicate};
use crate::hasher::hash_bytes;
use crate::remote::GitHubConfig;
use crate::retry::RetryConfig;
use crate::types::Mode;

/// Validated settings for one transfer command.
pub struct Config {
    pub mode: Mode,
    pub directory: PathBuf,
    pub state_directory: PathBuf,
    pub github: GitHubConfig,
    pub engine: EngineConfig,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub watch_with_interval: Option<u64>,
    pub no_progress_bar: bool,
    pub notify_systemd: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `github` redacts its own token.
        f.debug_struct("Config")
            .field("mode", &self.mode)
            .field("directory", &self.directory)
            .field("state_directory", &self.state_directory)
            .field("github", &self.github)
            .field("engine", &self.engine)
            .field("watch_with_interval", &self.watch_with_interval)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Parse a byte size such as `4194304`, `512KiB`, `40MiB` or `1GB`.
///
/// Binary suffixes (`KiB`, `MiB`, `GiB`, and bare `K`/`M`/`G`) are powers of
/// 1024; `KB`/`MB`/`GB` are powers of 1000.
pub(crate) fn parse_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        anyhow::bail!("Cannot parse '{}' as a size", s);
    }
    let n: u64 = digits
        .parse()
        .with_context(|| format!("Cannot parse '{}' as a size", s))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        other => anyhow::bail!("Unknown size suffix '{}' in '{}'", other, s),
    };
    n.checked_mul(multiplier)
        .with_context(|| format!("Size '{}' is too large", s))
}

/// `owner/name` → `("owner", "name")`.
pub(crate) fn parse_repo(s: &str) -> anyhow::Result<(String, String)> {
    match s.trim().split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((owner.to_string(), name.trim_end_matches(".git").to_string()))
        }
        _ => anyhow::bail!("Repository must be given as owner/name, got '{}'", s),
    }
}

/// File name of the metadata cache for one sync target.
///
/// The readable prefix names the repository; the digest covers the exact
/// `(repo, branch, remote root)` triple so no two targets share a cache.
pub(crate) fn cache_file_name(repo: &str, branch: Option<&str>, remote_root: &str) -> String {
    let readable: String = repo
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let key = format!("{repo}\n{branch:?}\n{}", remote_root.trim_matches('/'));
    format!("{readable}-{}.db", &hash_bytes(key.as_bytes())[..12])
}

/// Path of the metadata cache for a sync target.
pub(crate) fn db_path(
    state_directory: &Path,
    repo: &str,
    branch: Option<&str>,
    remote_root: &str,
) -> PathBuf {
    state_directory.join(cache_file_name(repo, branch, remote_root))
}

impl StateArgs {
    pub fn db_path(&self) -> anyhow::Result<PathBuf> {
        let (owner, repo) = parse_repo(&self.repo)?;
        Ok(db_path(
            &expand_tilde(&self.state_directory),
            &format!("{owner}/{repo}"),
            self.branch.as_deref(),
            &self.remote_root,
        ))
    }
}

fn github_config(remote: &RemoteArgs) -> anyhow::Result<GitHubConfig> {
    let (owner, repo) = parse_repo(&remote.repo)?;
    let token = remote
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .context("A token is required: pass --token or set GITHUB_TOKEN")?;
    Ok(GitHubConfig {
        api_base: remote.api_base.clone(),
        owner,
        repo,
        branch: remote.branch.clone().filter(|b| !b.is_empty()),
        token,
        timeout: Duration::from_secs(remote.timeout.max(1)),
    })
}

fn engine_config(args: &TransferArgs, overwrite: bool) -> anyhow::Result<EngineConfig> {
    let defaults = EngineConfig::default();
    let config = EngineConfig {
        direct_upload_limit_bytes: parse_size(&args.direct_limit)?,
        part_size_bytes: parse_size(&args.part_size)?,
        retry: RetryConfig {
            max_retries: args.max_retries,
            base_delay_ms: args.retry_delay_ms,
            ..RetryConfig::default()
        },
        overwrite_existing: overwrite,
        concurrency: args.concurrency.unwrap_or(defaults.concurrency),
        part_concurrency: args.part_concurrency,
        remote_root: args.remote.remote_root.clone(),
        blob_cache_bytes: parse_size(&args.blob_cache)?,
    };
    config.validate()?;
    Ok(config)
}

/// Reject patterns early so a typo fails before any network traffic.
pub(crate) fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Sync filter: a path relative to the local root passes when it matches
/// an include pattern (or none were given) and no exclude pattern.
pub(crate) fn build_predicate(
    include: &[String],
    exclude: &[String],
) -> anyhow::Result<Box<Predicate>> {
    let include = if include.is_empty() {
        None
    } else {
        Some(build_globset(include)?)
    };
    let exclude = build_globset(exclude)?;
    Ok(Box::new(move |rel: &Path| {
        include.as_ref().is_none_or(|set| set.is_match(rel)) && !exclude.is_match(rel)
    }))
}

impl Config {
    pub fn from_cli(command: Command, no_progress_bar: bool) -> anyhow::Result<Self> {
        let (mode, transfer, include, exclude, overwrite) = match command {
            Command::Sync(a) => (Mode::Sync, a.transfer, a.include, a.exclude, false),
            Command::Reconstruct(a) => (Mode::Reconstruct, a.transfer, vec![], vec![], a.overwrite),
            Command::Pull(a) => (Mode::Pull, a.transfer, vec![], vec![], a.overwrite),
            Command::Structure(a) => (Mode::Structure, a, vec![], vec![], false),
            Command::Status(_) | Command::ResetState(_) => {
                anyhow::bail!("not a transfer command")
            }
        };

        build_globset(&include)?;
        build_globset(&exclude)?;
        let github = github_config(&transfer.remote)?;
        let engine = engine_config(&transfer, overwrite)?;

        let directory = expand_tilde(&transfer.directory);
        if directory.as_os_str().is_empty() {
            anyhow::bail!("--directory must not be empty");
        }

        Ok(Self {
            mode,
            directory,
            state_directory: expand_tilde(&transfer.state_directory),
            github,
            engine,
            include,
            exclude,
            watch_with_interval: transfer.watch_with_interval.filter(|s| *s > 0),
            no_progress_bar,
            notify_systemd: transfer.notify_systemd,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        db_path(
            &self.state_directory,
            &format!("{}/{}", self.github.owner, self.github.repo),
            self.github.branch.as_deref(),
            &self.engine.remote_root,
        )
    }
}
