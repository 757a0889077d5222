//! Configuration for the rotapost binary.
//!
//! Supports loading configuration from TOML files, environment variables,
//! or CLI arguments.

use std::path::{Path, PathBuf};

use clap::{ArgGroup, Parser};
use rotapost::{RunMode, ScopeKey};
use serde::{Deserialize, Serialize};

/// Default Google Drive API base URL.
pub const DEFAULT_DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

/// Default LinkedIn API base URL.
pub const DEFAULT_LINKEDIN_API: &str = "https://api.linkedin.com/v2";

/// CLI arguments for rotapost.
#[derive(Debug, Parser)]
#[command(name = "rotapost", version)]
#[command(about = "Publish the next post of a deterministic rotation")]
#[command(group(ArgGroup::new("mode").args(["dry_run", "reset", "status"])))]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "ROTAPOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rotation scope (one per managed account).
    #[arg(long, env = "ROTAPOST_SCOPE")]
    pub scope: Option<ScopeKey>,

    /// Directory holding the rotation state files.
    #[arg(long, env = "ROTAPOST_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Local folder of `.txt` posts, used when Drive is unavailable.
    #[arg(long, env = "ROTAPOST_POSTS_DIR")]
    pub posts_dir: Option<PathBuf>,

    /// Google Drive folder id holding the posts.
    #[arg(long, env = "ROTAPOST_DRIVE_FOLDER_ID")]
    pub drive_folder_id: Option<String>,

    /// LinkedIn author URN, e.g. `urn:li:person:abc123`.
    #[arg(long, env = "ROTAPOST_LINKEDIN_AUTHOR")]
    pub linkedin_author: Option<String>,

    /// Upper bound of the random delay before a run, in seconds.
    #[arg(long, env = "ROTAPOST_MAX_START_DELAY_SECS")]
    pub max_start_delay_secs: Option<u64>,

    /// Preview the next post without publishing or saving state.
    #[arg(long)]
    pub dry_run: bool,

    /// Reset the rotation so the next run starts from the newest post.
    #[arg(long)]
    pub reset: bool,

    /// Print the stored rotation state.
    #[arg(long)]
    pub status: bool,

    /// Skip the random start delay.
    #[arg(long)]
    pub no_random_delay: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Returns the run mode selected by the flags.
    pub const fn mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else if self.reset {
            RunMode::Reset
        } else if self.status {
            RunMode::Status
        } else {
            RunMode::Publish
        }
    }
}

/// Configuration for rotapost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rotation scope.
    pub scope: ScopeKey,

    /// Directory holding the rotation state files.
    pub state_dir: PathBuf,

    /// Local posts folder.
    pub posts_dir: PathBuf,

    /// Google Drive folder id. Drive is skipped when unset.
    pub drive_folder_id: Option<String>,

    /// Google Drive API base URL.
    pub drive_api_base: String,

    /// LinkedIn API base URL.
    pub linkedin_api_base: String,

    /// LinkedIn author URN.
    pub linkedin_author: Option<String>,

    /// HTTP request timeout in milliseconds.
    pub http_timeout_ms: u64,

    /// Upper bound of the random start delay in seconds; 0 disables it.
    pub max_start_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope: ScopeKey::default(),
            state_dir: PathBuf::from("state"),
            posts_dir: PathBuf::from("posts"),
            drive_folder_id: None,
            drive_api_base: DEFAULT_DRIVE_API.to_string(),
            linkedin_api_base: DEFAULT_LINKEDIN_API.to_string(),
            linkedin_author: None,
            http_timeout_ms: 30_000,
            max_start_delay_secs: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load configuration from CLI arguments, optionally overriding a config file.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        // Start with config file if provided
        let mut config =
            if let Some(ref path) = cli.config { Self::from_file(path)? } else { Self::default() };

        // CLI args override config file values
        if let Some(ref scope) = cli.scope {
            config.scope = scope.clone();
        }
        if let Some(ref dir) = cli.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(ref dir) = cli.posts_dir {
            config.posts_dir = dir.clone();
        }
        if cli.drive_folder_id.is_some() {
            config.drive_folder_id = cli.drive_folder_id.clone();
        }
        if cli.linkedin_author.is_some() {
            config.linkedin_author = cli.linkedin_author.clone();
        }
        if let Some(secs) = cli.max_start_delay_secs {
            config.max_start_delay_secs = secs;
        }

        Ok(config)
    }
}

/// Secrets read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    /// Google Drive OAuth access token.
    pub drive_token: Option<String>,
    /// LinkedIn OAuth access token.
    pub linkedin_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("drive_token", &self.drive_token.as_ref().map(|_| "<redacted>"))
            .field("linkedin_token", &self.linkedin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    /// Reads `ROTAPOST_DRIVE_TOKEN` and `ROTAPOST_LINKEDIN_TOKEN`.
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            drive_token: read("ROTAPOST_DRIVE_TOKEN"),
            linkedin_token: read("ROTAPOST_LINKEDIN_TOKEN"),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse configuration file.
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),

    /// A value required for the selected mode is missing.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}
