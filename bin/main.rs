//! rotapost binary.
#![allow(unreachable_pub, dead_code, clippy::missing_const_for_fn, clippy::option_if_let_else)]
//!
//! Publishes the next post of a rotation, meant to be triggered once per
//! scheduled slot (cron, CI schedule):
//! - Content from a Google Drive folder, falling back to a local folder
//! - Publishing to LinkedIn through the UGC Posts API
//! - Rotation state persisted per scope under the state directory
//!
//! ## Usage
//!
//! ```bash
//! # Publish the next post
//! rotapost --config rotapost.toml
//!
//! # Preview without publishing
//! rotapost --dry-run --posts-dir ./posts
//!
//! # Start the rotation over
//! rotapost --reset
//! ```

mod config;
mod drive;
mod linkedin;

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use rand::Rng;
use rotapost::{
    ContentItem, ContentSource, FallbackSource, FileStateStore, LoadedState, LocalDirSource,
    Orchestrator, OrchestratorConfig, PublishError, PublishReceipt, Publisher, RotationError,
    RunMode, RunOutcome, ScopeKey, SourceError,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::{Cli, Config, ConfigError, Secrets},
    drive::DriveSource,
    linkedin::LinkedInPublisher,
};

/// Characters of a post shown in dry-run output.
const PREVIEW_CHARS: usize = 500;

/// Exit code for configuration errors.
const CONFIG_EXIT_CODE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = cli.mode();
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(CONFIG_EXIT_CODE);
        }
    };
    info!(?config, ?mode, "loaded configuration");

    if mode == RunMode::Publish && !cli.no_random_delay {
        start_delay(config.max_start_delay_secs).await;
    }

    match run(&config, &Secrets::from_env(), mode).await {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(AppError::Config(e)) => {
            error!(error = %e, "invalid configuration");
            ExitCode::from(CONFIG_EXIT_CODE)
        }
        Err(AppError::Run(e)) => {
            error!(error = %e, "run failed");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Errors surfaced by the binary.
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Run(#[from] RotationError),
}

async fn run(config: &Config, secrets: &Secrets, mode: RunMode) -> Result<RunOutcome, AppError> {
    let timeout = Duration::from_millis(config.http_timeout_ms);
    let source = build_source(config, secrets, timeout);
    let store = FileStateStore::new(&config.state_dir);
    let orchestrator_config = OrchestratorConfig { scope: config.scope.clone() };

    if mode == RunMode::Publish {
        let author =
            config.linkedin_author.clone().ok_or(ConfigError::Missing("linkedin_author"))?;
        let token =
            secrets.linkedin_token.clone().ok_or(ConfigError::Missing("ROTAPOST_LINKEDIN_TOKEN"))?;
        let publisher = LinkedInPublisher::new(&config.linkedin_api_base, author, token, timeout)
            .map_err(RotationError::from)?;
        let orchestrator = Orchestrator::new(orchestrator_config, source, publisher, store);
        return Ok(orchestrator.run(mode).await?);
    }

    let orchestrator = Orchestrator::new(orchestrator_config, source, NoPublisher, store);
    Ok(orchestrator.run(mode).await?)
}

/// Content source chosen from the configuration.
#[derive(Debug)]
enum Source {
    Local(LocalDirSource),
    Drive(FallbackSource<DriveSource, LocalDirSource>),
}

impl ContentSource for Source {
    async fn list_items(&self, scope: &ScopeKey) -> Result<Vec<ContentItem>, SourceError> {
        match self {
            Self::Local(source) => source.list_items(scope).await,
            Self::Drive(source) => source.list_items(scope).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Local(source) => source.describe(),
            Self::Drive(source) => source.describe(),
        }
    }
}

fn build_source(config: &Config, secrets: &Secrets, timeout: Duration) -> Source {
    let local = LocalDirSource::new(&config.posts_dir);
    let (Some(folder), Some(token)) = (&config.drive_folder_id, &secrets.drive_token) else {
        info!(dir = %config.posts_dir.display(), "drive not configured, using local posts");
        return Source::Local(local);
    };

    match DriveSource::new(&config.drive_api_base, folder, token, timeout) {
        Ok(drive) => Source::Drive(FallbackSource::new(drive, local)),
        Err(e) => {
            error!(error = %e, "cannot initialize drive source, using local posts");
            Source::Local(local)
        }
    }
}

/// Publisher for modes that never publish.
#[derive(Debug, Clone, Copy)]
struct NoPublisher;

impl Publisher for NoPublisher {
    async fn publish(&self, _body: &str) -> Result<PublishReceipt, PublishError> {
        Err(PublishError::Unauthorized("publishing is disabled in this mode".to_string()))
    }
}

/// Sleeps a random duration up to `max_secs` to spread scheduled posts.
async fn start_delay(max_secs: u64) {
    if max_secs == 0 {
        return;
    }
    let secs = rand::thread_rng().gen_range(0..=max_secs);
    info!(delay_secs = secs, "waiting before posting");
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Published { selection, receipt } => {
            info!(
                item = %selection.item.label(),
                post_id = receipt.post_id.as_deref().unwrap_or("unknown"),
                cycle = selection.next_state.cycle_count,
                "post published"
            );
        }
        RunOutcome::Previewed { selection } => {
            println!(
                "would publish {} ({} of {})",
                selection.item.label(),
                selection.position + 1,
                selection.total
            );
            println!("{}", preview(&selection.item.body));
        }
        RunOutcome::Reset { state } => println!("rotation reset: {state}"),
        RunOutcome::Status { loaded } => {
            println!("{}", loaded.state());
            if let LoadedState::Recovered { reason, .. } = loaded {
                println!("stored state was discarded: {reason}");
            }
        }
    }
}

fn preview(body: &str) -> String {
    let mut shown: String = body.chars().take(PREVIEW_CHARS).collect();
    if body.chars().nth(PREVIEW_CHARS).is_some() {
        shown.push_str("...");
    }
    shown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_long_bodies() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(PREVIEW_CHARS + 10);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_local_source_without_drive() {
        let config = Config::default();
        let source = build_source(&config, &Secrets::default(), Duration::from_secs(1));
        assert!(matches!(source, Source::Local(_)));
    }

    #[test]
    fn test_drive_source_with_folder_and_token() {
        let config = Config { drive_folder_id: Some("F1".to_string()), ..Config::default() };
        let secrets = Secrets { drive_token: Some("tok".to_string()), linkedin_token: None };
        let source = build_source(&config, &secrets, Duration::from_secs(1));
        assert_eq!(source.describe(), "drive:F1 (fallback local:posts)");
    }

    #[tokio::test]
    async fn test_publish_requires_linkedin_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { state_dir: dir.path().to_path_buf(), ..Config::default() };
        let err = run(&config, &Secrets::default(), RunMode::Publish).await.unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::Missing("linkedin_author"))));
    }

    #[tokio::test]
    async fn test_dry_run_against_local_folder() {
        let dir = tempfile::tempdir().unwrap();
        let posts = dir.path().join("posts");
        std::fs::create_dir(&posts).unwrap();
        std::fs::write(posts.join("hello.txt"), "Hello from disk").unwrap();

        let config = Config {
            state_dir: dir.path().join("state"),
            posts_dir: posts,
            ..Config::default()
        };
        let outcome = run(&config, &Secrets::default(), RunMode::DryRun).await.unwrap();
        match outcome {
            RunOutcome::Previewed { selection } => {
                assert_eq!(selection.item.body, "Hello from disk");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!dir.path().join("state").join("default.json").exists());
    }
}
