//! CLI Tooling
//!
//! Command-line interface for inspecting and mutating a pinset bucket.
//! Commands run on an owned tokio runtime; background pins that are still
//! running when the process exits are picked up again on the next start.

use crate::bucket::Bucket;
use crate::config::{ConfigLoader, PinsetConfig};
use crate::coordinator::PinCoordinator;
use crate::store::{
    DocumentStore, HttpPinningService, LocalDocumentStore, LocalObjectStore, LocalPinningService,
    ObjectStore, PinningService, SledKv,
};
use crate::types::ContentId;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::info;

/// Pinset CLI - content-addressed bucket pinning
#[derive(Parser)]
#[command(name = "pinset")]
#[command(about = "Manage a content-addressed pinset bucket")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local store directory (overrides storage.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a file as a raw block and print its content id
    Put {
        /// File to store
        file: PathBuf,
    },
    /// Add a named content id to the bucket
    Pin {
        name: String,
        cid: String,
        /// Seconds to wait for remote pin confirmation
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Remove a name from the bucket
    Unpin {
        name: String,
        /// Seconds to wait for remote pin confirmation
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Show bucket contents and pin state
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Pin the current root again
    Retry {
        /// Give up after this many seconds
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Replace the bucket with an empty directory
    Reset,
    /// Show storage used against the limit
    Usage {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Cli {
    /// Load config and fold CLI overrides into it.
    pub fn resolve_config(&self) -> anyhow::Result<PinsetConfig> {
        let mut config =
            ConfigLoader::load(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = Some(dir.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.logging.output = output.clone();
        }
        Ok(config)
    }
}

/// CLI context owning the runtime, stores and coordinator
pub struct CliContext {
    runtime: Runtime,
    coordinator: PinCoordinator,
    objects: Arc<dyn ObjectStore>,
}

impl CliContext {
    /// Open the local store and provision the bucket
    pub fn new(config: &PinsetConfig) -> anyhow::Result<Self> {
        let data_dir = config.storage.resolve_data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let db = sled::open(&data_dir)
            .with_context(|| format!("Failed to open sled database at {}", data_dir.display()))?;

        let documents: Arc<dyn DocumentStore> =
            Arc::new(LocalDocumentStore::new(SledKv::open(&db, "documents")?));
        let objects: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(SledKv::open(&db, "blocks")?));
        let pinning: Arc<dyn PinningService> = match &config.pinning.endpoint {
            Some(endpoint) => Arc::new(HttpPinningService::new(
                endpoint,
                config.pinning.resolved_token(),
                config.pinning.request_timeout(),
            )?),
            None => Arc::new(LocalPinningService::new(SledKv::open(&db, "archives")?)),
        };

        let runtime = Runtime::new().context("Failed to create runtime")?;
        let bucket = Arc::new(Bucket::new(
            config,
            documents,
            Arc::clone(&objects),
            pinning,
            Default::default(),
        ));
        let coordinator = {
            let _guard = runtime.enter();
            PinCoordinator::new(bucket, config)
        };
        runtime
            .block_on(coordinator.provision())
            .context("Failed to provision bucket")?;
        info!(data_dir = %data_dir.display(), "Opened pinset store");

        Ok(Self {
            runtime,
            coordinator,
            objects,
        })
    }

    pub fn coordinator(&self) -> &PinCoordinator {
        &self.coordinator
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> anyhow::Result<String> {
        self.runtime.block_on(self.execute_async(command))
    }

    /// Stop background work before exit
    pub fn close(self) {
        self.runtime.block_on(self.coordinator.shutdown());
    }

    async fn execute_async(&self, command: &Commands) -> anyhow::Result<String> {
        match command {
            Commands::Put { file } => {
                let data = tokio::task::spawn_blocking({
                    let file = file.clone();
                    move || std::fs::read(file)
                })
                .await?
                .with_context(|| format!("Failed to read {}", file.display()))?;
                let cid = self.objects.put_block(&data).await?;
                Ok(cid.to_string())
            }
            Commands::Pin { name, cid, wait } => {
                let cid = parse_cid(cid)?;
                self.coordinator.pin_cid(name, &cid).await?;
                self.wait_for_pins(*wait).await?;
                Ok(format!("Pinned {} -> {}", name, cid))
            }
            Commands::Unpin { name, wait } => {
                self.coordinator.unpin_cid(name).await?;
                self.wait_for_pins(*wait).await?;
                Ok(format!("Unpinned {}", name))
            }
            Commands::Status { format } => self.format_status(format),
            Commands::Retry { wait } => {
                let retry = self.coordinator.retry_pin();
                match wait {
                    Some(secs) => tokio::time::timeout(Duration::from_secs(*secs), retry)
                        .await
                        .context("Timed out waiting for pin confirmation")??,
                    None => retry.await?,
                }
                Ok("Bucket pinned".to_string())
            }
            Commands::Reset => {
                self.coordinator.reset().await?;
                Ok(format!(
                    "Reset bucket (root: {})",
                    self.coordinator.bucket().bucket_link().unwrap_or_default()
                ))
            }
            Commands::Usage { format } => self.format_usage(format),
        }
    }

    async fn wait_for_pins(&self, wait: Option<u64>) -> anyhow::Result<()> {
        if let Some(secs) = wait {
            self.coordinator
                .wait_for_idle(Some(Duration::from_secs(secs)))
                .await?;
        }
        Ok(())
    }

    fn format_status(&self, format: &str) -> anyhow::Result<String> {
        let snapshot = self.coordinator.bucket().snapshot();
        let queued = snapshot.queued.unwrap_or_default();
        let pinned = snapshot.pinned.unwrap_or_default();
        let state_of = |cid: &ContentId| -> &'static str {
            if pinned.contains_cid(cid) {
                "pinned"
            } else if self.coordinator.is_failed(cid) {
                "failed"
            } else {
                "queued"
            }
        };

        if format == "json" {
            let links: Vec<serde_json::Value> = queued
                .iter()
                .map(|l| {
                    json!({
                        "name": l.name,
                        "cid": l.cid.to_string(),
                        "size": l.size,
                        "state": state_of(&l.cid),
                    })
                })
                .collect();
            let out = json!({
                "root": snapshot.root.as_ref().map(|r| r.uri()),
                "links": links,
                "storage_used": self.coordinator.storage_used(),
                "storage_limit": self.coordinator.storage_limit(),
            });
            return Ok(serde_json::to_string_pretty(&out)?);
        }
        if format != "text" {
            bail!("Invalid format: {} (must be 'text' or 'json')", format);
        }

        let mut table = Table::new();
        table.load_preset(comfy_table::presets::UTF8_FULL);
        table.set_header(vec!["Name", "Content ID", "Size", "State"]);
        for link in &queued {
            let state = match state_of(&link.cid) {
                "pinned" => "pinned".green().to_string(),
                "failed" => "failed".red().to_string(),
                other => other.yellow().to_string(),
            };
            table.add_row(vec![
                link.name.clone(),
                link.cid.to_string(),
                link.size.to_string(),
                state,
            ]);
        }
        let root = snapshot
            .root
            .map(|r| r.uri())
            .unwrap_or_else(|| "-".to_string());
        Ok(format!("Root: {}\n{}", root, table))
    }

    fn format_usage(&self, format: &str) -> anyhow::Result<String> {
        let used = self.coordinator.storage_used().unwrap_or(0);
        let limit = self.coordinator.storage_limit();
        if format == "json" {
            return Ok(serde_json::to_string_pretty(
                &json!({ "used": used, "limit": limit }),
            )?);
        }
        let percent = if limit == 0 {
            0.0
        } else {
            used as f64 * 100.0 / limit as f64
        };
        Ok(format!("{} / {} bytes ({:.2}%)", used, limit, percent))
    }
}

fn parse_cid(value: &str) -> anyhow::Result<ContentId> {
    ContentId::from_uri(value).with_context(|| format!("Invalid content id: '{}'", value))
}
