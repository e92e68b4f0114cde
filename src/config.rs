use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{trace, warn};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Shodan API key (falls back to `SHODAN_API_KEY`)
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the streaming API
    #[serde(default = "crate::util::get_default_stream_url")]
    pub stream_url: String,

    pub collectors: Vec<CollectorConfig>,

    #[serde(default)]
    pub tuning: Tuning,
}

/// One alert feed paired with the file it is logged to
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct CollectorConfig {
    /// Alert identity on the remote side
    #[serde(alias = "aid")]
    pub id: String,

    /// Destination of the append-only JSON line log
    #[serde(alias = "log")]
    pub log_path: PathBuf,
}

/// How a fetcher restart sequences the old and the new instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Start the new fetcher, wait for the settle interval, then stop the old one.
    /// Records may be duplicated while both are running.
    #[default]
    Overlap,

    /// Stop the old fetcher before starting the new one.
    /// No duplicates, but alerts arriving in between are missed.
    StopFirst,
}

/// Timing knobs of the collector pipeline. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub fetcher_join_timeout_ms: u64,
    pub writer_join_timeout_ms: u64,
    pub pull_timeout_ms: u64,
    pub drain_poll_interval_ms: u64,
    /// `None` waits for the drain forever
    pub drain_timeout_ms: Option<u64>,
    pub restart_settle_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub queue_warn_threshold: usize,
    pub restart_mode: RestartMode,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            fetcher_join_timeout_ms: 1_000,
            writer_join_timeout_ms: 3_000,
            pull_timeout_ms: 500,
            drain_poll_interval_ms: 1_000,
            drain_timeout_ms: Some(60_000),
            restart_settle_ms: 500,
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
            queue_warn_threshold: 10_000,
            restart_mode: RestartMode::default(),
        }
    }
}

impl Tuning {
    pub fn fetcher_join_timeout(&self) -> Duration {
        Duration::from_millis(self.fetcher_join_timeout_ms)
    }

    pub fn writer_join_timeout(&self) -> Duration {
        Duration::from_millis(self.writer_join_timeout_ms)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

impl Config {
    /// Fill in the API key from the environment and check the invariants
    /// the controllers rely on.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        if self.api_key.trim().is_empty() {
            match crate::util::get_api_key() {
                Some(key) => self.api_key = key,
                None => bail!("no api_key configured and SHODAN_API_KEY is not set"),
            }
        }

        if self.collectors.is_empty() {
            bail!("at least one collector must be configured");
        }

        let mut seen_paths = HashSet::new();
        for (index, collector) in self.collectors.iter().enumerate() {
            if collector.id.trim().is_empty() {
                bail!("collector #{index} has an empty id");
            }
            if collector.log_path.as_os_str().is_empty() {
                bail!("collector {} has an empty log_path", collector.id);
            }
            if !seen_paths.insert(collector.log_path.as_path()) {
                warn!(
                    "log path {} is shared by several collectors, their lines will interleave",
                    collector.log_path.display()
                );
            }
        }

        if self.tuning.retry_max_ms < self.tuning.retry_initial_ms {
            bail!("tuning.retry_max_ms must not be smaller than tuning.retry_initial_ms");
        }

        Ok(self)
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config =
        serde_json::from_str(content).context("invalid configuration document")?;
    config
        .resolve()
        .inspect(|config| trace!("loaded config with {} collectors", config.collectors.len()))
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    parse_config(&file_content)
}
