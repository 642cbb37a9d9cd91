// src/config.rs
// Pipeline configuration: TOML file + env overrides. The failure
// threshold, per-category TTLs, and dispatch bounds are deliberately
// knobs, not constants.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const ENV_CONFIG_PATH: &str = "NEWSROOM_CONFIG_PATH";
const ENV_VAPID_PUBLIC_KEY: &str = "VAPID_PUBLIC_KEY";
const DEFAULT_CONFIG_PATH: &str = "config/newsroom.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Consecutive delivery failures that deactivate a subscription (>= 1).
    pub failure_threshold: u32,
    /// Served verbatim on the public-key endpoint; env wins over file.
    pub vapid_public_key: String,
    pub cache: CacheConfig,
    pub dispatch: DispatchSection,
    pub scrape: ScrapeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub memory_budget_bytes: usize,
    /// Per-category TTL overrides, keyed by the article category.
    pub ttl_secs: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSection {
    pub max_in_flight: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapeConfig {
    /// Re-scrape period; 0 disables the background driver.
    pub interval_secs: u64,
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    pub category: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            vapid_public_key: String::new(),
            cache: CacheConfig::default(),
            dispatch: DispatchSection::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            memory_budget_bytes: 64 * 1024 * 1024,
            ttl_secs: HashMap::new(),
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            timeout_secs: 10,
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            feeds: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn parse(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load using $NEWSROOM_CONFIG_PATH, then config/newsroom.toml, then
    /// built-in defaults. Env overrides apply in every case.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load_from(Path::new(&p));
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(default);
        }
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(ENV_VAPID_PUBLIC_KEY) {
            if !key.trim().is_empty() {
                self.vapid_public_key = key.trim().to_string();
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.failure_threshold >= 1, "failure_threshold must be >= 1");
        anyhow::ensure!(self.dispatch.max_in_flight >= 1, "dispatch.max_in_flight must be >= 1");
        anyhow::ensure!(self.dispatch.timeout_secs >= 1, "dispatch.timeout_secs must be >= 1");
        Ok(())
    }

    /// TTL for a cache key category, falling back to the default.
    pub fn ttl_for(&self, category: &str) -> Duration {
        let secs = self
            .cache
            .ttl_secs
            .get(category)
            .copied()
            .unwrap_or(self.cache.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.ttl_for("anything"), Duration::from_secs(300));
    }

    #[test]
    fn toml_overrides_and_per_category_ttl() {
        let cfg = PipelineConfig::parse(
            r#"
            failure_threshold = 3

            [cache]
            default_ttl_secs = 60

            [cache.ttl_secs]
            politics = 120

            [dispatch]
            max_in_flight = 4
            timeout_secs = 5

            [[scrape.feeds]]
            name = "wire"
            url = "https://feeds.example/wire.xml"
            category = "world"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.ttl_for("politics"), Duration::from_secs(120));
        assert_eq!(cfg.ttl_for("sports"), Duration::from_secs(60));
        assert_eq!(cfg.scrape.feeds.len(), 1);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(PipelineConfig::parse("failure_threshold = 0").is_err());
    }
}
