use crate::error::{LagwatchError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub lagcheck: LagcheckConfig,
    pub clusters: Vec<ClusterConfig>,
}

/// Tuning for the offset store and the lag rule engine.
#[derive(Debug, Deserialize, Clone)]
pub struct LagcheckConfig {
    /// Capacity of each per-partition commit ring.
    #[serde(default = "default_intervals")]
    pub intervals: usize,
    /// Groups whose youngest stored commit is older than this are flushed.
    #[serde(with = "humantime_serde", default = "default_expire_group")]
    pub expire_group: Duration,
    /// Minimum spacing between accepted genuine commits per partition.
    #[serde(with = "humantime_serde", default = "default_min_distance")]
    pub min_distance: Duration,
    /// Regex for consumer groups to ignore entirely. Empty disables.
    #[serde(default)]
    pub group_blacklist: String,
    /// Regex for topics to ignore entirely. Empty disables.
    #[serde(default)]
    pub topic_blacklist: String,
    /// Bound on the offset ingress channel; senders back off when full.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    pub name: String,
}

fn default_intervals() -> usize {
    10
}

fn default_expire_group() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_min_distance() -> Duration {
    Duration::from_secs(10)
}

fn default_queue_depth() -> usize {
    10_000
}

impl Default for LagcheckConfig {
    fn default() -> Self {
        Self {
            intervals: default_intervals(),
            expire_group: default_expire_group(),
            min_distance: default_min_distance(),
            group_blacklist: String::new(),
            topic_blacklist: String::new(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Config> {
        let config_path = path.unwrap_or("config.toml");

        if !Path::new(config_path).exists() {
            return Err(LagwatchError::Config(format!(
                "Configuration file not found: {}",
                config_path
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let content = Self::substitute_env_vars(&content);

        let config: Config = toml::from_str(&content)
            .map_err(|e| LagwatchError::Config(format!("TOML parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            return Err(LagwatchError::Config(
                "At least one cluster must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(LagwatchError::Config(
                    "Cluster name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(cluster.name.as_str()) {
                return Err(LagwatchError::Config(format!(
                    "Duplicate cluster name: {}",
                    cluster.name
                )));
            }
        }

        self.lagcheck.validate()?;
        Ok(())
    }
}

impl LagcheckConfig {
    pub fn validate(&self) -> Result<()> {
        if self.intervals < 2 {
            return Err(LagwatchError::Config(format!(
                "lagcheck intervals must be at least 2, got {}",
                self.intervals
            )));
        }

        if self.queue_depth == 0 {
            return Err(LagwatchError::Config(
                "lagcheck queue_depth must be nonzero".to_string(),
            ));
        }

        // Surface bad regexes at load time rather than at first ingest.
        self.compile_blacklists()?;
        Ok(())
    }

    pub fn compile_blacklists(&self) -> Result<CompiledBlacklists> {
        let group = if self.group_blacklist.is_empty() {
            None
        } else {
            Some(Regex::new(&self.group_blacklist)?)
        };

        let topic = if self.topic_blacklist.is_empty() {
            None
        } else {
            Some(Regex::new(&self.topic_blacklist)?)
        };

        Ok(CompiledBlacklists { group, topic })
    }
}

/// Blacklist patterns compiled once at startup; immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct CompiledBlacklists {
    group: Option<Regex>,
    topic: Option<Regex>,
}

impl CompiledBlacklists {
    pub fn matches_group(&self, group: &str) -> bool {
        self.group.as_ref().map_or(false, |re| re.is_match(group))
    }

    pub fn matches_topic(&self, topic: &str) -> bool {
        self.topic.as_ref().map_or(false, |re| re.is_match(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_loads_from_file() {
        let config_content = r#"
[lagcheck]
intervals = 10
expire_group = "7d"
min_distance = "10s"

[[clusters]]
name = "local"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.lagcheck.intervals, 10);
        assert_eq!(config.lagcheck.expire_group, Duration::from_secs(604_800));
        assert_eq!(config.lagcheck.min_distance, Duration::from_secs(10));
        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].name, "local");
    }

    #[test]
    fn test_config_env_override() {
        std::env::set_var("TEST_LAGWATCH_CLUSTER", "production");

        let config_content = r#"
[[clusters]]
name = "${TEST_LAGWATCH_CLUSTER}"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.clusters[0].name, "production");

        std::env::remove_var("TEST_LAGWATCH_CLUSTER");
    }

    #[test]
    fn test_config_requires_clusters() {
        let config_content = r#"
[lagcheck]
intervals = 10
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let result = Config::load(Some(file.path().to_str().unwrap()));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_small_intervals() {
        let config = Config {
            lagcheck: LagcheckConfig {
                intervals: 1,
                ..LagcheckConfig::default()
            },
            clusters: vec![ClusterConfig {
                name: "local".to_string(),
            }],
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("at least 2"));
    }

    #[test]
    fn test_config_rejects_duplicate_cluster() {
        let config = Config {
            lagcheck: LagcheckConfig::default(),
            clusters: vec![
                ClusterConfig {
                    name: "local".to_string(),
                },
                ClusterConfig {
                    name: "local".to_string(),
                },
            ],
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Duplicate cluster name"));
    }

    #[test]
    fn test_config_rejects_invalid_blacklist() {
        let config = Config {
            lagcheck: LagcheckConfig {
                group_blacklist: "([unclosed".to_string(),
                ..LagcheckConfig::default()
            },
            clusters: vec![ClusterConfig {
                name: "local".to_string(),
            }],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blacklist_matching() {
        let lagcheck = LagcheckConfig {
            group_blacklist: "^console-consumer-.*".to_string(),
            topic_blacklist: "^__.*".to_string(),
            ..LagcheckConfig::default()
        };

        let blacklists = lagcheck.compile_blacklists().unwrap();
        assert!(blacklists.matches_group("console-consumer-12345"));
        assert!(!blacklists.matches_group("payments"));
        assert!(blacklists.matches_topic("__consumer_offsets"));
        assert!(!blacklists.matches_topic("orders"));
    }

    #[test]
    fn test_empty_blacklist_matches_nothing() {
        let blacklists = LagcheckConfig::default().compile_blacklists().unwrap();
        assert!(!blacklists.matches_group("anything"));
        assert!(!blacklists.matches_topic("anything"));
    }

    #[test]
    fn test_default_config_values() {
        let config_content = r#"
[[clusters]]
name = "local"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.lagcheck.intervals, 10);
        assert_eq!(config.lagcheck.expire_group, Duration::from_secs(604_800));
        assert_eq!(config.lagcheck.min_distance, Duration::from_secs(10));
        assert_eq!(config.lagcheck.queue_depth, 10_000);
        assert!(config.lagcheck.group_blacklist.is_empty());
        assert!(config.lagcheck.topic_blacklist.is_empty());
    }
}
