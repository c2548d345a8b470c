use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ── Raw input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AllocatorConfigInput {
    pub version: u32,
    pub default_start_bitrate_bps: Option<u32>,
    pub bwe_log_interval_ms: Option<u64>,
    pub elastic: ElasticConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ElasticConfigInput {
    pub rate_limit_bps: Option<u32>,
    pub usage_jump_fraction: Option<f64>,
}

// ── Resolved config ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticConfig {
    /// Upper bound consumers may reach through surplus. 0 disables elasticity.
    pub rate_limit_bps: u32,
    /// A contributor whose usage grows by more than this fraction of its
    /// allocation between cycles triggers an early reallocation.
    pub usage_jump_fraction: f64,
}

impl ElasticConfig {
    pub fn enabled(&self) -> bool {
        self.rate_limit_bps > 0
    }
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            rate_limit_bps: 0,
            usage_jump_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    pub version: u32,
    /// Assumed total bitrate before the first non-zero estimate arrives.
    pub default_start_bitrate_bps: u32,
    /// Minimum spacing between "current BWE" log lines, in estimate time.
    pub bwe_log_interval: Duration,
    pub elastic: ElasticConfig,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            default_start_bitrate_bps: 300_000,
            bwe_log_interval: Duration::from_secs(5),
            elastic: ElasticConfig::default(),
        }
    }
}

impl AllocatorConfigInput {
    pub fn resolve(self) -> Result<AllocatorConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = AllocatorConfig::default();

        let default_start_bitrate_bps = self
            .default_start_bitrate_bps
            .unwrap_or(defaults.default_start_bitrate_bps);
        if default_start_bitrate_bps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_start_bitrate_bps",
                reason: "must be greater than zero".to_string(),
            });
        }

        let usage_jump_fraction = self
            .elastic
            .usage_jump_fraction
            .unwrap_or(defaults.elastic.usage_jump_fraction);
        if !(usage_jump_fraction > 0.0 && usage_jump_fraction <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "elastic.usage_jump_fraction",
                reason: format!("{} is outside (0, 1]", usage_jump_fraction),
            });
        }

        Ok(AllocatorConfig {
            version,
            default_start_bitrate_bps,
            bwe_log_interval: self
                .bwe_log_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.bwe_log_interval),
            elastic: ElasticConfig {
                rate_limit_bps: self
                    .elastic
                    .rate_limit_bps
                    .unwrap_or(defaults.elastic.rate_limit_bps),
                usage_jump_fraction,
            },
        })
    }
}

impl AllocatorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(AllocatorConfig::default());
        }
        let parsed: AllocatorConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            version = 1
            default_start_bitrate_bps = 500000
            bwe_log_interval_ms = 1000

            [elastic]
            rate_limit_bps = 2000000
            usage_jump_fraction = 0.3
        "#;

        let cfg = AllocatorConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.default_start_bitrate_bps, 500_000);
        assert_eq!(cfg.bwe_log_interval, Duration::from_secs(1));
        assert_eq!(cfg.elastic.rate_limit_bps, 2_000_000);
        assert!(cfg.elastic.enabled());
        assert!((cfg.elastic.usage_jump_fraction - 0.3).abs() < 1e-12);
    }

    #[test]
    fn empty_config_is_default() {
        let cfg = AllocatorConfig::from_toml_str("   \n").unwrap();
        assert_eq!(cfg, AllocatorConfig::default());
        assert!(!cfg.elastic.enabled());
        assert_eq!(cfg.default_start_bitrate_bps, 300_000);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg = AllocatorConfig::from_toml_str("[elastic]\nrate_limit_bps = 10").unwrap();
        assert_eq!(cfg.default_start_bitrate_bps, 300_000);
        assert_eq!(cfg.bwe_log_interval, Duration::from_secs(5));
        assert_eq!(cfg.elastic.rate_limit_bps, 10);
        assert!((cfg.elastic.usage_jump_fraction - 0.2).abs() < 1e-12);
    }

    #[test]
    fn rejects_unknown_version() {
        let err = AllocatorConfig::from_toml_str("version = 7").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(7)));
    }

    #[test]
    fn rejects_bad_values() {
        let err = AllocatorConfig::from_toml_str("default_start_bitrate_bps = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "default_start_bitrate_bps",
                ..
            }
        ));

        let err =
            AllocatorConfig::from_toml_str("[elastic]\nusage_jump_fraction = 1.5").unwrap_err();
        assert!(err.to_string().contains("usage_jump_fraction"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = AllocatorConfig::from_toml_str("version = [").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
        assert!(err.to_string().starts_with("invalid config TOML"));
    }
}
