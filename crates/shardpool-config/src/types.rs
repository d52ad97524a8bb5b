//! Configuration types.
//!
//! Field-level zero sentinels are part of the contract and differ by
//! call site: an override field left at `0` inherits the base
//! autoscaler value, while `max_replicas = 0` in the rebalance
//! section means "uncapped". Both are documented on the fields and
//! deliberately not unified.

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub metrics: MetricsConfig,
    pub infrastructure: InfrastructureConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    pub autoscaler: AutoscalerConfig,
}

/// Metrics backend (condition oracle) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Base URL of the Prometheus-compatible query API.
    pub url: String,
    /// Query whose non-empty result means "scale up".
    pub up_condition: String,
    /// Query whose non-empty result means "scale down".
    pub down_condition: String,
    /// Extra headers attached to every query request.
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfrastructureConfig {
    pub gcp: GcpConfig,
}

/// Compute provider settings.
///
/// Exactly one of `zone` and `region` must be set; it selects the
/// zonal or regional instance-group backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpConfig {
    pub project_id: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub group_name: String,
    /// File holding a bearer token for the compute API. When unset,
    /// `access_token` and then the instance metadata server are tried.
    #[serde(default)]
    pub credentials_file: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Cluster service (Elasticsearch-compatible REST API) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Deadline for one node evacuation, in seconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    /// Deadline for a node to reappear after an undrain, in seconds.
    #[serde(default = "default_rejoin_timeout")]
    pub rejoin_timeout_secs: u64,
    #[serde(default)]
    pub rebalance: Option<RebalanceConfig>,
}

/// Shard rebalance selector and replica bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebalanceConfig {
    /// Alias patterns to resolve to concrete indices. When non-empty,
    /// alias mode is used and `index_patterns` is ignored.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Index name globs, used when `aliases` is empty.
    #[serde(default)]
    pub index_patterns: Vec<String>,
    /// Whether `.`-prefixed system indices match name patterns.
    #[serde(default)]
    pub include_system: bool,
    #[serde(default)]
    pub min_replicas: u32,
    /// Upper replica bound; `0` means uncapped.
    #[serde(default)]
    pub max_replicas: u32,
    /// How often the controller runs a rebalance pass, in seconds.
    /// `0` disables periodic rebalancing (the one-shot subcommand
    /// still works).
    #[serde(default)]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlackConfig {
    pub webhook_url: String,
}

/// Scaling loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoscalerConfig {
    /// Skip every mutating call, log what would have happened.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_cooldown")]
    pub default_cooldown_secs: u64,
    #[serde(default = "default_scaledown_cooldown")]
    pub scaledown_cooldown_secs: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    pub min_size: u32,
    pub max_size: u32,
    /// Instances added per scale-up. Defaults to 1.
    #[serde(default = "default_step")]
    pub scale_up_step: u32,
    /// Instances removed per scale-down. Defaults to 1.
    #[serde(default = "default_step")]
    pub scale_down_step: u32,
    /// Time-windowed limit overrides, evaluated in declared order.
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,
}

/// One time-windowed override of the scaling limits.
///
/// A field left at `0` inherits the corresponding base value.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
    /// Comma-separated weekday numbers, `0` = Sunday.
    pub days: String,
    /// UTC hour range `"HH:MM:SS-HH:MM:SS"`, half-open. Absent means
    /// the whole day on matching weekdays.
    #[serde(default)]
    pub hours_utc: Option<String>,
    #[serde(default)]
    pub min_size: u32,
    #[serde(default)]
    pub max_size: u32,
    #[serde(default)]
    pub scale_up_step: u32,
    #[serde(default)]
    pub scale_down_step: u32,
}

fn default_drain_timeout() -> u64 {
    600
}

fn default_rejoin_timeout() -> u64 {
    300
}

fn default_cooldown() -> u64 {
    300
}

fn default_scaledown_cooldown() -> u64 {
    300
}

fn default_retry_interval() -> u64 {
    60
}

fn default_step() -> u32 {
    1
}

impl Config {
    /// Validate cross-field constraints. Called by [`Config::load`];
    /// fatal at startup only.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gcp = &self.infrastructure.gcp;
        match (&gcp.zone, &gcp.region) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "infrastructure.gcp: zone and region are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "infrastructure.gcp: one of zone or region is required".into(),
                ));
            }
            _ => {}
        }

        let a = &self.autoscaler;
        if a.max_size > 0 && a.min_size > a.max_size {
            return Err(ConfigError::Invalid(format!(
                "autoscaler: min_size {} exceeds max_size {}",
                a.min_size, a.max_size
            )));
        }
        if a.default_cooldown_secs == 0 || a.retry_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "autoscaler: cooldown and retry intervals must be nonzero".into(),
            ));
        }
        if self.cluster.url.is_empty() {
            return Err(ConfigError::Invalid("cluster.url is required".into()));
        }
        if let Some(reb) = &self.cluster.rebalance
            && reb.aliases.is_empty()
            && reb.index_patterns.is_empty()
        {
            return Err(ConfigError::Invalid(
                "cluster.rebalance: one of aliases or index_patterns is required".into(),
            ));
        }
        Ok(())
    }
}
