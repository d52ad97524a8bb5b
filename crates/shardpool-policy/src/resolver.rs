//! Resolution of the effective scaling policy.

use chrono::{DateTime, Utc};
use tracing::warn;

use shardpool_config::AutoscalerConfig;

use crate::window::TimeWindow;

/// Effective scaling limits for one controller iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub min_size: u32,
    pub max_size: u32,
    pub scale_up_step: u32,
    pub scale_down_step: u32,
}

/// One time-windowed override. A limit field left at `0` inherits
/// the base value (per-field sentinel, see config docs).
#[derive(Debug, Clone)]
pub struct PolicyOverride {
    pub window: TimeWindow,
    pub min_size: u32,
    pub max_size: u32,
    pub scale_up_step: u32,
    pub scale_down_step: u32,
}

impl PolicyOverride {
    fn apply(&self, base: ScalingPolicy) -> ScalingPolicy {
        ScalingPolicy {
            min_size: inherit(self.min_size, base.min_size),
            max_size: inherit(self.max_size, base.max_size),
            scale_up_step: inherit(self.scale_up_step, base.scale_up_step),
            scale_down_step: inherit(self.scale_down_step, base.scale_down_step),
        }
    }
}

fn inherit(value: u32, base: u32) -> u32 {
    if value == 0 { base } else { value }
}

/// Base policy plus its ordered overrides.
#[derive(Debug, Clone)]
pub struct Resolver {
    base: ScalingPolicy,
    overrides: Vec<PolicyOverride>,
}

impl Resolver {
    pub fn new(base: ScalingPolicy, overrides: Vec<PolicyOverride>) -> Self {
        Self { base, overrides }
    }

    /// Build a resolver straight from the autoscaler config section,
    /// logging a warning for every override whose window fails to
    /// parse. Malformed overrides are dropped, never fatal.
    pub fn from_config(config: &AutoscalerConfig) -> Self {
        let base = ScalingPolicy {
            min_size: config.min_size,
            max_size: config.max_size,
            scale_up_step: config.scale_up_step,
            scale_down_step: config.scale_down_step,
        };
        Self::new(base, build_overrides(config))
    }

    /// The policy in force at `now`. First override whose window
    /// contains `now` wins; later overrides are never inspected.
    /// Never fails; steps are normalized to at least 1.
    pub fn resolve(&self, now: DateTime<Utc>) -> ScalingPolicy {
        let mut policy = self.base;
        for ov in &self.overrides {
            if ov.window.contains(now) {
                policy = ov.apply(self.base);
                break;
            }
        }
        policy.scale_up_step = policy.scale_up_step.max(1);
        policy.scale_down_step = policy.scale_down_step.max(1);
        policy
    }
}

/// Parse the configured overrides, dropping (and warning about) any
/// with a malformed window.
pub fn build_overrides(config: &AutoscalerConfig) -> Vec<PolicyOverride> {
    let mut overrides = Vec::with_capacity(config.overrides.len());
    for (i, ov) in config.overrides.iter().enumerate() {
        match TimeWindow::parse(&ov.days, ov.hours_utc.as_deref()) {
            Ok(window) => overrides.push(PolicyOverride {
                window,
                min_size: ov.min_size,
                max_size: ov.max_size,
                scale_up_step: ov.scale_up_step,
                scale_down_step: ov.scale_down_step,
            }),
            Err(e) => {
                warn!(index = i, days = %ov.days, error = %e, "dropping scaling override with malformed window");
            }
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BASE: ScalingPolicy = ScalingPolicy {
        min_size: 3,
        max_size: 10,
        scale_up_step: 1,
        scale_down_step: 1,
    };

    fn saturday_5am() -> DateTime<Utc> {
        // 2024-06-01 is a Saturday.
        Utc.with_ymd_and_hms(2024, 6, 1, 5, 0, 0).unwrap()
    }

    fn monday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    fn weekend_override(min: u32, max: u32) -> PolicyOverride {
        PolicyOverride {
            window: TimeWindow::parse("0,6", None).unwrap(),
            min_size: min,
            max_size: max,
            scale_up_step: 0,
            scale_down_step: 0,
        }
    }

    #[test]
    fn no_match_returns_base() {
        let r = Resolver::new(BASE, vec![weekend_override(6, 0)]);
        assert_eq!(r.resolve(monday_noon()), BASE);
    }

    #[test]
    fn matching_override_wins_and_zero_fields_inherit() {
        let r = Resolver::new(BASE, vec![weekend_override(6, 0)]);
        let p = r.resolve(saturday_5am());
        assert_eq!(p.min_size, 6);
        assert_eq!(p.max_size, 10); // inherited
        assert_eq!(p.scale_up_step, 1); // inherited
    }

    #[test]
    fn first_match_wins() {
        let r = Resolver::new(BASE, vec![weekend_override(6, 0), weekend_override(8, 20)]);
        assert_eq!(r.resolve(saturday_5am()).min_size, 6);
    }

    #[test]
    fn hour_window_scopes_the_override() {
        let ov = PolicyOverride {
            window: TimeWindow::parse("6", Some("04:00:00-06:00:00")).unwrap(),
            min_size: 7,
            max_size: 0,
            scale_up_step: 0,
            scale_down_step: 0,
        };
        let r = Resolver::new(BASE, vec![ov]);
        assert_eq!(r.resolve(saturday_5am()).min_size, 7);
        let saturday_7am = Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap();
        assert_eq!(r.resolve(saturday_7am), BASE);
    }

    #[test]
    fn zero_steps_normalize_to_one() {
        let base = ScalingPolicy {
            min_size: 1,
            max_size: 5,
            scale_up_step: 0,
            scale_down_step: 0,
        };
        let r = Resolver::new(base, vec![]);
        let p = r.resolve(monday_noon());
        assert_eq!(p.scale_up_step, 1);
        assert_eq!(p.scale_down_step, 1);
    }

    #[test]
    fn malformed_override_is_dropped_not_fatal() {
        let config = AutoscalerConfig {
            dry_run: false,
            default_cooldown_secs: 300,
            scaledown_cooldown_secs: 300,
            retry_interval_secs: 60,
            min_size: 3,
            max_size: 10,
            scale_up_step: 1,
            scale_down_step: 1,
            overrides: vec![
                shardpool_config::OverrideConfig {
                    days: "not-a-day".into(),
                    hours_utc: None,
                    min_size: 9,
                    max_size: 0,
                    scale_up_step: 0,
                    scale_down_step: 0,
                },
                shardpool_config::OverrideConfig {
                    days: "6".into(),
                    hours_utc: Some("04:00:00-06:00:00".into()),
                    min_size: 5,
                    max_size: 0,
                    scale_up_step: 0,
                    scale_down_step: 0,
                },
            ],
        };
        let r = Resolver::from_config(&config);
        // The malformed override is gone; the valid one still applies.
        assert_eq!(r.resolve(saturday_5am()).min_size, 5);
        assert_eq!(r.resolve(monday_noon()).min_size, 3);
    }
}
