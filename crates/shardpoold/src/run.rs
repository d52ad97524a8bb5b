//! Wiring: build the collaborators from config and start the loop.

use std::time::Duration;

use anyhow::Context;
use tracing::info;

use shardpool_autoscale::{Controller, ControllerTiming};
use shardpool_cluster::{DrainOptions, EsCluster, IndexSelector, ShardRebalancer};
use shardpool_compute::{
    ComputeError, GroupMember, InstanceGroup, RegionalGroup, TokenSource, ZonalGroup,
};
use shardpool_config::{Config, GcpConfig, RebalanceConfig};
use shardpool_notify::{Notifier, NoopNotifier, NotifyError, SlackNotifier};
use shardpool_policy::Resolver;

/// Zonal or regional backend, chosen by configuration.
enum AnyGroup {
    Zonal(ZonalGroup),
    Regional(RegionalGroup),
}

impl InstanceGroup for AnyGroup {
    async fn get_target_size(&self) -> Result<u32, ComputeError> {
        match self {
            AnyGroup::Zonal(g) => g.get_target_size().await,
            AnyGroup::Regional(g) => g.get_target_size().await,
        }
    }

    async fn resize(&self, size: u32) -> Result<(), ComputeError> {
        match self {
            AnyGroup::Zonal(g) => g.resize(size).await,
            AnyGroup::Regional(g) => g.resize(size).await,
        }
    }

    async fn list_members(&self) -> Result<Vec<GroupMember>, ComputeError> {
        match self {
            AnyGroup::Zonal(g) => g.list_members().await,
            AnyGroup::Regional(g) => g.list_members().await,
        }
    }

    async fn delete_member(&self, member: &GroupMember) -> Result<(), ComputeError> {
        match self {
            AnyGroup::Zonal(g) => g.delete_member(member).await,
            AnyGroup::Regional(g) => g.delete_member(member).await,
        }
    }
}

enum AnyNotifier {
    Slack(SlackNotifier),
    Noop(NoopNotifier),
}

impl Notifier for AnyNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        match self {
            AnyNotifier::Slack(n) => n.send(text).await,
            AnyNotifier::Noop(n) => n.send(text).await,
        }
    }
}

fn build_group(gcp: &GcpConfig) -> anyhow::Result<AnyGroup> {
    let token = if let Some(token) = &gcp.access_token {
        TokenSource::statik(token)
    } else if let Some(path) = &gcp.credentials_file {
        TokenSource::file(path)
    } else {
        TokenSource::metadata().context("building metadata token source")?
    };

    let group = match (&gcp.zone, &gcp.region) {
        (Some(zone), _) => AnyGroup::Zonal(
            ZonalGroup::new(&gcp.project_id, zone, &gcp.group_name, token)
                .context("building zonal group backend")?,
        ),
        (None, Some(region)) => AnyGroup::Regional(
            RegionalGroup::new(&gcp.project_id, region, &gcp.group_name, token)
                .context("building regional group backend")?,
        ),
        // Config validation guarantees one of the two is set.
        (None, None) => anyhow::bail!("no zone or region configured"),
    };
    Ok(group)
}

fn build_cluster(config: &Config) -> anyhow::Result<EsCluster> {
    EsCluster::new(
        &config.cluster.url,
        &config.cluster.user,
        &config.cluster.password,
        config.cluster.insecure_skip_verify,
    )
    .context("building cluster client")
}

fn build_rebalancer(config: &RebalanceConfig, dry_run: bool) -> ShardRebalancer {
    let selector = if !config.aliases.is_empty() {
        IndexSelector::Aliases(config.aliases.clone())
    } else {
        IndexSelector::Patterns {
            patterns: config.index_patterns.clone(),
            include_system: config.include_system,
        }
    };
    ShardRebalancer::new(selector, config.min_replicas, config.max_replicas, dry_run)
}

/// Run the control loop until process exit.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let dry_run = config.autoscaler.dry_run;
    if dry_run {
        info!("dry-run enabled: mutating calls will be logged, not executed");
    }

    let oracle = shardpool_metrics::PrometheusOracle::new(
        &config.metrics.url,
        config.metrics.headers.clone(),
        Duration::from_secs(10),
    )
    .context("building metrics oracle")?;
    let group = build_group(&config.infrastructure.gcp)?;
    let cluster = build_cluster(&config)?;

    let notifier = match &config.notifications.slack {
        Some(slack) => AnyNotifier::Slack(
            SlackNotifier::new(&slack.webhook_url).context("building slack notifier")?,
        ),
        None => AnyNotifier::Noop(NoopNotifier),
    };

    let resolver = Resolver::from_config(&config.autoscaler);

    let drain_options = DrainOptions {
        drain_timeout: Duration::from_secs(config.cluster.drain_timeout_secs),
        rejoin_timeout: Duration::from_secs(config.cluster.rejoin_timeout_secs),
        dry_run,
        ..DrainOptions::default()
    };

    let rebalance_interval = config
        .cluster
        .rebalance
        .as_ref()
        .filter(|r| r.interval_secs > 0)
        .map(|r| Duration::from_secs(r.interval_secs));
    let rebalancer = config
        .cluster
        .rebalance
        .as_ref()
        .map(|r| build_rebalancer(r, dry_run));

    let timing = ControllerTiming {
        default_cooldown: Duration::from_secs(config.autoscaler.default_cooldown_secs),
        scaledown_cooldown: Duration::from_secs(config.autoscaler.scaledown_cooldown_secs),
        retry_interval: Duration::from_secs(config.autoscaler.retry_interval_secs),
        rebalance_interval,
        ..ControllerTiming::default()
    };

    let mut controller = Controller::new(
        oracle,
        group,
        cluster,
        notifier,
        resolver,
        config.infrastructure.gcp.group_name.clone(),
        config.metrics.up_condition.clone(),
        config.metrics.down_condition.clone(),
        drain_options,
        timing,
        dry_run,
        rebalancer,
    );

    controller.run().await
}

/// One-shot rebalance pass for the `rebalance` subcommand.
pub async fn rebalance_once(config: Config) -> anyhow::Result<()> {
    let rebalance = config
        .cluster
        .rebalance
        .as_ref()
        .context("cluster.rebalance is not configured")?;
    let cluster = build_cluster(&config)?;
    let rebalancer = build_rebalancer(rebalance, config.autoscaler.dry_run);

    let outcome = rebalancer.run(&cluster).await?;
    info!(
        resolved = outcome.resolved,
        node_count = outcome.node_count,
        total_primaries = outcome.total_primaries,
        desired = outcome.desired,
        modified = outcome.modified,
        "rebalance pass complete"
    );
    Ok(())
}
