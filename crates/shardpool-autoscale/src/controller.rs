//! Controller loop implementation.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use shardpool_cluster::{
    ClusterOps, DrainCoordinator, DrainError, DrainOptions, ShardRebalancer, clear_exclusion,
};
use shardpool_compute::{ComputeError, InstanceGroup, pick_victim};
use shardpool_metrics::ConditionOracle;
use shardpool_notify::Notifier;
use shardpool_policy::Resolver;

/// Attempts at clearing a victim's exclusion after its VM is gone.
/// Exhausting them leaves the entry for operators to reconcile.
const POST_DELETE_CLEANUP_ATTEMPTS: u32 = 3;

/// Sleep intervals of the loop. The settle delay covers the
/// provider's asynchronous instance deletion (cluster membership may
/// lag the delete call).
#[derive(Debug, Clone, Copy)]
pub struct ControllerTiming {
    pub default_cooldown: Duration,
    pub scaledown_cooldown: Duration,
    pub retry_interval: Duration,
    pub settle_delay: Duration,
    /// Spacing between periodic rebalance passes; `None` disables
    /// them.
    pub rebalance_interval: Option<Duration>,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            default_cooldown: Duration::from_secs(300),
            scaledown_cooldown: Duration::from_secs(300),
            retry_interval: Duration::from_secs(60),
            settle_delay: Duration::from_secs(90),
            rebalance_interval: None,
        }
    }
}

/// What one loop iteration did. Tests drive [`Controller::step`]
/// directly and assert on these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Group was below the effective minimum and was raised to it.
    RaisedToFloor { size: u32 },
    ScaledUp { size: u32, max: u32 },
    /// Up-condition held but the group is at its maximum. A no-op,
    /// not an error.
    AtCeiling { size: u32, max: u32 },
    ScaledDown { size: u32, min: u32, victim: String },
    /// Down-condition held but shrinking would undercut the minimum.
    AtFloor { size: u32, min: u32 },
    /// The victim could not be evacuated in time; nothing was resized
    /// or deleted.
    DrainTimedOut { victim: String },
    /// An oracle or API call failed; retried next iteration.
    TransientError,
    NoOp,
}

/// The scaling controller. Generic over its four collaborators so
/// tests can script them; constructed once and run forever.
pub struct Controller<O, G, C, N> {
    oracle: O,
    group: G,
    cluster: C,
    notifier: N,
    resolver: Resolver,
    group_name: String,
    up_query: String,
    down_query: String,
    drain_options: DrainOptions,
    timing: ControllerTiming,
    dry_run: bool,
    rebalancer: Option<ShardRebalancer>,
    last_rebalance: Option<Instant>,
}

impl<O, G, C, N> Controller<O, G, C, N>
where
    O: ConditionOracle + Sync,
    G: InstanceGroup + Sync,
    C: ClusterOps + Sync,
    N: Notifier + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: O,
        group: G,
        cluster: C,
        notifier: N,
        resolver: Resolver,
        group_name: String,
        up_query: String,
        down_query: String,
        drain_options: DrainOptions,
        timing: ControllerTiming,
        dry_run: bool,
        rebalancer: Option<ShardRebalancer>,
    ) -> Self {
        Self {
            oracle,
            group,
            cluster,
            notifier,
            resolver,
            group_name,
            up_query,
            down_query,
            drain_options,
            timing,
            dry_run,
            rebalancer,
            last_rebalance: None,
        }
    }

    /// Run until process exit. There is no terminal state.
    pub async fn run(&mut self) -> ! {
        info!(group = %self.group_name, dry_run = self.dry_run, "scaling controller started");
        loop {
            self.maybe_rebalance().await;
            let (outcome, pause) = self.step().await;
            info!(group = %self.group_name, ?outcome, pause_secs = pause.as_secs(), "iteration complete");
            tokio::time::sleep(pause).await;
        }
    }

    /// One loop iteration. Returns what happened and how long the
    /// loop should pause before the next iteration.
    pub async fn step(&mut self) -> (StepOutcome, Duration) {
        let policy = self.resolver.resolve(Utc::now());
        let t = self.timing;

        let current = match self.group.get_target_size().await {
            Ok(n) => n,
            Err(e) => {
                warn!(group = %self.group_name, error = %e, "failed to read group size");
                return (StepOutcome::TransientError, t.retry_interval);
            }
        };

        // Guarantee the floor before consulting any condition.
        if current < policy.min_size {
            info!(
                group = %self.group_name,
                current, min = policy.min_size, "group below minimum size, raising"
            );
            if let Err(e) = self.resize(policy.min_size).await {
                warn!(group = %self.group_name, error = %e, "failed to raise group to minimum");
                return (StepOutcome::TransientError, t.retry_interval);
            }
            self.notify(&format!(
                "Instance group {} raised to its minimum size {}",
                self.group_name, policy.min_size
            ))
            .await;
            return (
                StepOutcome::RaisedToFloor {
                    size: policy.min_size,
                },
                t.default_cooldown,
            );
        }

        let up = match self.oracle.evaluate(&self.up_query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(group = %self.group_name, error = %e, "up-condition query failed");
                return (StepOutcome::TransientError, t.retry_interval);
            }
        };

        if up {
            info!(group = %self.group_name, condition = %self.up_query, "up-condition met");
            return self.scale_up(current, policy.max_size, policy.scale_up_step).await;
        }

        let down = match self.oracle.evaluate(&self.down_query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(group = %self.group_name, error = %e, "down-condition query failed");
                return (StepOutcome::TransientError, t.retry_interval);
            }
        };

        if down {
            info!(group = %self.group_name, condition = %self.down_query, "down-condition met");
            return self
                .scale_down(current, policy.min_size, policy.scale_down_step)
                .await;
        }

        info!(group = %self.group_name, size = current, "no condition met, keeping current size");
        (StepOutcome::NoOp, t.default_cooldown)
    }

    async fn scale_up(&self, current: u32, max: u32, step: u32) -> (StepOutcome, Duration) {
        let t = self.timing;
        let desired = current + step;
        if desired > max {
            info!(
                group = %self.group_name,
                current, max, "group at maximum size, no further scale-up"
            );
            return (
                StepOutcome::AtCeiling { size: current, max },
                t.default_cooldown,
            );
        }

        if let Err(e) = self.resize(desired).await {
            warn!(group = %self.group_name, error = %e, "scale-up resize failed");
            return (StepOutcome::TransientError, t.retry_interval);
        }
        self.notify(&format!(
            "Added node to instance group {}: current size {}, maximum {}",
            self.group_name, desired, max
        ))
        .await;
        (StepOutcome::ScaledUp { size: desired, max }, t.default_cooldown)
    }

    async fn scale_down(&self, current: u32, min: u32, step: u32) -> (StepOutcome, Duration) {
        let t = self.timing;
        let desired = current.saturating_sub(step);
        if desired < min {
            info!(
                group = %self.group_name,
                current, min, "group at minimum size, no further scale-down"
            );
            return (StepOutcome::AtFloor { size: current, min }, t.default_cooldown);
        }

        let members = match self.group.list_members().await {
            Ok(m) => m,
            Err(e) => {
                warn!(group = %self.group_name, error = %e, "failed to list group members");
                return (StepOutcome::TransientError, t.retry_interval);
            }
        };
        let victim = match pick_victim(&members) {
            Ok(v) => v.clone(),
            Err(ComputeError::NoMembers) => {
                warn!(group = %self.group_name, "group reports no members, nothing to remove");
                return (StepOutcome::TransientError, t.retry_interval);
            }
            Err(e) => {
                warn!(group = %self.group_name, error = %e, "victim selection failed");
                return (StepOutcome::TransientError, t.retry_interval);
            }
        };

        info!(group = %self.group_name, victim = %victim.name, "draining node before removal");
        let mut coordinator = DrainCoordinator::new(&self.cluster, self.drain_options);
        match coordinator.drain(&victim.name).await {
            Ok(()) => {}
            Err(DrainError::Timeout { .. }) => {
                // The exclusion was rolled back; the node keeps its
                // data and the group keeps its size.
                self.notify(&format!(
                    "Timed out draining node {} of group {}; removal abandoned",
                    victim.name, self.group_name
                ))
                .await;
                return (
                    StepOutcome::DrainTimedOut {
                        victim: victim.name,
                    },
                    t.retry_interval,
                );
            }
            Err(e) => {
                warn!(group = %self.group_name, victim = %victim.name, error = %e, "drain failed");
                return (StepOutcome::TransientError, t.retry_interval);
            }
        }

        if self.dry_run {
            info!(victim = %victim.name, "dry-run: skipping instance deletion");
        } else if let Err(e) = self.group.delete_member(&victim).await {
            error!(group = %self.group_name, victim = %victim.name, error = %e, "instance deletion failed after drain");
            // The node is alive and fully drained; bring it back into
            // allocation rather than leaving it excluded.
            let mut coordinator = DrainCoordinator::new(&self.cluster, self.drain_options);
            if let Err(e) = coordinator.undrain(&victim.name).await {
                warn!(victim = %victim.name, error = %e, "failed to reintegrate node after delete failure");
            }
            self.notify(&format!(
                "Failed to delete instance {} of group {} after drain; node reintegrated",
                victim.name, self.group_name
            ))
            .await;
            return (StepOutcome::TransientError, t.retry_interval);
        }

        // Provider deletion is asynchronous; give cluster membership
        // time to catch up before touching settings again.
        if self.dry_run {
            info!("dry-run: skipping post-deletion settle delay");
        } else {
            tokio::time::sleep(t.settle_delay).await;
        }

        self.cleanup_exclusion(&victim.name).await;

        self.notify(&format!(
            "Removed node {} from instance group {}: current size {}, minimum {}",
            victim.name, self.group_name, desired, min
        ))
        .await;
        (
            StepOutcome::ScaledDown {
                size: desired,
                min,
                victim: victim.name,
            },
            t.scaledown_cooldown,
        )
    }

    /// Clear any leftover exclusion entry for a deleted node. The
    /// drain already cleared it on success, so this is normally a
    /// no-op; it exists for the case where that clear failed. After
    /// the VM is gone an undrain can never succeed, so exhausted
    /// retries are handed to operators.
    async fn cleanup_exclusion(&self, node: &str) {
        for attempt in 1..=POST_DELETE_CLEANUP_ATTEMPTS {
            match clear_exclusion(&self.cluster, node, self.dry_run).await {
                Ok(_) => return,
                Err(e) => {
                    warn!(node, attempt, error = %e, "post-deletion exclusion cleanup failed");
                    if attempt < POST_DELETE_CLEANUP_ATTEMPTS {
                        tokio::time::sleep(self.timing.retry_interval).await;
                    }
                }
            }
        }
        self.notify(&format!(
            "Could not clear allocation exclusion for deleted node {node}; manual cleanup required"
        ))
        .await;
    }

    async fn resize(&self, size: u32) -> Result<(), ComputeError> {
        if self.dry_run {
            info!(group = %self.group_name, size, "dry-run: skipping resize");
            return Ok(());
        }
        self.group.resize(size).await
    }

    async fn maybe_rebalance(&mut self) {
        let Some(interval) = self.timing.rebalance_interval else {
            return;
        };
        let Some(rebalancer) = &self.rebalancer else {
            return;
        };
        let due = match self.last_rebalance {
            None => true,
            Some(at) => at.elapsed() >= interval,
        };
        if !due {
            return;
        }
        self.last_rebalance = Some(Instant::now());
        match rebalancer.run(&self.cluster).await {
            Ok(outcome) => info!(
                resolved = outcome.resolved,
                desired = outcome.desired,
                modified = outcome.modified,
                "shard rebalance pass complete"
            ),
            Err(e) => warn!(error = %e, "shard rebalance pass failed"),
        }
    }

    /// Notification failures are logged and never escalated.
    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.send(text).await {
            warn!(error = %e, "notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardpool_cluster::{AliasBinding, ClusterError, IndexInfo, ShardPlacement};
    use shardpool_compute::GroupMember;
    use shardpool_metrics::OracleError;
    use shardpool_notify::NotifyError;
    use shardpool_policy::ScalingPolicy;
    use std::sync::Mutex;

    struct FakeOracle {
        up: Result<bool, ()>,
        down: Result<bool, ()>,
    }

    impl FakeOracle {
        fn new(up: bool, down: bool) -> Self {
            Self {
                up: Ok(up),
                down: Ok(down),
            }
        }

        fn failing() -> Self {
            Self {
                up: Err(()),
                down: Err(()),
            }
        }
    }

    impl ConditionOracle for FakeOracle {
        async fn evaluate(&self, query: &str) -> Result<bool, OracleError> {
            let result = if query == "up" { &self.up } else { &self.down };
            result
                .map_err(|_| OracleError::UnexpectedResultType("scripted failure".into()))
        }
    }

    #[derive(Default)]
    struct FakeGroup {
        size: u32,
        members: Vec<GroupMember>,
        resizes: Mutex<Vec<u32>>,
        deletes: Mutex<Vec<String>>,
        fail_delete: bool,
    }

    impl FakeGroup {
        fn with_size(size: u32) -> Self {
            let members = (0..size)
                .map(|i| GroupMember {
                    name: format!("node-{i}"),
                    zone: "z1".into(),
                })
                .collect();
            Self {
                size,
                members,
                ..Default::default()
            }
        }
    }

    impl InstanceGroup for FakeGroup {
        async fn get_target_size(&self) -> Result<u32, ComputeError> {
            Ok(self.size)
        }

        async fn resize(&self, size: u32) -> Result<(), ComputeError> {
            self.resizes.lock().unwrap().push(size);
            Ok(())
        }

        async fn list_members(&self) -> Result<Vec<GroupMember>, ComputeError> {
            Ok(self.members.clone())
        }

        async fn delete_member(&self, member: &GroupMember) -> Result<(), ComputeError> {
            if self.fail_delete {
                return Err(ComputeError::Status {
                    operation: "deleteInstances",
                    status: 500,
                    body: "scripted failure".into(),
                });
            }
            self.deletes.lock().unwrap().push(member.name.clone());
            Ok(())
        }
    }

    /// Cluster where nothing holds shards and every node is a member,
    /// so drains evacuate on the first poll and undrains see the node
    /// immediately.
    #[derive(Default)]
    struct EmptyCluster {
        excluded: Mutex<Vec<String>>,
        hosting: Vec<String>,
    }

    impl ClusterOps for EmptyCluster {
        async fn get_excluded_names(&self) -> Result<Vec<String>, ClusterError> {
            Ok(self.excluded.lock().unwrap().clone())
        }

        async fn set_excluded_names(&self, names: &[String]) -> Result<(), ClusterError> {
            *self.excluded.lock().unwrap() = names.to_vec();
            Ok(())
        }

        async fn list_shard_placements(
            &self,
            _indices: &[String],
        ) -> Result<Vec<ShardPlacement>, ClusterError> {
            Ok(self
                .hosting
                .iter()
                .map(|n| ShardPlacement {
                    index: "logs".into(),
                    node: Some(n.clone()),
                })
                .collect())
        }

        async fn list_node_names(&self) -> Result<Vec<String>, ClusterError> {
            Ok((0..10).map(|i| format!("node-{i}")).collect())
        }

        async fn resolve_aliases(
            &self,
            _patterns: &[String],
        ) -> Result<Vec<AliasBinding>, ClusterError> {
            Ok(Vec::new())
        }

        async fn get_index_info(
            &self,
            _patterns: &[String],
        ) -> Result<Vec<IndexInfo>, ClusterError> {
            Ok(Vec::new())
        }

        async fn set_index_replicas(&self, _index: &str, _count: u32) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn policy(min: u32, max: u32) -> Resolver {
        Resolver::new(
            ScalingPolicy {
                min_size: min,
                max_size: max,
                scale_up_step: 1,
                scale_down_step: 1,
            },
            Vec::new(),
        )
    }

    fn fast_timing() -> ControllerTiming {
        ControllerTiming {
            default_cooldown: Duration::from_secs(120),
            scaledown_cooldown: Duration::from_secs(600),
            retry_interval: Duration::from_secs(30),
            settle_delay: Duration::from_millis(10),
            rebalance_interval: None,
        }
    }

    fn fast_drain() -> DrainOptions {
        DrainOptions {
            poll_interval: Duration::from_millis(10),
            drain_timeout: Duration::from_secs(1),
            rejoin_timeout: Duration::from_secs(1),
            dry_run: false,
        }
    }

    fn controller(
        oracle: FakeOracle,
        group: FakeGroup,
        cluster: EmptyCluster,
        resolver: Resolver,
        dry_run: bool,
    ) -> Controller<FakeOracle, FakeGroup, EmptyCluster, RecordingNotifier> {
        let mut drain = fast_drain();
        drain.dry_run = dry_run;
        Controller::new(
            oracle,
            group,
            cluster,
            RecordingNotifier::default(),
            resolver,
            "search-data".into(),
            "up".into(),
            "down".into(),
            drain,
            fast_timing(),
            dry_run,
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn scales_up_when_condition_met() {
        let mut c = controller(
            FakeOracle::new(true, false),
            FakeGroup::with_size(3),
            EmptyCluster::default(),
            policy(1, 5),
            false,
        );

        let (outcome, pause) = c.step().await;
        assert_eq!(outcome, StepOutcome::ScaledUp { size: 4, max: 5 });
        assert_eq!(pause, Duration::from_secs(120));
        assert_eq!(*c.group.resizes.lock().unwrap(), vec![4]);
        let messages = c.notifier.messages.lock().unwrap();
        assert!(messages[0].contains("current size 4"));
        assert!(messages[0].contains("maximum 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_is_a_no_op_not_an_error() {
        let mut c = controller(
            FakeOracle::new(true, false),
            FakeGroup::with_size(5),
            EmptyCluster::default(),
            policy(1, 5),
            false,
        );

        let (outcome, _) = c.step().await;
        assert_eq!(outcome, StepOutcome::AtCeiling { size: 5, max: 5 });
        assert!(c.group.resizes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scale_down_blocked_at_floor() {
        let mut c = controller(
            FakeOracle::new(false, true),
            FakeGroup::with_size(2),
            EmptyCluster::default(),
            policy(2, 5),
            false,
        );

        let (outcome, _) = c.step().await;
        assert_eq!(outcome, StepOutcome::AtFloor { size: 2, min: 2 });
        assert!(c.group.resizes.lock().unwrap().is_empty());
        assert!(c.group.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scale_down_drains_then_deletes() {
        let mut c = controller(
            FakeOracle::new(false, true),
            FakeGroup::with_size(3),
            EmptyCluster::default(),
            policy(1, 5),
            false,
        );

        let (outcome, pause) = c.step().await;
        let StepOutcome::ScaledDown { size, min, victim } = outcome else {
            panic!("expected ScaledDown, got {outcome:?}");
        };
        assert_eq!((size, min), (2, 1));
        assert_eq!(*c.group.deletes.lock().unwrap(), vec![victim.clone()]);
        assert_eq!(pause, Duration::from_secs(600)); // scale-down cooldown
        // Exclusion fully cleaned up.
        assert!(c.cluster.excluded.lock().unwrap().is_empty());
        let messages = c.notifier.messages.lock().unwrap();
        assert!(messages[0].contains(&victim));
        assert!(messages[0].contains("minimum 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_aborts_removal() {
        // Every node hosts shards forever: the drain can never finish.
        let cluster = EmptyCluster {
            hosting: (0..3).map(|i| format!("node-{i}")).collect(),
            ..Default::default()
        };
        let mut c = controller(
            FakeOracle::new(false, true),
            FakeGroup::with_size(3),
            cluster,
            policy(1, 5),
            false,
        );

        let (outcome, pause) = c.step().await;
        assert!(matches!(outcome, StepOutcome::DrainTimedOut { .. }));
        assert_eq!(pause, Duration::from_secs(30)); // retry interval
        assert!(c.group.deletes.lock().unwrap().is_empty());
        assert!(c.group.resizes.lock().unwrap().is_empty());
        // Rollback left no exclusion behind.
        assert!(c.cluster.excluded.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_failure_reintegrates_the_node() {
        let group = FakeGroup {
            fail_delete: true,
            ..FakeGroup::with_size(3)
        };
        let mut c = controller(
            FakeOracle::new(false, true),
            group,
            EmptyCluster::default(),
            policy(1, 5),
            false,
        );

        let (outcome, _) = c.step().await;
        assert_eq!(outcome, StepOutcome::TransientError);
        // Undrain cleared the exclusion so the node keeps serving.
        assert!(c.cluster.excluded.lock().unwrap().is_empty());
        let messages = c.notifier.messages.lock().unwrap();
        assert!(messages.iter().any(|m| m.contains("reintegrated")));
    }

    #[tokio::test(start_paused = true)]
    async fn below_minimum_raises_to_floor_first() {
        // Down-condition is true, but the floor guarantee runs first.
        let mut c = controller(
            FakeOracle::new(false, true),
            FakeGroup::with_size(1),
            EmptyCluster::default(),
            policy(3, 5),
            false,
        );

        let (outcome, _) = c.step().await;
        assert_eq!(outcome, StepOutcome::RaisedToFloor { size: 3 });
        assert_eq!(*c.group.resizes.lock().unwrap(), vec![3]);
        assert!(c.group.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_failure_takes_the_retry_path() {
        let mut c = controller(
            FakeOracle::failing(),
            FakeGroup::with_size(3),
            EmptyCluster::default(),
            policy(1, 5),
            false,
        );

        let (outcome, pause) = c.step().await;
        assert_eq!(outcome, StepOutcome::TransientError);
        assert_eq!(pause, Duration::from_secs(30));
        assert!(c.group.resizes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn neither_condition_is_a_no_op() {
        let mut c = controller(
            FakeOracle::new(false, false),
            FakeGroup::with_size(3),
            EmptyCluster::default(),
            policy(1, 5),
            false,
        );

        let (outcome, pause) = c.step().await;
        assert_eq!(outcome, StepOutcome::NoOp);
        assert_eq!(pause, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_decides_but_never_mutates() {
        let mut c = controller(
            FakeOracle::new(true, false),
            FakeGroup::with_size(3),
            EmptyCluster::default(),
            policy(1, 5),
            true,
        );

        let (outcome, _) = c.step().await;
        assert_eq!(outcome, StepOutcome::ScaledUp { size: 4, max: 5 });
        assert!(c.group.resizes.lock().unwrap().is_empty());

        // Scale-down decisions run too, without deleting anything.
        let mut c = controller(
            FakeOracle::new(false, true),
            FakeGroup::with_size(3),
            EmptyCluster::default(),
            policy(1, 5),
            true,
        );
        let (outcome, _) = c.step().await;
        assert!(matches!(outcome, StepOutcome::ScaledDown { .. }));
        assert!(c.group.deletes.lock().unwrap().is_empty());
        assert!(c.cluster.excluded.lock().unwrap().is_empty());
    }
}
