//! Reconciler (C6): the hysteresis gate and launch-template CRUD sequencing
//! that turns a selector decision into (or away from) a pool mutation.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use spotd_cloud::CloudGateway;
use spotd_select::{hourly_cost_with_bid, max_memory_required, Selection};
use spotd_types::{ChangeReason, Config, Decision, InstanceSummary, PodSummary, PoolState, SpotdError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{info, warn};

/// Short-circuits the whole tick *before* pricing is ever queried: once
/// too many pods are already running, pricing and selection are pointless
/// work. The daemon loop checks this prior to pricing.
pub fn pod_kill_guard_tripped(pod_summary: &PodSummary, config: &Config) -> bool {
    pod_summary.total_running_pods >= config.max_pod_kills
}

/// A non-cryptographic 32-bit digest of a timestamp, used only to keep
/// generated launch-template names unique within a tick; uniqueness relies
/// on the timestamp itself, the hash exists only to keep names short and
/// filesystem/API-safe.
fn hash_timestamp(now: DateTime<Utc>) -> u32 {
    let mut hasher = DefaultHasher::new();
    now.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true).hash(&mut hasher);
    (hasher.finish() & 0xffff_ffff) as u32
}

/// Decide whether to mutate the pool this tick, and — unless `config.monitor`
/// is set — carry out the create → retarget → garbage-collect sequence.
///
/// `selection` is C5's output; `summaries` is C4's output (needed to look up
/// the current instance type's memGB for the memory-pressure check).
pub async fn reconcile(
    gateway: &dyn CloudGateway,
    selection: &Selection,
    summaries: &[InstanceSummary],
    pod_summary: &PodSummary,
    pool: &PoolState,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<Decision, SpotdError> {
    if !selection.any_satisfied {
        return Ok(Decision::NoChange);
    }

    let required_mem_gb = max_memory_required(config, pod_summary);
    let current = summaries
        .iter()
        .find(|s| s.name == pool.current_instance_type)
        .ok_or_else(|| SpotdError::UnknownCurrentInstanceType(pool.current_instance_type.clone()))?;

    let memory_pressure = current.mem_gb < required_mem_gb;

    let original_hourly_cost = hourly_cost_with_bid(
        current.mem_gb,
        pool.current_bid_price,
        pod_summary.total_memory_requested_gb,
        config.max_autoscaling_nodes,
    );

    let cost_delta_ok = (selection.projected_hourly_cost - original_hourly_cost).abs()
        > (config.min_price_difference_percentage / 100.0) * original_hourly_cost;

    let config_changed = selection.instance_type != pool.current_instance_type
        || (selection.bid_price - pool.current_bid_price).abs() > f64::EPSILON;

    let apply = memory_pressure || (cost_delta_ok && config_changed);

    if !apply {
        return Ok(Decision::NoChange);
    }

    let reason = if memory_pressure {
        ChangeReason::MemoryPressure
    } else {
        ChangeReason::CostImprovement
    };

    info!(
        pool = %pool.asg_name,
        from = %pool.current_instance_type,
        to = %selection.instance_type,
        new_bid = selection.bid_price,
        projected_hourly_cost = selection.projected_hourly_cost,
        ?reason,
        monitor = config.monitor,
        "reconciler decided to change the pool's launch template"
    );

    if !config.monitor {
        apply_change(gateway, pool, selection, config, now).await?;
    }

    Ok(Decision::Change {
        new_instance_type: selection.instance_type.clone(),
        new_bid_price: selection.bid_price,
        projected_hourly_cost: selection.projected_hourly_cost,
        reason,
    })
}

async fn apply_change(
    gateway: &dyn CloudGateway,
    pool: &PoolState,
    selection: &Selection,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<(), SpotdError> {
    let existing = gateway
        .list_launch_templates(&config.launch_configuration_prefix)
        .await
        .map_err(SpotdError::CreateTemplateFailed)?;

    let current_template = existing
        .iter()
        .find(|t| t.name == pool.current_launch_template_name)
        .ok_or_else(|| {
            SpotdError::CreateTemplateFailed(anyhow::anyhow!(
                "current launch template '{}' not found among prefix '{}'",
                pool.current_launch_template_name,
                config.launch_configuration_prefix
            ))
        })?;

    let new_name = format!(
        "{}-{:08x}",
        config.launch_configuration_prefix,
        hash_timestamp(now)
    );
    let mut new_template = current_template.duplicate_as(new_name);
    new_template.instance_type = selection.instance_type.clone();
    new_template.bid_price = format!("{:.2}", selection.bid_price);

    gateway
        .create_launch_template(&new_template)
        .await
        .map_err(SpotdError::CreateTemplateFailed)?;

    gateway
        .update_autoscaling_group(&pool.asg_name, &new_template.name)
        .await
        .map_err(SpotdError::UpdateAsgFailed)?;

    let current_set = gateway
        .list_launch_templates(&config.launch_configuration_prefix)
        .await
        .map_err(SpotdError::CreateTemplateFailed)?;

    for template in current_set {
        if template.name == new_template.name {
            continue;
        }
        if let Err(err) = gateway.delete_launch_template(&template.name).await {
            warn!(name = %template.name, error = %err, "failed to delete stale launch template, leaving for next tick's garbage collection");
        }
    }

    Ok(())
}
