//! Candidate selector (C5): filters the priced catalogue by workload and
//! budget constraints and picks the minimum hourly-cost candidate.

#![forbid(unsafe_code)]

use spotd_types::{Config, InstanceSummary, PodSummary};

/// What the selector picked this tick: the chosen instance type, its bid,
/// the projected hourly cost of running the pool on it, and whether any
/// candidate satisfied every filter at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub instance_type: String,
    pub bid_price: f64,
    pub projected_hourly_cost: f64,
    pub any_satisfied: bool,
}

/// `maxMemoryRequired = (1 + memoryBufferPercentage/100) * maxMemoryRequestedGB`.
pub fn max_memory_required(config: &Config, pod_summary: &PodSummary) -> f64 {
    (1.0 + config.memory_buffer_percentage / 100.0) * pod_summary.max_memory_requested_gb
}

/// `nodesNeeded(s) = max(1, ceil(totalMemoryRequestedGB / s.memGB))`.
pub fn nodes_needed(mem_gb: f64, total_memory_requested_gb: f64) -> f64 {
    (total_memory_requested_gb / mem_gb).ceil().max(1.0)
}

/// `bid(s) = ceil(100 * max(price*(1+markup%), price + 2.97*stdDev)) / 100`.
/// Always rounds up to the next whole cent, never to the nearest one.
pub fn bid(price: f64, std_dev: f64, min_markup_percentage: f64) -> f64 {
    let markup_floor = price * (1.0 + min_markup_percentage / 100.0);
    let tail_floor = price + 2.97 * std_dev;
    (100.0 * markup_floor.max(tail_floor)).ceil() / 100.0
}

/// `hourlyCost(s) = min(nodesNeeded(s), maxAutoscalingNodes) * bid(s)`.
pub fn hourly_cost(
    mem_gb: f64,
    price: f64,
    std_dev: f64,
    total_memory_requested_gb: f64,
    max_autoscaling_nodes: u32,
    min_markup_percentage: f64,
) -> f64 {
    let nodes = nodes_needed(mem_gb, total_memory_requested_gb).min(max_autoscaling_nodes as f64);
    nodes * bid(price, std_dev, min_markup_percentage)
}

/// `hourlyCost` using an already-known bid price instead of recomputing one
/// from price/stdDev — used by the reconciler to price the *current* pool
/// configuration against its already-committed bid.
pub fn hourly_cost_with_bid(
    mem_gb: f64,
    bid_price: f64,
    total_memory_requested_gb: f64,
    max_autoscaling_nodes: u32,
) -> f64 {
    let nodes = nodes_needed(mem_gb, total_memory_requested_gb).min(max_autoscaling_nodes as f64);
    nodes * bid_price
}

fn passes_filters(s: &InstanceSummary, config: &Config, required_mem_gb: f64) -> bool {
    s.mem_gb >= required_mem_gb
        && (config.max_autoscaling_nodes as f64) * s.price < config.max_total_dollars_per_hour
        && s.price_per_gb < config.max_dollars_per_gb
        && s.price_per_cpu < config.max_dollars_per_cpu
        && s.coef_var < config.max_cv
}

/// Select the minimum hourly-cost candidate among `summaries` that
/// satisfies every filter. Falls back to the current pool configuration
/// (`anySatisfied = false`) when nothing qualifies.
///
/// `summaries` is expected pre-sorted ascending by `price_per_gb` (C4's
/// contract); ties among equal `hourlyCost` favor the first-encountered
/// entry, which is the lower-`pricePerGB` one given that ordering.
pub fn select(
    summaries: &[InstanceSummary],
    pod_summary: &PodSummary,
    config: &Config,
    current_instance_type: &str,
    current_bid_price: f64,
) -> Selection {
    let required_mem_gb = max_memory_required(config, pod_summary);

    let mut best_cost = config.max_total_dollars_per_hour;
    let mut best: Option<(&InstanceSummary, f64)> = None;

    for s in summaries {
        if !passes_filters(s, config, required_mem_gb) {
            continue;
        }
        let cost = hourly_cost(
            s.mem_gb,
            s.price,
            s.std_dev,
            pod_summary.total_memory_requested_gb,
            config.max_autoscaling_nodes,
            config.min_markup_percentage,
        );
        if cost < best_cost {
            best_cost = cost;
            best = Some((s, bid(s.price, s.std_dev, config.min_markup_percentage)));
        }
    }

    match best {
        Some((s, bid_price)) => Selection {
            instance_type: s.name.clone(),
            bid_price,
            projected_hourly_cost: best_cost,
            any_satisfied: true,
        },
        None => Selection {
            instance_type: current_instance_type.to_string(),
            bid_price: current_bid_price,
            projected_hourly_cost: config.max_total_dollars_per_hour,
            any_satisfied: false,
        },
    }
}
