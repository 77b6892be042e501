//! spotd — spot-price reconciliation daemon.
//!
//! Periodically re-selects the cheapest acceptable spot instance type for a
//! managed auto-scaling pool and re-points its launch template, unless
//! running in monitor mode. Flag names are kept 1:1 with the original
//! daemon's flags so operators migrating an existing deployment keep their
//! flags.

use clap::Parser;
use spotd_cloud::{AwsCloudGateway, CloudGateway};
use spotd_reconcile::pod_kill_guard_tripped;
use spotd_types::{Config, Decision};
use spotd_workload::{KubeWorkloadProbe, WorkloadProbe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "spotd")]
#[command(about = "Re-selects and re-points a spot-backed auto-scaling pool's launch template")]
#[command(version)]
struct Cli {
    /// Path to the static instance-type catalogue (JSON array of {name, memory, cpus})
    #[arg(long, default_value = "/etc/spotd/machines.json")]
    catalogue: PathBuf,

    /// Maximum coefficient of variation of spot price to consider a candidate
    #[arg(short = 'c', long, default_value_t = 0.5)]
    max_cv: f64,

    /// Minimum memory (GB) for any candidate
    #[arg(short = 'y', long, default_value_t = 4.0)]
    min_gb: f64,

    /// Hourly $/GB ceiling
    #[arg(short = 'g', long, default_value_t = 0.05)]
    max_dollars_per_gb: f64,

    /// Hourly $/CPU ceiling
    #[arg(short = 'p', long, default_value_t = 0.1)]
    max_dollars_per_cpu: f64,

    /// ASG to manage
    #[arg(short = 'q', long)]
    autoscaling_group_name: String,

    /// Prefix for launch-template names; used for discovery and GC
    #[arg(short = 'x', long, default_value = "spotd")]
    launch_configuration_prefix: String,

    /// Upper bound on node count for cost math
    #[arg(short = 'n', long, default_value_t = 10)]
    max_autoscaling_nodes: u32,

    /// Price history lookback, in hours
    #[arg(short = 's', long, default_value_t = 3.0)]
    historical_hours: f64,

    /// Cloud region
    #[arg(short = 'e', long)]
    region_name: String,

    /// Hard ceiling on projected pool hourly spend
    #[arg(short = 't', long, default_value_t = 5.0)]
    max_total_dollars_per_hour: f64,

    /// Bid markup floor over weighted mean, percent
    #[arg(short = 'r', long, default_value_t = 10.0)]
    min_markup_percentage: f64,

    /// Hysteresis threshold, percent of current cost
    #[arg(short = 'd', long, default_value_t = 5.0)]
    min_price_difference_percentage: f64,

    /// Skip reconciliation above this running-pod count
    #[arg(short = 'k', long, default_value_t = 10)]
    max_pod_kills: u64,

    /// Over-provisioning factor on max pod memory, percent
    #[arg(short = 'b', long, default_value_t = 25.0)]
    memory_buffer_percentage: f64,

    /// Idle sleep, in seconds
    #[arg(short = 'u', long, default_value_t = 60.0)]
    update_interval_seconds: f64,

    /// Post-change sleep, in seconds
    #[arg(short = 'm', long, default_value_t = 30.0)]
    minimum_turnover_seconds: f64,

    /// Dry-run: compute and log decisions, issue no cloud mutations
    #[arg(short = 'o', long, default_value_t = false)]
    monitor: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            max_cv: cli.max_cv,
            min_gb: cli.min_gb,
            max_dollars_per_gb: cli.max_dollars_per_gb,
            max_dollars_per_cpu: cli.max_dollars_per_cpu,
            autoscaling_group_name: cli.autoscaling_group_name,
            launch_configuration_prefix: cli.launch_configuration_prefix,
            max_autoscaling_nodes: cli.max_autoscaling_nodes,
            historical_hours: cli.historical_hours,
            region_name: cli.region_name,
            max_total_dollars_per_hour: cli.max_total_dollars_per_hour,
            min_markup_percentage: cli.min_markup_percentage,
            min_price_difference_percentage: cli.min_price_difference_percentage,
            max_pod_kills: cli.max_pod_kills,
            memory_buffer_percentage: cli.memory_buffer_percentage,
            update_interval_seconds: cli.update_interval_seconds,
            minimum_turnover_seconds: cli.minimum_turnover_seconds,
            monitor: cli.monitor,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("spotd=info".parse()?))
        .init();

    let cli = Cli::parse();
    let catalogue_path = cli.catalogue.clone();
    let config: Config = cli.into();

    info!(
        asg = %config.autoscaling_group_name,
        region = %config.region_name,
        monitor = config.monitor,
        "starting spotd"
    );

    let catalogue = spotd_catalogue::load_catalogue(&catalogue_path)?;
    let workload_probe = KubeWorkloadProbe::new().await?;

    run_daemon(&catalogue, &workload_probe, &config).await
}

/// The daemon loop: per tick, obtain a pod summary, apply the pod-kill
/// guard, otherwise price, select, and reconcile, then sleep. Errors
/// propagate out of this function and terminate the process; the
/// supervising environment is expected to restart it.
async fn run_daemon(
    catalogue: &spotd_types::Catalogue,
    workload_probe: &dyn WorkloadProbe,
    config: &Config,
) -> anyhow::Result<()> {
    loop {
        let sleep_seconds = tick(catalogue, workload_probe, config).await?;
        tokio::time::sleep(Duration::from_secs_f64(sleep_seconds.max(0.0))).await;
    }
}

async fn tick(
    catalogue: &spotd_types::Catalogue,
    workload_probe: &dyn WorkloadProbe,
    config: &Config,
) -> anyhow::Result<f64> {
    let pod_summary = match workload_probe.summarize_pods().await {
        Ok(summary) => summary,
        Err(err) => {
            warn!(error = %err, "workload probe failed, treating as too many pods this tick");
            return Ok(config.update_interval_seconds);
        }
    };

    info!(
        total_memory_requested_gb = pod_summary.total_memory_requested_gb,
        total_memory_used_gb = pod_summary.total_memory_used_gb,
        max_memory_used_gb = pod_summary.max_memory_used_gb,
        total_running_pods = pod_summary.total_running_pods,
        "pod summary"
    );

    if pod_kill_guard_tripped(&pod_summary, config) {
        warn!(
            running = pod_summary.total_running_pods,
            max_pod_kills = config.max_pod_kills,
            "too many running pods to safely turn over the pool this tick"
        );
        return Ok(config.update_interval_seconds);
    }

    let gateway: Arc<dyn CloudGateway> = Arc::new(AwsCloudGateway::new(&config.region_name).await);
    let now = chrono::Utc::now();

    let pool = gateway
        .describe_pool_state(&config.autoscaling_group_name)
        .await
        .map_err(|e| anyhow::anyhow!("failed to describe pool state: {e}"))?;

    let summaries = spotd_pricing::aggregate(Arc::clone(&gateway), catalogue, config, now, None).await?;

    let selection = spotd_select::select(
        &summaries,
        &pod_summary,
        config,
        &pool.current_instance_type,
        pool.current_bid_price,
    );

    let decision = spotd_reconcile::reconcile(
        gateway.as_ref(),
        &selection,
        &summaries,
        &pod_summary,
        &pool,
        config,
        now,
    )
    .await?;

    match &decision {
        Decision::NoChange => {
            info!("no change this tick");
            Ok(config.update_interval_seconds)
        }
        Decision::Change {
            new_instance_type,
            new_bid_price,
            projected_hourly_cost,
            reason,
        } => {
            info!(
                new_instance_type = %new_instance_type,
                new_bid_price,
                projected_hourly_cost,
                ?reason,
                monitor = config.monitor,
                "applied pool change"
            );
            Ok(config.minimum_turnover_seconds)
        }
    }
}
