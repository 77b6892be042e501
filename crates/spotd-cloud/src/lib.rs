//! Cloud gateway (C3): the thin operations the core consumes from the cloud
//! provider — spot-price history, availability zones, the auto-scaling
//! group, and launch templates.
//!
//! The core (C4–C6) only ever depends on the [`CloudGateway`] trait, never on
//! [`AwsCloudGateway`] directly, so unit tests exercise the core against an
//! in-memory fake instead of live AWS calls (see `spotd-tests`).

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spotd_types::{LaunchTemplate, PoolState};

pub mod aws;
pub use aws::AwsCloudGateway;

/// Everything the core needs from the cloud provider. Implementations own
/// per-request timeouts and retries; the core never times out an aggregate
/// call itself.
#[async_trait]
pub trait CloudGateway: Send + Sync {
    /// List the availability zones in a region.
    async fn list_availability_zones(&self, region: &str) -> anyhow::Result<Vec<String>>;

    /// Query spot price history for one instance type in one zone over
    /// `[start, end]`, capped at `limit` results, `productDescription`
    /// fixed to `"Linux/UNIX"`.
    async fn spot_price_history(
        &self,
        instance_type: &str,
        zone: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<(DateTime<Utc>, f64)>>;

    /// Read the auto-scaling group's current launch template and bid price.
    /// Fatal (`AsgNotUnique`/`AsgNotFound`) if the name doesn't resolve to
    /// exactly one group.
    async fn describe_pool_state(&self, asg_name: &str) -> anyhow::Result<PoolState>;

    /// List launch templates whose name starts with `prefix`.
    async fn list_launch_templates(&self, prefix: &str) -> anyhow::Result<Vec<LaunchTemplate>>;

    /// Create a new launch template.
    async fn create_launch_template(&self, template: &LaunchTemplate) -> anyhow::Result<()>;

    /// Retarget the auto-scaling group at a different launch template.
    async fn update_autoscaling_group(
        &self,
        asg_name: &str,
        new_template_name: &str,
    ) -> anyhow::Result<()>;

    /// Delete a launch template by name.
    async fn delete_launch_template(&self, name: &str) -> anyhow::Result<()>;
}
