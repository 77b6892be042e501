//! Shared data model for the spot-price reconciliation daemon.
//!
//! Every crate in the workspace — the catalogue loader, the workload probe,
//! the cloud gateway, the price aggregator, the candidate selector, and the
//! reconciler — speaks these types. None of them know about each other's
//! concrete adapters; they only ever see what's defined here.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Instance catalogue (C1) ──────────────────────────────────────────────────

/// A single row of the static instance-type catalogue: name, memory, cpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub name: String,
    pub mem_gb: f64,
    pub cpus: u32,
}

/// The full catalogue, loaded once at startup and never mutated again.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: HashMap<String, CatalogueEntry>,
}

impl Catalogue {
    /// Build a catalogue from entries, rejecting duplicate names.
    pub fn from_entries(entries: Vec<CatalogueEntry>) -> Result<Self, SpotdError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.insert(entry.name.clone(), entry.clone()).is_some() {
                return Err(SpotdError::ConfigMissing(format!(
                    "duplicate catalogue entry for instance type '{}'",
                    entry.name
                )));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogueEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose memory meets or exceeds `min_gb`.
    pub fn filter_min_memory(&self, min_gb: f64) -> Vec<CatalogueEntry> {
        self.entries
            .values()
            .filter(|e| e.mem_gb >= min_gb)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogueEntry> {
        self.entries.values()
    }
}

// ─── Spot price history (C3 output, C4 input) ─────────────────────────────────

/// A single spot-price observation returned by the cloud gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotObservation {
    pub instance_type: String,
    pub zone: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub price_per_hour: f64,
}

// ─── Instance summary (C4 output, C5 input) ───────────────────────────────────

/// A priced, ranked catalogue entry — one per instance type that survived
/// the minimum-memory pre-filter and had at least one spot-price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub name: String,
    pub price: f64,
    pub coef_var: f64,
    pub std_dev: f64,
    pub cpus: u32,
    pub mem_gb: f64,
    pub price_per_cpu: f64,
    pub price_per_gb: f64,
}

// ─── Pod workload summary (C2 output) ─────────────────────────────────────────

/// Aggregate pod memory requests/usage for the cluster, as reported by the
/// workload probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PodSummary {
    pub total_memory_requested_gb: f64,
    pub total_memory_used_gb: f64,
    pub max_memory_requested_gb: f64,
    pub max_memory_used_gb: f64,
    pub total_running_pods: u64,
}

// ─── Pool state (cloud-side, read-only to the core) ───────────────────────────

/// The auto-scaling group's current configuration, as read from the cloud
/// gateway at the start of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub asg_name: String,
    pub current_launch_template_name: String,
    pub current_instance_type: String,
    pub current_bid_price: f64,
}

// ─── Launch template (cloud-side, mutated by C6) ──────────────────────────────

/// An opaque bag of provider launch-template fields plus the two the core
/// ever mutates. `fields` preserves everything else verbatim across a
/// create — AMI, security groups, IAM profile, user-data, block devices,
/// tenancy, and anything else the provider attaches to a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub name: String,
    pub instance_type: String,
    pub bid_price: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl LaunchTemplate {
    /// Copy every field verbatim under a new name, ready for the caller to
    /// overwrite `instance_type` and `bid_price`.
    pub fn duplicate_as(&self, new_name: impl Into<String>) -> Self {
        Self {
            name: new_name.into(),
            instance_type: self.instance_type.clone(),
            bid_price: self.bid_price.clone(),
            fields: self.fields.clone(),
        }
    }
}

// ─── Decision (C6 output) ─────────────────────────────────────────────────────

/// What the reconciler decided to do this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    NoChange,
    Change {
        new_instance_type: String,
        new_bid_price: f64,
        projected_hourly_cost: f64,
        reason: ChangeReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    MemoryPressure,
    CostImprovement,
}

// ─── Configuration ─────────────────────────────────────────────────────────────

/// Process-wide configuration, parsed once at startup and read-only for the
/// rest of the process's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub max_cv: f64,
    pub min_gb: f64,
    pub max_dollars_per_gb: f64,
    pub max_dollars_per_cpu: f64,
    pub autoscaling_group_name: String,
    pub launch_configuration_prefix: String,
    pub max_autoscaling_nodes: u32,
    pub historical_hours: f64,
    pub region_name: String,
    pub max_total_dollars_per_hour: f64,
    pub min_markup_percentage: f64,
    pub min_price_difference_percentage: f64,
    pub max_pod_kills: u64,
    pub memory_buffer_percentage: f64,
    pub update_interval_seconds: f64,
    pub minimum_turnover_seconds: f64,
    pub monitor: bool,
}

// ─── Errors ─────────────────────────────────────────────────────────────────────

/// Every error kind the core can produce.
#[derive(Debug, thiserror::Error)]
pub enum SpotdError {
    #[error("configuration error: {0}")]
    ConfigMissing(String),

    #[error("no availability zones found for region '{0}'")]
    NoAvailabilityZones(String),

    #[error("autoscaling group '{0}' matched more than one group")]
    AsgNotUnique(String),

    #[error("autoscaling group '{0}' not found")]
    AsgNotFound(String),

    #[error("current instance type '{0}' is not present in the catalogue or price summary")]
    UnknownCurrentInstanceType(String),

    #[error("spot history query failed for {instance_type} in {zone}: {source}")]
    SpotHistoryQueryFailed {
        instance_type: String,
        zone: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create launch template: {0}")]
    CreateTemplateFailed(#[source] anyhow::Error),

    #[error("failed to update autoscaling group: {0}")]
    UpdateAsgFailed(#[source] anyhow::Error),

    #[error("failed to delete launch template '{name}': {source}")]
    DeleteTemplateFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("workload probe failed: {0}")]
    WorkloadProbeFailed(#[source] anyhow::Error),
}
