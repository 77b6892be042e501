//! Kubernetes-backed [`WorkloadProbe`] implementation.
//!
//! Lists every pod cluster-wide and reduces them with [`crate::summarize`].

use crate::{summarize, PodPhase, PodView, WorkloadProbe};
use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client};
use spotd_types::PodSummary;

pub struct KubeWorkloadProbe {
    client: Client,
}

/// Parse a Kubernetes resource quantity string (`"512Mi"`, `"2Gi"`, `"100M"`,
/// `"1500000000"`) into whole bytes, mirroring what `resource.Quantity.AsInt64`
/// does on the Go side closely enough for memory-pressure accounting.
fn parse_quantity_bytes(raw: &str) -> i64 {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0_f64.powi(2)),
        ("Gi", 1024.0_f64.powi(3)),
        ("Ti", 1024.0_f64.powi(4)),
        ("K", 1_000.0),
        ("M", 1_000_000.0),
        ("G", 1_000_000_000.0),
        ("T", 1_000_000_000_000.0),
    ];
    for (suffix, multiplier) in SUFFIXES {
        if let Some(digits) = raw.strip_suffix(suffix) {
            if let Ok(value) = digits.parse::<f64>() {
                return (value * multiplier) as i64;
            }
        }
    }
    raw.parse::<f64>().unwrap_or(0.0) as i64
}

impl KubeWorkloadProbe {
    /// Connect using in-cluster config, falling back to `~/.kube/config`.
    pub async fn new() -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to build kubernetes client from in-cluster or kubeconfig")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkloadProbe for KubeWorkloadProbe {
    async fn summarize_pods(&self) -> anyhow::Result<PodSummary> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default())
            .await
            .context("failed to list pods")?;

        let views: Vec<PodView> = list
            .items
            .iter()
            .map(|pod| {
                let namespace = pod
                    .metadata
                    .namespace
                    .clone()
                    .unwrap_or_default();
                let phase = match pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                {
                    Some("Running") => PodPhase::Running,
                    Some("Pending") => PodPhase::Pending,
                    _ => PodPhase::Other,
                };
                let bytes = pod
                    .spec
                    .as_ref()
                    .and_then(|s| s.containers.first())
                    .and_then(|c| c.resources.as_ref())
                    .and_then(|r| r.requests.as_ref())
                    .and_then(|reqs| reqs.get("memory"))
                    .map(|qty| parse_quantity_bytes(&qty.0))
                    .unwrap_or(0);
                PodView {
                    namespace,
                    phase,
                    first_container_memory_request_bytes: bytes,
                }
            })
            .collect();

        Ok(summarize(&views))
    }
}
