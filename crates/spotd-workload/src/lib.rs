//! Workload probe (C2): the pod-memory summary the reconciler needs to
//! decide whether the pool is under memory pressure.
//!
//! The core (C4–C6) only ever depends on the [`WorkloadProbe`] trait, never
//! on [`KubeWorkloadProbe`] directly — unit tests exercise the reconciler
//! against an in-memory fake (see `spotd-tests`).

#![forbid(unsafe_code)]

use async_trait::async_trait;
use spotd_types::PodSummary;

pub mod kube_probe;
pub use kube_probe::KubeWorkloadProbe;

/// Bytes per reported gigabyte: pod memory quantities are divided by
/// `1024*1024*1000`, not `1024^3`. A deliberately preserved quirk — changing
/// the divisor would silently shift every memory-pressure comparison
/// downstream.
pub const BYTES_PER_REPORTED_GB: f64 = 1024.0 * 1024.0 * 1000.0;

/// The namespace excluded from pod accounting.
pub const EXCLUDED_NAMESPACE: &str = "kube-system";

/// Everything the core needs from the workload layer: one aggregate summary
/// of cluster pod memory.
#[async_trait]
pub trait WorkloadProbe: Send + Sync {
    async fn summarize_pods(&self) -> anyhow::Result<PodSummary>;
}

/// A minimal view of a pod, independent of the k8s-openapi types, so the
/// summarization logic can be unit tested without a live API server.
#[derive(Debug, Clone)]
pub struct PodView {
    pub namespace: String,
    pub phase: PodPhase,
    pub first_container_memory_request_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Running,
    Pending,
    Other,
}

/// Reduce a list of pods to the aggregate [`PodSummary`]: `kube-system` pods
/// are skipped entirely (they don't even count toward the max); of the rest, the
/// highest single-pod memory request/usage feeds both `max_memory_*` fields
/// regardless of phase; `Running` pods count toward both requested and used
/// totals and the running-pod count; `Pending` pods count only toward the
/// requested total; anything else is ignored.
pub fn summarize(pods: &[PodView]) -> PodSummary {
    let mut total_memory_requested_gb = 0.0;
    let mut total_memory_used_gb = 0.0;
    let mut max_memory_gb = 0.0_f64;
    let mut total_running_pods = 0u64;

    for pod in pods {
        if pod.namespace == EXCLUDED_NAMESPACE {
            continue;
        }
        let gb = pod.first_container_memory_request_bytes as f64 / BYTES_PER_REPORTED_GB;
        if gb > max_memory_gb {
            max_memory_gb = gb;
        }
        match pod.phase {
            PodPhase::Running => {
                total_memory_requested_gb += gb;
                total_memory_used_gb += gb;
                total_running_pods += 1;
            }
            PodPhase::Pending => {
                total_memory_requested_gb += gb;
            }
            PodPhase::Other => {}
        }
    }

    PodSummary {
        total_memory_requested_gb,
        total_memory_used_gb,
        max_memory_requested_gb: max_memory_gb,
        max_memory_used_gb: max_memory_gb,
        total_running_pods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(namespace: &str, phase: PodPhase, bytes: i64) -> PodView {
        PodView {
            namespace: namespace.to_string(),
            phase,
            first_container_memory_request_bytes: bytes,
        }
    }

    #[test]
    fn excludes_kube_system_entirely() {
        let pods = vec![pod("kube-system", PodPhase::Running, 100 * 1024 * 1024 * 1000)];
        let summary = summarize(&pods);
        assert_eq!(summary.total_running_pods, 0);
        assert_eq!(summary.max_memory_used_gb, 0.0);
    }

    #[test]
    fn running_counts_toward_used_and_requested() {
        let pods = vec![pod("default", PodPhase::Running, 2 * 1024 * 1024 * 1000)];
        let summary = summarize(&pods);
        assert_eq!(summary.total_running_pods, 1);
        assert!((summary.total_memory_used_gb - 2.0).abs() < 1e-9);
        assert!((summary.total_memory_requested_gb - 2.0).abs() < 1e-9);
    }

    #[test]
    fn pending_counts_only_toward_requested() {
        let pods = vec![pod("default", PodPhase::Pending, 4 * 1024 * 1024 * 1000)];
        let summary = summarize(&pods);
        assert_eq!(summary.total_running_pods, 0);
        assert_eq!(summary.total_memory_used_gb, 0.0);
        assert!((summary.total_memory_requested_gb - 4.0).abs() < 1e-9);
    }

    #[test]
    fn max_memory_considers_all_phases_except_excluded_namespace() {
        let pods = vec![
            pod("default", PodPhase::Running, 1 * 1024 * 1024 * 1000),
            pod("default", PodPhase::Other, 9 * 1024 * 1024 * 1000),
            pod("kube-system", PodPhase::Running, 99 * 1024 * 1024 * 1000),
        ];
        let summary = summarize(&pods);
        assert!((summary.max_memory_used_gb - 9.0).abs() < 1e-9);
        assert!((summary.max_memory_requested_gb - 9.0).abs() < 1e-9);
    }

    #[test]
    fn empty_cluster_yields_zeroed_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_memory_requested_gb, 0.0);
        assert_eq!(summary.total_running_pods, 0);
    }
}
