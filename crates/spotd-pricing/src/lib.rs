//! Price aggregator (C4): fans out concurrent spot-price history queries
//! across (instance type × availability zone), computes a time-weighted
//! mean and population standard deviation per instance type, and returns a
//! ranked, priced catalogue.
//!
//! Each (type, zone) pair runs as its own tokio task, optionally bounded by
//! a [`tokio::sync::Semaphore`] to cap in-flight cloud queries.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use spotd_cloud::CloudGateway;
use spotd_types::{Catalogue, Config, InstanceSummary, SpotdError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// `w(t) = 1 / (0.2 + hours(now - t))`. Pinned exact form — recent
/// observations dominate, the 0.2 floor keeps a just-seen price finite.
pub fn time_weight(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> f64 {
    let hours_ago = (now - timestamp).num_milliseconds() as f64 / 3_600_000.0;
    1.0 / (0.2 + hours_ago)
}

/// Population standard deviation and coefficient of variation of raw
/// (unweighted) prices against a given mean. The mean passed in is the
/// *weighted* mean — deliberately mismatched with this unweighted spread.
fn volatility(prices: &[f64], weighted_mean: f64) -> (f64, f64) {
    if prices.is_empty() {
        return (0.0, 0.0);
    }
    let n = prices.len() as f64;
    let raw_mean = prices.iter().sum::<f64>() / n;
    let variance = prices.iter().map(|p| (p - raw_mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let coef_var = if weighted_mean != 0.0 {
        std_dev / weighted_mean
    } else {
        0.0
    };
    (std_dev, coef_var)
}

/// Fan out `spotPriceHistory` across every (instanceType × zone) pair,
/// compute per-type weighted means, and return the catalogue of
/// [`InstanceSummary`] sorted ascending by `price_per_gb`.
///
/// `max_concurrent` bounds in-flight requests; `None` means unbounded
/// fan-out (one task per pair, launched all at once).
pub async fn aggregate(
    gateway: Arc<dyn CloudGateway>,
    catalogue: &Catalogue,
    config: &Config,
    now: DateTime<Utc>,
    max_concurrent: Option<usize>,
) -> Result<Vec<InstanceSummary>, SpotdError> {
    let big_instance_types = catalogue.filter_min_memory(config.min_gb);
    if big_instance_types.is_empty() {
        return Ok(Vec::new());
    }

    let zones = gateway
        .list_availability_zones(&config.region_name)
        .await
        .map_err(|_| SpotdError::NoAvailabilityZones(config.region_name.clone()))?;
    if zones.is_empty() {
        return Err(SpotdError::NoAvailabilityZones(config.region_name.clone()));
    }

    let start = now - chrono::Duration::seconds((config.historical_hours * 3600.0) as i64);
    let semaphore = max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1))));

    let mut tasks = Vec::with_capacity(big_instance_types.len() * zones.len());
    for entry in &big_instance_types {
        for zone in &zones {
            let gateway = Arc::clone(&gateway);
            let instance_type = entry.name.clone();
            let zone = zone.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = match &semaphore {
                    Some(s) => Some(s.clone().acquire_owned().await),
                    None => None,
                };
                let result = gateway
                    .spot_price_history(&instance_type, &zone, start, now, 1000)
                    .await;
                (instance_type, zone, result)
            }));
        }
    }

    let mut observations: HashMap<String, Vec<(DateTime<Utc>, f64)>> = big_instance_types
        .iter()
        .map(|e| (e.name.clone(), Vec::new()))
        .collect();

    for task in tasks {
        let (instance_type, zone, result) = task.await.map_err(|e| {
            SpotdError::SpotHistoryQueryFailed {
                instance_type: "<unknown>".into(),
                zone: "<unknown>".into(),
                source: anyhow::anyhow!(e),
            }
        })?;
        match result {
            Ok(points) => {
                observations.entry(instance_type).or_default().extend(points);
            }
            Err(err) => {
                warn!(instance_type, zone, error = %err, "spot price history query failed, bucket left empty");
            }
        }
    }

    let mut summaries = Vec::new();
    for entry in &big_instance_types {
        let points = observations.get(&entry.name).cloned().unwrap_or_default();
        if points.is_empty() {
            continue;
        }

        let weights: Vec<f64> = points.iter().map(|(ts, _)| time_weight(now, *ts)).collect();
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum == 0.0 {
            continue;
        }

        let price: f64 = points
            .iter()
            .zip(&weights)
            .map(|((_, p), w)| p * w / weight_sum)
            .sum();

        let raw_prices: Vec<f64> = points.iter().map(|(_, p)| *p).collect();
        let (std_dev, coef_var) = volatility(&raw_prices, price);

        summaries.push(InstanceSummary {
            name: entry.name.clone(),
            price,
            coef_var,
            std_dev,
            cpus: entry.cpus,
            mem_gb: entry.mem_gb,
            price_per_cpu: price / entry.cpus as f64,
            price_per_gb: price / entry.mem_gb,
        });
    }

    summaries.sort_by(|a, b| {
        a.price_per_gb
            .partial_cmp(&b.price_per_gb)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(summaries)
}
