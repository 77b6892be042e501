//! End-to-end scenarios driving the full price aggregator → candidate
//! selector → reconciler pipeline against fake cloud collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spotd_cloud::CloudGateway;
use spotd_types::{CatalogueEntry, Catalogue, ChangeReason, Config, Decision, LaunchTemplate, PodSummary, PoolState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct FakeGateway {
    zones: Vec<String>,
    history: HashMap<(String, String), Vec<(DateTime<Utc>, f64)>>,
    templates: Mutex<Vec<LaunchTemplate>>,
    created: Mutex<Vec<LaunchTemplate>>,
    retargeted: Mutex<Option<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeGateway {
    fn new(zones: &[&str], current_template: LaunchTemplate) -> Self {
        Self {
            zones: zones.iter().map(|z| z.to_string()).collect(),
            history: HashMap::new(),
            templates: Mutex::new(vec![current_template]),
            created: Mutex::new(Vec::new()),
            retargeted: Mutex::new(None),
            deleted: Mutex::new(Vec::new()),
        }
    }

    fn with_history(mut self, instance_type: &str, zone: &str, prices: Vec<(DateTime<Utc>, f64)>) -> Self {
        self.history.insert((instance_type.to_string(), zone.to_string()), prices);
        self
    }
}

#[async_trait]
impl CloudGateway for FakeGateway {
    async fn list_availability_zones(&self, _region: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.zones.clone())
    }

    async fn spot_price_history(
        &self,
        instance_type: &str,
        zone: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _limit: u32,
    ) -> anyhow::Result<Vec<(DateTime<Utc>, f64)>> {
        Ok(self
            .history
            .get(&(instance_type.to_string(), zone.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn describe_pool_state(&self, asg_name: &str) -> anyhow::Result<PoolState> {
        let templates = self.templates.lock().unwrap();
        let current = templates.first().expect("pool has a current template");
        Ok(PoolState {
            asg_name: asg_name.to_string(),
            current_launch_template_name: current.name.clone(),
            current_instance_type: current.instance_type.clone(),
            current_bid_price: current.bid_price.parse().unwrap_or(0.0),
        })
    }

    async fn list_launch_templates(&self, prefix: &str) -> anyhow::Result<Vec<LaunchTemplate>> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_launch_template(&self, template: &LaunchTemplate) -> anyhow::Result<()> {
        self.created.lock().unwrap().push(template.clone());
        self.templates.lock().unwrap().push(template.clone());
        Ok(())
    }

    async fn update_autoscaling_group(&self, _asg_name: &str, new_template_name: &str) -> anyhow::Result<()> {
        *self.retargeted.lock().unwrap() = Some(new_template_name.to_string());
        Ok(())
    }

    async fn delete_launch_template(&self, name: &str) -> anyhow::Result<()> {
        self.templates.lock().unwrap().retain(|t| t.name != name);
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

fn catalogue(entries: &[(&str, f64, u32)]) -> Catalogue {
    Catalogue::from_entries(
        entries
            .iter()
            .map(|(name, mem_gb, cpus)| CatalogueEntry {
                name: name.to_string(),
                mem_gb: *mem_gb,
                cpus: *cpus,
            })
            .collect(),
    )
    .unwrap()
}

fn base_config(monitor: bool) -> Config {
    Config {
        max_cv: 0.5,
        min_gb: 4.0,
        max_dollars_per_gb: 0.05,
        max_dollars_per_cpu: 0.1,
        autoscaling_group_name: "asg".into(),
        launch_configuration_prefix: "spotd".into(),
        max_autoscaling_nodes: 3,
        historical_hours: 3.0,
        region_name: "us-east-1".into(),
        max_total_dollars_per_hour: 1.0,
        min_markup_percentage: 10.0,
        min_price_difference_percentage: 5.0,
        max_pod_kills: 10,
        memory_buffer_percentage: 25.0,
        update_interval_seconds: 60.0,
        minimum_turnover_seconds: 30.0,
        monitor,
    }
}

fn pod_summary(total_req: f64, max_req: f64, running: u64) -> PodSummary {
    PodSummary {
        total_memory_requested_gb: total_req,
        total_memory_used_gb: total_req,
        max_memory_requested_gb: max_req,
        max_memory_used_gb: max_req,
        total_running_pods: running,
    }
}

fn template(name: &str, instance_type: &str, bid_price: &str) -> LaunchTemplate {
    LaunchTemplate {
        name: name.into(),
        instance_type: instance_type.into(),
        bid_price: bid_price.into(),
        fields: serde_json::Map::new(),
    }
}

fn stable_history(now: DateTime<Utc>, price: f64) -> Vec<(DateTime<Utc>, f64)> {
    vec![
        (now - chrono::Duration::minutes(5), price),
        (now - chrono::Duration::minutes(20), price),
    ]
}

#[tokio::test]
async fn scenario_1_no_change() {
    let now = Utc::now();
    let gateway = Arc::new(
        FakeGateway::new(&["us-east-1a"], template("spotd-1", "a", "0.12"))
            .with_history("a", "us-east-1a", stable_history(now, 0.10))
            .with_history("b", "us-east-1a", stable_history(now, 0.22)),
    );
    let cat = catalogue(&[("a", 8.0, 2), ("b", 16.0, 4)]);
    let config = base_config(false);
    let pods = pod_summary(6.0, 4.0, 2);

    let pool = gateway.describe_pool_state(&config.autoscaling_group_name).await.unwrap();
    let summaries = spotd_pricing::aggregate(gateway.clone() as Arc<dyn CloudGateway>, &cat, &config, now, None)
        .await
        .unwrap();
    let selection = spotd_select::select(&summaries, &pods, &config, &pool.current_instance_type, pool.current_bid_price);
    let decision = spotd_reconcile::reconcile(
        gateway.as_ref() as &dyn CloudGateway,
        &selection,
        &summaries,
        &pods,
        &pool,
        &config,
        now,
    )
    .await
    .unwrap();

    assert_eq!(decision, Decision::NoChange);
    assert!(gateway.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_2_cost_driven_switch() {
    let now = Utc::now();
    let gateway = Arc::new(
        FakeGateway::new(&["us-east-1a"], template("spotd-1", "a", "0.12"))
            .with_history("a", "us-east-1a", stable_history(now, 0.10))
            .with_history("b", "us-east-1a", stable_history(now, 0.22))
            .with_history("c", "us-east-1a", stable_history(now, 0.05)),
    );
    let cat = catalogue(&[("a", 8.0, 2), ("b", 16.0, 4), ("c", 8.0, 2)]);
    let config = base_config(false);
    let pods = pod_summary(6.0, 4.0, 2);

    let pool = gateway.describe_pool_state(&config.autoscaling_group_name).await.unwrap();
    let summaries = spotd_pricing::aggregate(gateway.clone() as Arc<dyn CloudGateway>, &cat, &config, now, None)
        .await
        .unwrap();
    let selection = spotd_select::select(&summaries, &pods, &config, &pool.current_instance_type, pool.current_bid_price);
    assert_eq!(selection.instance_type, "c");

    let decision = spotd_reconcile::reconcile(
        gateway.as_ref() as &dyn CloudGateway,
        &selection,
        &summaries,
        &pods,
        &pool,
        &config,
        now,
    )
    .await
    .unwrap();

    match decision {
        Decision::Change { new_instance_type, new_bid_price, reason, .. } => {
            assert_eq!(new_instance_type, "c");
            assert!((new_bid_price - 0.07).abs() < 1e-9);
            assert_eq!(reason, ChangeReason::CostImprovement);
        }
        _ => panic!("expected a change"),
    }
    assert_eq!(gateway.created.lock().unwrap().len(), 1);
    assert!(gateway.retargeted.lock().unwrap().is_some());
    assert!(gateway.deleted.lock().unwrap().contains(&"spotd-1".to_string()));
}

#[tokio::test]
async fn scenario_3_memory_pressure_override() {
    let now = Utc::now();
    let gateway = Arc::new(
        FakeGateway::new(&["us-east-1a"], template("spotd-1", "a", "0.12"))
            .with_history("a", "us-east-1a", stable_history(now, 0.10))
            .with_history("b", "us-east-1a", stable_history(now, 0.22)),
    );
    let cat = catalogue(&[("a", 8.0, 2), ("b", 16.0, 4)]);
    let config = base_config(false);
    // maxReq=10, buffer=25% -> required=12.5GB; only b (16GB) qualifies.
    let pods = pod_summary(6.0, 10.0, 2);

    let pool = gateway.describe_pool_state(&config.autoscaling_group_name).await.unwrap();
    let summaries = spotd_pricing::aggregate(gateway.clone() as Arc<dyn CloudGateway>, &cat, &config, now, None)
        .await
        .unwrap();
    let selection = spotd_select::select(&summaries, &pods, &config, &pool.current_instance_type, pool.current_bid_price);
    assert_eq!(selection.instance_type, "b");

    let decision = spotd_reconcile::reconcile(
        gateway.as_ref() as &dyn CloudGateway,
        &selection,
        &summaries,
        &pods,
        &pool,
        &config,
        now,
    )
    .await
    .unwrap();

    match decision {
        Decision::Change { reason, .. } => assert_eq!(reason, ChangeReason::MemoryPressure),
        _ => panic!("expected memory-pressure change"),
    }
}

#[tokio::test]
async fn scenario_4_pod_kill_guard() {
    let mut config = base_config(false);
    config.max_pod_kills = 10;
    let pods = pod_summary(6.0, 4.0, 10);
    assert!(spotd_reconcile::pod_kill_guard_tripped(&pods, &config));
}

#[tokio::test]
async fn scenario_5_volatility_rejection() {
    let now = Utc::now();
    let gateway = Arc::new(
        FakeGateway::new(&["us-east-1a"], template("spotd-1", "a", "0.12"))
            .with_history("a", "us-east-1a", stable_history(now, 0.10))
            .with_history(
                "d",
                "us-east-1a",
                vec![(now - chrono::Duration::minutes(5), 0.01), (now - chrono::Duration::minutes(5), 0.05)],
            ),
    );
    let cat = catalogue(&[("a", 8.0, 2), ("d", 8.0, 2)]);
    let config = base_config(false);
    let pods = pod_summary(6.0, 4.0, 2);

    let pool = gateway.describe_pool_state(&config.autoscaling_group_name).await.unwrap();
    let summaries = spotd_pricing::aggregate(gateway.clone() as Arc<dyn CloudGateway>, &cat, &config, now, None)
        .await
        .unwrap();
    let d = summaries.iter().find(|s| s.name == "d").unwrap();
    assert!(d.coef_var > config.max_cv, "fixture should produce a volatile candidate");

    let selection = spotd_select::select(&summaries, &pods, &config, &pool.current_instance_type, pool.current_bid_price);
    assert_eq!(selection.instance_type, "a");
}

#[tokio::test]
async fn scenario_6_monitor_mode_decides_without_mutating() {
    let now = Utc::now();
    let gateway = Arc::new(
        FakeGateway::new(&["us-east-1a"], template("spotd-1", "a", "0.12"))
            .with_history("a", "us-east-1a", stable_history(now, 0.10))
            .with_history("c", "us-east-1a", stable_history(now, 0.05)),
    );
    let cat = catalogue(&[("a", 8.0, 2), ("c", 8.0, 2)]);
    let config = base_config(true);
    let pods = pod_summary(6.0, 4.0, 2);

    let pool = gateway.describe_pool_state(&config.autoscaling_group_name).await.unwrap();
    let summaries = spotd_pricing::aggregate(gateway.clone() as Arc<dyn CloudGateway>, &cat, &config, now, None)
        .await
        .unwrap();
    let selection = spotd_select::select(&summaries, &pods, &config, &pool.current_instance_type, pool.current_bid_price);

    let decision = spotd_reconcile::reconcile(
        gateway.as_ref() as &dyn CloudGateway,
        &selection,
        &summaries,
        &pods,
        &pool,
        &config,
        now,
    )
    .await
    .unwrap();

    assert!(matches!(decision, Decision::Change { .. }));
    assert!(gateway.created.lock().unwrap().is_empty());
    assert!(gateway.retargeted.lock().unwrap().is_none());
}

#[tokio::test]
async fn duplicating_a_template_preserves_other_fields() {
    let mut fields = serde_json::Map::new();
    fields.insert("image_id".to_string(), serde_json::json!("ami-0123"));
    let original = LaunchTemplate {
        name: "spotd-1".into(),
        instance_type: "a".into(),
        bid_price: "0.12".into(),
        fields,
    };
    let duplicate = original.duplicate_as("spotd-2");
    assert_ne!(duplicate.name, original.name);
    assert_eq!(duplicate.fields, original.fields);
}
