//! AWS-backed [`CloudGateway`] implementation.

use crate::CloudGateway;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_autoscaling::types::LaunchTemplateSpecification;
use aws_sdk_ec2::types::{Filter, InstanceMarketOptionsRequest, RequestLaunchTemplateData, SpotMarketOptions};
use chrono::{DateTime, Utc};
use spotd_types::{LaunchTemplate, PoolState};
use tracing::{info, warn};

pub struct AwsCloudGateway {
    ec2: aws_sdk_ec2::Client,
    autoscaling: aws_sdk_autoscaling::Client,
}

impl AwsCloudGateway {
    /// Build a gateway for `region`. The caller constructs a fresh gateway
    /// every tick, so credentials are re-resolved rather than cached for
    /// the lifetime of the process.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            autoscaling: aws_sdk_autoscaling::Client::new(&config),
        }
    }

    async fn fetch_template_data(
        &self,
        launch_template_name: &str,
    ) -> Result<(String, String, serde_json::Map<String, serde_json::Value>)> {
        let versions = self
            .ec2
            .describe_launch_template_versions()
            .launch_template_name(launch_template_name)
            .versions("$Latest")
            .send()
            .await
            .context("DescribeLaunchTemplateVersions failed")?;

        let version = versions
            .launch_template_versions()
            .first()
            .with_context(|| format!("launch template '{launch_template_name}' has no versions"))?;
        let data = version
            .launch_template_data()
            .with_context(|| format!("launch template '{launch_template_name}' has no data"))?;

        let instance_type = data
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default();
        let bid_price = data
            .instance_market_options()
            .and_then(|m| m.spot_options())
            .and_then(|s| s.max_price())
            .unwrap_or("0.00")
            .to_string();

        let mut fields = serde_json::Map::new();
        if let Some(v) = data.image_id() {
            fields.insert("image_id".into(), serde_json::json!(v));
        }
        if let Some(v) = data.key_name() {
            fields.insert("key_name".into(), serde_json::json!(v));
        }
        if !data.security_group_ids().is_empty() {
            fields.insert(
                "security_group_ids".into(),
                serde_json::json!(data.security_group_ids()),
            );
        }
        if let Some(v) = data.iam_instance_profile() {
            fields.insert(
                "iam_instance_profile_arn".into(),
                serde_json::json!(v.arn()),
            );
        }
        if let Some(v) = data.user_data() {
            fields.insert("user_data".into(), serde_json::json!(v));
        }
        if let Some(v) = data.placement().and_then(|p| p.tenancy()) {
            fields.insert("tenancy".into(), serde_json::json!(v.as_str()));
        }
        if !data.block_device_mappings().is_empty() {
            fields.insert(
                "block_device_mapping_count".into(),
                serde_json::json!(data.block_device_mappings().len()),
            );
        }

        Ok((instance_type, bid_price, fields))
    }
}

#[async_trait]
impl CloudGateway for AwsCloudGateway {
    async fn list_availability_zones(&self, region: &str) -> Result<Vec<String>> {
        let resp = self
            .ec2
            .describe_availability_zones()
            .filters(Filter::builder().name("region-name").values(region).build())
            .send()
            .await
            .context("DescribeAvailabilityZones failed")?;

        let zones: Vec<String> = resp
            .availability_zones()
            .iter()
            .filter_map(|z| z.zone_name().map(str::to_string))
            .collect();
        Ok(zones)
    }

    async fn spot_price_history(
        &self,
        instance_type: &str,
        zone: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let resp = self
            .ec2
            .describe_spot_price_history()
            .instance_types(instance_type.into())
            .availability_zone(zone)
            .product_descriptions("Linux/UNIX")
            .start_time(aws_sdk_ec2::primitives::DateTime::from_secs(start.timestamp()))
            .end_time(aws_sdk_ec2::primitives::DateTime::from_secs(end.timestamp()))
            .max_results(limit as i32)
            .send()
            .await
            .with_context(|| format!("DescribeSpotPriceHistory failed for {instance_type} in {zone}"))?;

        let mut out = Vec::new();
        for entry in resp.spot_price_history() {
            let Some(price_str) = entry.spot_price() else { continue };
            let Ok(price) = price_str.parse::<f64>() else {
                warn!(instance_type, zone, price_str, "unparseable spot price, skipping");
                continue;
            };
            let Some(ts) = entry.timestamp() else { continue };
            let timestamp = DateTime::from_timestamp(ts.secs(), 0).unwrap_or_else(Utc::now);
            out.push((timestamp, price));
        }
        Ok(out)
    }

    async fn describe_pool_state(&self, asg_name: &str) -> Result<PoolState> {
        let resp = self
            .autoscaling
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(asg_name)
            .max_records(10)
            .send()
            .await
            .context("DescribeAutoScalingGroups failed")?;

        let groups = resp.auto_scaling_groups();
        if groups.is_empty() {
            bail!("autoscaling group '{asg_name}' not found");
        }
        if groups.len() > 1 {
            bail!("autoscaling group name '{asg_name}' matched {} groups", groups.len());
        }
        let group = &groups[0];

        let template_name = group
            .launch_template()
            .and_then(|t| t.launch_template_name())
            .map(str::to_string)
            .with_context(|| format!("autoscaling group '{asg_name}' has no launch template"))?;

        let (instance_type, bid_price, _fields) = self.fetch_template_data(&template_name).await?;

        Ok(PoolState {
            asg_name: asg_name.to_string(),
            current_launch_template_name: template_name,
            current_instance_type: instance_type,
            current_bid_price: bid_price.parse().unwrap_or(0.0),
        })
    }

    async fn list_launch_templates(&self, prefix: &str) -> Result<Vec<LaunchTemplate>> {
        let resp = self
            .ec2
            .describe_launch_templates()
            .send()
            .await
            .context("DescribeLaunchTemplates failed")?;

        let mut out = Vec::new();
        for lt in resp.launch_templates() {
            let Some(name) = lt.launch_template_name() else { continue };
            if !name.starts_with(prefix) {
                continue;
            }
            let (instance_type, bid_price, fields) = self.fetch_template_data(name).await?;
            out.push(LaunchTemplate {
                name: name.to_string(),
                instance_type,
                bid_price,
                fields,
            });
        }
        info!(prefix, count = out.len(), "listed launch templates by prefix");
        Ok(out)
    }

    async fn create_launch_template(&self, template: &LaunchTemplate) -> Result<()> {
        let mut data = RequestLaunchTemplateData::builder().instance_type(
            template.instance_type.as_str().into(),
        );

        if let Some(v) = template.fields.get("image_id").and_then(|v| v.as_str()) {
            data = data.image_id(v);
        }
        if let Some(v) = template.fields.get("key_name").and_then(|v| v.as_str()) {
            data = data.key_name(v);
        }
        if let Some(v) = template.fields.get("user_data").and_then(|v| v.as_str()) {
            data = data.user_data(v);
        }
        if let Some(arn) = template
            .fields
            .get("iam_instance_profile_arn")
            .and_then(|v| v.as_str())
        {
            data = data.iam_instance_profile(
                aws_sdk_ec2::types::LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                    .arn(arn)
                    .build(),
            );
        }

        data = data.instance_market_options(
            InstanceMarketOptionsRequest::builder()
                .market_type(aws_sdk_ec2::types::MarketType::Spot)
                .spot_options(
                    SpotMarketOptions::builder()
                        .max_price(template.bid_price.as_str())
                        .build(),
                )
                .build(),
        );

        self.ec2
            .create_launch_template()
            .launch_template_name(&template.name)
            .launch_template_data(data.build())
            .send()
            .await
            .with_context(|| format!("CreateLaunchTemplate failed for '{}'", template.name))?;

        info!(name = %template.name, instance_type = %template.instance_type, "created launch template");
        Ok(())
    }

    async fn update_autoscaling_group(&self, asg_name: &str, new_template_name: &str) -> Result<()> {
        self.autoscaling
            .update_auto_scaling_group()
            .auto_scaling_group_name(asg_name)
            .launch_template(
                LaunchTemplateSpecification::builder()
                    .launch_template_name(new_template_name)
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("UpdateAutoScalingGroup failed retargeting '{asg_name}' to '{new_template_name}'"))?;

        info!(asg_name, new_template_name, "retargeted autoscaling group");
        Ok(())
    }

    async fn delete_launch_template(&self, name: &str) -> Result<()> {
        self.ec2
            .delete_launch_template()
            .launch_template_name(name)
            .send()
            .await
            .with_context(|| format!("DeleteLaunchTemplate failed for '{name}'"))?;

        info!(name, "deleted stale launch template");
        Ok(())
    }
}
