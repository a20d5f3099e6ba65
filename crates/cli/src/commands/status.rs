//! Query a running topologyd for health and topology state

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;
use topology_lib::{TopologyDescription, TopologyHealth};

#[derive(Tabled, Serialize)]
struct HealthRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled, Serialize)]
struct RouteRow {
    #[tabled(rename = "Priority")]
    priority: u32,
    #[tabled(rename = "Patterns")]
    patterns: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Pool")]
    pool: String,
}

/// Show the daemon's resource health and routing table.
pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: TopologyHealth = client.get("/healthz").await?;
    let description: TopologyDescription = client.get("/topology").await?;

    let mut rows: Vec<HealthRow> = health
        .resources
        .iter()
        .map(|(name, record)| HealthRow {
            resource: name.clone(),
            status: output::color_status(record.status.as_str()),
            message: record.message.clone().unwrap_or_default(),
        })
        .collect();
    rows.sort_by(|a, b| a.resource.cmp(&b.resource));
    output::print_table(&rows, format);

    let routes: Vec<RouteRow> = description
        .routes
        .iter()
        .map(|route| RouteRow {
            priority: route.priority,
            patterns: route.patterns.join(", "),
            service: route.service.clone(),
            pool: route.pool.clone(),
        })
        .collect();
    output::print_table(&routes, format);

    output::print_info(&format!(
        "topology '{}' is {}",
        description.name,
        output::color_status(health.status.as_str())
    ));
    Ok(())
}
