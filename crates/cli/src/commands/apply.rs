//! Provision a topology locally with in-process providers

use crate::config::load_topology;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use topology_lib::{build_topology, Providers};

#[derive(Tabled, Serialize)]
struct ResourceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Build the declared topology in-process and report the resulting
/// resource graph. Everything is torn down again before returning;
/// this is a dry run against the real provisioning path.
pub async fn apply(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_topology(path)?;

    let images: Vec<String> = config
        .deployment_units
        .iter()
        .map(|u| u.image.clone())
        .collect();
    let providers = Providers::in_process(images);

    let handle = build_topology(&config, &providers).await?;
    let description = handle.describe().await;
    let statuses = handle.status().snapshot().await;

    let rows: Vec<ResourceRow> = description
        .resources
        .iter()
        .map(|resource| ResourceRow {
            name: resource.name.clone(),
            kind: resource.kind.as_str().to_string(),
            status: statuses
                .get(&resource.name)
                .map(|record| output::color_status(record.status.as_str()))
                .unwrap_or_else(|| "-".to_string()),
            detail: resource.detail.clone(),
        })
        .collect();
    output::print_table(&rows, format);

    handle.teardown().await?;
    output::print_success(&format!(
        "topology '{}' provisioned and torn down cleanly",
        description.name
    ));
    Ok(())
}
