//! Validate a topology definition file

use crate::config::load_topology;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct UnitRow {
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Image")]
    image: String,
}

#[derive(Tabled, Serialize)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Replicas")]
    replicas: u32,
    #[tabled(rename = "Rollback")]
    rollback: bool,
}

/// Load, parse, and validate a topology definition.
pub fn validate(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_topology(path)?;

    if let Err(e) = config.validate() {
        output::print_error(&format!("{}: {}", path.display(), e));
        anyhow::bail!("topology definition is invalid");
    }

    let units: Vec<UnitRow> = config
        .deployment_units
        .iter()
        .map(|unit| UnitRow {
            family: unit.family.clone(),
            cpu: output::format_cpu(unit.cpu_units),
            memory: output::format_memory(unit.memory_mib),
            image: unit.image.clone(),
        })
        .collect();
    output::print_table(&units, format);

    let services: Vec<ServiceRow> = config
        .services
        .iter()
        .map(|service| ServiceRow {
            service: service.name.clone(),
            unit: service.deployment_unit.clone(),
            replicas: service.desired_count,
            rollback: service.rollback_on_failure,
        })
        .collect();
    output::print_table(&services, format);

    output::print_success(&format!(
        "{}: topology definition is valid ({} routes)",
        path.display(),
        config.routes.len()
    ));
    Ok(())
}
