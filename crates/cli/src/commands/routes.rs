//! Simulate routing decisions against a topology definition

use crate::config::load_topology;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct RouteRow {
    #[tabled(rename = "Priority")]
    priority: u32,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Patterns")]
    patterns: String,
    #[tabled(rename = "Health Check")]
    health_check: String,
}

/// Show which routing rule a request path would hit.
pub fn show_route(path: &Path, request_path: &str, format: OutputFormat) -> Result<()> {
    let config = load_topology(path)?;
    config.validate()?;

    match config.match_route(request_path) {
        Some(route) => {
            let rows = vec![RouteRow {
                priority: route.priority,
                service: route.service.clone(),
                patterns: route.path_patterns.join(", "),
                health_check: route
                    .health_check_path
                    .clone()
                    .unwrap_or_else(|| "/".to_string()),
            }];
            output::print_table(&rows, format);
            output::print_success(&format!(
                "'{}' forwards to service '{}'",
                request_path, route.service
            ));
        }
        None => {
            let action = &config.distributor.default_action;
            output::print_info(&format!(
                "'{}' matches no rule; default action answers {} '{}'",
                request_path, action.status, action.body
            ));
        }
    }
    Ok(())
}
