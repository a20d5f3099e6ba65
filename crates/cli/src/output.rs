//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format cpu units as vCPU fractions
pub fn format_cpu(cpu_units: u32) -> String {
    if cpu_units >= 1024 && cpu_units % 1024 == 0 {
        format!("{} vCPU", cpu_units / 1024)
    } else {
        format!("{:.2} vCPU", cpu_units as f64 / 1024.0)
    }
}

/// Format a memory size given in MiB
pub fn format_memory(memory_mib: u32) -> String {
    if memory_mib >= 1024 && memory_mib % 1024 == 0 {
        format!("{} GiB", memory_mib / 1024)
    } else {
        format!("{} MiB", memory_mib)
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "ready" | "steady" => status.green().to_string(),
        "creating" | "pending" | "degraded" | "rolling_back" => status.yellow().to_string(),
        "failed" | "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}
