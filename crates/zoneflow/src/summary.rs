//! Run summary output

use colored::Colorize;
use zoneflow_core::RunReport;

pub fn print(report: &RunReport) {
    println!();

    for zone in &report.unknown_zones {
        println!(
            "{} zone '{}' has no definition, skipped",
            "⚠".yellow(),
            zone.to_string().cyan()
        );
    }
    for warning in &report.warnings {
        println!("{} {}", "⚠".yellow(), warning.yellow());
    }

    if let Some((path, zones)) = &report.inventory {
        let names: Vec<&str> = zones.iter().map(|z| z.as_str()).collect();
        println!(
            "Inventory: {} ({} zones: {})",
            path.display().to_string().cyan(),
            zones.len(),
            names.join(", ")
        );
    }

    if report.is_success() {
        println!(
            "{}",
            format!(
                "✓ {} completed for {} zone(s) in {:.1}s",
                report.action,
                report.zones.len(),
                report.elapsed_secs()
            )
            .green()
            .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "✗ {} failed for {} of {} zone(s)",
                report.action,
                report.failed_zones().len(),
                report.zones.len()
            )
            .red()
            .bold()
        );
        for failure in &report.failures {
            println!("  {} {}", "✗".red(), failure.to_string().red());
        }
    }
}
