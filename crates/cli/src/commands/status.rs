use std::path::Path;

use mariner::migrations::MigrationStatus;
use mariner::{Orchestrator, StatusReport};

use super::{load_config, Outcome};

pub async fn run(config_path: Option<&Path>, json: bool) -> anyhow::Result<Outcome> {
    let config = load_config(config_path)?;
    let orchestrator = Orchestrator::connect(config).await?;
    let report = orchestrator.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report);
    }
    Ok(Outcome::Complete)
}

fn print_table(report: &StatusReport) {
    println!("Migration Status:");
    println!("================");

    if report.migrations.is_empty() {
        println!("No migrations found");
    }
    for entry in &report.migrations {
        match &entry.status {
            MigrationStatus::Applied { applied_at, batch } => {
                let changed = if entry.checksum_changed { "  (changed)" } else { "" };
                println!(
                    "  ✅ {}  batch {}  {}{}",
                    entry.id,
                    batch,
                    applied_at.format("%Y-%m-%d %H:%M:%S"),
                    changed
                );
            }
            MigrationStatus::Pending => println!("  ⏳ {}", entry.id),
        }
    }
    for entry in &report.missing {
        println!("  ❓ {}  batch {}  (file missing)", entry.id, entry.batch);
    }

    println!(
        "\n{} applied, {} pending",
        report.migrations.len() - report.pending().count(),
        report.pending().count()
    );
}
