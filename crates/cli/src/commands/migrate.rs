use std::path::Path;

use mariner::{Direction, Orchestrator, RunResult};

use super::{load_config, Outcome};

pub async fn run(
    config_path: Option<&Path>,
    direction: Direction,
    number: Option<u32>,
) -> anyhow::Result<Outcome> {
    let config = load_config(config_path)?;
    let orchestrator = Orchestrator::connect(config).await?;
    let result = orchestrator.run(direction, number).await?;

    report(&result);
    Ok(if result.partial {
        Outcome::Partial
    } else {
        Outcome::Complete
    })
}

fn report(result: &RunResult) {
    if result.is_noop() {
        match result.direction {
            Direction::Up => println!("No pending migrations"),
            Direction::Down => println!("No migrations to revert"),
        }
    } else {
        let verb = match result.direction {
            Direction::Up => "Applied",
            Direction::Down => "Reverted",
        };
        match result.batch {
            Some(batch) => println!(
                "✅ {} {} migration(s) in batch {} ({}ms)",
                verb,
                result.migrations.len(),
                batch,
                result.elapsed_ms
            ),
            None => println!(
                "✅ {} {} migration(s) ({}ms)",
                verb,
                result.migrations.len(),
                result.elapsed_ms
            ),
        }
        for id in &result.migrations {
            println!("   {}", id);
        }
    }

    for drift in &result.checksum_mismatches {
        println!("⚠️  {} changed after it was applied", drift.id);
    }
    for warning in &result.warnings {
        println!("⚠️  {}: {}", warning.id, warning.message);
    }
    if result.partial {
        println!("⏸  Stopped after a warning; run again to continue");
    }
}
