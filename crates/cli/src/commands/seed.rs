use crate::commands::{build_runtime, load_config, CommandResult, StepFailure};
use leadrelay_db::{connect_with_config, migrations, ClientSeedInfo, DemoSeedDataset};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(*check))
            .collect::<Vec<_>>();
        let run_result: Result<SeedOutput, StepFailure> = if verification.all_present {
            Ok(SeedOutput { config_id: seed_result.config_id, clients: seed_result.clients_seeded })
        } else {
            Err(("seed_verification", verification_failure_message(&failed_checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => CommandResult::success("seed", success_message(&output)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    config_id: &'static str,
    clients: Vec<ClientSeedInfo>,
}

fn success_message(output: &SeedOutput) -> String {
    let client_lines: Vec<String> = output
        .clients
        .iter()
        .map(|client| {
            format!("  - {}: {} entries ({})", client.client_id, client.entries, client.description)
        })
        .collect();
    format!(
        "demo cascade ledger loaded under config `{}`:\n{}",
        output.config_id,
        client_lines.join("\n")
    )
}

fn verification_failure_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
