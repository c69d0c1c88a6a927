use leadrelay_core::SweepReport;

use crate::commands::{build_runtime, load_config, open_engine, CommandResult};

/// Runs one escalation sweep against the configured database. Safe to run
/// alongside the server's scheduler.
pub fn run() -> CommandResult {
    let config = match load_config("sweep") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("sweep") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, engine) = open_engine(&config).await?;
        let report =
            engine.sweep().await.map_err(|error| ("sweep_execution", error.to_string(), 7u8));
        pool.close().await;
        report
    });

    match result {
        Ok(report) if report.failed > 0 => CommandResult::failure(
            "sweep",
            "sweep_partial",
            format!("{}, failed {}", summary(&report), report.failed),
            7,
        ),
        Ok(report) => CommandResult::success("sweep", summary(&report)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}

fn summary(report: &SweepReport) -> String {
    format!(
        "examined {}, escalated {}, stuck {}, already claimed {}, frozen {}",
        report.examined, report.escalated, report.stuck, report.already_claimed, report.frozen
    )
}
