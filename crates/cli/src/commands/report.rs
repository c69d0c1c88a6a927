use chrono::{DateTime, Duration, Utc};
use leadrelay_core::cascade::{ActiveAssignment, CascadeMetrics, ConsultantRanking, StuckLead};
use leadrelay_core::ReportingPeriod;
use serde::Serialize;

use crate::commands::{build_runtime, load_config, open_engine, CommandResult, StepFailure};

const DEFAULT_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
struct CascadeReport {
    period: ReportingPeriod,
    metrics: CascadeMetrics,
    active: Vec<ActiveAssignment>,
    ranking: Vec<ConsultantRanking>,
    stuck: Vec<StuckLead>,
}

pub fn run(
    json_output: bool,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> CommandResult {
    let config = match load_config("report") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("report") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let end = end.unwrap_or_else(Utc::now);
    let start = start.unwrap_or(end - Duration::days(DEFAULT_PERIOD_DAYS));
    let period = match ReportingPeriod::new(start, end) {
        Ok(period) => period,
        Err(error) => return CommandResult::failure("report", "invalid_period", error.to_string(), 2),
    };

    let result = runtime.block_on(async {
        let (pool, engine) = open_engine(&config).await?;
        let report = async {
            Ok::<CascadeReport, StepFailure>(CascadeReport {
                period,
                metrics: engine.metrics(period).await.map_err(query_failure)?,
                active: engine.active_assignments().await.map_err(query_failure)?,
                ranking: engine.user_ranking(period).await.map_err(query_failure)?,
                stuck: engine.stuck_leads().await.map_err(query_failure)?,
            })
        }
        .await;
        pool.close().await;
        report
    });

    match result {
        Ok(report) if json_output => match serde_json::to_string_pretty(&report) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("report", "serialization", error.to_string(), 8),
        },
        Ok(report) => CommandResult { exit_code: 0, output: render_human(&report) },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("report", error_class, message, exit_code)
        }
    }
}

fn query_failure(error: leadrelay_core::ApplicationError) -> StepFailure {
    ("report_query", error.to_string(), 7u8)
}

fn render_human(report: &CascadeReport) -> String {
    let metrics = &report.metrics;
    let mut lines = vec![
        format!(
            "cascade report {} .. {}",
            report.period.start.to_rfc3339(),
            report.period.end.to_rfc3339()
        ),
        format!(
            "- assignments {} | finalized {} | expired {} | active {} | conversion {}%",
            metrics.total_assignments,
            metrics.finalized_success,
            metrics.expired,
            metrics.active,
            metrics.conversion_rate
        ),
    ];

    lines.push(format!("active assignments ({}):", report.active.len()));
    for assignment in &report.active {
        lines.push(format!(
            "  - [{}] client {} -> {} (seq {}, {}h left)",
            assignment.urgency.as_str(),
            assignment.entry.client_id.0,
            assignment.entry.consultant_id.0,
            assignment.entry.sequence,
            assignment.hours_remaining
        ));
    }

    lines.push(format!("consultant ranking ({}):", report.ranking.len()));
    for ranking in &report.ranking {
        lines.push(format!(
            "  - {}: {}% of {} (avg position {})",
            ranking.consultant_id.0,
            ranking.conversion_rate,
            ranking.total_assignments,
            ranking.average_sequence
        ));
    }

    lines.push(format!("stuck leads ({}):", report.stuck.len()));
    for stuck in &report.stuck {
        lines.push(format!(
            "  - client {} lead {} last with {} (seq {})",
            stuck.client_id.0, stuck.lead_id.0, stuck.last_consultant_id.0, stuck.last_sequence
        ));
    }

    lines.join("\n")
}
