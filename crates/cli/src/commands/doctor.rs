use std::sync::Arc;

use leadrelay_core::config::{AppConfig, LoadOptions};
use leadrelay_core::{CascadeEngine, EngineSettings};
use leadrelay_db::{
    connect_with_config, migrations, DbPool, SqlCascadeStore, SqlResponsibilityRecorder,
};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("skipped because {reason}"))
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["database_connectivity", "schema_migrations", "cascade_config"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    // An unconfigured cascade is a warning: the service still runs, it just
    // does not distribute new leads.
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if all_pass {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    } else {
        (CheckStatus::Warn, "doctor: ready with warnings")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema_migrations", "the database was not reached"),
                DoctorCheck::skipped("cascade_config", "the database was not reached"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema_migrations", "the database was not reached"),
                    DoctorCheck::skipped("cascade_config", "the database was not reached"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        )];

        let schema = check_schema(&pool).await;
        let schema_current = schema.status == CheckStatus::Pass;
        checks.push(schema);

        if schema_current {
            checks.push(check_cascade_config(config, pool.clone()).await);
        } else {
            checks.push(DoctorCheck::skipped("cascade_config", "the schema is not current"));
        }

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    match migrations::pending_versions(pool).await {
        Ok(pending) if pending.is_empty() => {
            DoctorCheck::new("schema_migrations", CheckStatus::Pass, "all migrations applied")
        }
        Ok(pending) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Fail,
            format!(
                "{} pending migration(s) {:?}; run `leadrelay migrate`",
                pending.len(),
                pending
            ),
        ),
        Err(error) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Fail,
            format!("failed to read migration ledger: {error}"),
        ),
    }
}

async fn check_cascade_config(config: &AppConfig, pool: DbPool) -> DoctorCheck {
    let settings = match EngineSettings::try_from(&config.cascade) {
        Ok(settings) => settings,
        Err(error) => {
            return DoctorCheck::new("cascade_config", CheckStatus::Fail, error.to_string());
        }
    };
    let engine = CascadeEngine::new(
        Arc::new(SqlCascadeStore::new(pool.clone())),
        Arc::new(SqlResponsibilityRecorder::new(pool)),
        settings,
    );

    match engine.active_config().await {
        Ok(Some(active)) => DoctorCheck::new(
            "cascade_config",
            CheckStatus::Pass,
            format!(
                "config `{}` active: {} consultant(s), {}h SLA",
                active.id.0,
                active.queue.len(),
                active.sla_hours_per_step
            ),
        ),
        Ok(None) => DoctorCheck::new(
            "cascade_config",
            CheckStatus::Warn,
            "no active cascade configuration; new leads will not be distributed",
        ),
        Err(error) => DoctorCheck::new(
            "cascade_config",
            CheckStatus::Fail,
            format!("cascade configuration lookup failed: {error}"),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
