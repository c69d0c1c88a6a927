use std::env;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use leadrelay_cli::commands::{doctor, migrate, report, seed, sweep};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_zero_sweep_interval() {
    let dir = TempDir::new().expect("tempdir");
    with_env(
        &[
            ("LEADRELAY_DATABASE_URL", &database_url(&dir)),
            ("LEADRELAY_CASCADE_SWEEP_INTERVAL_SECS", "0"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("cascade.sweep_interval_secs must be greater than zero"));
        },
    );
}

#[test]
fn seed_returns_deterministic_ledger_summary() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected deterministic seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("cfg-demo"));
        assert!(message.contains("client-demo-001"));
        assert!(message.contains("client-demo-002"));
        assert!(message.contains("client-demo-003"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");

        assert_eq!(parse_payload(&first.output)["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn sweep_escalates_overdue_demo_leads_once() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        assert_eq!(seed::run().exit_code, 0);

        let first = sweep::run();
        assert_eq!(first.exit_code, 0, "expected clean sweep: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "sweep");
        let message = first_payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("examined 2"), "unexpected summary: {message}");
        assert!(message.contains("escalated 2"), "unexpected summary: {message}");

        let second = sweep::run();
        assert_eq!(second.exit_code, 0);
        let message = parse_payload(&second.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.contains("examined 0"), "successors are not yet due: {message}");
    });
}

#[test]
fn sweep_on_empty_ledger_is_a_noop() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        let result = sweep::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(
            payload["message"],
            "examined 0, escalated 0, stuck 0, already claimed 0, frozen 0"
        );
    });
}

#[test]
fn report_json_reflects_seeded_ledger() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = report::run(true, Some(ts("2026-01-01T00:00:00Z")), Some(ts("2026-01-31T23:59:59Z")));
        assert_eq!(result.exit_code, 0, "expected report success: {}", result.output);

        let payload = parse_payload(&result.output);
        let metrics = &payload["metrics"];
        assert_eq!(metrics["total_assignments"], 4);
        assert_eq!(metrics["finalized_success"], 1);
        assert_eq!(metrics["expired"], 1);
        assert_eq!(metrics["active"], 2);
        assert_eq!(decimal_text(&metrics["conversion_rate"]), "25");

        assert_eq!(payload["active"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["stuck"].as_array().map(Vec::len), Some(0));
        let ranking = payload["ranking"].as_array().expect("ranking array");
        assert_eq!(ranking.len(), 2, "ana and bruno started entries in January");
    });
}

#[test]
fn report_rejects_inverted_period() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        let result = report::run(false, Some(ts("2026-02-01T00:00:00Z")), Some(ts("2026-01-01T00:00:00Z")));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_period");
    });
}

#[test]
fn doctor_reports_pending_schema_then_passes_after_seed() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("LEADRELAY_DATABASE_URL", &database_url(&dir))], || {
        let before = parse_payload(&doctor::run(true));
        assert_eq!(before["overall_status"], "fail");
        assert_eq!(check_status(&before, "database_connectivity"), "pass");
        assert_eq!(check_status(&before, "schema_migrations"), "fail");
        assert_eq!(check_status(&before, "cascade_config"), "skipped");

        assert_eq!(migrate::run().exit_code, 0);
        let migrated = parse_payload(&doctor::run(true));
        assert_eq!(migrated["overall_status"], "warn");
        assert_eq!(check_status(&migrated, "cascade_config"), "warn");

        assert_eq!(seed::run().exit_code, 0);
        let seeded = parse_payload(&doctor::run(true));
        assert_eq!(seeded["overall_status"], "pass");
    });
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[("LEADRELAY_CASCADE_SWEEP_INTERVAL_SECS", "0")], || {
        let output = doctor::run(false);

        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation:"));
        assert!(output.contains("- [skip] database_connectivity:"));
    });
}

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("leadrelay.db").display())
}

fn ts(value: &str) -> DateTime<Utc> {
    value.parse().expect("valid timestamp")
}

fn decimal_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADRELAY_DATABASE_URL",
        "LEADRELAY_DATABASE_MAX_CONNECTIONS",
        "LEADRELAY_DATABASE_TIMEOUT_SECS",
        "LEADRELAY_SERVER_BIND_ADDRESS",
        "LEADRELAY_SERVER_PORT",
        "LEADRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEADRELAY_CASCADE_SWEEP_INTERVAL_SECS",
        "LEADRELAY_CASCADE_SWEEP_BATCH_SIZE",
        "LEADRELAY_CASCADE_WARNING_PCT",
        "LEADRELAY_CASCADE_CRITICAL_PCT",
        "LEADRELAY_CASCADE_ON_CONFIG_DISABLED",
        "LEADRELAY_LOGGING_LEVEL",
        "LEADRELAY_LOGGING_FORMAT",
        "LEADRELAY_LOG_LEVEL",
        "LEADRELAY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
