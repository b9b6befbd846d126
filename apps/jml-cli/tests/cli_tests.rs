//! Integration tests for the CLI commands
//!
//! The commands are driven through the library so no process is spawned.

use std::io::Write;
use std::path::PathBuf;

use jml_cli::commands::{self, ConfigArgs, EvaluateArgs, ValidateArgs};
use jml_cli::CliError;
use jml_engine::EngineConfig;
use serde_json::Value;
use tempfile::NamedTempFile;

fn demo_scenario() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/scenario.json")
}

fn scenario_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_demo_scenario_summary() {
    let output = commands::evaluate(
        EvaluateArgs {
            scenario: demo_scenario(),
            pretty: false,
            summary: true,
        },
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let summary: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(summary["changes"], 3);
    assert_eq!(summary["requests"], 3);
    assert_eq!(summary["refused"], 0);
    assert_eq!(summary["rules_fired"], 3);
    assert_eq!(summary["open_conflicts"], 0);
}

#[tokio::test]
async fn test_demo_scenario_full_report() {
    let output = commands::evaluate(
        EvaluateArgs {
            scenario: demo_scenario(),
            pretty: true,
            summary: false,
        },
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let report: Value = serde_json::from_str(&output).unwrap();
    let hire = &report["changes"][0];
    assert_eq!(hire["status"], "PROCESSED");
    assert_eq!(hire["correlation_id"], "corr-hire-001");

    let request = &hire["outcome"]["requests"][0];
    assert_eq!(request["status"], "DRAFT");
    assert_eq!(request["action_type"], "JOINER");
    assert_eq!(request["correlation_id"], "corr-hire-001");
    assert_eq!(request["tasks"].as_array().unwrap().len(), 2);

    let mover = &report["changes"][1]["outcome"]["requests"][0];
    assert_eq!(mover["action_type"], "MOVER");
    assert_eq!(mover["status"], "PENDING_APPROVAL");

    let metrics = report["rule_metrics"].as_array().unwrap();
    let fired: Vec<_> = metrics
        .iter()
        .map(|m| (m["rule_id"].as_str().unwrap(), m["trigger_count"].as_u64().unwrap()))
        .collect();
    assert_eq!(
        fired,
        vec![
            ("rule-joiner-hire", 1),
            ("rule-leaver-termination", 1),
            ("rule-mover-department", 1)
        ]
    );
}

#[tokio::test]
async fn test_refused_change_is_reported() {
    let file = scenario_file(
        r#"{
            "now": "2025-03-07T15:30:00Z",
            "changes": [
                {
                    "identity_id": "identity-009",
                    "attribute": "location",
                    "before": "Paris",
                    "after": "Lyon",
                    "source_id": "isr-hris",
                    "correlation_id": "corr-a",
                    "timestamp": "2025-03-07T12:00:00Z"
                },
                {
                    "identity_id": "identity-009",
                    "attribute": "location",
                    "before": "Lyon",
                    "after": "Nice",
                    "source_id": "isr-hris",
                    "correlation_id": "corr-b",
                    "timestamp": "2025-03-07T11:00:00Z"
                }
            ]
        }"#,
    );

    let output = commands::evaluate(
        EvaluateArgs {
            scenario: file.path().to_path_buf(),
            pretty: false,
            summary: false,
        },
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let report: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(report["changes"][0]["status"], "PROCESSED");
    assert_eq!(report["changes"][1]["status"], "REFUSED");
    assert_eq!(report["changes"][1]["correlation_id"], "corr-b");
}

#[test]
fn test_validate_rules_accepts_demo() {
    let output = commands::validate_rules(ValidateArgs {
        scenario: demo_scenario(),
    })
    .unwrap();
    assert_eq!(
        output,
        "OK: 2 sources, 3 rules, 3 birthright policies, 1 SoD rules"
    );
}

#[test]
fn test_validate_rules_reports_bad_definitions() {
    let file = scenario_file(
        r#"{
            "rules": [
                {
                    "id": "rule-bad-regex",
                    "name": "Bad regex",
                    "conditions": [
                        { "attribute": "jobTitle", "operator": "REGEX", "pattern": "(unclosed" }
                    ],
                    "output": { "action_type": "MOVER" }
                }
            ],
            "sod_rules": [
                {
                    "id": "sod-single",
                    "name": "Single member",
                    "role_ids": ["admin"],
                    "conflict_type": "EXCLUSIVE",
                    "severity": "LOW"
                }
            ]
        }"#,
    );

    let err = commands::validate_rules(ValidateArgs {
        scenario: file.path().to_path_buf(),
    })
    .unwrap_err();
    assert!(matches!(err, CliError::Validation(_)));
    assert_eq!(err.exit_code(), 4);
    let message = err.to_string();
    assert!(message.contains("2 problem(s)"));
    assert!(message.contains("rule-bad-regex"));
    assert!(message.contains("sod-single"));
}

#[test]
fn test_missing_scenario_file() {
    let err = commands::validate_rules(ValidateArgs {
        scenario: PathBuf::from("/nonexistent/scenario.json"),
    })
    .unwrap_err();
    assert!(matches!(err, CliError::Io { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_show_config_defaults() {
    let output = commands::show_config(
        &ConfigArgs { pretty: false },
        &EngineConfig::default(),
    )
    .unwrap();
    let config: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(config["high_risk_threshold"], 60);
    assert_eq!(config["admin_approver_role"], "iam_admin");
}
