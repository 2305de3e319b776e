//! CLI tests: the `agentflow` binary against the mock provider
//!
//! Each test gets its own working directory and database so no user
//! config or history leaks in.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn agentflow(workdir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentflow"))
        .args(args)
        .current_dir(workdir)
        .env("AGENTFLOW_PROVIDER", "mock")
        .env("AGENTFLOW_DB", workdir.join("conversations.db"))
        .env_remove("AGENTFLOW_MODEL")
        .env_remove("AGENTFLOW_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run agentflow")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

// =============================================================================
// Catalogue
// =============================================================================

#[test]
fn test_agents_list() {
    let dir = TempDir::new().unwrap();
    let output = agentflow(dir.path(), &["agents", "list"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("customer_service"));
    assert!(stdout.contains("Financial Analyst"));
}

#[test]
fn test_unknown_agent_exit_code() {
    let dir = TempDir::new().unwrap();
    let output = agentflow(dir.path(), &["agents", "show", "astrologer"]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["kind"], "unknown_agent_error");
}

// =============================================================================
// Runs
// =============================================================================

#[test]
fn test_agent_run_then_history() {
    let dir = TempDir::new().unwrap();
    let output = agentflow(
        dir.path(),
        &[
            "agent",
            "run",
            "customer_service",
            "--task",
            "Customer complaint about late delivery",
        ],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let result = stdout_json(&output);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["output"]["conversation_history"].as_array().map(Vec::len), Some(2));

    let history = agentflow(dir.path(), &["history", "customer_service", "--all"]);
    assert!(history.status.success());
    assert_eq!(stdout_json(&history).as_array().map(Vec::len), Some(2));
}

#[test]
fn test_workflow_run_with_fields_and_file() {
    let dir = TempDir::new().unwrap();
    let quote = dir.path().join("quote.txt");
    std::fs::write(&quote, "3x laptop, 1200 each").unwrap();

    let output = agentflow(
        dir.path(),
        &[
            "workflow",
            "run",
            "purchase_approval",
            "--task",
            "Purchase approval for design laptops",
            "--field",
            "amount=3600",
            "--file",
            quote.to_str().unwrap(),
        ],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let result = stdout_json(&output);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["kind"], "workflow");
    assert_eq!(result["output"]["by_task"]["analyze"]["status"], "succeeded");
}

#[test]
fn test_unknown_workflow_exit_code() {
    let dir = TempDir::new().unwrap();
    let output = agentflow(dir.path(), &["workflow", "run", "nope", "--task", "x"]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["kind"], "not_found_error");
}

#[test]
fn test_custom_workflow_from_local_dir() {
    let dir = TempDir::new().unwrap();
    let workflows = dir.path().join(".agentflow").join("workflows");
    std::fs::create_dir_all(&workflows).unwrap();
    std::fs::write(
        workflows.join("triage.toml"),
        r#"
id = "triage"
name = "Triage"
description = "Single-step triage"

[[tasks]]
name = "triage"
agent = "customer_service"
"#,
    )
    .unwrap();

    let list = agentflow(dir.path(), &["workflow", "list"]);
    assert!(String::from_utf8_lossy(&list.stdout).contains("triage [custom]"));

    let run = agentflow(dir.path(), &["workflow", "run", "triage", "--task", "Where is my order?"]);
    assert!(run.status.success());
    assert_eq!(stdout_json(&run)["status"], "completed");
}

// =============================================================================
// Memory and configuration
// =============================================================================

#[test]
fn test_memory_store_then_recall() {
    let dir = TempDir::new().unwrap();
    let stored = agentflow(
        dir.path(),
        &[
            "memory",
            "store",
            "data_analyst",
            "preference",
            "report_format",
            r#"{"style":"tables"}"#,
            "--confidence",
            "0.8",
        ],
    );
    assert!(stored.status.success(), "stderr: {}", String::from_utf8_lossy(&stored.stderr));
    assert_eq!(stdout_json(&stored)["value"]["style"], "tables");

    let recalled = agentflow(
        dir.path(),
        &["memory", "recall", "data_analyst", "--key", "FORMAT"],
    );
    assert!(recalled.status.success());
    let memories = stdout_json(&recalled);
    assert_eq!(memories.as_array().map(Vec::len), Some(1));
    assert_eq!(memories[0]["confidence"], 0.8);

    let unknown = agentflow(dir.path(), &["memory", "store", "astrologer", "fact", "k", "v"]);
    assert_eq!(unknown.status.code(), Some(2));
}

#[test]
fn test_agent_model_override_survives_config_model() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(".agentflow.toml"),
        r#"
[llm]
model = "mistral:7b"

[[agents]]
id = "data_analyst"
model = "llama3.1:70b"
"#,
    )
    .unwrap();

    let analyst = agentflow(dir.path(), &["agents", "show", "data_analyst"]);
    assert!(analyst.status.success(), "stderr: {}", String::from_utf8_lossy(&analyst.stderr));
    assert_eq!(stdout_json(&analyst)["model"]["model_name"], "llama3.1:70b");

    let decider = agentflow(dir.path(), &["agents", "show", "decision_maker"]);
    assert_eq!(stdout_json(&decider)["model"]["model_name"], "mistral:7b");
}
