mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use support::Workspace;

const SCENARIO: &str = r#"
[remote]
latency_ms = 5

[[remote.rules]]
op = "update"
task = 1
field = "completed"
fail = "connection reset"

[[tasks]]
id = 1
title = "Buy milk"

[[tasks]]
id = 2
title = "Walk dog"

[[actions]]
at_ms = 0
action = "toggle"
task = 1

[[actions]]
at_ms = 0
action = "rename"
task = 2
title = "Walk the dog"

[[actions]]
at_ms = 10
action = "create"
title = "Call the bank"
"#;

fn taskq(ws: &Workspace) -> Command {
    let mut cmd = Command::cargo_bin("taskq").expect("binary");
    cmd.current_dir(ws.path())
        .env_remove("TASKQ_CONFIG")
        .env_remove("TASKQ_EVENTS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn taskq_help_works() {
    Command::cargo_bin("taskq")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Usage: taskq"));
}

#[test]
fn subcommand_help_works() {
    for cmd in ["run", "config"] {
        Command::cargo_bin("taskq")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn config_show_reports_defaults_as_json() {
    let ws = Workspace::new();
    let output = taskq(&ws)
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: serde_json::Value = serde_json::from_slice(&output).expect("json envelope");
    assert_eq!(value["schema_version"], "taskq.v1");
    assert_eq!(value["command"], "config show");
    assert_eq!(value["status"], "success");
    assert_eq!(value["data"]["config"]["titles"]["default"], "Untitled Task");
    assert_eq!(value["data"]["config"]["titles"]["max_len"], 255);
    assert_eq!(value["data"]["config"]["controller"]["reentry"], "queue");
}

#[test]
fn config_show_reads_local_file() {
    let ws = Workspace::new();
    ws.write_file(
        ".taskq.toml",
        "[controller]\nreentry = \"ignore\"\n\n[titles]\nmax_len = 40\n",
    )
    .expect("write config");

    taskq(&ws)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("controller.reentry: ignore"))
        .stdout(contains("titles.max_len: 40"));
}

#[test]
fn invalid_config_is_a_user_error() {
    let ws = Workspace::new();
    ws.write_file(".taskq.toml", "[titles]\nmax_len = 0\n")
        .expect("write config");

    taskq(&ws)
        .args(["config", "show"])
        .assert()
        .code(2)
        .stderr(contains("titles.max_len"));
}

#[test]
fn run_reports_rollbacks_and_final_tasks() {
    let ws = Workspace::new();
    let scenario = ws.write_file("scenario.toml", SCENARIO).expect("write scenario");

    let output = taskq(&ws)
        .arg("run")
        .arg(&scenario)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: serde_json::Value = serde_json::from_slice(&output).expect("json envelope");
    assert_eq!(value["command"], "run");
    let data = &value["data"];
    assert_eq!(data["reentry"], "queue");
    assert_eq!(data["remote_calls"], 3);

    let actions = data["actions"].as_array().expect("actions");
    assert_eq!(actions.len(), 3);
    assert_eq!(actions[0]["key"], "1-toggle");
    assert_eq!(actions[0]["outcome"]["outcome"], "rolled_back");
    assert_eq!(actions[1]["outcome"]["outcome"], "confirmed");
    assert_eq!(actions[2]["key"], "create");
    assert_eq!(actions[2]["outcome"]["task"]["id"], 3);

    let tasks = data["tasks"].as_array().expect("tasks");
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0]["is_completed"], false);
    assert_eq!(tasks[1]["title"], "Walk the dog");
}

#[test]
fn run_human_output_lists_actions() {
    let ws = Workspace::new();
    let scenario = ws.write_file("scenario.toml", SCENARIO).expect("write scenario");

    taskq(&ws)
        .arg("run")
        .arg(&scenario)
        .assert()
        .success()
        .stdout(contains("taskq run: 3 actions, 3 tasks"))
        .stdout(contains("1-toggle: queued -> rolled_back"))
        .stdout(contains("Could not toggle task 1"))
        .stdout(contains("Next steps:"))
        .stdout(contains("--events - to trace the rolled-back mutations"));
}

#[test]
fn run_streams_events_to_stdout() {
    let ws = Workspace::new();
    let scenario = ws.write_file("scenario.toml", SCENARIO).expect("write scenario");

    let output = taskq(&ws)
        .arg("run")
        .arg(&scenario)
        .args(["--events", "-"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(output).expect("utf8");
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("jsonl line"))
        .collect();
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|event| event["schema_version"] == "taskq.event.v1"));
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|event| event["event"].as_str())
        .collect();
    assert!(kinds.contains(&"task_tentative"));
    assert!(kinds.contains(&"task_rolled_back"));
    assert!(kinds.contains(&"mutation_failed"));
    assert!(kinds.contains(&"task_added"));
}

#[test]
fn run_with_ignore_policy_drops_repeats() {
    let ws = Workspace::new();
    let scenario = ws
        .write_file(
            "repeat.toml",
            r#"
[remote]
latency_ms = 50

[[tasks]]
id = 1
title = "Buy milk"

[[actions]]
at_ms = 0
action = "toggle"
task = 1

[[actions]]
at_ms = 10
action = "toggle"
task = 1
"#,
        )
        .expect("write scenario");

    taskq(&ws)
        .arg("run")
        .arg(&scenario)
        .args(["--reentry", "ignore", "--json"])
        .assert()
        .success()
        .stdout(contains("\"submission\": \"ignored\""))
        .stdout(contains("\"remote_calls\": 1"));
}

#[test]
fn run_rejects_unknown_reentry_policy() {
    let ws = Workspace::new();
    let scenario = ws.write_file("scenario.toml", SCENARIO).expect("write scenario");

    taskq(&ws)
        .arg("run")
        .arg(&scenario)
        .args(["--reentry", "sometimes"])
        .assert()
        .code(2)
        .stderr(contains("invalid reentry policy"));
}

#[test]
fn run_missing_scenario_fails() {
    let ws = Workspace::new();

    taskq(&ws)
        .args(["run", "missing.toml", "--json"])
        .assert()
        .code(4)
        .stdout(contains("operation_failed").and(contains("\"command\": \"run\"")));
}
