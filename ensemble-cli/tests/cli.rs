use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
#[cfg(unix)]
use assert_fs::prelude::*;
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

fn ensemble_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ensemble"));
    cmd.current_dir(dir)
        .arg("--root")
        .arg(dir)
        .env_remove("RUST_LOG")
        .env_remove("ENSEMBLE_TEAM_MODE");
    cmd
}

fn json_of(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().expect("run ensemble");
    assert!(
        output.status.success(),
        "ensemble failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ---------------------------------------------------------------------------
// Registry commands
// ---------------------------------------------------------------------------

#[test]
fn register_list_and_get() {
    let dir = TempDir::new().expect("tempdir");

    let first = json_of(ensemble_cmd(dir.path()).args(["register", "--nickname", "home"]));
    assert_eq!(first["is_new"], true);
    assert_eq!(first["session"]["is_main"], true);
    let id = first["id"].as_u64().expect("numeric id");

    let again = json_of(ensemble_cmd(dir.path()).arg("register"));
    assert_eq!(again["is_new"], false);
    assert_eq!(again["id"].as_u64(), Some(id));

    let listing = json_of(ensemble_cmd(dir.path()).arg("list"));
    assert_eq!(listing["sessions"].as_array().map(Vec::len), Some(1));

    let got = json_of(ensemble_cmd(dir.path()).args(["get", &id.to_string()]));
    assert_eq!(got["nickname"], "home");
}

#[test]
fn get_unknown_session_fails() {
    let dir = TempDir::new().expect("tempdir");
    ensemble_cmd(dir.path())
        .args(["get", "99"])
        .assert()
        .failure()
        .stderr(contains("session 99 not found"));
}

#[test]
fn deleting_main_is_refused_not_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let registered = json_of(ensemble_cmd(dir.path()).arg("register"));
    let id = registered["id"].as_u64().expect("id").to_string();

    let refused = json_of(ensemble_cmd(dir.path()).args(["delete", &id]));
    assert_eq!(refused["success"], false);
    assert_eq!(refused["kind"], "cannot_delete_main");

    let listing = json_of(ensemble_cmd(dir.path()).arg("list"));
    assert_eq!(listing["sessions"].as_array().map(Vec::len), Some(1));
}

#[test]
fn thread_transition_table_is_enforced() {
    let dir = TempDir::new().expect("tempdir");
    let registered = json_of(ensemble_cmd(dir.path()).arg("register"));
    let id = registered["id"].as_u64().expect("id").to_string();

    let refused = json_of(ensemble_cmd(dir.path()).args(["thread", &id, "parallel"]));
    assert_eq!(refused["success"], false);
    assert_eq!(refused["kind"], "invalid_transition");

    let forced = json_of(ensemble_cmd(dir.path()).args(["thread", &id, "parallel", "--force"]));
    assert_eq!(forced["from"], "base");
    assert_eq!(forced["forced"], true);

    let moved = json_of(ensemble_cmd(dir.path()).args(["thread", &id, "chained"]));
    assert_eq!(moved["from"], "parallel");
    assert_eq!(moved["to"], "chained");
    assert_eq!(moved["forced"], false);
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

#[test]
fn team_start_stop_cycle() {
    let dir = TempDir::new().expect("tempdir");

    let started = json_of(
        ensemble_cmd(dir.path())
            .env("ENSEMBLE_TEAM_MODE", "native")
            .args(["team", "start", "review"]),
    );
    assert_eq!(started["mode"], "native");
    assert_eq!(started["teammate_count"], 3);
    assert_eq!(started["native_payload"]["teammates"][0]["name"], "code-reviewer-1");
    assert!(started["subagent_payload"].is_null());

    let again = json_of(ensemble_cmd(dir.path()).args(["team", "start", "feature"]));
    assert_eq!(again["kind"], "team_already_active");

    let stopped = json_of(ensemble_cmd(dir.path()).args(["team", "stop"]));
    assert_eq!(stopped["template"], "review");
    assert_eq!(stopped["metrics"]["teams_completed"], 1);
    assert_eq!(stopped["metrics"]["tasks_completed"], 3);

    ensemble_cmd(dir.path())
        .args(["team", "stop"])
        .assert()
        .success()
        .stdout(contains("No active team"));

    let events = std::fs::read_to_string(dir.path().join(".ensemble/events.jsonl"))
        .expect("event log");
    let kinds: Vec<String> = events
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter_map(|v| v["type"].as_str().map(str::to_string))
        .collect();
    assert_eq!(kinds, ["team_created", "team_stopped", "team_completed"]);
}

#[test]
fn subagent_mode_prints_orchestrator_prompt() {
    let dir = TempDir::new().expect("tempdir");
    let started = json_of(
        ensemble_cmd(dir.path())
            .env("ENSEMBLE_TEAM_MODE", "subagent")
            .args(["team", "start", "review"]),
    );
    assert!(started["native_payload"].is_null());
    let prompt = started["subagent_payload"]["orchestrator_prompt"]
        .as_str()
        .expect("prompt");
    assert!(prompt.contains("code-reviewer"));
}

#[test]
fn unknown_template_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    ensemble_cmd(dir.path())
        .args(["team", "start", "nope"])
        .assert()
        .failure()
        .stderr(contains("unknown team template 'nope'"));
}

// ---------------------------------------------------------------------------
// Waves
// ---------------------------------------------------------------------------

#[test]
fn wave_plan_then_collect_partial() {
    let dir = TempDir::new().expect("tempdir");
    let plan = json_of(ensemble_cmd(dir.path()).args([
        "wave", "plan", "-a", "security", "-a", "perf", "--target", "src/",
    ]));
    let trace = plan["trace_id"].as_str().expect("trace").to_string();
    let sentinel = plan["tasks"][0]["sentinel"].as_str().expect("sentinel");
    std::fs::write(
        sentinel,
        r#"{"analyzer":"security","findings":[{"id":"s-1","severity":"high","title":"t"}]}"#,
    )
    .expect("write sentinel");

    let collected = json_of(ensemble_cmd(dir.path()).args(["wave", "collect", &trace]));
    assert_eq!(collected["summary"]["expected"], 2);
    assert_eq!(collected["summary"]["reported"], 1);
    assert_eq!(collected["summary"]["by_severity"]["high"], 1);
}

#[test]
fn collecting_unknown_wave_fails() {
    let dir = TempDir::new().expect("tempdir");
    ensemble_cmd(dir.path())
        .args(["wave", "collect", "missing"])
        .assert()
        .failure()
        .stderr(contains("unknown wave 'missing'"));
}

#[cfg(unix)]
#[test]
fn wave_run_launches_configured_workers() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let config = json!({
        "wave": {
            "stagger_ms": 0,
            "poll_interval_secs": 1,
            "timeout_minutes": 1,
            "worker_command": [
                "sh",
                "-c",
                r#"printf '{"findings":[{"id":"x","severity":"low","title":"t"}]}' > "$0""#,
                "{sentinel}"
            ]
        }
    });
    dir.child(".ensemble/config.yaml")
        .write_str(&serde_json::to_string(&config).expect("config"))
        .expect("write config");

    let plan = json_of(ensemble_cmd(dir.path()).args(["wave", "plan", "-a", "a", "-a", "b"]));
    let trace = plan["trace_id"].as_str().expect("trace").to_string();

    let run = json_of(ensemble_cmd(dir.path()).args(["wave", "run", &trace]));
    assert_eq!(run["complete"], true);
    assert_eq!(run["summary"]["findings"], 2);
    assert_eq!(run["workers"].as_array().map(Vec::len), Some(2));

    let status = json_of(ensemble_cmd(dir.path()).args(["wave", "status", &trace]));
    assert_eq!(status["completed"].as_array().map(Vec::len), Some(2));
}

#[cfg(unix)]
#[test]
fn wave_run_returns_once_every_worker_has_failed() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let config = json!({
        "wave": {
            "stagger_ms": 0,
            "poll_interval_secs": 1,
            "timeout_minutes": 1,
            "worker_command": ["false"]
        }
    });
    dir.child(".ensemble/config.yaml")
        .write_str(&serde_json::to_string(&config).expect("config"))
        .expect("write config");

    let plan = json_of(ensemble_cmd(dir.path()).args(["wave", "plan", "-a", "a", "-a", "b"]));
    let trace = plan["trace_id"].as_str().expect("trace").to_string();

    let started = std::time::Instant::now();
    let run = json_of(ensemble_cmd(dir.path()).args(["wave", "run", &trace]));
    assert!(
        started.elapsed() < std::time::Duration::from_secs(30),
        "wave run waited {:?} after its workers exited",
        started.elapsed()
    );
    assert_eq!(run["complete"], false);
    assert_eq!(run["summary"]["reported"], 0);
    let workers = run["workers"].as_array().expect("workers");
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w["outcome"] == "failed"), "{workers:?}");

    let status = json_of(ensemble_cmd(dir.path()).args(["wave", "status", &trace]));
    assert_eq!(status["failed"].as_array().map(Vec::len), Some(2));
}
