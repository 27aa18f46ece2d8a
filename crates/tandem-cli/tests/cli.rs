use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("tandem_cli_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let config = json!({
            "store_path": dir.join("data").join("store.json"),
            "log_filter": "warn"
        });
        fs::write(dir.join("tandem.json"), config.to_string()).unwrap();
        Self { dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tandem").unwrap();
        cmd.current_dir(&self.dir)
            .env_remove("TANDEM_STORE_PATH")
            .env_remove("TANDEM_FORWARD_URL")
            .env_remove("TANDEM_FORWARD_TOKEN")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.dir.join("tandem.json"));
        cmd
    }

    fn write(&self, name: &str, value: &Value) -> PathBuf {
        let path = self.dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn json_output(&self, args: &[&str]) -> Value {
        let out = self.cmd().args(args).output().unwrap();
        assert!(out.status.success(), "{args:?}: {}", String::from_utf8_lossy(&out.stderr));
        serde_json::from_slice(&out.stdout).unwrap()
    }
}

fn decision_request(unit: &str, index: u64) -> Value {
    json!({
        "unit_id": unit,
        "decision_index": index,
        "decision_type": "dyad_game",
        "context": {"cur_var": 25, "past3_vars": [24.5, 23.0, 22.5]},
        "timestamp": "2025-01-01T12:00:00"
    })
}

fn outcome_request(unit: &str, index: u64, action: &Value) -> Value {
    json!({
        "unit_id": unit,
        "decision_index": index,
        "decision_type": "dyad_game",
        "timestamp": "2025-01-01T12:10:00",
        "data": {
            "context": {"cur_var": 25, "past3_vars": [24.5, 23.0, 22.5]},
            "action": action,
            "action_probability": 0.5,
            "state": [25.0, 24.5, 23.0, 22.5],
            "outcome": {"clicks": 4}
        }
    })
}

fn register(ws: &Workspace, unit: &str) {
    ws.cmd()
        .arg("register")
        .write_stdin(json!({"unit_id": unit}).to_string())
        .assert()
        .success();
}

#[test]
fn init_is_idempotent() {
    let ws = Workspace::new("init");
    let first = ws.json_output(&["init"]);
    assert_eq!(first["seeded"], true);
    assert_eq!(first["policy"], "bernoulli");
    assert_eq!(first["parameters"]["values"]["probability_of_action"], 0.5);

    let second = ws.json_output(&["init"]);
    assert_eq!(second["seeded"], false);
    assert_eq!(second["parameters"]["id"], first["parameters"]["id"]);
}

#[test]
fn duplicate_registration_exits_with_failure() {
    let ws = Workspace::new("register");
    ws.cmd()
        .arg("register")
        .write_stdin(r#"{"unit_id": "d1", "cp_id": "cp-1"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status_code\": 201"));

    ws.cmd()
        .arg("register")
        .write_stdin(r#"{"unit_id": "d1"}"#)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"status_code\": 400"))
        .stdout(predicate::str::contains("Participant unit already exists."));
}

#[test]
fn decision_without_parameters_is_not_found() {
    let ws = Workspace::new("noparams");
    register(&ws, "g1");
    let input = ws.write("decide.json", &decision_request("g1", 0));
    ws.cmd()
        .arg("decide")
        .arg("--input")
        .arg(&input)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"status_code\": 404"))
        .stdout(predicate::str::contains("Policy parameters not found."));
}

#[test]
fn decide_record_update_cycle() {
    let ws = Workspace::new("cycle");
    ws.json_output(&["init"]);
    register(&ws, "g1");

    let input = ws.write("decide.json", &decision_request("g1", 0));
    let decided = ws.json_output(&["decide", "--input", input.to_str().unwrap()]);
    assert_eq!(decided["status_code"], 201);
    assert_eq!(decided["body"]["state"], json!([25.0, 24.5, 23.0, 22.5]));
    let action = decided["body"]["action"].clone();

    let shown = ws.json_output(&["show", "decision", "--unit", "g1", "--index", "0"]);
    assert_eq!(shown["action"], action);
    assert_eq!(shown["decision_type"], "dyad_game");

    let input = ws.write("record.json", &outcome_request("g1", 0, &action));
    let recorded = ws.json_output(&["record", "--input", input.to_str().unwrap()]);
    assert_eq!(recorded["body"], json!({"status": "success"}));

    let outcome = ws.json_output(&["show", "outcome", "--unit", "g1", "--index", "0"]);
    assert_eq!(outcome["reward"], 4.0);

    let report = ws.json_output(&["update", "--requested-by", "test"]);
    assert_eq!(report["request"]["status"], "completed");
    assert_eq!(report["request"]["requested_by"], "test");
    assert_eq!(report["request"]["records_used"], 1);

    let backups: Vec<_> = fs::read_dir(ws.dir.join("data").join("backups"))
        .unwrap()
        .collect();
    assert_eq!(backups.len(), 1);

    let updates = ws.json_output(&["show", "updates"]);
    assert_eq!(updates.as_array().map(Vec::len), Some(1));
}

#[test]
fn replay_resumes_from_state_file() {
    let ws = Workspace::new("replay");
    ws.json_output(&["init"]);

    let entries = [
        json!({"op": "register", "body": {"unit_id": "g1", "kind": "group"}}),
        json!({"op": "decide", "body": decision_request("g1", 0)}),
        json!({"op": "decide", "body": decision_request("g1", 1)}),
    ];
    let text: Vec<String> = entries.iter().map(Value::to_string).collect();
    let path = ws.dir.join("requests.jsonl");
    fs::write(&path, text.join("\n")).unwrap();
    let state = ws.dir.join("replay.state.json");

    let args = |p: &Path, s: &Path| {
        vec![
            "replay".to_string(),
            "--path".to_string(),
            p.display().to_string(),
            "--state-file".to_string(),
            s.display().to_string(),
        ]
    };
    let out = ws.cmd().args(args(&path, &state)).output().unwrap();
    assert!(out.status.success());
    let summary: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["succeeded"], 3);
    assert_eq!(summary["line_offset"], 3);

    let mut more = text.clone();
    more.push(json!({"op": "decide", "body": decision_request("g1", 2)}).to_string());
    fs::write(&path, more.join("\n")).unwrap();

    let out = ws.cmd().args(args(&path, &state)).output().unwrap();
    assert!(out.status.success());
    let summary: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["start_offset"], 3);
    assert_eq!(summary["succeeded"], 1);
    assert_eq!(summary["rejected"], 0);
}

#[test]
fn show_reports_missing_records() {
    let ws = Workspace::new("show");
    ws.cmd()
        .args(["show", "decision", "--unit", "ghost", "--index", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No decision for unit ghost"));
}
