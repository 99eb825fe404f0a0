//! CLI integration tests for loregraph
//!
//! Tests the loregraph CLI commands end-to-end using assert_cmd.

use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Isolated config directory, database and scene files for one test
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Command with config and database confined to the workspace
    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("loregraph").unwrap();
        cmd.current_dir(self.dir.path());
        cmd.env("LOREGRAPH_CONFIG_DIR", self.dir.path().join("config"));
        cmd.env_remove("LOREGRAPH_API_KEY");
        cmd.env_remove("OPENROUTER_API_KEY");
        cmd.env_remove("RUST_LOG");
        cmd.arg("--database").arg(self.dir.path().join("graphs.db"));
        cmd
    }

    fn scene(&self, dir: &str, scene_id: &str, text: &str) -> std::path::PathBuf {
        let scenes = self.dir.path().join(dir);
        std::fs::create_dir_all(&scenes).unwrap();
        let path = scenes.join(format!("{}.txt", scene_id));
        std::fs::write(&path, text).unwrap();
        path
    }

    fn scene_bytes(&self, dir: &str, scene_id: &str, bytes: &[u8]) -> std::path::PathBuf {
        let scenes = self.dir.path().join(dir);
        std::fs::create_dir_all(&scenes).unwrap();
        let path = scenes.join(format!("{}.txt", scene_id));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn extract_mickey(&self, project: &str) {
        let scene = self.scene("scenes", "ch1", "Mickey walked to Mars.");
        self.cmd()
            .args(["extract", project])
            .arg(&scene)
            .args(["--extractor", "ner"])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));
    }
}

#[test]
fn test_help_lists_commands() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract-all"))
        .stdout(predicate::str::contains("communities"))
        .stdout(predicate::str::contains("delete-relationship"));
}

#[test]
fn test_version_output() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("loregraph"));
}

#[test]
fn test_extract_then_query_graph() {
    let ws = Workspace::new();
    ws.extract_mickey("toons");

    ws.cmd()
        .args(["entities", "toons"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mickey"))
        .stdout(predicate::str::contains("Mars"));

    ws.cmd()
        .args(["show", "toons", "Mickey"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mickey (character)"))
        .stdout(predicate::str::contains("-[located_in]-> Mars"));

    ws.cmd()
        .args(["path", "toons", "Mickey", "Mars"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mickey -[located_in]-> Mars"));

    ws.cmd()
        .args(["entities", "toons", "--type", "location"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mars"))
        .stdout(predicate::str::contains("Mickey").not());
}

#[test]
fn test_default_extractor_falls_back_without_api_key() {
    let ws = Workspace::new();
    let scene = ws.scene("scenes", "ch1", "Minnie sailed to Lisbon.");

    ws.cmd()
        .args(["extract", "toons"])
        .arg(&scene)
        .assert()
        .success()
        .stdout(predicate::str::contains("ner"))
        .stderr(predicate::str::contains("local extractor"));
}

#[test]
fn test_stats_json_output() {
    let ws = Workspace::new();
    ws.extract_mickey("toons");

    let output = ws
        .cmd()
        .args(["stats", "toons", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["project_id"], "toons");
    assert_eq!(stats["entity_count"], 2);
    assert_eq!(stats["relationship_count"], 1);
}

#[test]
fn test_extract_all_and_jobs() {
    let ws = Workspace::new();
    ws.scene("book", "s1", "Alice met Bob in Rivendell.");
    let last = ws.scene("book", "s2", "Bob walked to Mordor.");
    let dir = last.parent().unwrap().to_path_buf();

    ws.cmd()
        .args(["extract-all", "epic"])
        .arg(&dir)
        .args(["-e", "ner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 of 2 job(s) completed"));

    ws.cmd()
        .args(["jobs", "epic", "--status", "completed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scene s1"))
        .stdout(predicate::str::contains("scene s2"));

    ws.cmd()
        .args(["jobs", "epic", "--status", "finished"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid status"));
}

#[test]
fn test_export_markdown_and_round_trip() {
    let ws = Workspace::new();
    ws.extract_mickey("toons");

    ws.cmd()
        .args(["export", "toons", "--format", "markdown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# Story Graph: toons"))
        .stdout(predicate::str::contains("### Mickey"));

    let file = ws.dir.path().join("toons.json");
    ws.cmd()
        .args(["export", "toons", "--out"])
        .arg(&file)
        .assert()
        .success();

    ws.cmd()
        .args(["import", "copy"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 new entities"));

    ws.cmd()
        .args(["path", "copy", "Mickey", "Mars"])
        .assert()
        .success()
        .stdout(predicate::str::contains("located_in"));
}

#[test]
fn test_search_spans_projects() {
    let ws = Workspace::new();
    ws.extract_mickey("toons");
    ws.cmd()
        .args(["add-entity", "classics", "Mickey"])
        .assert()
        .success();

    ws.cmd()
        .args(["search", "MICKEY"])
        .assert()
        .success()
        .stdout(predicate::str::contains("toons"))
        .stdout(predicate::str::contains("classics"));

    ws.cmd()
        .args(["search", "location", "--attribute", "type"])
        .assert()
        .success()
        .stdout(predicate::str::contains("toons"))
        .stdout(predicate::str::contains("classics").not());
}

#[test]
fn test_manual_edits_and_deletes() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["add-entity", "saga", "Ahab"])
        .assert()
        .success();
    ws.cmd()
        .args(["add-entity", "saga", "Pequod", "--type", "object"])
        .assert()
        .success();

    let output = ws
        .cmd()
        .args(["add-relationship", "saga", "Ahab", "Pequod", "owns", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rel: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rel_id = rel["id"].as_str().unwrap().to_string();

    ws.cmd()
        .args(["delete-relationship", "saga", &rel_id])
        .assert()
        .success();
    ws.cmd()
        .args(["delete-relationship", "saga", &rel_id])
        .assert()
        .failure();

    ws.cmd()
        .args(["delete-entity", "saga", "Pequod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 'Pequod' and 0 relationship(s)."));

    ws.cmd()
        .args(["show", "saga", "Pequod"])
        .assert()
        .failure();
}

#[test]
fn test_delete_entity_json_lists_removed_relationships() {
    let ws = Workspace::new();
    ws.cmd().args(["add-entity", "saga", "Ahab"]).assert().success();
    ws.cmd()
        .args(["add-entity", "saga", "Pequod", "--type", "object"])
        .assert()
        .success();
    ws.cmd()
        .args(["add-relationship", "saga", "Ahab", "Pequod", "owns"])
        .assert()
        .success();

    let output = ws
        .cmd()
        .args(["delete-entity", "saga", "Pequod", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let deleted: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(deleted["entity"]["name"], "Pequod");
    let relationships = deleted["relationships"].as_array().unwrap();
    assert_eq!(relationships.len(), 1);
    assert!(relationships[0]["id"].is_string());
}

#[test]
fn test_watch_waits_for_every_readable_scene() {
    let ws = Workspace::new();
    ws.scene_bytes("book", "a0", &[0xff, 0xfe, 0xfd]);
    ws.scene("book", "a1", "Alice met Bob.");
    ws.scene("book", "a2", "Bob walked to Mordor.");
    let last = ws.scene("book", "a3", "Carol sailed to Lisbon.");

    ws.cmd()
        .args(["watch", "epic"])
        .arg(last.parent().unwrap())
        .args(["-e", "ner"])
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("failed (scene a0)"))
        .stdout(predicate::str::contains("completed (scene a1)"))
        .stdout(predicate::str::contains("completed (scene a2)"))
        .stdout(predicate::str::contains("completed (scene a3)"))
        .stdout(predicate::str::contains("+ entity Carol (character)"))
        .stdout(predicate::str::contains("3 of 4 job(s) completed"));
}

#[test]
fn test_watch_finishes_when_subscriber_lags() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["config", "set", "realtime.channel_capacity", "1"])
        .assert()
        .success();

    let mut dir = None;
    for i in 0..20 {
        let path = ws.scene("many", &format!("s{:02}", i), "Alice met Bob in Rivendell.");
        dir = path.parent().map(|p| p.to_path_buf());
    }

    ws.cmd()
        .args(["watch", "crowd"])
        .arg(dir.unwrap())
        .args(["-e", "ner"])
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("20 of 20 job(s) completed"));
}

#[test]
fn test_cancel_unknown_job_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["cancel", "no-such-job"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-job"));
}

#[test]
fn test_cancel_finished_job_reports_not_in_flight() {
    let ws = Workspace::new();
    ws.extract_mickey("toons");

    let output = ws
        .cmd()
        .args(["jobs", "toons", "-o", "json"])
        .output()
        .unwrap();
    let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let job_id = jobs[0]["id"].as_str().unwrap().to_string();

    ws.cmd()
        .args(["cancel", &job_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("not in flight"));
}

#[test]
fn test_config_set_get_reset() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    ws.cmd()
        .args(["config", "set", "graph.community_seed", "7"])
        .assert()
        .success();
    ws.cmd()
        .args(["config", "get", "graph.community_seed"])
        .assert()
        .success()
        .stdout(predicate::str::diff("7\n"));

    ws.cmd()
        .args(["config", "set", "llm.api_key", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("environment variable"));
    ws.cmd()
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure();

    ws.cmd().args(["config", "reset"]).assert().success();
    ws.cmd()
        .args(["config", "get", "graph.community_seed"])
        .assert()
        .success()
        .stdout(predicate::str::diff("42\n"));
}

#[test]
fn test_doctor_command() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Database"));
}
