use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

use stockdash_net::storage::SqliteStore;
use stockdash_net::{Connectivity, OfflineQueue, OfflineTask};

/// Config pointing storage into `temp`, with retries disabled so failing
/// requests return promptly.
fn write_config(temp: &Path, extra: &str) -> PathBuf {
    let path = temp.join("config.yaml");
    let contents = format!(
        "offline:\n  storage_dir: {}\nqueue:\n  max_retries: 0\n  rate_limit_retries: 0\n{extra}",
        temp.join("state").display()
    );
    fs::write(&path, contents).expect("failed to write config");
    path
}

fn stockdash() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stockdash"));
    cmd.env_remove("STOCKDASH_CONFIG")
        .env_remove("STOCKDASH_FORMAT")
        .env_remove("STOCKDASH_API_HOST")
        .env_remove("STOCKDASH_NO_CACHE");
    cmd
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout was not JSON")
}

fn seed_offline_tasks(temp: &Path, keys: &[&str]) {
    let store = SqliteStore::open_at(&temp.join("state")).expect("failed to open store");
    let mut queue = OfflineQueue::new(Arc::new(store), Connectivity::default());
    for key in keys {
        queue.enqueue(OfflineTask::new("fetch", json!({ "key": key })));
    }
}

#[test]
fn version_prints_package_version() {
    stockdash()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn config_path_uses_custom_location() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "");

    stockdash()
        .arg("config")
        .arg("path")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            config_path.to_string_lossy().to_string(),
        ));

    Ok(())
}

#[test]
fn config_show_merges_file_with_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "breaker:\n  failure_threshold: 2\n");

    let assert = stockdash()
        .args(["config", "show", "--format", "json", "--config"])
        .arg(&config_path)
        .assert()
        .success();

    let output = json_stdout(assert.get_output());
    assert_eq!(output["data"]["breaker"]["failure_threshold"], 2);
    assert_eq!(output["data"]["breaker"]["success_threshold"], 2);
    assert_eq!(output["data"]["queue"]["max_retries"], 0);
    assert_eq!(output["data"]["cache"]["max_size"], 100);

    Ok(())
}

#[test]
fn missing_custom_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;

    stockdash()
        .args(["config", "show", "--config"])
        .arg(temp.path().join("nope.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));

    Ok(())
}

#[test]
fn offline_status_reports_empty_queue() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "");

    let assert = stockdash()
        .args(["offline", "status", "--format", "json", "--config"])
        .arg(&config_path)
        .assert()
        .success();

    let output = json_stdout(assert.get_output());
    assert_eq!(output["data"]["pending"], 0);
    assert!(
        output["data"]["path"]
            .as_str()
            .unwrap()
            .ends_with("state.db")
    );

    Ok(())
}

#[test]
fn offline_list_shows_persisted_tasks_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "");
    seed_offline_tasks(temp.path(), &["price:AAPL", "news:MSFT"]);

    let assert = stockdash()
        .args(["offline", "list", "--format", "json", "--config"])
        .arg(&config_path)
        .assert()
        .success();

    let output = json_stdout(assert.get_output());
    let tasks = output["data"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["type"], "fetch");
    assert_eq!(tasks[0]["payload"]["key"], "price:AAPL");
    assert_eq!(tasks[1]["payload"]["key"], "news:MSFT");

    Ok(())
}

#[test]
fn offline_clear_empties_the_queue() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "");
    seed_offline_tasks(temp.path(), &["price:AAPL"]);

    stockdash()
        .args(["offline", "clear", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 1 offline task(s)"));

    let assert = stockdash()
        .args(["offline", "status", "--format", "json", "--config"])
        .arg(&config_path)
        .assert()
        .success();
    assert_eq!(json_stdout(assert.get_output())["data"]["pending"], 0);

    Ok(())
}

#[test]
fn get_reports_network_failure() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "");

    // Nothing listens on this port
    let assert = stockdash()
        .args(["get", "quotes/AAPL", "--config"])
        .arg(&config_path)
        .arg("--api-host")
        .arg("http://127.0.0.1:59999")
        .assert()
        .failure();

    let stderr = String::from_utf8_lossy(&assert.get_output().stderr);
    assert!(
        stderr.contains("failed"),
        "Expected a failure summary, got: {}",
        stderr
    );

    Ok(())
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn get_serves_repeats_from_cache() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let quote = server
        .mock("GET", "/quotes/AAPL")
        .with_status(200)
        .with_body(r#"{"symbol":"AAPL","price":189.5}"#)
        .expect(1)
        .create();

    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "");

    let assert = stockdash()
        .args(["get", "quotes/AAPL", "--category", "price", "--repeat", "3"])
        .args(["--stats", "--format", "json", "--config"])
        .arg(&config_path)
        .env("STOCKDASH_API_HOST", server.url())
        .assert()
        .success();

    let output = json_stdout(assert.get_output());
    assert_eq!(output["data"]["results"][0]["key"], "price:quotes/AAPL");
    assert_eq!(output["data"]["results"][0]["data"]["price"], 189.5);
    assert_eq!(output["data"]["stats"]["metrics"]["total_requests"], 1);
    assert_eq!(output["data"]["stats"]["metrics"]["cache_hit_rate"], "66.7%");
    quote.assert();

    Ok(())
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn get_fails_fast_once_circuit_opens() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let broken = server
        .mock("GET", "/quotes/AAPL")
        .with_status(500)
        .with_body("upstream down")
        .expect(1)
        .create();

    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "breaker:\n  failure_threshold: 1\n");

    let assert = stockdash()
        .args(["--no-cache", "get", "quotes/AAPL", "--repeat", "2", "--config"])
        .arg(&config_path)
        .env("STOCKDASH_API_HOST", server.url())
        .assert()
        .failure();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(
        stdout.contains("Circuit breaker is OPEN for quotes"),
        "Expected fast failure, got: {}",
        stdout
    );
    broken.assert();

    Ok(())
}
