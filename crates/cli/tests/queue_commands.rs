use assert_cmd::Command;
use predicates::str::contains;

fn cli() -> Command {
    Command::cargo_bin("semantic-code-indexer").expect("binary builds")
}

#[test]
fn monitor_queue_reports_zero_counts_for_a_fresh_directory() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .arg("monitor-queue")
        .arg("--queue-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("\"pending\":0"));
}

#[test]
fn clear_queue_succeeds_on_an_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    cli().arg("clear-queue").arg("--queue-dir").arg(dir.path()).assert().success();
}

#[test]
fn index_with_no_repo_args_is_a_usage_error() {
    cli().arg("index").assert().failure();
}

#[test]
fn search_without_an_index_name_fails_with_a_helpful_message() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .env("QUEUE_BASE_DIR", dir.path())
        .arg("search")
        .arg("hello")
        .assert()
        .failure()
        .stderr(contains("index name is required"));
}
