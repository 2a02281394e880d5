use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn press_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("press");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // The hash provider keeps the whole flow offline and deterministic.
    let config_content = format!(
        r#"[db]
path = "{}/data/press.sqlite"

[segmenting]
window_chars = 800
overlap_chars = 100

[embedding]
provider = "hash"
dims = 128
batch_size = 16

[retrieval]
final_limit = 10
overfetch_factor = 4
snippet_chars = 240

[ingest]
page_concurrency = 2
"#,
        root.display()
    );

    let config_path = config_dir.join("press.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_press(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = press_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run press binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn extract_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("id: "))
        .unwrap_or_else(|| panic!("no id line in output: {}", stdout))
        .trim()
        .to_string()
}

/// Seed a newspaper with one issue; returns the issue id.
fn seed_issue(config_path: &Path, date: &str) -> String {
    let (stdout, stderr, success) =
        run_press(config_path, &["paper", "add", "--name", "The Daily Sun"]);
    assert!(success, "paper add failed: {}{}", stdout, stderr);
    let paper_id = extract_id(&stdout);

    let (stdout, stderr, success) = run_press(
        config_path,
        &["issue", "add", "--paper", &paper_id, "--date", date],
    );
    assert!(success, "issue add failed: {}{}", stdout, stderr);
    extract_id(&stdout)
}

/// Add a page and record OCR text for it.
fn seed_page_with_ocr(config_path: &Path, tmp: &Path, issue_id: &str, number: &str, text: &str) {
    let (stdout, stderr, success) = run_press(
        config_path,
        &["page", "add", "--issue", issue_id, "--number", number],
    );
    assert!(success, "page add failed: {}{}", stdout, stderr);

    let text_path = tmp.join(format!("ocr-{}.txt", number));
    fs::write(&text_path, text).unwrap();

    let (stdout, stderr, success) = run_press(
        config_path,
        &[
            "page",
            "ocr",
            "--issue",
            issue_id,
            "--number",
            number,
            "--text-file",
            text_path.to_str().unwrap(),
        ],
    );
    assert!(success, "page ocr failed: {}{}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_press(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_press(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_press(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_two_pages_one_empty() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "1", &"A".repeat(900));
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "2", "");

    let (stdout, stderr, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "upload-1"],
    );
    assert!(success, "ingest failed: {}{}", stdout, stderr);
    assert!(stdout.contains("status: completed"), "got: {}", stdout);
    assert!(
        stdout.contains("pages: 2 total, 2 processed, 2 succeeded, 0 failed"),
        "got: {}",
        stdout
    );
    // 900 chars at window 800 / overlap 100 => 2 segments; empty page => 0
    assert!(stdout.contains("segments total: 2"), "got: {}", stdout);
}

#[test]
fn test_ingest_idempotent_same_key() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "1", &"A".repeat(900));
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "2", "");

    let (stdout1, _, success1) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "upload-1"],
    );
    assert!(success1);
    assert!(stdout1.contains("segments total: 2"));

    // Terminal job: stored result comes back, no work re-runs
    let (stdout2, _, success2) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "upload-1"],
    );
    assert!(success2);
    assert!(stdout2.contains("status: completed"));
    assert!(stdout2.contains("segments total: 2"));
}

#[test]
fn test_reingest_with_new_key_leaves_segments_unchanged() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "1", &"A".repeat(900));

    let (stdout1, _, _) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "first"],
    );
    assert!(stdout1.contains("segments total: 2"));

    let (stdout2, _, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "second"],
    );
    assert!(success);
    assert!(stdout2.contains("status: completed"));
    assert!(stdout2.contains("1 succeeded"), "got: {}", stdout2);
    assert!(stdout2.contains("segments total: 2"), "got: {}", stdout2);
}

#[test]
fn test_key_reuse_across_issues_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_a = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(&config_path, tmp.path(), &issue_a, "1", "morning edition text");

    // Second issue of the same paper (paper add is get-or-create)
    let (pstdout, _, psuccess) =
        run_press(&config_path, &["paper", "add", "--name", "The Daily Sun"]);
    assert!(psuccess, "{}", pstdout);
    let paper_id = extract_id(&pstdout);

    let (stdout, stderr, success) = run_press(
        &config_path,
        &["issue", "add", "--paper", &paper_id, "--date", "1903-05-15"],
    );
    assert!(success, "{}{}", stdout, stderr);
    let issue_b = extract_id(&stdout);

    let (_, _, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_a, "--key", "shared-key"],
    );
    assert!(success);

    let (_, stderr, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_b, "--key", "shared-key"],
    );
    assert!(!success, "key reuse across issues must be rejected");
    assert!(stderr.contains("already bound"), "got: {}", stderr);
}

#[test]
fn test_search_returns_single_page_centric_hit() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "1", &"A".repeat(900));
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "2", "");

    run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "upload-1"],
    );

    let (stdout, stderr, success) = run_press(&config_path, &["search", "AAAA"]);
    assert!(success, "search failed: {}{}", stdout, stderr);
    assert!(stdout.contains(", page 1"), "got: {}", stdout);
    assert!(!stdout.contains(", page 2"), "got: {}", stdout);
    // Both matching segments of page 1 collapse into one hit
    assert_eq!(
        stdout.matches("page id:").count(),
        1,
        "expected exactly one hit: {}",
        stdout
    );
}

#[test]
fn test_reconciliation_after_ocr_edit() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(&config_path, tmp.path(), &issue_id, "1", &"A".repeat(900));

    let (stdout, _, _) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "v1"],
    );
    assert!(stdout.contains("segments total: 2"));

    // Corrected OCR: shorter text, one window
    seed_page_with_ocr(
        &config_path,
        tmp.path(),
        &issue_id,
        "1",
        "the harbour bridge opened to great fanfare",
    );

    let (stdout, stderr, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "v2"],
    );
    assert!(success, "{}{}", stdout, stderr);
    assert!(stdout.contains("status: completed"));
    // Stale segments deleted, only the new one remains
    assert!(stdout.contains("segments total: 1"), "got: {}", stdout);

    let (stdout, _, success) = run_press(&config_path, &["search", "harbour bridge"]);
    assert!(success);
    assert!(stdout.contains(", page 1"), "got: {}", stdout);
}

#[test]
fn test_rebuild_reproduces_search_results() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(
        &config_path,
        tmp.path(),
        &issue_id,
        "1",
        "the harbour bridge opened to great fanfare",
    );
    seed_page_with_ocr(
        &config_path,
        tmp.path(),
        &issue_id,
        "2",
        "wheat prices fell sharply at the exchange",
    );

    run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "upload-1"],
    );

    let (before, _, _) = run_press(&config_path, &["search", "harbour bridge opening"]);
    assert!(before.contains(", page 1"));

    let (stdout, stderr, success) = run_press(&config_path, &["rebuild"]);
    assert!(success, "rebuild failed: {}{}", stdout, stderr);
    assert!(stdout.contains("pages reindexed: 2"), "got: {}", stdout);
    assert!(stdout.contains("segments written: 2"), "got: {}", stdout);

    let (after, _, _) = run_press(&config_path, &["search", "harbour bridge opening"]);
    // Same page set, same ranking
    let best_before = before.lines().find(|l| l.starts_with("1.")).unwrap();
    let best_after = after.lines().find(|l| l.starts_with("1.")).unwrap();
    assert_eq!(best_before, best_after);
}

#[test]
fn test_job_awaits_ocr_then_cancel() {
    let (_tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    let (_, _, success) = run_press(
        &config_path,
        &["page", "add", "--issue", &issue_id, "--number", "1"],
    );
    assert!(success);

    // No OCR yet: the pass completes nothing and the job stays open
    let (stdout, _, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "slow"],
    );
    assert!(success);
    assert!(stdout.contains("status: processing"), "got: {}", stdout);
    assert!(stdout.contains("stage: awaiting_ocr"), "got: {}", stdout);

    let (stdout, _, success) = run_press(&config_path, &["cancel", "slow"]);
    assert!(success, "{}", stdout);

    // The next pass observes the flag before starting any page
    let (stdout, _, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "slow"],
    );
    assert!(success);
    assert!(stdout.contains("status: failed"), "got: {}", stdout);
    assert!(stdout.contains("cancelled"), "got: {}", stdout);

    // Terminal jobs are no longer cancellable
    let (_, _, success) = run_press(&config_path, &["cancel", "slow"]);
    assert!(!success);
}

#[test]
fn test_partial_failure_isolation() {
    let (tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let issue_id = seed_issue(&config_path, "1903-05-14");
    seed_page_with_ocr(
        &config_path,
        tmp.path(),
        &issue_id,
        "1",
        "the harbour bridge opened to great fanfare",
    );

    // Page 2 never produced OCR text
    let (_, _, success) = run_press(
        &config_path,
        &["page", "add", "--issue", &issue_id, "--number", "2"],
    );
    assert!(success);
    let (stdout, stderr, success) = run_press(
        &config_path,
        &[
            "page", "status", "--issue", &issue_id, "--number", "2", "--status", "ocr_failed",
        ],
    );
    assert!(success, "{}{}", stdout, stderr);

    let (stdout, _, success) = run_press(
        &config_path,
        &["ingest", "--issue", &issue_id, "--key", "mixed"],
    );
    assert!(success);
    // The failed page does not abort the job; the good page is indexed
    assert!(stdout.contains("status: completed"), "got: {}", stdout);
    assert!(
        stdout.contains("pages: 2 total, 2 processed, 1 succeeded, 1 failed"),
        "got: {}",
        stdout
    );
    assert!(stdout.contains("OCR failed upstream"), "got: {}", stdout);

    let (stdout, _, success) = run_press(&config_path, &["search", "harbour bridge"]);
    assert!(success);
    assert!(stdout.contains(", page 1"), "got: {}", stdout);
}

#[test]
fn test_job_lookup_unknown_key_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let (_, stderr, success) = run_press(&config_path, &["job", "nope"]);
    assert!(!success);
    assert!(stderr.contains("No job"), "got: {}", stderr);
}

#[test]
fn test_search_blank_query_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let (_, stderr, success) = run_press(&config_path, &["search", "   "]);
    assert!(!success, "blank query must be rejected");
    assert!(stderr.contains("invalid query"), "got: {}", stderr);
}

#[test]
fn test_search_fails_closed_when_gateway_down() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();

    // Ollama endpoint nobody is listening on
    let config_content = format!(
        r#"[db]
path = "{}/data/press.sqlite"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://127.0.0.1:9"
max_retries = 0
timeout_secs = 2
"#,
        root.display()
    );
    let config_path = root.join("config").join("press.toml");
    fs::write(&config_path, config_content).unwrap();

    run_press(&config_path, &["init"]);

    let (stdout, stderr, success) = run_press(&config_path, &["search", "anything"]);
    assert!(
        !success,
        "search must fail closed, not return results: {}",
        stdout
    );
    assert!(stderr.contains("retrieval unavailable"), "got: {}", stderr);
}

#[test]
fn test_search_empty_index_reports_no_results() {
    let (_tmp, config_path) = setup_test_env();
    run_press(&config_path, &["init"]);

    let (stdout, _, success) = run_press(&config_path, &["search", "anything at all"]);
    assert!(success);
    assert!(stdout.contains("No results."), "got: {}", stdout);
}
