use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("nested")).unwrap();
    fs::write(
        docs_dir.join("checkout.md"),
        "# Checkout Flow\n\nCheckout requires the payment gateway to be online.\n\n\
         # Payment Gateway\n\nThe gateway relies on the fraud screening service.\n\n\
         # Security Requirements\n\nCard numbers must never be stored in plain text.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("nested/reporting.markdown"),
        "# Reports\n\nWeekly revenue dashboard for finance.\n",
    )
    .unwrap();
    fs::write(docs_dir.join("notes.txt"), "not a PRD").unwrap();

    fs::write(
        root.join("prd.json"),
        r#"{"name": "Onboarding", "sections": [
            {"title": "Signup", "content": "Users must verify their email address.", "priority": "high"}
        ]}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/cvprd.sqlite"

[embedding]
provider = "hash"
dims = 64

[server]
bind = "127.0.0.1:0"
"#,
        root.display().to_string().replace('\\', "/")
    );

    let config_path = config_dir.join("cvprd.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cvprd(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_cvprd"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run cvprd binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn docs(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("docs")
}

/// Id printed on the `prd id:` line of create/import output.
fn prd_id_from(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("prd id: "))
        .expect("prd id line")
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cvprd(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_cvprd(&config_path, &["init"]);
    assert!(first, "first init failed");
    let (_, _, second) = run_cvprd(&config_path, &["init"]);
    assert!(second, "second init failed (not idempotent)");
}

#[test]
fn test_import_directory() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs(&config_path);

    let (stdout, stderr, success) =
        run_cvprd(&config_path, &["import", docs.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("import checkout"));
    assert!(stdout.contains("import reporting"));
    assert!(stdout.contains("chunks written: 3"));
    assert!(stdout.contains("embeddings pending: 0"));
    assert!(stdout.trim_end().ends_with("ok"));

    let (stdout, _, success) = run_cvprd(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("checkout"));
    assert!(stdout.contains("reporting"));
}

#[test]
fn test_import_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs(&config_path);

    let (stdout, _, success) = run_cvprd(
        &config_path,
        &["import", docs.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("files found: 2"));
    assert!(stdout.contains("estimated chunks: 4"));

    let (stdout, _, _) = run_cvprd(&config_path, &["list"]);
    assert!(stdout.contains("No PRDs."));
}

#[test]
fn test_create_get_export_delete() {
    let (tmp, config_path) = setup_test_env();
    let prd_json = tmp.path().join("prd.json");

    let (stdout, stderr, success) =
        run_cvprd(&config_path, &["create", prd_json.to_str().unwrap()]);
    assert!(success, "create failed: stdout={}, stderr={}", stdout, stderr);
    let id = prd_id_from(&stdout);

    let (stdout, _, success) = run_cvprd(&config_path, &["get", &id]);
    assert!(success);
    assert!(stdout.contains("--- PRD ---"));
    assert!(stdout.contains("name:         Onboarding"));
    assert!(stdout.contains("--- Chunks (1) ---"));
    assert!(stdout.contains("Users must verify their email address."));

    let (stdout, _, success) = run_cvprd(&config_path, &["--json", "get", &id]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["chunks"][0]["priority"], "high");

    let out_file = tmp.path().join("out/onboarding.md");
    let (_, stderr, success) = run_cvprd(
        &config_path,
        &["export", &id, "--output", out_file.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    let markdown = fs::read_to_string(&out_file).unwrap();
    assert!(markdown.starts_with("# Onboarding\n"));

    let (stdout, _, success) = run_cvprd(&config_path, &["delete", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (_, stderr, success) = run_cvprd(&config_path, &["get", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_search_modes() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs(&config_path);
    run_cvprd(&config_path, &["import", docs.to_str().unwrap()]);

    let (stdout, stderr, success) = run_cvprd(&config_path, &["search", "card numbers"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("1. [1.00] requirement / Security Requirements"));

    let (stdout, _, success) = run_cvprd(
        &config_path,
        &["search", "fraud screening", "--mode", "hybrid", "--limit", "2"],
    );
    assert!(success);
    assert!(stdout.starts_with("1. "));
    assert!(!stdout.contains("3. "));

    let (stdout, _, success) = run_cvprd(&config_path, &["search", "zzzqqq"]);
    assert!(success);
    assert!(stdout.contains("No results."));

    let (_, stderr, success) = run_cvprd(&config_path, &["search", "card", "--mode", "fuzzy"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search mode"));
}

#[test]
fn test_context_shows_dependencies() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs(&config_path);
    let (stdout, _, _) = run_cvprd(
        &config_path,
        &["import", docs.join("checkout.md").to_str().unwrap()],
    );
    let id = prd_id_from(&stdout);

    let (stdout, _, success) = run_cvprd(&config_path, &["--json", "get", &id]);
    assert!(success);
    let prd: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let flow = prd["chunks"][0]["id"].as_str().unwrap().to_string();
    let gateway = prd["chunks"][1]["id"].as_str().unwrap().to_string();

    let (stdout, stderr, success) = run_cvprd(&config_path, &["context", &flow]);
    assert!(success, "context failed: {}", stderr);
    assert!(stdout.contains("--- Depends on (1) ---"));
    assert!(stdout.contains(&gateway));
}

#[test]
fn test_embed_and_stats() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs(&config_path);
    run_cvprd(&config_path, &["import", docs.to_str().unwrap()]);

    let (stdout, _, success) = run_cvprd(&config_path, &["embed", "pending", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("chunks needing embeddings: 0"));

    let (stdout, stderr, success) =
        run_cvprd(&config_path, &["embed", "rebuild", "--batch-size", "2"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert!(stdout.contains("total chunks: 4"));
    assert!(stdout.contains("embedded: 4"));

    let (stdout, _, success) = run_cvprd(&config_path, &["--json", "stats"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["documents"]["prds"], 2);
    assert_eq!(stats["documents"]["chunks"], 4);
    assert_eq!(stats["vector"]["points_count"], 4);
}

#[test]
fn test_optimize_without_api_key_fails() {
    let (tmp, config_path) = setup_test_env();
    let prd_json = tmp.path().join("prd.json");
    let (stdout, _, _) = run_cvprd(&config_path, &["create", prd_json.to_str().unwrap()]);
    let id = prd_id_from(&stdout);

    let output = Command::new(env!("CARGO_BIN_EXE_cvprd"))
        .arg("--config")
        .arg(&config_path)
        .arg("optimize")
        .arg(&id)
        .env_remove("OPENROUTER_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("LLM unavailable"), "stderr: {}", stderr);
}
