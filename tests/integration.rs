use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const OUTLINE: &str = "1 总述\n1.1 背景\n撰写内容包括：目的、背景\n";

fn rh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let corpus = root.join("data").join("policies");
    fs::create_dir_all(corpus.join("2024")).unwrap();
    fs::write(
        corpus.join("population.txt"),
        "近五年区域常住人口持续增长，年均增速约百分之二。\n\n人口增长主要来自外来务工人员的流入。",
    )
    .unwrap();
    fs::write(
        corpus.join("2024").join("transport.txt"),
        "交通基础设施逐步完善，新建地铁线路两条。\n\n公交线网覆盖率显著提升。",
    )
    .unwrap();
    fs::write(
        corpus.join("industry.csv"),
        "年份,产值,增速\n2023,1200,8%\n2024,1310,9%\n",
    )
    .unwrap();
    fs::write(corpus.join("notes.md"), "不在加载范围内。").unwrap();

    let config_content = format!(
        r#"[chunking]
chunk_size = 40
chunk_overlap = 5

[retrieval]
top_k = 3

[embedding]
provider = "hash"
dims = 64

[llm]
api_key_env = "RH_INTEGRATION_UNSET_KEY"

[report]
dir = "{}/reports"
domain = "区域经济"
"#,
        root.display()
    );

    let config_path = config_dir.join("rh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn corpus_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("data").join("policies")
}

fn run_rh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("RH_INTEGRATION_UNSET_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_kb_build_writes_sibling_files() {
    let (tmp, config_path) = setup_test_env();
    let corpus = corpus_dir(&tmp);

    let (stdout, stderr, success) = run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap()]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("ok"));
    assert!(tmp.path().join("data/policies_chunks.json").is_file());
    assert!(tmp.path().join("data/policies_index.bin").is_file());

    let chunks: Vec<String> =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("data/policies_chunks.json")).unwrap())
            .unwrap();
    assert!(chunks.iter().any(|c| c.contains("年份: 2023")));
    assert!(!chunks.iter().any(|c| c.contains("不在加载范围内")));
}

#[test]
fn test_kb_build_skips_existing() {
    let (tmp, config_path) = setup_test_env();
    let corpus = corpus_dir(&tmp);

    run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap()]);
    let (stdout, _, success) = run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("already built"));

    let (stdout, _, success) =
        run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap(), "--force"]);
    assert!(success);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_kb_search_respects_k() {
    let (tmp, config_path) = setup_test_env();
    let corpus = corpus_dir(&tmp);
    run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap()]);

    let (stdout, stderr, success) = run_rh(
        &config_path,
        &["kb", "search", corpus.to_str().unwrap(), "人口增长", "-k", "2"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("2. ["));
    assert!(!stdout.contains("3. ["));
}

#[test]
fn test_kb_search_is_deterministic() {
    let (tmp, config_path) = setup_test_env();
    let corpus = corpus_dir(&tmp);
    run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap()]);

    let args = ["kb", "search", corpus.to_str().unwrap(), "地铁线路"];
    let (first, _, _) = run_rh(&config_path, &args);
    let (second, _, _) = run_rh(&config_path, &args);
    assert_eq!(first, second);
}

#[test]
fn test_kb_search_without_build_fails() {
    let (tmp, config_path) = setup_test_env();
    let corpus = corpus_dir(&tmp);

    let (_, stderr, success) = run_rh(&config_path, &["kb", "search", corpus.to_str().unwrap(), "人口"]);
    assert!(!success);
    assert!(stderr.contains("not built"));
}

#[test]
fn test_kb_ask_needs_api_key() {
    let (tmp, config_path) = setup_test_env();
    let corpus = corpus_dir(&tmp);
    run_rh(&config_path, &["kb", "build", corpus.to_str().unwrap()]);

    let (_, stderr, success) = run_rh(&config_path, &["kb", "ask", corpus.to_str().unwrap(), "人口如何变化？"]);
    assert!(!success);
    assert!(stderr.contains("RH_INTEGRATION_UNSET_KEY"));
}

#[test]
fn test_report_local_parse_and_compile() {
    let (tmp, config_path) = setup_test_env();
    let reports = tmp.path().join("reports");

    // Seed a report by hand: the outline step needs a live model.
    let (_, _, success) = run_rh(&config_path, &["report", "status", "--title", "区域报告"]);
    assert!(!success);
    seed_report(&reports, "区域报告");

    let (stdout, stderr, success) =
        run_rh(&config_path, &["report", "parse", "--title", "区域报告", "--local"]);
    assert!(success, "parse failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("placeholders: 2"));
    assert_eq!(
        fs::read_to_string(reports.join("区域报告.placeholders.txt")).unwrap(),
        "目的\n背景"
    );
    let template = fs::read_to_string(reports.join("区域报告.template.txt")).unwrap();
    assert!(template.contains("{目的}"));
    assert!(template.contains("{背景}"));

    // Compiling without paragraphs fails.
    let (_, stderr, success) = run_rh(&config_path, &["report", "compile", "--title", "区域报告"]);
    assert!(!success);
    assert!(stderr.contains("目的"));

    fill_paragraphs(&reports.join("区域报告.state.json"));
    let (stdout, stderr, success) = run_rh(&config_path, &["report", "compile", "--title", "区域报告"]);
    assert!(success, "compile failed: stdout={}, stderr={}", stdout, stderr);
    let draft = fs::read_to_string(reports.join("区域报告.draft.txt")).unwrap();
    assert!(draft.contains("评估经济发展。"));
    assert!(draft.contains("人口持续增长。"));
    assert!(!draft.contains("撰写内容包括："));

    let (stdout, _, success) = run_rh(&config_path, &["report", "status", "--title", "区域报告"]);
    assert!(success);
    assert!(stdout.contains("stage: draft compiled"));
    assert!(stdout.contains("paragraphs: 2 / 2"));
}

#[test]
fn test_report_export_html() {
    let (tmp, config_path) = setup_test_env();
    let reports = tmp.path().join("reports");
    seed_report(&reports, "区域报告");
    run_rh(&config_path, &["report", "parse", "--title", "区域报告", "--local"]);
    fill_paragraphs(&reports.join("区域报告.state.json"));
    run_rh(&config_path, &["report", "compile", "--title", "区域报告"]);

    // Not optimized yet.
    let (_, stderr, success) = run_rh(&config_path, &["report", "export", "--title", "区域报告"]);
    assert!(!success);
    assert!(stderr.contains("--draft"));

    let (stdout, stderr, success) =
        run_rh(&config_path, &["report", "export", "--title", "区域报告", "--draft"]);
    assert!(success, "export failed: stdout={}, stderr={}", stdout, stderr);
    let html = fs::read_to_string(reports.join("区域报告.html")).unwrap();
    assert!(html.contains("<title>区域报告</title>"));
    assert!(html.contains("<h2>1 总述</h2>"));
    assert!(html.contains("评估经济发展。"));
}

#[test]
fn test_report_parse_picks_up_edited_outline() {
    let (tmp, config_path) = setup_test_env();
    let reports = tmp.path().join("reports");
    seed_report(&reports, "t");

    fs::write(
        reports.join("t.outline.txt"),
        "1 现状\n撰写内容包括：人口、交通、产业\n",
    )
    .unwrap();
    let (stdout, _, success) = run_rh(&config_path, &["report", "parse", "--title", "t", "--local"]);
    assert!(success);
    assert!(stdout.contains("placeholders: 3"));
    assert!(stdout.contains("产业"));
}

#[test]
fn test_report_outline_needs_api_key() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_rh(&config_path, &["report", "outline", "--title", "t"]);
    assert!(!success);
    assert!(stderr.contains("RH_INTEGRATION_UNSET_KEY"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 0\n").unwrap();
    let (_, stderr, success) = run_rh(&bad, &["report", "status", "--title", "t"]);
    assert!(!success);
    assert!(stderr.contains("chunk_size"));
}

/// Write a state file holding just an outline, as `report outline` would.
fn seed_report(reports: &Path, title: &str) {
    fs::create_dir_all(reports).unwrap();
    let state = serde_json::json!({
        "request": {
            "title": title,
            "domain": "区域经济",
            "requirements": "",
            "temperature": 0.8,
            "top_k": 3,
            "window_chars": 1500,
            "long_model": "glm-4-long"
        },
        "stage": {"stage": "outline_drafted"},
        "outline": OUTLINE,
        "scheme": null,
        "paragraphs": {},
        "draft": null,
        "optimized": []
    });
    fs::write(
        reports.join(format!("{}.state.json", title)),
        serde_json::to_string_pretty(&state).unwrap(),
    )
    .unwrap();
    fs::write(reports.join(format!("{}.outline.txt", title)), OUTLINE).unwrap();
}

fn fill_paragraphs(state_path: &Path) {
    let mut state: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(state_path).unwrap()).unwrap();
    state["paragraphs"] = serde_json::json!({
        "目的": "评估经济发展。",
        "背景": "人口持续增长。"
    });
    state["stage"] = serde_json::json!({"stage": "paragraphs_pending", "remaining": 0});
    fs::write(state_path, serde_json::to_string_pretty(&state).unwrap()).unwrap();
}
