use std::path::Path;
use std::process::{Command, Output};

const TINY: &[&str] = &[
    "--rows",
    "8",
    "--cols",
    "8",
    "--steps",
    "4",
    "--classification-steps",
    "16",
    "--hash-window",
    "16",
    "--lambda-trials",
    "1",
];

fn lifelike(args: &[&str]) -> Output {
    let bin = env!("CARGO_BIN_EXE_lifelike");
    let mut cmd = Command::new(bin);
    cmd.args(args).env("RUST_LOG", "off");
    for var in [
        "LIFELIKE_CONFIG",
        "LIFELIKE_CHECKPOINT",
        "LIFELIKE_DB",
        "LIFELIKE_WORKERS",
        "LIFELIKE_BATCH_SIZE",
        "LIFELIKE_CHECKPOINT_INTERVAL",
        "LIFELIKE_COMPLEXITY_TABLE",
        "LIFELIKE_ROWS",
        "LIFELIKE_COLS",
        "LIFELIKE_STEPS",
        "LIFELIKE_CLASSIFICATION_STEPS",
        "LIFELIKE_SEED",
    ] {
        cmd.env_remove(var);
    }
    cmd.output().expect("failed to run lifelike binary")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn notation_converts_both_ways() {
    assert_eq!(stdout(&lifelike(&["notation", "4108"])).trim(), "4108 B3/S23");
    assert_eq!(stdout(&lifelike(&["notation", "B3/S23"])).trim(), "4108 B3/S23");
    assert_eq!(stdout(&lifelike(&["notation", "Seeds"])).trim(), "2048 B2/S");
    assert!(!lifelike(&["notation", "B9/S"]).status.success());
    assert!(!lifelike(&["notation", "262144"]).status.success());
}

#[test]
fn measure_emits_a_json_record() {
    let mut args = vec!["measure", "life", "--json"];
    args.extend_from_slice(TINY);
    let out = stdout(&lifelike(&args));
    let record: serde_json::Value = serde_json::from_str(&out).expect("json record");
    assert_eq!(record["rule_id"], 4108);
    assert_eq!(record["rule_string"], "B3/S23");
    assert!(record["D"].is_number());
}

#[test]
fn classify_reports_extinction_for_the_empty_rule() {
    let mut args = vec!["classify", "B/S", "--json"];
    args.extend_from_slice(TINY);
    let out = stdout(&lifelike(&args));
    let report: serde_json::Value = serde_json::from_str(&out).expect("json report");
    assert_eq!(report["classification"], "extinct");
    assert_eq!(report["period"], 0);
    assert_eq!(report["population"], 0);
}

#[test]
fn survey_then_export_stats_and_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let checkpoint = dir.path().join("checkpoint.json");
    let csv = dir.path().join("results.csv");
    let db = dir.path().join("results.duckdb");

    let mut args = vec![
        "survey",
        "--checkpoint",
        path_arg(&checkpoint),
        "--csv",
        path_arg(&csv),
        "--db",
        path_arg(&db),
        "--start",
        "100",
        "--end",
        "140",
        "--workers",
        "2",
        "--batch-size",
        "5",
        "--quiet",
    ];
    args.extend_from_slice(TINY);
    let out = stdout(&lifelike(&args));
    assert!(out.contains("completed"), "unexpected survey output: {out}");

    let written = std::fs::read_to_string(&csv).expect("csv written");
    assert_eq!(written.lines().count(), 41);
    assert!(written.starts_with("rule_id,birth_mask,survival_mask,rule_string,lambda,D,"));

    let stats = stdout(&lifelike(&["stats", "--checkpoint", path_arg(&checkpoint), "--json"]));
    let stats: serde_json::Value = serde_json::from_str(&stats).expect("stats json");
    assert_eq!(stats["count"], 40);

    let exported = stdout(&lifelike(&["export", "--db", path_arg(&db)]));
    assert_eq!(exported, written);

    let queried = stdout(&lifelike(&[
        "query",
        "--db",
        path_arg(&db),
        "--class",
        "extinct,fixed,periodic,aperiodic",
        "--csv",
    ]));
    assert_eq!(queried.lines().count(), 41);

    let limited = stdout(&lifelike(&[
        "query",
        "--db",
        path_arg(&db),
        "--limit",
        "3",
        "--csv",
    ]));
    assert_eq!(limited.lines().count(), 4);
}

#[test]
fn stopped_survey_resumes_to_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let checkpoint = dir.path().join("checkpoint.json");
    let base = [
        "survey",
        "--checkpoint",
        path_arg(&checkpoint),
        "--start",
        "0",
        "--end",
        "100",
        "--workers",
        "1",
        "--batch-size",
        "5",
        "--quiet",
    ];

    let mut first: Vec<&str> = base.to_vec();
    first.extend_from_slice(&["--stop-after", "10"]);
    first.extend_from_slice(TINY);
    let out = stdout(&lifelike(&first));
    assert!(out.contains("idle"), "expected a stopped survey: {out}");

    let stats = stdout(&lifelike(&["stats", "--checkpoint", path_arg(&checkpoint), "--json"]));
    let stats: serde_json::Value = serde_json::from_str(&stats).expect("stats json");
    let partial = stats["count"].as_u64().expect("count");
    assert!((10..100).contains(&partial), "partial count {partial}");

    let mut second: Vec<&str> = base.to_vec();
    second.push("--resume");
    second.extend_from_slice(TINY);
    let out = stdout(&lifelike(&second));
    assert!(out.contains("completed"));

    let stats = stdout(&lifelike(&["stats", "--checkpoint", path_arg(&checkpoint), "--json"]));
    let stats: serde_json::Value = serde_json::from_str(&stats).expect("stats json");
    assert_eq!(stats["count"], 100);
}

#[test]
fn missing_checkpoint_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.json");
    let output = lifelike(&["stats", "--checkpoint", path_arg(&missing)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no checkpoint"));
}
