use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lumi-web"))
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(bin_path())
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

const RUNS_JSON: &str = r#"[
    {"run": 146644, "end_time": "2010-10-20 10:00:00"},
    {"run": 146710, "end_time": "2010-10-27 10:00:00"},
    {"run": 146800, "end_time": "2010-10-28 10:00:00"}
]"#;

const LUMI_DB: &str = "\
Run,LS,Delivered,Recorded
146644,1,5000000,4000000
146644,2,3000000,2000000
146710,1,2000000,2000000
146800,1,1000000,500000
";

fn write_fixture(dir: &Path) -> PathBuf {
    fs::write(dir.join("runs.json"), RUNS_JSON).unwrap();
    fs::write(dir.join("lumi_db.csv"), LUMI_DB).unwrap();
    fs::write(
        dir.join("mask_tracker.json"),
        r#"{"146644": [[1, 1]], "146710": [[1, 10]]}"#,
    )
    .unwrap();
    let cfg = dir.join("lumi.cfg");
    fs::write(
        &cfg,
        "\
[Common]
RunReg = http://runregistry.example/xmlrpc
Runmin = 146000
Runmax = 147000
Group = Collisions10

[Lumi]
Cache = lumi_cache.txt
Query = grep -E '^(Run,|{run},)' lumi_db.csv
Runs = cat runs.json
Mask = cat mask_{scenario}.json
OutDir = web
Plots = false

[Scenarios]
Tracker = tracker
",
    )
    .unwrap();
    cfg
}

#[test]
fn resetlumi_with_lumicsv_exits_with_1() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_fixture(dir.path());
    let out = run_in(
        dir.path(),
        &[
            "-c",
            cfg.to_str().unwrap(),
            "--resetlumi",
            "--lumicsv",
            "lumi_db.csv",
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(!dir.path().join("lumi_cache.txt").exists());
}

#[test]
fn missing_cfg_exits_with_1() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(dir.path(), &["--resetlumi"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--cfg"), "stderr: {stderr}");
}

#[test]
fn help_exits_with_0() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(dir.path(), &["--help"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("--keeprange"));
}

#[test]
fn unreadable_config_exits_with_1() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(dir.path(), &["-c", "no_such.cfg"]);
    assert_eq!(out.status.code(), Some(1));
}

#[cfg(unix)]
#[test]
fn full_run_writes_cache_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_fixture(dir.path());
    let out = run_in(dir.path(), &["-c", cfg.to_str().unwrap()]);
    assert!(
        out.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );

    let cache = fs::read_to_string(dir.path().join("lumi_cache.txt")).unwrap();
    assert_eq!(
        cache,
        "146644_1 5000000 4000000\n146644_2 3000000 2000000\n146710_1 2000000 2000000\n146800_1 1000000 500000\n"
    );

    let html = fs::read_to_string(dir.path().join("web").join("index.html")).unwrap();
    assert!(html.contains("<td>11.000</td>"), "{html}");
    assert!(html.contains("<td>8.500</td>"), "{html}");
    assert!(html.contains("Tracker"));
    assert!(!html.contains("{{"));

    let table = fs::read_to_string(dir.path().join("web").join("runs.tsv")).unwrap();
    assert!(table.starts_with("Run\tDelivered\tRecorded\tLive\tAccepted_Tracker"));
    assert_eq!(table.lines().count(), 4);
}

#[cfg(unix)]
#[test]
fn rerun_with_unchanged_cache_gives_same_report_totals() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_fixture(dir.path());
    let first = run_in(dir.path(), &["-c", cfg.to_str().unwrap()]);
    assert!(first.status.success());
    let table_first = fs::read_to_string(dir.path().join("web").join("runs.tsv")).unwrap();

    let second = run_in(dir.path(), &["-c", cfg.to_str().unwrap()]);
    assert!(second.status.success());
    let table_second = fs::read_to_string(dir.path().join("web").join("runs.tsv")).unwrap();
    assert_eq!(table_first, table_second);
}
