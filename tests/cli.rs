use std::fs;
use std::process::Command;

use tempfile::tempdir;

const EXE: &str = env!("CARGO_BIN_EXE_cluster-inference");

fn simulate(dir: &std::path::Path, scenario: &str) {
    let status = Command::new(EXE)
        .args([
            "simulate",
            "--scenario",
            scenario,
            "--n-samples",
            "60",
            "--n-features",
            "120",
            "--n-times",
            "3",
            "--support-size",
            "5",
            "--rho",
            "0.8",
            "--seed",
            "3",
            "--out-dir",
            dir.to_str().expect("path str"),
        ])
        .status()
        .expect("run simulate");
    assert!(status.success(), "simulate exited with status {status:?}");
}

#[test]
fn run_writes_one_line_per_feature() {
    let tmp = tempdir().expect("temporary directory");
    simulate(tmp.path(), "1d");
    let output = tmp.path().join("result.tsv");

    let status = Command::new(EXE)
        .current_dir(tmp.path())
        .args([
            "run",
            "--x",
            "x.csv",
            "--y",
            "y.csv",
            "--n-clusters",
            "20",
            "--grid",
            "120,1,1",
            "--output",
            output.to_str().expect("path str"),
        ])
        .status()
        .expect("run cluster-inference");
    assert!(status.success(), "run exited with status {status:?}");

    let text = fs::read_to_string(&output).expect("read result");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "feature\tbeta_hat\tpval\tpval_corr\tone_minus_pval\tone_minus_pval_corr"
    );
    assert_eq!(lines.len(), 121);
    for line in &lines[1..] {
        let fields: Vec<f64> = line
            .split('\t')
            .skip(1)
            .map(|field| field.parse().expect("numeric field"))
            .collect();
        assert_eq!(fields.len(), 5);
        assert!(fields[1..].iter().all(|p| (0.0..=1.0).contains(p)));
    }
}

#[test]
fn config_file_selects_the_temporal_method() {
    let tmp = tempdir().expect("temporary directory");
    simulate(tmp.path(), "temporal");
    let config = tmp.path().join("run.toml");
    fs::write(
        &config,
        "method = \"desparsified-group-lasso\"\nn_clusters = 15\ngrid = [120, 1, 1]\n",
    )
    .expect("write config");
    let output = tmp.path().join("result.tsv");

    let status = Command::new(EXE)
        .current_dir(tmp.path())
        .args([
            "run",
            "--x",
            "x.csv",
            "--y",
            "y.csv",
            "--config",
            "run.toml",
            "--output",
            "result.tsv",
        ])
        .status()
        .expect("run cluster-inference");
    assert!(status.success(), "run exited with status {status:?}");
    assert_eq!(fs::read_to_string(output).expect("read result").lines().count(), 121);
}

#[test]
fn unknown_method_is_reported() {
    let tmp = tempdir().expect("temporary directory");
    simulate(tmp.path(), "1d");

    let output = Command::new(EXE)
        .current_dir(tmp.path())
        .args([
            "run",
            "--x",
            "x.csv",
            "--y",
            "y.csv",
            "--method",
            "lll",
            "--output",
            "result.tsv",
        ])
        .output()
        .expect("run cluster-inference");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknow method 'lll'"), "stderr: {stderr}");
    assert!(!tmp.path().join("result.tsv").exists());
}
