use std::process::{Command, Output};

fn bench() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bus-bench"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn run(args: &[&str]) -> Output {
    bench().args(args).output().expect("Failed to run bus-bench")
}

fn json_report(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad report {stdout:?}: {e}"))
}

#[test]
fn test_simulated_run_reports_json() {
    let output = run(&[
        "--simulate",
        "--count",
        "5",
        "--buffer-size",
        "1024",
        "--sim-delay-us",
        "1000",
        "--json",
    ]);
    assert!(output.status.success(), "{output:?}");

    let report = json_report(&output);
    assert_eq!(report["outcome"], "completed");
    assert_eq!(report["method"], "full-duplex");
    assert_eq!(report["samples"], 5);
    assert_eq!(report["transfer_count"], 5);
    assert_eq!(report["buffer_size"], 1024);
    let average = report["average_rate_bps"].as_f64().unwrap();
    // 1024 bytes take at least 1 ms each
    assert!(average > 0.0 && average <= 1_024_000.0 * 1.01, "{average}");
    assert!(report.get("error").is_none());
}

#[test]
fn test_each_method_completes() {
    for method in ["write", "full-duplex", "sequential"] {
        let output = run(&[
            "--simulate",
            "--method",
            method,
            "--count",
            "3",
            "--buffer-size",
            "256",
            "--json",
        ]);
        assert!(output.status.success(), "{method}: {output:?}");
        let report = json_report(&output);
        assert_eq!(report["method"], method);
        assert_eq!(report["samples"], 3);
    }
}

#[test]
fn test_transfer_failure_exits_nonzero() {
    let output = run(&[
        "--simulate",
        "--count",
        "10",
        "--buffer-size",
        "128",
        "--sim-fail-at",
        "3",
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");

    let report = json_report(&output);
    assert_eq!(report["outcome"], "failed");
    assert_eq!(report["samples"], 2);
    assert!(report["error"].as_str().unwrap().contains("transfer 3"));
}

#[test]
fn test_deadline_cancels_run() {
    let output = run(&[
        "--simulate",
        "--count",
        "100000",
        "--buffer-size",
        "64",
        "--sim-delay-us",
        "2000",
        "--run-seconds",
        "1",
        "--json",
    ]);
    assert!(output.status.success(), "{output:?}");

    let report = json_report(&output);
    assert_eq!(report["outcome"], "cancelled");
    let samples = report["samples"].as_u64().unwrap();
    assert!(samples > 0 && samples < 100_000, "{samples}");
    assert!(report.get("average_rate_bps").is_none());
}

#[test]
fn test_huge_deadline_runs_to_completion() {
    let output = run(&[
        "--simulate",
        "--count",
        "2",
        "--buffer-size",
        "64",
        "--run-seconds",
        "18446744073709551615",
        "--json",
    ]);
    assert!(output.status.success(), "{output:?}");
    let report = json_report(&output);
    assert_eq!(report["outcome"], "completed");
    assert_eq!(report["samples"], 2);
}

#[test]
fn test_text_report() {
    let output = run(&[
        "--simulate",
        "--method",
        "write",
        "--count",
        "2",
        "--buffer-size",
        "512",
    ]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("outcome:     completed"), "{stdout}");
    assert!(stdout.contains("average:"), "{stdout}");
}

#[test]
fn test_missing_device_fails() {
    let output = run(&["--device", "/definitely/not/a/spidev9.9", "--count", "1"]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unavailable"), "{stderr}");
}

#[test]
fn test_help_and_usage_errors() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--method"));
    assert!(stdout.contains("--simulate"));

    let output = run(&["--method", "bogus"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--method"));
}
