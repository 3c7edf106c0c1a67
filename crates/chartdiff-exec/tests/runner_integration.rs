//! Integration tests for ProcessRunner timeout and cleanup behaviour.

use std::time::{Duration, Instant};

use chartdiff_exec::{CommandSpec, ExitOutcome, ProcessRunner};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").args(["-c", script])
}

/// Test: a run exceeding the timeout is killed and reported as TimedOut
#[tokio::test]
async fn test_timeout_reports_elapsed_and_returns_promptly() {
    let runner = ProcessRunner::new(Duration::from_millis(300));
    let start = Instant::now();

    let output = runner.run(&sh("sleep 30")).await.expect("run failed");

    assert!(output.timed_out(), "outcome: {:?}", output.outcome);
    match output.outcome {
        ExitOutcome::TimedOut { elapsed } => assert!(elapsed >= Duration::from_millis(300)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "runner must not hang past the timeout"
    );
}

/// Test: stderr written before the timeout is still returned
#[tokio::test]
async fn test_partial_stderr_survives_timeout() {
    let runner = ProcessRunner::new(Duration::from_millis(500));

    let output = runner
        .run(&sh("echo 'rendering chart' >&2; sleep 30"))
        .await
        .expect("run failed");

    assert!(output.timed_out());
    assert!(
        output.stderr.contains("rendering chart"),
        "stderr: {:?}",
        output.stderr
    );
}

/// Test: background children holding the pipes are killed with the group
#[tokio::test]
async fn test_descendants_are_terminated_on_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("survived");
    let script = format!(
        "(sleep 2; touch '{}') & sleep 30",
        marker.display()
    );
    let runner = ProcessRunner::new(Duration::from_millis(300));
    let start = Instant::now();

    let output = runner.run(&sh(&script)).await.expect("run failed");
    assert!(output.timed_out());
    assert!(start.elapsed() < Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "descendant process outlived the run");
}

/// Test: once the leader has exited and been reaped its group is left alone
#[tokio::test]
async fn test_no_group_signal_after_normal_exit() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");
    let script = format!(
        "(sleep 1; touch '{}') >/dev/null 2>&1 & echo started",
        marker.display()
    );
    let runner = ProcessRunner::new(Duration::from_secs(10));

    let output = runner.run(&sh(&script)).await.expect("run failed");
    assert_eq!(output.outcome, ExitOutcome::Success);
    assert_eq!(output.stdout, "started\n");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(marker.exists(), "detached descendant was signalled after exit");
}

/// Test: a fast command is unaffected by the timeout
#[tokio::test]
async fn test_fast_command_within_timeout() {
    let runner = ProcessRunner::new(Duration::from_secs(5));

    let output = runner
        .run(&sh("echo out; echo warn >&2"))
        .await
        .expect("run failed");

    assert!(output.succeeded());
    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "warn\n");
}

/// Test: current_dir is honoured
#[tokio::test]
async fn test_current_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Chart.yaml"), "name: demo\n").unwrap();

    let output = ProcessRunner::default()
        .run(&CommandSpec::new("cat").arg("Chart.yaml").current_dir(dir.path()))
        .await
        .expect("run failed");

    assert_eq!(output.stdout, "name: demo\n");
}
