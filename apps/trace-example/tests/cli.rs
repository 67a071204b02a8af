use std::path::Path;
use std::process::{Command, Output};

fn trace_example(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trace-example"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run trace-example")
}

#[test]
fn writes_one_profile() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("trace.pprof");

    let result = trace_example(
        &[
            "-o",
            &format!("output={}", output.display()),
            "-o",
            "workload.small_iterations=100000",
            "-o",
            "workload.pause=5ms",
        ],
        dir.path(),
    );

    assert!(result.status.success(), "stderr: {}", String::from_utf8_lossy(&result.stderr));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(std::fs::metadata(&output).unwrap().len() > 0);

    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("starting the complex function"), "stderr: {stderr}");
    assert!(stderr.contains("profile saved to"), "stderr: {stderr}");
}

#[test]
fn missing_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("does").join("not").join("exist.pprof");

    let result = trace_example(&["-o", &format!("output={}", output.display())], dir.path());

    assert_eq!(result.status.code(), Some(1));
    assert!(!output.exists());
    assert!(!dir.path().join("does").exists());

    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("could not start CPU profile"), "stderr: {stderr}");
    assert!(!stderr.contains("starting the complex function"), "workload must not run: {stderr}");
}

#[test]
fn invalid_configuration() {
    let dir = tempfile::tempdir().unwrap();

    let result = trace_example(&["-o", "profiler.frequency=-5"], dir.path());

    assert_eq!(result.status.code(), Some(1));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
