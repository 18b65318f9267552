//! End-to-end scenarios against a real Docker daemon.
//!
//! Run with `cargo test --test docker_scenarios -- --ignored`. The first run
//! pulls upstream images and builds the base images, so it is slow.

use bollard::query_parameters::{ListContainersOptions, ListImagesOptions};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use code_runner::core::{EngineError, RunStatus, TimeoutPhase};
use code_runner::{Engine, EngineConfig};

fn sample(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("test-codes")
        .join(name);
    fs::read(&path).unwrap_or_else(|e| panic!("missing sample {:?}: {}", path, e))
}

fn engine(work: &tempfile::TempDir, timeout_secs: u64) -> Engine<code_runner::DockerRuntime> {
    Engine::docker(EngineConfig {
        timeout_secs,
        work_root: Some(work.path().to_path_buf()),
        ..EngineConfig::default()
    })
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_python_hello() {
    let work = tempfile::tempdir().unwrap();
    let result = engine(&work, 30)
        .execute("python", &sample("hello.py"), &[])
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert!(result.stdout_lossy().contains("Hello from Python"));
    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_python_syntax_error_is_a_program_result() {
    let work = tempfile::tempdir().unwrap();
    let output = engine(&work, 30)
        .execute_combined("python", &sample("syntax_error.py"), &[])
        .await
        .unwrap();

    assert_ne!(output.exit_code, 0);
    assert!(output.combined_output.contains("SyntaxError"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_javascript_registry_dependency() {
    let work = tempfile::tempdir().unwrap();
    let runner = Engine::docker(EngineConfig {
        work_root: Some(work.path().to_path_buf()),
        ..EngineConfig::default()
    });

    let result = runner
        .execute("javascript", &sample("left_pad.js"), &["left-pad".to_string()])
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr_lossy());
    assert_eq!(result.stdout_lossy().trim_end(), "    x");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_infinite_loop_times_out() {
    let work = tempfile::tempdir().unwrap();
    let runner = engine(&work, 2);

    // Warm the base image so the measured time covers the run only
    runner.execute("python", b"pass", &[]).await.unwrap();

    let started = Instant::now();
    let err = runner
        .execute("python", &sample("infinite_loop.py"), &[])
        .await
        .unwrap_err();

    match err {
        EngineError::Timeout { phase, limit } => {
            assert_eq!(phase, TimeoutPhase::Run);
            assert_eq!(limit, Duration::from_secs(2));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_memory_hog_reports_memory_limit() {
    let work = tempfile::tempdir().unwrap();
    let result = engine(&work, 30)
        .execute("python", &sample("memory_hog.py"), &[])
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::MemoryLimitExceeded);
    assert_ne!(result.exit_code, 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_network_is_disabled() {
    let work = tempfile::tempdir().unwrap();
    let result = engine(&work, 30)
        .execute("python", &sample("network_escape.py"), &[])
        .await
        .unwrap();

    assert!(result.stdout_lossy().contains("network blocked"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_c_compile_error_is_a_program_result() {
    let work = tempfile::tempdir().unwrap();
    let runner = engine(&work, 30);

    let result = runner
        .execute("c", &sample("compile_error.c"), &[])
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::CompileError);
    assert_ne!(result.exit_code, 0);
    assert!(result.stderr_lossy().contains("error"));

    let result = runner.execute("c", &sample("hello.c"), &[]).await.unwrap();
    assert_eq!(result.stdout_lossy(), "Hello from C\n");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_java_keeps_streams_apart() {
    let work = tempfile::tempdir().unwrap();
    let result = engine(&work, 30)
        .execute("java", &sample("Solution.java"), &[])
        .await
        .unwrap();

    assert_eq!(result.exit_code, 4);
    assert_eq!(result.stdout_lossy(), "Hello from Java\n");
    assert_eq!(result.stderr_lossy(), "to stderr\n");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_same_submission_twice_is_idempotent() {
    let work = tempfile::tempdir().unwrap();
    let runner = engine(&work, 30);

    let first = runner.execute("python", &sample("hello.py"), &[]).await.unwrap();
    let second = runner.execute("python", &sample("hello.py"), &[]).await.unwrap();
    assert_eq!(first.exit_code, second.exit_code);
    assert_eq!(first.stdout, second.stdout);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_unsupported_language_needs_no_daemon_work() {
    let work = tempfile::tempdir().unwrap();
    let err = engine(&work, 30)
        .execute("cobol", b"DISPLAY 'HI'.", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnsupportedLanguage(_)));
    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_cancelled_run_leaves_no_sandbox_behind() {
    let work = tempfile::tempdir().unwrap();
    let runner = engine(&work, 120);
    runner.execute("ruby", b"puts 1", &[]).await.unwrap();

    let cancelled = tokio::time::timeout(
        Duration::from_secs(10),
        runner.execute("ruby", b"loop {}", &[]),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);

    // Removal of a dropped sandbox runs in the background
    tokio::time::sleep(Duration::from_secs(5)).await;

    let docker = code_runner::sandbox::client().await.unwrap();
    let containers = docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters: Some(HashMap::from([(
                "name".to_string(),
                vec!["code-runner-ruby-".to_string()],
            )])),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert!(containers.is_empty(), "leftover containers: {:?}", containers);

    let images = docker
        .list_images(Some(ListImagesOptions {
            filters: Some(HashMap::from([(
                "reference".to_string(),
                vec!["code-runner-ruby-*".to_string()],
            )])),
            ..Default::default()
        }))
        .await
        .unwrap();
    for image in images {
        for tag in image.repo_tags {
            assert!(tag.starts_with("code-runner-ruby-base:"), "leftover image {}", tag);
        }
    }
}
