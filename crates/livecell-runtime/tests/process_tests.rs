//! Process runtime tests driven through bootstrap and engine
//!
//! Require a POSIX `sh` on the path.

use livecell_runtime::{
    ArtifactKind, BootstrapPhase, BootstrapPipeline, ExecutionEngine, ExecutionRequest,
    FailureCategory, ProcessRuntime, ProcessRuntimeConfig, ReadyHandle, NO_OUTPUT_PLACEHOLDER,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

async fn ready(config: ProcessRuntimeConfig) -> (BootstrapPipeline, ReadyHandle) {
    let pipeline = BootstrapPipeline::new(Arc::new(ProcessRuntime::new(config)), 8);
    let handle = pipeline.ensure_ready().await;
    (pipeline, handle)
}

fn request(code: &str) -> ExecutionRequest {
    ExecutionRequest::new("cell-test-0", code)
}

#[tokio::test]
async fn shell_boots_and_runs() {
    let (pipeline, handle) = ready(ProcessRuntimeConfig::shell()).await;
    assert!(!handle.degraded);
    assert_eq!(pipeline.status().phase, BootstrapPhase::Ready);

    let result = ExecutionEngine::default()
        .execute(&handle, request("echo hello\necho $((6 * 7))"))
        .await;
    assert!(result.is_success());
    assert_eq!(result.text.full(), "hello\n42\n");
}

#[tokio::test]
async fn silent_script_gets_placeholder() {
    let (_, handle) = ready(ProcessRuntimeConfig::shell()).await;
    let result = ExecutionEngine::default()
        .execute(&handle, request("x=1"))
        .await;
    assert_eq!(result.text.full(), "");
    assert_eq!(result.display_text(), NO_OUTPUT_PLACEHOLDER);
}

#[tokio::test]
async fn stderr_is_appended() {
    let (_, handle) = ready(ProcessRuntimeConfig::shell()).await;
    let result = ExecutionEngine::default()
        .execute(&handle, request("echo out\necho warn >&2"))
        .await;
    assert!(result.is_success());
    assert!(result.text.full().starts_with("out\n"));
    assert!(result.text.full().contains("Errors:\nwarn"));
}

#[tokio::test]
async fn nonzero_exit_is_runtime_error() {
    let (_, handle) = ready(ProcessRuntimeConfig::shell()).await;
    let result = ExecutionEngine::default()
        .execute(&handle, request("echo first >&2\necho 'boom happened' >&2\nexit 3"))
        .await;

    let failure = result.error.as_ref().unwrap();
    assert_eq!(failure.category, FailureCategory::RuntimeError);
    assert_eq!(failure.message, "boom happened");
    assert!(failure.trace.as_deref().unwrap().contains("first"));
    assert!(result.text.full().starts_with("Execution error: boom happened"));
}

#[tokio::test]
async fn files_become_artifacts() {
    let (_, handle) = ready(ProcessRuntimeConfig::shell()).await;
    let result = ExecutionEngine::default()
        .execute(
            &handle,
            request("printf 'b' > b.txt\nprintf 'a' > a.svg\nprintf 'skip' > c.bin"),
        )
        .await;

    let names: Vec<&str> = result.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a.svg", "b.txt"]);
    assert_eq!(result.artifacts[0].kind, ArtifactKind::Image);
    assert_eq!(result.artifacts[1].bytes, b"b".to_vec());
    assert!(result.artifacts[0].id.starts_with("cell-test-0-artifact-0-"));
}

#[tokio::test]
async fn slow_script_times_out() {
    let config = ProcessRuntimeConfig::shell().with_timeout(Duration::from_secs(1));
    let (_, handle) = ready(config).await;
    let result = ExecutionEngine::default()
        .execute(&handle, request("sleep 10"))
        .await;
    let failure = result.error.unwrap();
    assert!(failure.message.contains("timed out"));
}

#[tokio::test]
async fn missing_interpreter_degrades() {
    let config = ProcessRuntimeConfig::shell().with_program("/nonexistent/livecell-sh");
    let (pipeline, handle) = ready(config).await;
    assert!(handle.degraded);
    assert!(pipeline.status().failure.unwrap().contains("cannot start"));

    let result = ExecutionEngine::default()
        .execute(&handle, request("echo hi"))
        .await;
    assert_eq!(result.error.unwrap().category, FailureCategory::BootstrapError);
}
