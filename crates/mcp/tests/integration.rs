//! Integration tests against the mock tool server binary.

use std::time::Duration;

use serde_json::json;
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::error::AdapterError;
use toolbridge_core::tool::ToolOutcome;
use toolbridge_mcp::McpAdapter;

fn mock_server_path() -> String {
    env!("CARGO_BIN_EXE_mock-tool-server").to_string()
}

fn adapter(args: &[&str]) -> McpAdapter {
    McpAdapter::new(
        "mock",
        mock_server_path(),
        args.iter().map(|a| a.to_string()).collect(),
    )
    .with_request_timeout(Duration::from_secs(10))
}

fn ctx() -> CallContext {
    CallContext::new("tester")
}

#[tokio::test]
async fn connect_lists_tools_then_goes_idle() {
    let adapter = adapter(&[]);
    adapter.connect(false).await.unwrap();

    let tools = adapter.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "fail", "slow"]);
    assert_eq!(tools[1].glyph.as_deref(), Some("💥"));

    assert!(adapter.is_connected());
    assert_eq!(adapter.process_id().await, None);
    assert_eq!(adapter.generation(), 1);
}

#[tokio::test]
async fn requests_always_send_object_params() {
    let adapter = adapter(&["--strict"]);
    adapter.connect(false).await.unwrap();
    assert_eq!(adapter.list_tools().await.unwrap().len(), 3);

    let outcome = adapter.call_tool("echo", json!({}), &ctx()).await.unwrap();
    assert!(outcome.is_success(), "{outcome:?}");
    adapter.close().await;
}

#[tokio::test]
async fn first_call_spawns_lazily() {
    let adapter = adapter(&[]);
    adapter.connect(false).await.unwrap();

    let outcome = adapter
        .call_tool("echo", json!({"text": "hi"}), &ctx())
        .await
        .unwrap();
    let ToolOutcome::Success(value) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(value["echoed"]["text"], "hi");
    assert_eq!(adapter.generation(), 2);

    let pid = adapter.process_id().await.unwrap();
    assert_eq!(value["pid"], pid);

    // The process stays up for later calls.
    adapter.call_tool("echo", json!({}), &ctx()).await.unwrap();
    assert_eq!(adapter.generation(), 2);
    adapter.close().await;
}

#[tokio::test]
async fn remote_error_is_tool_failure() {
    let adapter = adapter(&[]);
    adapter.connect(false).await.unwrap();
    let outcome = adapter.call_tool("fail", json!({}), &ctx()).await.unwrap();
    assert_eq!(outcome, ToolOutcome::Failure("tool failed on purpose".into()));
    adapter.close().await;
}

#[tokio::test]
async fn noise_on_stdout_is_skipped() {
    let adapter = adapter(&["--noise"]);
    adapter.connect(false).await.unwrap();
    let outcome = adapter
        .call_tool("echo", json!({"n": 1}), &ctx())
        .await
        .unwrap();
    assert!(outcome.is_success());
    adapter.close().await;
}

#[tokio::test]
async fn crash_reports_exit_code_and_stderr_then_recovers() {
    let adapter = adapter(&["--crash-on", "echo"]);
    adapter.connect(false).await.unwrap();

    let err = adapter.call_tool("echo", json!({}), &ctx()).await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
    let message = err.to_string();
    assert!(message.contains("exit code 3"), "{message}");
    assert!(message.contains("fatal: echo blew up"), "{message}");
    let crashed_generation = adapter.generation();

    // The next call starts a new process.
    let outcome = adapter.call_tool("fail", json!({}), &ctx()).await.unwrap();
    assert!(!outcome.is_success());
    assert_eq!(adapter.generation(), crashed_generation + 1);
    adapter.close().await;
}

#[tokio::test]
async fn startup_failure_is_connect_error_with_stderr() {
    let adapter = adapter(&["--fail-start"]);
    let err = adapter.connect(false).await.unwrap_err();
    match err {
        AdapterError::ConnectFailed(msg) => {
            assert!(msg.contains("missing credentials"), "{msg}");
            assert!(msg.contains("exit code 2"), "{msg}");
        }
        other => panic!("expected connect failure, got {other:?}"),
    }
    assert!(!adapter.is_connected());
}

#[tokio::test]
async fn failed_start_is_not_retried_within_interval() {
    let adapter = adapter(&["--fail-start"]).with_connect_retry_interval(Duration::from_secs(60));
    assert!(adapter.connect(false).await.is_err());
    assert_eq!(adapter.generation(), 1);

    let err = adapter.connect(false).await.unwrap_err();
    assert!(err.to_string().contains("next attempt in"), "{err}");
    assert_eq!(adapter.generation(), 1);

    // Forcing skips the interval.
    assert!(adapter.connect(true).await.is_err());
    assert_eq!(adapter.generation(), 2);
}

#[tokio::test]
async fn failed_start_is_retried_after_interval() {
    let adapter =
        adapter(&["--fail-start"]).with_connect_retry_interval(Duration::from_millis(100));
    assert!(adapter.connect(false).await.is_err());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(adapter.connect(false).await.is_err());
    assert_eq!(adapter.generation(), 2);
}

#[tokio::test]
async fn successful_connect_does_not_hold_off_the_next() {
    let adapter = adapter(&[]).with_connect_retry_interval(Duration::from_secs(60));
    adapter.connect(false).await.unwrap();
    adapter.close().await;

    adapter.connect(false).await.unwrap();
    assert!(adapter.is_connected());
    assert_eq!(adapter.generation(), 2);
    adapter.close().await;
}

#[tokio::test]
async fn slow_call_times_out() {
    let adapter = McpAdapter::new(
        "mock",
        mock_server_path(),
        vec!["--slow-tool".into(), "slow:3000".into()],
    )
    .with_request_timeout(Duration::from_secs(1));
    adapter.connect(false).await.unwrap();

    let err = adapter.call_tool("slow", json!({}), &ctx()).await.unwrap_err();
    assert!(matches!(err, AdapterError::Timeout(1)), "got {err:?}");
    adapter.close().await;
}

#[tokio::test]
async fn forced_reconnect_respawns() {
    let adapter = adapter(&[]).with_idle_after_listing(false);
    adapter.connect(false).await.unwrap();
    let first = adapter.process_id().await.unwrap();

    adapter.connect(false).await.unwrap();
    assert_eq!(adapter.process_id().await, Some(first));

    adapter.connect(true).await.unwrap();
    let second = adapter.process_id().await.unwrap();
    assert_ne!(first, second);
    adapter.close().await;
}

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn echo_pid(adapter: &McpAdapter, runtime: &tokio::runtime::Runtime) -> serde_json::Value {
    runtime.block_on(async {
        let outcome = adapter
            .call_tool("echo", json!({"again": true}), &ctx())
            .await
            .unwrap();
        let ToolOutcome::Success(value) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        value["pid"].clone()
    })
}

#[test]
fn call_from_a_new_runtime_respawns_the_server() {
    let adapter = adapter(&[]).with_idle_after_listing(false);

    let first_runtime = current_thread_runtime();
    let first_pid = first_runtime.block_on(async {
        adapter.connect(false).await.unwrap();
        adapter.process_id().await.unwrap()
    });
    drop(first_runtime);

    // Owning runtime shut down.
    let second_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let second_pid = echo_pid(&adapter, &second_runtime);
    assert_ne!(second_pid, first_pid);
    assert_eq!(adapter.generation(), 2);

    // Owning runtime still alive and able to make progress.
    let third_runtime = current_thread_runtime();
    let third_pid = echo_pid(&adapter, &third_runtime);
    assert_ne!(third_pid, second_pid);
    assert_eq!(adapter.generation(), 3);

    // Same runtime again reuses the process.
    assert_eq!(echo_pid(&adapter, &third_runtime), third_pid);
    assert_eq!(adapter.generation(), 3);

    third_runtime.block_on(adapter.close());
    drop(second_runtime);
}

#[test]
fn idle_owning_runtime_does_not_stall_calls() {
    let adapter = McpAdapter::new("mock", mock_server_path(), vec![])
        .with_request_timeout(Duration::from_secs(3))
        .with_idle_after_listing(false);

    // Connected on a current-thread runtime that is never driven again.
    let idle_runtime = current_thread_runtime();
    let first_pid = idle_runtime.block_on(async {
        adapter.connect(false).await.unwrap();
        adapter.process_id().await.unwrap()
    });

    let caller = current_thread_runtime();
    let started = std::time::Instant::now();
    let pid = echo_pid(&adapter, &caller);
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    assert_ne!(pid, first_pid);
    assert_eq!(adapter.generation(), 2);

    caller.block_on(adapter.close());
    drop(idle_runtime);
}
