//! Integration tests against a scripted stdio server written in `sh`.

use hacxgent_config::mcp::McpServerConfig;
use hacxgent_core::error::{McpError, ToolError};
use hacxgent_core::tool::{InvokeContext, Tool};
use hacxgent_mcp::{McpClient, ServerState};
use std::path::Path;

const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}\n' "$id" ;;
    *'"method":"notifications/initialized"'*) ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}},{"name":"crash"},{"name":"slow"}]}}\n' "$id" ;;
    *'"name":"echo"'*)
      text=$(printf '%s' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echo: %s"}]}}\n' "$id" "$text" ;;
    *'"name":"slow"'*)
      sleep 5
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[]}}\n' "$id" ;;
    *'"name":"crash"'*)
      exit 1 ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"unknown"}}\n' "$id" ;;
  esac
done
"#;

fn write_script(dir: &Path) -> String {
    let path = dir.join("server.sh");
    std::fs::write(&path, FAKE_SERVER).unwrap();
    path.to_string_lossy().into_owned()
}

fn fake_server(name: &str, script: &str) -> McpServerConfig {
    let mut config = McpServerConfig::stdio(name, vec!["sh".into(), script.into()]);
    config.startup_timeout_sec = 5.0;
    config.tool_timeout_sec = 5.0;
    config
}

#[tokio::test]
async fn discovers_and_calls_tools() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let client = McpClient::new(vec![fake_server("fake", &script)]);

    assert!(client.start_all().await.is_empty());
    assert_eq!(client.server_state("fake").await, Some(ServerState::Ready));

    let tools = client.tools().await;
    let mut names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
    names.sort();
    assert_eq!(names, vec!["fake__crash", "fake__echo", "fake__slow"]);

    let echo = tools.iter().find(|t| t.name() == "fake__echo").unwrap();
    assert!(echo.is_available());
    let result = echo
        .execute(serde_json::json!({"text": "hi"}), &InvokeContext::new("c1"))
        .await
        .unwrap();
    assert_eq!(result.output, "echo: hi");

    client.shutdown().await;
    assert_eq!(client.server_state("fake").await, Some(ServerState::Closed));
}

#[tokio::test]
async fn unknown_method_surfaces_rpc_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let client = McpClient::new(vec![fake_server("fake", &script)]);
    client.start_all().await;

    let err = client
        .call_tool("fake", "missing", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
    client.shutdown().await;
}

#[tokio::test]
async fn process_exit_during_initialize_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let dying = McpServerConfig::stdio(
        "dying",
        vec!["sh".into(), "-c".into(), "read line; exit 3".into()],
    );
    let client = McpClient::new(vec![dying, fake_server("healthy", &script)]);

    let failures = client.start_all().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "dying");
    assert!(matches!(failures[0].1, McpError::ProcessExited { .. }));

    assert!(matches!(
        client.server_state("dying").await,
        Some(ServerState::Failed(_))
    ));
    assert_eq!(client.server_state("healthy").await, Some(ServerState::Ready));

    let tools = client.tools().await;
    assert!(tools.iter().all(|t| t.name().starts_with("healthy__")));
    client.shutdown().await;
}

#[tokio::test]
async fn process_exit_after_ready_makes_tools_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let client = McpClient::new(vec![fake_server("fake", &script)]);
    client.start_all().await;

    let tools = client.tools().await;
    let crash = tools.iter().find(|t| t.name() == "fake__crash").unwrap();
    let echo = tools.iter().find(|t| t.name() == "fake__echo").unwrap();

    let err = crash
        .execute(serde_json::json!({}), &InvokeContext::new("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Unavailable { .. }));
    assert!(!echo.is_available());

    let err = echo
        .execute(serde_json::json!({"text": "x"}), &InvokeContext::new("c2"))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Unavailable { .. }));
}

#[tokio::test]
async fn startup_timeout_fails_the_server() {
    let mut config = McpServerConfig::stdio("mute", vec!["sh".into(), "-c".into(), "sleep 5".into()]);
    config.startup_timeout_sec = 0.2;
    let client = McpClient::new(vec![config]);

    let failures = client.start_all().await;
    assert!(matches!(failures[0].1, McpError::StartupTimeout { .. }));
    assert!(matches!(
        client.server_state("mute").await,
        Some(ServerState::Failed(_))
    ));
}

#[tokio::test]
async fn slow_call_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let mut config = fake_server("fake", &script);
    config.tool_timeout_sec = 0.2;
    let client = McpClient::new(vec![config]);
    client.start_all().await;

    let err = client
        .call_tool("fake", "slow", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::CallTimeout { .. }));
    client.shutdown().await;
}

#[tokio::test]
async fn reload_replaces_servers() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let client = McpClient::new(vec![fake_server("one", &script)]);
    client.start_all().await;

    let failures = client.reload(vec![fake_server("two", &script)]).await;
    assert!(failures.is_empty());
    assert_eq!(client.server_names().await, vec!["two".to_string()]);
    assert_eq!(client.server_state("two").await, Some(ServerState::Ready));
    client.shutdown().await;
}
