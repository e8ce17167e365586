mod common;

use anyhow::Context as _;
use common::{TIMEOUT, auth_data_header, result_text, rpc, spawn_server, tool_call};
use serde_json::{Value, json};

#[tokio::test]
async fn echo_scenario_over_post_mcp() -> anyhow::Result<()> {
    let server = spawn_server().await?;

    let resp = server
        .post_mcp("tok", &tool_call(1, "echo", json!({"text": "hi"})))
        .await?;
    anyhow::ensure!(resp.status() == 200, "status {}", resp.status());
    let msg: Value = resp.json().await?;
    anyhow::ensure!(msg["id"] == json!(1));
    anyhow::ensure!(msg["result"]["content"] == json!([{"type": "text", "text": "hi"}]));

    let msg: Value = server
        .post_mcp("tok", &tool_call(2, "echo", json!({})))
        .await?
        .json()
        .await?;
    anyhow::ensure!(msg["result"]["isError"] == json!(true));
    let text = result_text(&msg)?;
    anyhow::ensure!(text.contains("'text'"), "{text}");
    anyhow::ensure!(
        msg["result"]["structuredContent"]["type"] == json!("validation-errors"),
        "{msg}"
    );

    let msg: Value = server
        .post_mcp("tok", &tool_call(3, "echo2", json!({})))
        .await?
        .json()
        .await?;
    anyhow::ensure!(result_text(&msg)? == "unknown tool: echo2");
    Ok(())
}

#[tokio::test]
async fn initialize_and_list_tools() -> anyhow::Result<()> {
    let server = spawn_server().await?;

    let msg: Value = server
        .post_mcp(
            "tok",
            &rpc(
                1,
                "initialize",
                json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "it", "version": "0"}
                }),
            ),
        )
        .await?
        .json()
        .await?;
    anyhow::ensure!(msg["result"]["protocolVersion"] == json!("2025-03-26"), "{msg}");

    let msg: Value = server
        .post_mcp("tok", &rpc(2, "tools/list", json!({})))
        .await?
        .json()
        .await?;
    let names: Vec<&str> = msg["result"]["tools"]
        .as_array()
        .context("tools array")?
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    anyhow::ensure!(names == ["echo", "whoami", "token_echo"], "{names:?}");
    Ok(())
}

#[tokio::test]
async fn notifications_are_accepted_without_body() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    let resp = server
        .post_mcp(
            "tok",
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await?;
    anyhow::ensure!(resp.status() == 202, "status {}", resp.status());
    Ok(())
}

#[tokio::test]
async fn unsupported_verbs_get_protocol_405() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    for method in [reqwest::Method::GET, reqwest::Method::DELETE] {
        let resp = server
            .http
            .request(method.clone(), server.url("/mcp"))
            .header("x-auth-token", "tok")
            .send()
            .await?;
        anyhow::ensure!(resp.status() == 405, "{method}: {}", resp.status());
        anyhow::ensure!(
            resp.headers().get("allow").and_then(|v| v.to_str().ok()) == Some("POST"),
            "{method}: missing Allow"
        );
        let body: Value = resp.json().await?;
        anyhow::ensure!(body["jsonrpc"] == json!("2.0"));
        anyhow::ensure!(body["error"]["code"] == json!(-32000), "{body}");
        anyhow::ensure!(body["error"]["message"] == json!("Method not allowed."));
    }
    Ok(())
}

#[tokio::test]
async fn malformed_bodies_are_transport_errors() -> anyhow::Result<()> {
    let server = spawn_server().await?;

    let resp = server
        .http
        .post(server.url("/mcp"))
        .header("x-auth-token", "tok")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    anyhow::ensure!(resp.status() == 400);
    let body: Value = resp.json().await?;
    anyhow::ensure!(body["error"]["code"] == json!(-32700), "{body}");

    let resp = server
        .post_mcp("tok", &json!([rpc(1, "ping", json!({}))]))
        .await?;
    anyhow::ensure!(resp.status() == 400);
    let body: Value = resp.json().await?;
    anyhow::ensure!(body["error"]["code"] == json!(-32600), "{body}");

    // A null id must not be swallowed as a notification with an empty 202.
    let null_id = json!({
        "jsonrpc": "2.0",
        "id": null,
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"text": "hi"}}
    });
    let resp = server.post_mcp("tok", &null_id).await?;
    anyhow::ensure!(resp.status() == 400, "status {}", resp.status());
    let body: Value = resp.json().await?;
    anyhow::ensure!(body["error"]["code"] == json!(-32600), "{body}");

    let body: Value = server
        .post_mcp("tok", &rpc(7, "resources/list", json!({})))
        .await?
        .json()
        .await?;
    anyhow::ensure!(body["error"]["code"] == json!(-32601), "{body}");
    anyhow::ensure!(body["id"] == json!(7));
    Ok(())
}

#[tokio::test]
async fn missing_credentials_get_401_challenge() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    let resp = server
        .http
        .post(server.url("/mcp"))
        .json(&rpc(1, "ping", json!({})))
        .send()
        .await?;
    anyhow::ensure!(resp.status() == 401);
    let challenge = resp
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .context("WWW-Authenticate")?
        .to_string();
    anyhow::ensure!(challenge.starts_with("Bearer realm=\"mcp\""), "{challenge}");
    anyhow::ensure!(
        challenge.contains("resource_metadata=\"https://toolhost.test/"),
        "{challenge}"
    );
    let body: Value = resp.json().await?;
    anyhow::ensure!(body["error"]["code"] == json!("unauthorized"), "{body}");
    Ok(())
}

#[tokio::test]
async fn auth_data_blob_and_bearer_are_accepted() -> anyhow::Result<()> {
    let server = spawn_server().await?;

    let blob = auth_data_header(&json!({
        "access_token": "bot-token",
        "authed_user": {"access_token": "user-token"},
        "team_id": "T42"
    }));
    let msg: Value = server
        .http
        .post(server.url("/mcp"))
        .header("x-auth-data", blob)
        .json(&tool_call(1, "whoami", json!({})))
        .send()
        .await?
        .json()
        .await?;
    let summary = &msg["result"]["structuredContent"];
    anyhow::ensure!(summary["user_token"] == json!(true), "{msg}");
    anyhow::ensure!(summary["tenant_id"] == json!("T42"), "{msg}");
    anyhow::ensure!(!msg.to_string().contains("bot-token"), "secret leaked: {msg}");

    let msg: Value = server
        .http
        .post(server.url("/mcp"))
        .bearer_auth("bearer-token")
        .json(&tool_call(2, "token_echo", json!({"delay_ms": 0})))
        .send()
        .await?
        .json()
        .await?;
    anyhow::ensure!(result_text(&msg)? == "bearer-token");
    Ok(())
}

#[tokio::test]
async fn health_reports_ok() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    let body: Value = server
        .http
        .get(server.url("/health"))
        .timeout(TIMEOUT)
        .send()
        .await?
        .json()
        .await?;
    anyhow::ensure!(body == json!({"status": "ok"}));
    Ok(())
}
